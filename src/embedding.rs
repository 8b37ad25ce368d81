//! Embedding gateway.
//!
//! The ledger treats embeddings as a remote capability that can be
//! absent, misconfigured, or flaky without taking retrieval down.
//! [`probe_available`] checks reachability once per process and caches
//! the answer; the planner consumes the cached value instead of
//! re-probing per query. [`clamp_text`] bounds every input by the
//! configured character and byte limits before it reaches a provider.
//!
//! Providers: `openai` (hosted, needs `OPENAI_API_KEY`), `ollama`
//! (local `/api/embed`), and `disabled`. Both HTTP providers share one
//! retry policy: 429 and 5xx responses and network errors back off
//! exponentially (1s doubling, capped at 32s); other 4xx responses fail
//! immediately.
//!
//! Vector storage helpers live here too: embeddings persist as
//! little-endian f32 BLOBs and are compared with [`cosine_similarity`].

use anyhow::{bail, Result};
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::config::EmbeddingConfig;

/// Metadata surface of a configured embedding backend. The actual
/// embedding call goes through [`embed_texts`], a free async function,
/// so the trait stays object-safe without async-trait machinery.
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier, e.g. `"text-embedding-3-small"`.
    fn model_name(&self) -> &str;
    /// Vector dimensionality the model produces.
    fn dims(&self) -> usize;
}

/// Clamp text to the configured embedding input limits.
///
/// Text over `max_chars` characters or `max_bytes` bytes is reduced to
/// its first `head_chars` characters (on a char boundary). Applied to
/// every provider input, including the availability probe.
pub fn clamp_text(config: &EmbeddingConfig, text: &str) -> String {
    let over_chars = text.chars().count() > config.max_chars;
    let over_bytes = text.len() > config.max_bytes;
    if !over_chars && !over_bytes {
        return text.to_string();
    }
    text.chars().take(config.head_chars).collect()
}

/// Embed a batch of texts using the configured provider.
///
/// Inputs are clamped via [`clamp_text`] before dispatch. Returns one
/// vector per input text, in input order.
///
/// # Errors
///
/// - `"disabled"` provider: always returns an error.
/// - `"openai"` / `"ollama"`: returns an error if required configuration
///   is missing, the API returns a non-retryable error, or all retries
///   are exhausted.
pub async fn embed_texts(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let clamped: Vec<String> = texts.iter().map(|t| clamp_text(config, t)).collect();

    match config.provider.as_str() {
        "openai" => embed_openai(config, &clamped).await,
        "ollama" => embed_ollama(config, &clamped).await,
        "disabled" => bail!("Embedding provider is disabled"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Embed a single query text.
///
/// Convenience wrapper around [`embed_texts`] for single-text use cases
/// (e.g. embedding a search query for vector search).
pub async fn embed_query(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>> {
    let results = embed_texts(config, &[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

static PROBE: OnceCell<bool> = OnceCell::const_new();

/// Probe the embedding gateway once per process lifetime.
///
/// Embeds a short canary string under the configured timeout; the result
/// is cached for the session. A disabled provider probes as unavailable
/// without any network call.
pub async fn probe_available(config: &EmbeddingConfig) -> bool {
    *PROBE
        .get_or_init(|| async {
            if !config.is_enabled() {
                return false;
            }
            let attempt = tokio::time::timeout(
                Duration::from_secs(config.timeout_secs),
                embed_query(config, "ping"),
            )
            .await;
            matches!(attempt, Ok(Ok(_)))
        })
        .await
}

/// Provider metadata resolved and validated from configuration.
struct GatewayModel {
    name: String,
    dims: usize,
}

impl EmbeddingProvider for GatewayModel {
    fn model_name(&self) -> &str {
        &self.name
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

fn required_model(config: &EmbeddingConfig, provider: &str) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required for {} provider", provider))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow::anyhow!("embedding.dims required for {} provider", provider))?;
    Ok((model, dims))
}

/// Resolve and validate the configured provider without making any
/// network call. Fails on unknown provider names, missing model/dims,
/// or (for OpenAI) a missing API key.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(GatewayModel {
            name: "disabled".to_string(),
            dims: 0,
        })),
        "openai" => {
            if std::env::var("OPENAI_API_KEY").is_err() {
                bail!("OPENAI_API_KEY environment variable not set");
            }
            let (name, dims) = required_model(config, "openai")?;
            Ok(Box::new(GatewayModel { name, dims }))
        }
        "ollama" => {
            let (name, dims) = required_model(config, "ollama")?;
            Ok(Box::new(GatewayModel { name, dims }))
        }
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// POST a JSON body with exponential backoff. Retries 429/5xx and
/// network errors; any other client error fails immediately.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Backoff: 1s, 2s, 4s, ... capped at 32s.
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow::anyhow!("{} error {}: {}", label, status, body_text));
                    continue;
                }
                bail!("{} error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("{} request failed: {}", label, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} failed after retries", label)))
}

async fn embed_openai(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    let body = serde_json::json!({ "model": model, "input": texts });

    let response: OpenAIEmbeddingResponse = serde_json::from_value(
        post_with_retry(
            &client,
            "https://api.openai.com/v1/embeddings",
            Some(&api_key),
            &body,
            config.max_retries,
            "OpenAI API",
        )
        .await?,
    )
    .map_err(|e| anyhow::anyhow!("Invalid OpenAI response: {}", e))?;

    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}

#[derive(serde::Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
}

#[derive(serde::Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
}

async fn embed_ollama(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;
    let url = config.url.as_deref().unwrap_or("http://localhost:11434");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    let body = serde_json::json!({ "model": model, "input": texts });

    let response: OllamaEmbeddingResponse = serde_json::from_value(
        post_with_retry(
            &client,
            &format!("{}/api/embed", url),
            None,
            &body,
            config.max_retries,
            "Ollama API",
        )
        .await?,
    )
    .map_err(|e| anyhow::anyhow!("Invalid Ollama response: {}", e))?;

    Ok(response.embeddings)
}

#[derive(serde::Deserialize)]
struct OllamaEmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a stored BLOB back into a float vector. Trailing bytes that
/// do not form a whole f32 are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`. Mismatched lengths, empty
/// vectors, and zero vectors all score 0.0 rather than erroring, so one
/// bad stored embedding cannot fail a whole search.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold(
        (0.0f32, 0.0f32, 0.0f32),
        |(dot, na, nb), (x, y)| (dot + x * y, na + x * x, nb + y * y),
    );

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
