use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub triage: TriageConfig,
    #[serde(default)]
    pub pack: PackConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Linear fusion weight for lexical scores.
    #[serde(default = "default_half")]
    pub weight_lexical: f64,
    /// Linear fusion weight for vector scores.
    #[serde(default = "default_half")]
    pub weight_vector: f64,
    /// Scale applied to fallback-modality scores so primary-language
    /// matches win score ties.
    #[serde(default = "default_fallback_discount")]
    pub fallback_discount: f64,
    /// Primary-hit confidence below which the companion-language
    /// fallback query fires. Confidence saturates with raw match
    /// strength, so a weak-but-nonempty primary still triggers.
    #[serde(default = "default_fallback_threshold")]
    pub fallback_threshold: f64,
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_lexical: i64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: i64,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
    /// Multiplicative boost for trusted records.
    #[serde(default = "default_trust_boost")]
    pub trust_boost: f64,
    /// Multiplicative penalty for untrusted records. Clamped to 0.5 at
    /// load so it can never invert a dominant lexical/vector match.
    #[serde(default = "default_untrust_penalty")]
    pub untrust_penalty: f64,
    /// Weight of the importance-derived boost.
    #[serde(default = "default_importance_weight")]
    pub importance_weight: f64,
    /// Trust gate for packing: "all" or "trusted-only".
    #[serde(default = "default_trust_policy")]
    pub trust_policy: String,
    /// Per-search timeout in seconds (store and gateway calls).
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            weight_lexical: default_half(),
            weight_vector: default_half(),
            fallback_discount: default_fallback_discount(),
            fallback_threshold: default_fallback_threshold(),
            fallback_enabled: true,
            candidate_k_lexical: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            final_limit: default_final_limit(),
            trust_boost: default_trust_boost(),
            untrust_penalty: default_untrust_penalty(),
            importance_weight: default_importance_weight(),
            trust_policy: default_trust_policy(),
            search_timeout_secs: default_search_timeout(),
        }
    }
}

fn default_half() -> f64 {
    0.5
}
fn default_fallback_discount() -> f64 {
    0.8
}
fn default_fallback_threshold() -> f64 {
    0.35
}
fn default_true() -> bool {
    true
}
fn default_candidate_k() -> i64 {
    80
}
fn default_final_limit() -> i64 {
    12
}
fn default_trust_boost() -> f64 {
    0.15
}
fn default_untrust_penalty() -> f64 {
    0.25
}
fn default_importance_weight() -> f64 {
    0.1
}
fn default_trust_policy() -> String {
    "all".to_string()
}
fn default_search_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Clamp limits applied to text before any provider call.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_head_chars")]
    pub head_chars: usize,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
            max_chars: default_max_chars(),
            head_chars: default_head_chars(),
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_chars() -> usize {
    8000
}
fn default_head_chars() -> usize {
    6000
}
fn default_max_bytes() -> usize {
    32000
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TriageConfig {
    /// Lookback window for error grouping and alert staleness.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    /// Occurrence count at which an error signature raises an alert.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: i64,
    /// Importance at or above which a task alert sets needs_attention.
    #[serde(default = "default_attention_importance")]
    pub attention_importance: f64,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            error_threshold: default_error_threshold(),
            attention_importance: default_attention_importance(),
        }
    }
}

fn default_lookback_days() -> i64 {
    7
}
fn default_error_threshold() -> i64 {
    3
}
fn default_attention_importance() -> f64 {
    0.7
}

#[derive(Debug, Deserialize, Clone)]
pub struct PackConfig {
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_budget_tokens")]
    pub budget_tokens: usize,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            budget_tokens: default_budget_tokens(),
        }
    }
}

fn default_max_items() -> usize {
    12
}
fn default_budget_tokens() -> usize {
    2000
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate retrieval
    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }
    if config.retrieval.weight_lexical < 0.0 || config.retrieval.weight_vector < 0.0 {
        anyhow::bail!("retrieval weights must be >= 0");
    }
    if !(0.0..=1.0).contains(&config.retrieval.fallback_discount) {
        anyhow::bail!("retrieval.fallback_discount must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.retrieval.fallback_threshold) {
        anyhow::bail!("retrieval.fallback_threshold must be in [0.0, 1.0]");
    }
    // Bounded so untrusted can be demoted but never zeroed out.
    config.retrieval.untrust_penalty = config.retrieval.untrust_penalty.clamp(0.0, 0.5);

    match config.retrieval.trust_policy.as_str() {
        "all" | "trusted-only" => {}
        other => anyhow::bail!(
            "Unknown trust policy: '{}'. Must be all or trusted-only.",
            other
        ),
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.embedding.head_chars > config.embedding.max_chars {
        anyhow::bail!("embedding.head_chars must be <= embedding.max_chars");
    }

    // Validate triage
    if config.triage.lookback_days < 1 {
        anyhow::bail!("triage.lookback_days must be >= 1");
    }
    if config.triage.error_threshold < 1 {
        anyhow::bail!("triage.error_threshold must be >= 1");
    }

    Ok(config)
}
