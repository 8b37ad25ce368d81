//! Query planning and execution.
//!
//! The planner decides which searches to issue for a query: always a
//! primary lexical search, a primary vector search when the index
//! fingerprint matches and the embedding gateway probed as available,
//! and a companion-language fallback pair when the primary results are
//! empty or low-confidence. Lexical and vector requests run
//! concurrently, each bounded by a timeout; a failed or timed-out
//! vector request is dropped with a warning while lexical proceeds.
//!
//! Every request carries a deterministic order key. The scorer's merge
//! is a pure function of the completed candidate set, so request
//! completion order never affects the final ranking.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::time::Duration;

use crate::config::Config;
use crate::embedding;
use crate::fingerprint::{self, FingerprintStatus};
use crate::models::{Candidate, Modality};
use crate::store::{self, TextField};

/// One planned search. The order key makes scorer tie-breaking
/// reproducible regardless of completion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub modality: Modality,
    pub field: TextField,
    pub query: String,
    pub order_key: u8,
}

/// Everything one query invocation produced: the completed candidate
/// set and any degraded-path warnings.
#[derive(Debug)]
pub struct PlanOutcome {
    pub candidates: Vec<Candidate>,
    pub warnings: Vec<String>,
    pub fallback_triggered: bool,
}

/// Plan the primary search requests. Pure.
pub fn plan_primary(query: &str, vector_usable: bool) -> Vec<SearchRequest> {
    let mut requests = vec![SearchRequest {
        modality: Modality::Lexical,
        field: TextField::Primary,
        query: query.to_string(),
        order_key: 0,
    }];
    if vector_usable {
        requests.push(SearchRequest {
            modality: Modality::Vector,
            field: TextField::Primary,
            query: query.to_string(),
            order_key: 1,
        });
    }
    requests
}

/// Plan the fallback search requests against the companion field. Pure.
pub fn plan_fallback(alt_query: &str, vector_usable: bool) -> Vec<SearchRequest> {
    let mut requests = vec![SearchRequest {
        modality: Modality::FallbackLexical,
        field: TextField::Companion,
        query: alt_query.to_string(),
        order_key: 2,
    }];
    if vector_usable {
        requests.push(SearchRequest {
            modality: Modality::FallbackVector,
            field: TextField::Companion,
            query: alt_query.to_string(),
            order_key: 3,
        });
    }
    requests
}

/// Confidence of the best completed primary hit, in [0, 1). `None` when
/// the primary set is empty. Pure.
///
/// Confidence must track match quality, not ranking weights: a fused,
/// min-max-normalized score always tops out near the channel weight no
/// matter how weak the match was. So lexical BM25 scores saturate as
/// `s / (s + 1)` and vector cosine similarity is clamped to [0, 1],
/// and the best single signal wins.
pub fn primary_confidence(candidates: &[Candidate]) -> Option<f64> {
    candidates
        .iter()
        .map(|c| match c.modality {
            Modality::Lexical | Modality::FallbackLexical => {
                let s = c.raw_score.max(0.0);
                s / (s + 1.0)
            }
            Modality::Vector | Modality::FallbackVector => c.raw_score.clamp(0.0, 1.0),
        })
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
}

/// Whether the fallback query should fire, given the confidence of the
/// best primary hit (None when the primary set is empty). Pure.
pub fn fallback_needed(top_primary_confidence: Option<f64>, threshold: f64) -> bool {
    match top_primary_confidence {
        None => true,
        Some(confidence) => confidence < threshold,
    }
}

/// Decide whether vector search is usable for this session: the index
/// fingerprint must match the configured model and the gateway must
/// have probed as reachable. Both failure modes fail open with a
/// warning; lexical search is unaffected.
async fn vector_usable(
    pool: &SqlitePool,
    config: &Config,
    warnings: &mut Vec<String>,
) -> Result<bool> {
    if !config.embedding.is_enabled() {
        warnings.push("embedding provider disabled; vector search skipped".to_string());
        return Ok(false);
    }

    match fingerprint::check(pool, &config.embedding).await? {
        FingerprintStatus::Ok { .. } => {}
        FingerprintStatus::Unbuilt => {
            warnings.push("vector index not built; vector search skipped".to_string());
            return Ok(false);
        }
        FingerprintStatus::Drift { index, configured } => {
            warnings.push(format!(
                "embedding model drift (index={}, configured={}); vector search skipped until rebuild",
                index, configured
            ));
            return Ok(false);
        }
    }

    if !embedding::probe_available(&config.embedding).await {
        warnings.push("embedding gateway unreachable; vector search skipped".to_string());
        return Ok(false);
    }

    Ok(true)
}

/// Execute one lexical + optional vector request pair concurrently.
///
/// Vector failures and timeouts drop that channel with a warning; the
/// lexical channel is load-bearing and propagates its errors.
async fn run_pair(
    pool: &SqlitePool,
    config: &Config,
    lexical: &SearchRequest,
    vector: Option<&SearchRequest>,
    warnings: &mut Vec<String>,
) -> Result<Vec<Candidate>> {
    let timeout = Duration::from_secs(config.retrieval.search_timeout_secs);

    let lexical_fut = tokio::time::timeout(
        timeout,
        store::lexical_search(
            pool,
            &lexical.query,
            lexical.field,
            config.retrieval.candidate_k_lexical,
        ),
    );

    let vector_fut = async {
        let req = vector?;
        let embedded = tokio::time::timeout(
            Duration::from_secs(config.embedding.timeout_secs),
            embedding::embed_query(&config.embedding, &req.query),
        )
        .await;

        let query_vec = match embedded {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return Some(Err(format!("embedding failed: {}", e))),
            Err(_) => return Some(Err("embedding timed out".to_string())),
        };

        let searched = tokio::time::timeout(
            timeout,
            store::vector_search(
                pool,
                &query_vec,
                req.modality,
                config.retrieval.candidate_k_vector,
            ),
        )
        .await;

        match searched {
            Ok(Ok(candidates)) => Some(Ok(candidates)),
            Ok(Err(e)) => Some(Err(format!("vector search failed: {}", e))),
            Err(_) => Some(Err("vector search timed out".to_string())),
        }
    };

    let (lexical_result, vector_result) = tokio::join!(lexical_fut, vector_fut);

    let (mut candidates, malformed) = lexical_result
        .map_err(|_| anyhow::anyhow!("lexical search timed out"))?
        .with_context(|| format!("lexical search failed ({})", lexical.modality.as_str()))?;

    for id in malformed {
        warnings.push(format!("record {} has no resolvable text; skipped", id));
    }

    match vector_result {
        Some(Ok(vector_candidates)) => candidates.extend(vector_candidates),
        Some(Err(reason)) => {
            // Fail open: the request is dropped, not retried.
            warnings.push(format!(
                "{} request dropped: {}",
                vector.map(|r| r.modality.as_str()).unwrap_or("vector"),
                reason
            ));
        }
        None => {}
    }

    Ok(candidates)
}

/// Plan and execute all searches for one query invocation.
///
/// `alt_query` is the caller-supplied companion-language translation;
/// without it the fallback path never fires.
pub async fn execute(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    alt_query: Option<&str>,
) -> Result<PlanOutcome> {
    let mut warnings = Vec::new();
    let vectors = vector_usable(pool, config, &mut warnings).await?;

    let primary = plan_primary(query, vectors);
    let (primary_lexical, primary_vector) = (&primary[0], primary.get(1));
    let mut candidates = run_pair(pool, config, primary_lexical, primary_vector, &mut warnings).await?;

    // Fallback trigger: companion field present in the corpus, a
    // translated query supplied, and primary results empty or below the
    // confidence threshold.
    let mut fallback_triggered = false;
    if config.retrieval.fallback_enabled {
        if let Some(alt) = alt_query {
            let confidence = primary_confidence(&candidates);

            if fallback_needed(confidence, config.retrieval.fallback_threshold)
                && store::has_companion_text(pool).await?
            {
                fallback_triggered = true;
                let fallback = plan_fallback(alt, vectors);
                let (fb_lexical, fb_vector) = (&fallback[0], fallback.get(1));
                let fallback_candidates =
                    run_pair(pool, config, fb_lexical, fb_vector, &mut warnings).await?;
                candidates.extend(fallback_candidates);
            }
        }
    }

    Ok(PlanOutcome {
        candidates,
        warnings,
        fallback_triggered,
    })
}
