//! Index fingerprint tracking.
//!
//! The vector index records which embedding provider/model built it. On
//! every vector-search attempt the planner compares that persisted
//! fingerprint against the configured one; a mismatch means the index
//! has drifted and vector search cannot be trusted until an explicit
//! rebuild. The check is read-only — only the rebuild path writes the
//! fingerprint.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::config::EmbeddingConfig;
use crate::store;

pub const META_FINGERPRINT: &str = "embedding_fingerprint";
pub const META_LAST_REBUILD: &str = "last_rebuild";

/// Outcome of a fingerprint check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintStatus {
    /// Persisted fingerprint matches the configured provider/model.
    Ok { fingerprint: String },
    /// No vector index has been built yet.
    Unbuilt,
    /// Index was built with a different provider/model. Both values are
    /// surfaced for diagnostics.
    Drift { index: String, configured: String },
}

impl FingerprintStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, FingerprintStatus::Ok { .. })
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            FingerprintStatus::Ok { .. } => None,
            FingerprintStatus::Unbuilt => Some("unbuilt"),
            FingerprintStatus::Drift { .. } => Some("drift"),
        }
    }
}

/// Compute the fingerprint for the configured embedding provider+model.
pub fn configured_fingerprint(config: &EmbeddingConfig) -> String {
    let model = config.model.as_deref().unwrap_or("");
    let mut hasher = Sha256::new();
    hasher.update(config.provider.as_bytes());
    hasher.update(b":");
    hasher.update(model.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Compare the persisted index fingerprint against the configured one.
/// Never mutates state.
pub async fn check(pool: &SqlitePool, config: &EmbeddingConfig) -> Result<FingerprintStatus> {
    let configured = configured_fingerprint(config);

    match store::get_meta(pool, META_FINGERPRINT).await? {
        None => Ok(FingerprintStatus::Unbuilt),
        Some(index) if index == configured => Ok(FingerprintStatus::Ok { fingerprint: index }),
        Some(index) => Ok(FingerprintStatus::Drift { index, configured }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(provider: &str, model: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.to_string(),
            model: Some(model.to_string()),
            dims: Some(384),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_fingerprint_stable() {
        let a = configured_fingerprint(&config_for("ollama", "nomic-embed-text"));
        let b = configured_fingerprint(&config_for("ollama", "nomic-embed-text"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_fingerprint_distinguishes_model() {
        let a = configured_fingerprint(&config_for("ollama", "nomic-embed-text"));
        let b = configured_fingerprint(&config_for("ollama", "mxbai-embed-large"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_distinguishes_provider() {
        let a = configured_fingerprint(&config_for("ollama", "m"));
        let b = configured_fingerprint(&config_for("openai", "m"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_status_reasons() {
        assert_eq!(FingerprintStatus::Unbuilt.reason(), Some("unbuilt"));
        assert_eq!(
            FingerprintStatus::Drift {
                index: "a".into(),
                configured: "b".into()
            }
            .reason(),
            Some("drift")
        );
        assert!(FingerprintStatus::Ok {
            fingerprint: "a".into()
        }
        .reason()
        .is_none());
    }
}
