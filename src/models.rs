//! Core data models used throughout memledger.
//!
//! These types represent the observation records, transient search
//! candidates, and ranked hits that flow through the retrieval and
//! packing pipeline.

use serde::{Deserialize, Serialize};

/// Trust tier of a record's source. Used to bias ranking and to gate
/// inclusion in context packs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustTier {
    Trusted,
    Unknown,
    Untrusted,
}

impl TrustTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustTier::Trusted => "trusted",
            TrustTier::Unknown => "unknown",
            TrustTier::Untrusted => "untrusted",
        }
    }

    /// Parse a stored trust value. Unrecognized values fall back to
    /// `Unknown` rather than failing the whole query.
    pub fn parse(s: &str) -> TrustTier {
        match s {
            "trusted" => TrustTier::Trusted,
            "untrusted" => TrustTier::Untrusted,
            _ => TrustTier::Unknown,
        }
    }
}

/// Search modality that produced a candidate. Fallback variants mark
/// hits from the companion-language field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Modality {
    Lexical,
    Vector,
    FallbackLexical,
    FallbackVector,
}

impl Modality {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Modality::FallbackLexical | Modality::FallbackVector)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Lexical => "lexical",
            Modality::Vector => "vector",
            Modality::FallbackLexical => "fallback-lexical",
            Modality::FallbackVector => "fallback-vector",
        }
    }
}

/// An observation record as stored in the ledger. Immutable once
/// written; this core never deletes records.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: String,
    pub text: String,
    pub text_alt: Option<String>,
    pub lang: Option<String>,
    pub kind: String,
    pub summary: Option<String>,
    pub importance: Option<f64>,
    pub trust: TrustTier,
    pub created_at: i64,
    pub source_ref: Option<String>,
}

/// A per-modality match produced by one search request. Transient;
/// lives for a single query invocation until the scorer merges it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub record_id: String,
    pub modality: Modality,
    pub raw_score: f64,
    pub snippet: String,
    pub kind: String,
    pub importance: Option<f64>,
    pub trust: TrustTier,
    pub created_at: i64,
}

/// A deduplicated, fused-score hit emitted by the hybrid scorer.
#[derive(Debug, Clone, Serialize)]
pub struct RankedHit {
    pub record_id: String,
    pub score: f64,
    pub modality: Modality,
    pub trust: TrustTier,
    pub importance: Option<f64>,
    #[serde(skip)]
    pub kind: String,
    #[serde(skip)]
    pub snippet: String,
    #[serde(skip)]
    pub created_at: i64,
}
