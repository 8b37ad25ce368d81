//! Context-pack assembly.
//!
//! Greedily selects ranked sources under an item-count and token budget
//! and emits a structured, deterministic bundle plus an auditable trace
//! of every inclusion/exclusion decision. An item that would overflow
//! the budget is skipped, never truncated mid-item, so a later smaller
//! item can still fit. Serialization is deterministic: stable field
//! order, admission-order items, no locale-dependent formatting.
//!
//! The trace is redaction-safe — it carries provenance keys and
//! reasons, never the raw text of an item excluded for trust reasons.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::config::PackConfig;
use crate::models::TrustTier;

pub const PACK_SCHEMA: &str = "context-pack.v1";

/// A candidate item prepared for packing: the ranked record with its
/// full text and citations resolved.
#[derive(Debug, Clone)]
pub struct PackSource {
    pub record_ref: String,
    pub kind: String,
    pub trust: TrustTier,
    pub importance: Option<f64>,
    pub text: String,
    pub citations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackMeta {
    pub ts: String,
    pub query: String,
    pub budget_tokens: usize,
    pub max_items: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackItem {
    pub record_ref: String,
    pub layer: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub importance: Option<f64>,
    pub trust: TrustTier,
    pub text: String,
    pub citations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub record_ref: String,
    pub decision: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackNotes {
    pub trace: Vec<TraceEntry>,
    pub warnings: Vec<String>,
    pub tokens_used: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextPack {
    pub schema: String,
    pub meta: PackMeta,
    pub bundle_text: String,
    pub items: Vec<PackItem>,
    pub notes: PackNotes,
}

impl ContextPack {
    /// Deterministic JSON rendering: struct field order, stable item
    /// order matching admission order.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Deterministic token estimate: ceil(chars / 4). Locale-free and
/// stable across environments.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Layer assignment by importance band. Items without importance pack
/// into the ambient layer.
fn layer_for(importance: Option<f64>) -> &'static str {
    match importance {
        Some(i) if i >= 0.7 => "core",
        Some(i) if i >= 0.3 => "supporting",
        _ => "ambient",
    }
}

/// Assemble a context pack from ranked sources.
///
/// Sources are visited in ranked order. `trusted_only` gates admission
/// to trusted records; `now` is injected so output is reproducible for
/// a fixed snapshot.
pub fn pack(
    query: &str,
    sources: &[PackSource],
    config: &PackConfig,
    trusted_only: bool,
    warnings: Vec<String>,
    now: DateTime<Utc>,
) -> ContextPack {
    let mut items: Vec<PackItem> = Vec::new();
    let mut trace: Vec<TraceEntry> = Vec::new();
    let mut tokens_used = 0usize;

    for source in sources {
        // Malformed sources are excluded and traced, never silently
        // dropped and never a hard failure.
        if source.record_ref.trim().is_empty() {
            trace.push(TraceEntry {
                record_ref: String::new(),
                decision: "excluded".to_string(),
                reason: "missing provenance key".to_string(),
            });
            continue;
        }
        if source.text.trim().is_empty() {
            trace.push(TraceEntry {
                record_ref: source.record_ref.clone(),
                decision: "excluded".to_string(),
                reason: "no resolvable text".to_string(),
            });
            continue;
        }

        if trusted_only && source.trust != TrustTier::Trusted {
            trace.push(TraceEntry {
                record_ref: source.record_ref.clone(),
                decision: "excluded".to_string(),
                reason: format!(
                    "trust={} and policy=trusted-only",
                    source.trust.as_str()
                ),
            });
            continue;
        }

        if items.len() >= config.max_items {
            trace.push(TraceEntry {
                record_ref: source.record_ref.clone(),
                decision: "excluded".to_string(),
                reason: "budget exhausted: max_items".to_string(),
            });
            continue;
        }

        let cost = estimate_tokens(&source.text);
        if tokens_used + cost > config.budget_tokens {
            // Skip, don't abort: a later smaller item may still fit.
            trace.push(TraceEntry {
                record_ref: source.record_ref.clone(),
                decision: "excluded".to_string(),
                reason: "budget exhausted: tokens".to_string(),
            });
            continue;
        }

        tokens_used += cost;
        trace.push(TraceEntry {
            record_ref: source.record_ref.clone(),
            decision: "included".to_string(),
            reason: "selected".to_string(),
        });
        items.push(PackItem {
            record_ref: source.record_ref.clone(),
            layer: layer_for(source.importance).to_string(),
            kind: source.kind.clone(),
            importance: source.importance,
            trust: source.trust,
            text: source.text.clone(),
            citations: source.citations.clone(),
        });
    }

    let bundle_text = render_bundle(query, &items);

    ContextPack {
        schema: PACK_SCHEMA.to_string(),
        meta: PackMeta {
            ts: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            query: query.to_string(),
            budget_tokens: config.budget_tokens,
            max_items: config.max_items,
        },
        bundle_text,
        items,
        notes: PackNotes {
            trace,
            warnings,
            tokens_used,
        },
    }
}

/// Human-readable rendering of the packed items, in admission order.
fn render_bundle(query: &str, items: &[PackItem]) -> String {
    let mut out = format!("# Context pack for: {}\n", query);
    for item in items {
        let importance = match item.importance {
            Some(i) => format!("{:.2}", i),
            None => "-".to_string(),
        };
        out.push_str(&format!(
            "\n## [{}] {} (type={}, trust={}, importance={})\n{}\n",
            item.layer,
            item.record_ref,
            item.kind,
            item.trust.as_str(),
            importance,
            item.text.trim_end()
        ));
    }
    out
}
