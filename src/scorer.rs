//! Hybrid scorer and deduplicator.
//!
//! [`merge`] fuses per-modality candidate sets into one ranked,
//! deduplicated list. It is a pure function of the completed candidate
//! set: grouping goes through a `BTreeMap` and every tie has a total
//! order, so the output is identical no matter which search finished
//! first or in what order candidates arrived.

use std::collections::BTreeMap;

use crate::config::RetrievalConfig;
use crate::models::{Candidate, Modality, RankedHit, TrustTier};

/// Fusion weights and boosts, lifted out of config so the merge stays a
/// standalone pure function.
#[derive(Debug, Clone)]
pub struct ScoreWeights {
    pub lexical: f64,
    pub vector: f64,
    pub fallback_discount: f64,
    pub trust_boost: f64,
    pub untrust_penalty: f64,
    pub importance_weight: f64,
}

impl From<&RetrievalConfig> for ScoreWeights {
    fn from(cfg: &RetrievalConfig) -> Self {
        Self {
            lexical: cfg.weight_lexical,
            vector: cfg.weight_vector,
            fallback_discount: cfg.fallback_discount,
            trust_boost: cfg.trust_boost,
            untrust_penalty: cfg.untrust_penalty,
            importance_weight: cfg.importance_weight,
        }
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            lexical: 0.5,
            vector: 0.5,
            fallback_discount: 0.8,
            trust_boost: 0.15,
            untrust_penalty: 0.25,
            importance_weight: 0.1,
        }
    }
}

impl ScoreWeights {
    /// Effective linear weight for one modality: base channel weight,
    /// with fallback modalities discounted so primary-language matches
    /// win when scores tie.
    fn modality_weight(&self, modality: Modality) -> f64 {
        let base = match modality {
            Modality::Lexical | Modality::FallbackLexical => self.lexical,
            Modality::Vector | Modality::FallbackVector => self.vector,
        };
        if modality.is_fallback() {
            base * self.fallback_discount
        } else {
            base
        }
    }
}

/// Min-max normalize raw scores within one modality to [0, 1].
/// A single candidate (or all-equal scores) normalizes to 1.0.
fn normalize(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let s_min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let s_max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    scores
        .iter()
        .map(|s| {
            if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - s_min) / (s_max - s_min)
            }
        })
        .collect()
}

struct Fused {
    /// Best normalized score seen per modality.
    per_modality: BTreeMap<Modality, f64>,
    kind: String,
    snippet: String,
    snippet_modality: Modality,
    importance: Option<f64>,
    trust: TrustTier,
    created_at: i64,
}

/// Merge candidates from all issued searches into a ranked, deduplicated
/// list, truncated to `limit`.
///
/// A record contributes at most one hit regardless of how many
/// modalities matched it. Tie-break order for equal fused scores:
/// higher importance, then more recent timestamp, then lexicographically
/// smaller identifier.
pub fn merge(candidates: &[Candidate], weights: &ScoreWeights, limit: usize) -> Vec<RankedHit> {
    // Normalize per modality group
    let mut by_modality: BTreeMap<Modality, Vec<&Candidate>> = BTreeMap::new();
    for c in candidates {
        by_modality.entry(c.modality).or_default().push(c);
    }

    let mut fused: BTreeMap<String, Fused> = BTreeMap::new();

    for (modality, group) in &by_modality {
        let raw: Vec<f64> = group.iter().map(|c| c.raw_score).collect();
        let normed = normalize(&raw);

        for (c, norm) in group.iter().zip(normed.iter()) {
            let entry = fused.entry(c.record_id.clone()).or_insert_with(|| Fused {
                per_modality: BTreeMap::new(),
                kind: c.kind.clone(),
                snippet: c.snippet.clone(),
                snippet_modality: *modality,
                importance: c.importance,
                trust: c.trust,
                created_at: c.created_at,
            });
            let slot = entry.per_modality.entry(*modality).or_insert(0.0);
            if *norm > *slot {
                *slot = *norm;
            }
            // Prefer the primary-most modality's snippet for display.
            if *modality < entry.snippet_modality {
                entry.snippet = c.snippet.clone();
                entry.snippet_modality = *modality;
            }
        }
    }

    let mut hits: Vec<RankedHit> = fused
        .into_iter()
        .map(|(record_id, f)| {
            let mut score = 0.0;
            let mut best_modality = Modality::Lexical;
            let mut best_contribution = f64::NEG_INFINITY;

            for (modality, norm) in &f.per_modality {
                let contribution = weights.modality_weight(*modality) * norm;
                score += contribution;
                if contribution > best_contribution {
                    best_contribution = contribution;
                    best_modality = *modality;
                }
            }

            // Trust bias: strictly positive for trusted, strictly
            // negative for untrusted. The penalty is clamped at config
            // load so a dominant match cannot be inverted.
            score *= match f.trust {
                TrustTier::Trusted => 1.0 + weights.trust_boost,
                TrustTier::Unknown => 1.0,
                TrustTier::Untrusted => 1.0 - weights.untrust_penalty,
            };

            if let Some(imp) = f.importance {
                score *= 1.0 + weights.importance_weight * imp.clamp(0.0, 1.0);
            }

            RankedHit {
                record_id,
                score,
                modality: best_modality,
                trust: f.trust,
                importance: f.importance,
                kind: f.kind,
                snippet: f.snippet,
                created_at: f.created_at,
            }
        })
        .collect();

    // Total order: score desc, importance desc, created_at desc, id asc
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.importance
                    .unwrap_or(0.0)
                    .partial_cmp(&a.importance.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then(b.created_at.cmp(&a.created_at))
            .then_with(|| a.record_id.cmp(&b.record_id))
    });

    hits.truncate(limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(id: &str, modality: Modality, score: f64) -> Candidate {
        Candidate {
            record_id: id.to_string(),
            modality,
            raw_score: score,
            snippet: format!("snippet {}", id),
            kind: "note".to_string(),
            importance: None,
            trust: TrustTier::Unknown,
            created_at: 1_700_000_000,
        }
    }

    #[test]
    fn test_merge_empty() {
        let hits = merge(&[], &ScoreWeights::default(), 10);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_dedup_by_record_id() {
        let candidates = vec![
            cand("r1", Modality::Lexical, 3.0),
            cand("r1", Modality::Vector, 0.9),
            cand("r2", Modality::Lexical, 1.0),
        ];
        let hits = merge(&candidates, &ScoreWeights::default(), 10);
        let ids: Vec<&str> = hits.iter().map(|h| h.record_id.as_str()).collect();
        assert_eq!(hits.len(), 2);
        assert_eq!(ids.iter().filter(|id| **id == "r1").count(), 1);
    }

    #[test]
    fn test_multi_modality_outranks_single() {
        let candidates = vec![
            cand("both", Modality::Lexical, 5.0),
            cand("both", Modality::Vector, 0.9),
            cand("lex-only", Modality::Lexical, 1.0),
        ];
        let hits = merge(&candidates, &ScoreWeights::default(), 10);
        assert_eq!(hits[0].record_id, "both");
    }

    #[test]
    fn test_arrival_order_does_not_matter() {
        let mut forward = vec![
            cand("a", Modality::Lexical, 2.0),
            cand("b", Modality::Lexical, 1.0),
            cand("b", Modality::Vector, 0.8),
            cand("c", Modality::Vector, 0.3),
        ];
        let hits1 = merge(&forward, &ScoreWeights::default(), 10);
        forward.reverse();
        let hits2 = merge(&forward, &ScoreWeights::default(), 10);

        let ids1: Vec<_> = hits1.iter().map(|h| (&h.record_id, h.score)).collect();
        let ids2: Vec<_> = hits2.iter().map(|h| (&h.record_id, h.score)).collect();
        assert_eq!(ids1, ids2);
    }

    #[test]
    fn test_fallback_discount_prefers_primary_on_tie() {
        // Same raw score, one from the primary field, one from fallback.
        let candidates = vec![
            cand("primary", Modality::Lexical, 2.0),
            cand("fallback", Modality::FallbackLexical, 2.0),
        ];
        let hits = merge(&candidates, &ScoreWeights::default(), 10);
        assert_eq!(hits[0].record_id, "primary");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_trust_boost_and_penalty() {
        let mut trusted = cand("t", Modality::Lexical, 2.0);
        trusted.trust = TrustTier::Trusted;
        let unknown = cand("u", Modality::Lexical, 2.0);
        let mut untrusted = cand("x", Modality::Lexical, 2.0);
        untrusted.trust = TrustTier::Untrusted;

        let hits = merge(
            &[trusted, unknown, untrusted],
            &ScoreWeights::default(),
            10,
        );
        assert_eq!(hits[0].record_id, "t");
        assert_eq!(hits[1].record_id, "u");
        assert_eq!(hits[2].record_id, "x");
    }

    #[test]
    fn test_untrust_penalty_cannot_invert_dominant_match() {
        // Untrusted record with a clearly dominant lexical score must
        // still beat a weak unknown match; penalty is bounded below 0.5.
        let mut dominant = cand("dominant", Modality::Lexical, 10.0);
        dominant.trust = TrustTier::Untrusted;
        let weak = cand("weak", Modality::Lexical, 0.5);

        let weights = ScoreWeights {
            untrust_penalty: 0.5,
            ..ScoreWeights::default()
        };
        let hits = merge(&[dominant, weak], &weights, 10);
        assert_eq!(hits[0].record_id, "dominant");
    }

    #[test]
    fn test_tie_break_importance_then_recency_then_id() {
        let mut a = cand("b-mid", Modality::Lexical, 1.0);
        a.importance = Some(0.5);
        let mut b = cand("a-late", Modality::Lexical, 1.0);
        b.importance = Some(0.5);
        b.created_at = 1_700_000_100;
        let c = cand("c-plain", Modality::Lexical, 1.0);

        // Zero boosts so fused scores tie exactly.
        let weights = ScoreWeights {
            trust_boost: 0.0,
            untrust_penalty: 0.0,
            importance_weight: 0.0,
            ..ScoreWeights::default()
        };
        let hits = merge(&[a, b, c], &weights, 10);
        let ids: Vec<&str> = hits.iter().map(|h| h.record_id.as_str()).collect();
        // importance 0.5 beats none; newer beats older; id breaks the rest
        assert_eq!(ids, vec!["a-late", "b-mid", "c-plain"]);
    }

    #[test]
    fn test_truncation_keeps_order() {
        let candidates = vec![
            cand("a", Modality::Lexical, 3.0),
            cand("b", Modality::Lexical, 2.0),
            cand("c", Modality::Lexical, 1.0),
        ];
        let full = merge(&candidates, &ScoreWeights::default(), 10);
        let cut = merge(&candidates, &ScoreWeights::default(), 2);
        assert_eq!(cut.len(), 2);
        assert_eq!(cut[0].record_id, full[0].record_id);
        assert_eq!(cut[1].record_id, full[1].record_id);
    }

    #[test]
    fn test_snippet_taken_from_primary_modality() {
        let mut vec_first = cand("r", Modality::Vector, 0.9);
        vec_first.snippet = "vector snippet".to_string();
        let mut lex = cand("r", Modality::Lexical, 1.0);
        lex.snippet = "lexical snippet".to_string();

        let hits = merge(&[vec_first, lex], &ScoreWeights::default(), 10);
        assert_eq!(hits[0].snippet, "lexical snippet");
    }
}
