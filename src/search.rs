use anyhow::{bail, Result};
use chrono::Utc;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::models::RankedHit;
use crate::packer::{self, PackSource};
use crate::planner;
use crate::scorer::{self, ScoreWeights};

/// Ranked hits for one query, plus everything needed for auditing the
/// degraded paths that were taken.
#[derive(Debug)]
pub struct SearchOutcome {
    pub hits: Vec<RankedHit>,
    pub warnings: Vec<String>,
    pub fallback_triggered: bool,
}

/// Plan, execute, and merge one query. Shared by `mled search` and
/// `mled pack`.
pub async fn execute_search(
    pool: &sqlx::SqlitePool,
    config: &Config,
    query: &str,
    alt_query: Option<&str>,
    limit: Option<i64>,
) -> Result<SearchOutcome> {
    if query.trim().is_empty() {
        bail!("Query must not be empty");
    }

    let outcome = planner::execute(pool, config, query, alt_query).await?;

    let final_limit = limit.unwrap_or(config.retrieval.final_limit).max(1) as usize;
    let weights = ScoreWeights::from(&config.retrieval);
    let hits = scorer::merge(&outcome.candidates, &weights, final_limit);

    Ok(SearchOutcome {
        hits,
        warnings: outcome.warnings,
        fallback_triggered: outcome.fallback_triggered,
    })
}

pub async fn run_search(
    config: &Config,
    query: &str,
    alt_query: Option<&str>,
    limit: Option<i64>,
    json: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let outcome = execute_search(&pool, config, query, alt_query, limit).await?;
    pool.close().await;

    for warning in &outcome.warnings {
        eprintln!("Warning: {}", warning);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.hits)?);
        return Ok(());
    }

    if outcome.hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    if outcome.fallback_triggered {
        println!("(companion-language fallback was used)");
        println!();
    }

    for (i, hit) in outcome.hits.iter().enumerate() {
        let importance = match hit.importance {
            Some(v) => format!("{:.2}", v),
            None => "-".to_string(),
        };
        println!(
            "{}. [{:.3}] {} ({})",
            i + 1,
            hit.score,
            hit.record_id,
            hit.modality.as_str()
        );
        println!("    trust: {}  importance: {}", hit.trust.as_str(), importance);
        println!("    excerpt: \"{}\"", hit.snippet.replace('\n', " ").trim());
        println!();
    }

    Ok(())
}

/// Resolve ranked hits into pack sources by fetching the full record
/// text and citations.
async fn resolve_sources(
    pool: &sqlx::SqlitePool,
    hits: &[RankedHit],
) -> Result<Vec<PackSource>> {
    let mut sources = Vec::with_capacity(hits.len());

    for hit in hits {
        let row = sqlx::query("SELECT text, source_ref FROM records WHERE id = ?")
            .bind(&hit.record_id)
            .fetch_optional(pool)
            .await?;

        let (text, source_ref) = match row {
            Some(row) => (
                row.get::<String, _>("text"),
                row.get::<Option<String>, _>("source_ref"),
            ),
            // Ranked hit with no backing record: keep it so the packer
            // can trace the exclusion instead of dropping it silently.
            None => (String::new(), None),
        };

        sources.push(PackSource {
            record_ref: hit.record_id.clone(),
            kind: hit.kind.clone(),
            trust: hit.trust,
            importance: hit.importance,
            text,
            citations: source_ref.into_iter().collect(),
        });
    }

    Ok(sources)
}

pub async fn run_pack(
    config: &Config,
    query: &str,
    alt_query: Option<&str>,
    max_items: Option<usize>,
    budget_tokens: Option<usize>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let outcome = execute_search(&pool, config, query, alt_query, None).await?;
    let sources = resolve_sources(&pool, &outcome.hits).await?;
    pool.close().await;

    let mut pack_config = config.pack.clone();
    if let Some(n) = max_items {
        pack_config.max_items = n;
    }
    if let Some(n) = budget_tokens {
        pack_config.budget_tokens = n;
    }

    let trusted_only = config.retrieval.trust_policy == "trusted-only";
    let pack = packer::pack(
        query,
        &sources,
        &pack_config,
        trusted_only,
        outcome.warnings,
        Utc::now(),
    );

    println!("{}", pack.to_json());
    Ok(())
}
