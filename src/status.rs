//! Ledger status and health overview.
//!
//! Reports the embedding capability (availability, provider, model,
//! fingerprint), index state (FTS and vector coverage, last rebuild),
//! and triage-state size. Used by `mled status` to confirm loads,
//! rebuilds, and triage runs are working as expected.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::fingerprint::{self, FingerprintStatus, META_LAST_REBUILD};
use crate::store;

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum EmbeddingStatus {
    Available {
        available: bool,
        provider: String,
        model: String,
        fingerprint: String,
    },
    Unavailable {
        available: bool,
        reason: String,
    },
}

#[derive(Debug, Serialize)]
pub struct IndexStatus {
    pub fts: bool,
    pub vector: bool,
    /// Why vector search is gated, when it is ("unbuilt" or "drift").
    pub reason: Option<&'static str>,
    pub last_rebuild: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub embedding: EmbeddingStatus,
    pub index: IndexStatus,
    pub records: i64,
    pub vectors: i64,
    pub triage_entries: i64,
}

pub async fn collect_status(config: &Config) -> Result<StatusReport> {
    let pool = db::connect(config).await?;

    let records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
        .fetch_one(&pool)
        .await?;
    let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM record_vectors")
        .fetch_one(&pool)
        .await?;
    let triage_entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM triage_state")
        .fetch_one(&pool)
        .await?;

    let fp_status = fingerprint::check(&pool, &config.embedding).await?;

    let embedding_status = if !config.embedding.is_enabled() {
        EmbeddingStatus::Unavailable {
            available: false,
            reason: "provider disabled".to_string(),
        }
    } else if !embedding::probe_available(&config.embedding).await {
        EmbeddingStatus::Unavailable {
            available: false,
            reason: "gateway unreachable".to_string(),
        }
    } else {
        EmbeddingStatus::Available {
            available: true,
            provider: config.embedding.provider.clone(),
            model: config.embedding.model.clone().unwrap_or_default(),
            fingerprint: fingerprint::configured_fingerprint(&config.embedding),
        }
    };

    let last_rebuild = store::get_meta(&pool, META_LAST_REBUILD)
        .await?
        .and_then(|v| v.parse::<i64>().ok());

    let report = StatusReport {
        embedding: embedding_status,
        index: IndexStatus {
            fts: records > 0,
            vector: vectors > 0 && fp_status.is_ok(),
            reason: fp_status.reason(),
            last_rebuild,
        },
        records,
        vectors,
        triage_entries,
    };

    pool.close().await;
    Ok(report)
}

pub async fn run_status(config: &Config, json: bool) -> Result<()> {
    let report = collect_status(config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("memledger — Status");
    println!("==================");
    println!();
    println!("  Database:       {}", config.db.path.display());
    println!("  Records:        {}", report.records);
    println!("  Vectors:        {}", report.vectors);
    println!("  Triage entries: {}", report.triage_entries);
    println!();

    match &report.embedding {
        EmbeddingStatus::Available {
            provider,
            model,
            fingerprint,
            ..
        } => {
            println!("  Embedding:   available ({} / {})", provider, model);
            println!("  Fingerprint: {}", fingerprint);
        }
        EmbeddingStatus::Unavailable { reason, .. } => {
            println!("  Embedding:   unavailable ({})", reason);
        }
    }

    // Surface drift explicitly; it gates vector search until rebuild.
    if config.embedding.is_enabled() {
        let pool = db::connect(config).await?;
        match fingerprint::check(&pool, &config.embedding).await? {
            FingerprintStatus::Drift { index, configured } => {
                println!(
                    "  Warning: fingerprint drift (index={}, configured={}); run `mled rebuild`",
                    index, configured
                );
            }
            FingerprintStatus::Unbuilt => {
                println!("  Note: vector index not built; run `mled rebuild`");
            }
            FingerprintStatus::Ok { .. } => {}
        }
        pool.close().await;
    }

    println!();
    println!(
        "  Index: fts={} vector={} last_rebuild={}",
        report.index.fts,
        report.index.vector,
        report
            .index
            .last_rebuild
            .map(|ts| ts.to_string())
            .unwrap_or_else(|| "never".to_string())
    );

    Ok(())
}
