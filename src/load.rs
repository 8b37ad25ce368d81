//! JSONL record loading.
//!
//! The capture/harvest pipeline that produces observation JSONL lives
//! outside this crate; `mled load` is its interface into the ledger.
//! One JSON object per line. Records are immutable once written:
//! a line whose id already exists is skipped, never updated.

use anyhow::{Context, Result};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::models::{Record, TrustTier};

#[derive(Debug, Deserialize)]
struct ObservationLine {
    #[serde(default)]
    id: Option<String>,
    text: String,
    #[serde(default)]
    text_alt: Option<String>,
    #[serde(default)]
    lang: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    importance: Option<f64>,
    #[serde(default)]
    trust: Option<String>,
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    source_ref: Option<String>,
}

impl From<ObservationLine> for Record {
    fn from(line: ObservationLine) -> Self {
        Record {
            id: line
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            text: line.text,
            text_alt: line.text_alt,
            lang: line.lang,
            kind: line.kind.unwrap_or_else(|| "note".to_string()),
            summary: line.summary,
            importance: line.importance,
            trust: TrustTier::parse(line.trust.as_deref().unwrap_or("unknown")),
            created_at: line
                .created_at
                .unwrap_or_else(|| chrono::Utc::now().timestamp()),
            source_ref: line.source_ref,
        }
    }
}

async fn insert_record(pool: &SqlitePool, record: &Record) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO records
            (id, text, text_alt, lang, kind, summary, importance, trust, created_at, source_ref)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.id)
    .bind(&record.text)
    .bind(&record.text_alt)
    .bind(&record.lang)
    .bind(&record.kind)
    .bind(&record.summary)
    .bind(record.importance)
    .bind(record.trust.as_str())
    .bind(record.created_at)
    .bind(&record.source_ref)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }

    sqlx::query("INSERT INTO records_fts (record_id, text) VALUES (?, ?)")
        .bind(&record.id)
        .bind(&record.text)
        .execute(pool)
        .await?;

    if let Some(alt) = record.text_alt.as_deref().filter(|s| !s.trim().is_empty()) {
        sqlx::query("INSERT INTO records_alt_fts (record_id, text) VALUES (?, ?)")
            .bind(&record.id)
            .bind(alt)
            .execute(pool)
            .await?;
    }

    Ok(true)
}

pub async fn run_load(config: &Config, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read records file: {}", path.display()))?;

    let pool = db::connect(config).await?;

    let mut inserted = 0u64;
    let mut skipped = 0u64;
    let mut malformed = 0u64;

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed: ObservationLine = match serde_json::from_str(line) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Warning: line {} is not a valid record: {}", line_no + 1, e);
                malformed += 1;
                continue;
            }
        };

        if insert_record(&pool, &Record::from(parsed)).await? {
            inserted += 1;
        } else {
            skipped += 1;
        }
    }

    println!("load {}", path.display());
    println!("  inserted records: {}", inserted);
    println!("  skipped (already present): {}", skipped);
    if malformed > 0 {
        println!("  malformed lines: {}", malformed);
    }

    pool.close().await;
    Ok(())
}
