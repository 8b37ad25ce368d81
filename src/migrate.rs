use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Create records table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            text_alt TEXT,
            lang TEXT,
            kind TEXT NOT NULL DEFAULT 'note',
            summary TEXT,
            importance REAL,
            trust TEXT NOT NULL DEFAULT 'unknown',
            created_at INTEGER NOT NULL,
            source_ref TEXT
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Vector index over primary text
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS record_vectors (
            record_id TEXT PRIMARY KEY,
            embedding BLOB NOT NULL,
            FOREIGN KEY (record_id) REFERENCES records(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Singleton index metadata (embedding fingerprint, last rebuild)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Triage dedupe state
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS triage_state (
            dedupe_key TEXT PRIMARY KEY,
            last_seen INTEGER NOT NULL,
            count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // FTS5 virtual tables over primary and companion text.
    // FTS5 CREATE is not idempotent natively, so we check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='records_fts'",
    )
    .fetch_one(&pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE records_fts USING fts5(
                record_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(&pool)
        .await?;
    }

    let alt_fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='records_alt_fts'",
    )
    .fetch_one(&pool)
    .await?;

    if !alt_fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE records_alt_fts USING fts5(
                record_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(&pool)
        .await?;
    }

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_kind ON records(kind)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_created_at ON records(created_at DESC)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
