//! Explicit vector index rebuild.
//!
//! The only writer of the index fingerprint. Every record's primary
//! text is re-embedded before the existing index is touched: a failed
//! or partial embed aborts the run and leaves the previous vectors and
//! fingerprint in place. Only after a complete re-embed are the old
//! vectors swapped out and the new fingerprint and rebuild timestamp
//! written, in one transaction. The retrieval hot path never mutates
//! any of this.

use anyhow::{bail, Context, Result};
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::fingerprint::{self, META_FINGERPRINT, META_LAST_REBUILD};
use crate::store;

pub async fn run_rebuild(config: &Config, batch_size_override: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    // Fail fast on provider misconfiguration before doing any work.
    let provider = embedding::create_provider(&config.embedding)?;
    let expected_dims = provider.dims();

    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    let rows = sqlx::query("SELECT id, text FROM records ORDER BY id")
        .fetch_all(&pool)
        .await?;
    let total = rows.len();

    // Embed everything up front. Any failure here aborts with the old
    // index intact, so a dead gateway can never stamp an empty index.
    let mut embedded: Vec<(String, Vec<u8>)> = Vec::with_capacity(total);
    for batch in rows.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|row| row.get("text")).collect();
        let vectors = embedding::embed_texts(&config.embedding, &texts)
            .await
            .context("embedding batch failed; existing index left untouched")?;

        for (row, vec) in batch.iter().zip(vectors.iter()) {
            let id: String = row.get("id");
            if vec.len() != expected_dims {
                bail!(
                    "embedding for {} has {} dims, expected {}; existing index left untouched",
                    id,
                    vec.len(),
                    expected_dims
                );
            }
            embedded.push((id, embedding::vec_to_blob(vec)));
        }
    }

    // Swap in the new vectors and stamp the fingerprint atomically.
    let new_fingerprint = fingerprint::configured_fingerprint(&config.embedding);
    let mut tx = pool
        .begin()
        .await
        .context("failed to open rebuild transaction")?;

    sqlx::query("DELETE FROM record_vectors")
        .execute(&mut *tx)
        .await?;
    for (id, blob) in &embedded {
        sqlx::query("INSERT INTO record_vectors (record_id, embedding) VALUES (?, ?)")
            .bind(id)
            .bind(blob)
            .execute(&mut *tx)
            .await?;
    }
    store::set_meta(&mut *tx, META_FINGERPRINT, &new_fingerprint).await?;
    store::set_meta(
        &mut *tx,
        META_LAST_REBUILD,
        &chrono::Utc::now().timestamp().to_string(),
    )
    .await?;
    tx.commit().await.context("failed to commit rebuild")?;

    println!("rebuild");
    println!("  model: {} ({} dims)", provider.model_name(), expected_dims);
    println!("  total records: {}", total);
    println!("  embedded: {}", embedded.len());
    println!("  fingerprint: {}", new_fingerprint);

    pool.close().await;
    Ok(())
}
