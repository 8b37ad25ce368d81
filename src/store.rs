//! Record store access.
//!
//! Thin data layer over SQLite: lexical (FTS5) search against the primary
//! and companion text fields, brute-force vector similarity over stored
//! embeddings, the fill-missing importance write, and the index metadata
//! key/value surface. The store is a shared collaborator — ingestion and
//! rebuild write records and vectors through their own paths; this core
//! only reads records and conditionally fills importance.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::embedding;
use crate::models::{Candidate, Modality, TrustTier};

/// Which text field a lexical search runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Primary,
    Companion,
}

const SNIPPET_CHARS: i64 = 240;

fn candidate_from_row(row: &sqlx::sqlite::SqliteRow, modality: Modality, raw_score: f64) -> Candidate {
    let trust: String = row.get("trust");
    Candidate {
        record_id: row.get("id"),
        modality,
        raw_score,
        snippet: row.get("snippet"),
        kind: row.get("kind"),
        importance: row.get("importance"),
        trust: TrustTier::parse(&trust),
        created_at: row.get("created_at"),
    }
}

/// Lexical search via FTS5. BM25 rank is negated so higher is better.
///
/// Records whose primary text is empty are malformed and skipped; they
/// are reported back so the caller can record a trace exclusion.
pub async fn lexical_search(
    pool: &SqlitePool,
    query: &str,
    field: TextField,
    candidate_k: i64,
) -> Result<(Vec<Candidate>, Vec<String>)> {
    let (fts_table, modality) = match field {
        TextField::Primary => ("records_fts", Modality::Lexical),
        TextField::Companion => ("records_alt_fts", Modality::FallbackLexical),
    };

    let sql = format!(
        r#"
        SELECT r.id, r.kind, r.importance, r.trust, r.created_at, r.text,
               {fts}.rank AS rank,
               COALESCE(substr(r.text, 1, {snip}), '') AS snippet
        FROM {fts}
        JOIN records r ON r.id = {fts}.record_id
        WHERE {fts} MATCH ?
        ORDER BY rank, r.id
        LIMIT ?
        "#,
        fts = fts_table,
        snip = SNIPPET_CHARS,
    );

    let rows = sqlx::query(&sql)
        .bind(query)
        .bind(candidate_k)
        .fetch_all(pool)
        .await?;

    let mut candidates = Vec::with_capacity(rows.len());
    let mut malformed = Vec::new();

    for row in &rows {
        let text: String = row.get("text");
        if text.trim().is_empty() {
            malformed.push(row.get::<String, _>("id"));
            continue;
        }
        let rank: f64 = row.get("rank");
        candidates.push(candidate_from_row(row, modality, -rank));
    }

    Ok((candidates, malformed))
}

/// Vector similarity search: cosine over all stored embeddings, top K.
///
/// The query vector is produced by the caller (the planner owns the
/// embedding gateway call and its timeout).
pub async fn vector_search(
    pool: &SqlitePool,
    query_vec: &[f32],
    modality: Modality,
    candidate_k: i64,
) -> Result<Vec<Candidate>> {
    let rows = sqlx::query(
        r#"
        SELECT r.id, r.kind, r.importance, r.trust, r.created_at,
               v.embedding,
               COALESCE(substr(r.text, 1, 240), '') AS snippet
        FROM record_vectors v
        JOIN records r ON r.id = v.record_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut candidates: Vec<Candidate> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = embedding::blob_to_vec(&blob);
            let similarity = embedding::cosine_similarity(query_vec, &vec) as f64;
            candidate_from_row(row, modality, similarity)
        })
        .collect();

    // Sort by similarity desc, id asc for determinism, take top K
    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.record_id.cmp(&b.record_id))
    });
    candidates.truncate(candidate_k as usize);

    Ok(candidates)
}

/// Whether any record carries a companion-language text field.
/// Gates the fallback query path.
pub async fn has_companion_text(pool: &SqlitePool) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM records WHERE text_alt IS NOT NULL AND text_alt != '')",
    )
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Fill-missing importance write: lands only when the current value is
/// NULL. Returns true if the write took effect. A present value is never
/// overwritten; the conditional UPDATE makes this atomic under
/// concurrent ingestion.
pub async fn set_importance_if_missing(
    pool: &SqlitePool,
    record_id: &str,
    importance: f64,
) -> Result<bool> {
    let result = sqlx::query("UPDATE records SET importance = ? WHERE id = ? AND importance IS NULL")
        .bind(importance)
        .bind(record_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Read one index metadata value.
pub async fn get_meta(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

/// Write one index metadata value. Only the explicit rebuild path calls
/// this; the fingerprint check never mutates. Takes any executor so the
/// rebuild can write inside its swap transaction.
pub async fn set_meta<'e, E>(executor: E, key: &str, value: &str) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO index_meta (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(executor)
    .await?;
    Ok(())
}
