//! Triage engine: deterministic task and error extraction.
//!
//! Scans stored records for task-like summaries and recurring error
//! signatures without invoking any language model. A run walks a fixed
//! sequence: load state → scan records → classify → dedupe against
//! state → persist state → emit report. Classification is a pure
//! function of one record's kind and summary, so results are
//! reproducible across environments and runs.
//!
//! Dedupe discipline: an alert is emitted as new only when its dedupe
//! key is absent from persisted state or stale relative to the lookback
//! window; `last_seen` is advanced for every alert considered, new or
//! repeated. State persistence is one transaction — if it fails, the
//! run fails and never claims alerts were deduplicated.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use crate::config::TriageConfig;

/// Task marker pattern, applied to a width-folded summary. Accepts an
/// optional list/checklist prefix, an optional ordered-list prefix, the
/// marker itself (optionally wrapped in brackets or parentheses), and a
/// required terminator: colon, whitespace, a dash variant, or end of
/// string.
static TASK_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:[-*+•]\s*(?:\[(?: |x)\]\s*)?)?(?:\(\d+\)|\d+[.)]|[A-Za-z][.)])?\s*[\[(]?(?:TODO|TASK|REMINDER)[\])]?(?::|[-–—―]|\s|$)",
    )
    .expect("task marker pattern is valid")
});

static DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").unwrap());
static HEX_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[0-9a-f]{8,}\b").unwrap());

/// Fold full-width ASCII variants (U+FF01..=U+FF5E) to their half-width
/// forms and the ideographic space (U+3000) to a plain space. Pure and
/// locale-independent; applied before any marker matching.
pub fn fold_width(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{FF01}'..='\u{FF5E}' => {
                char::from_u32(c as u32 - 0xFEE0).unwrap_or(c)
            }
            '\u{3000}' => ' ',
            other => other,
        })
        .collect()
}

/// Whether a record is a task candidate: its kind is "task", or its
/// width-folded summary matches one of the markers {TODO, TASK,
/// REMINDER} in an actionable position. Consults nothing beyond the one
/// record.
pub fn is_task_candidate(kind: &str, summary: Option<&str>) -> bool {
    if kind == "task" {
        return true;
    }
    match summary {
        Some(s) => TASK_MARKER.is_match(&fold_width(s)),
        None => false,
    }
}

/// Derive a grouping signature for an error record: first line of its
/// summary (or text), lowercased, with hex and digit runs collapsed so
/// timestamps, counters, and request ids group together.
pub fn error_signature(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or("").trim().to_lowercase();
    let collapsed = HEX_RUN.replace_all(&first_line, "#");
    let collapsed = DIGIT_RUN.replace_all(&collapsed, "#");
    collapsed.chars().take(80).collect()
}

/// One triage alert.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub dedupe_key: String,
    pub alert_type: String,
    pub record_id: Option<String>,
    pub summary: String,
    pub count: i64,
    pub new: bool,
    pub importance: Option<f64>,
}

/// Output of one triage run.
#[derive(Debug, Clone, Serialize)]
pub struct TriageReport {
    pub needs_attention: bool,
    pub found_new: bool,
    pub alerts: Vec<Alert>,
}

struct ScannedRecord {
    id: String,
    kind: String,
    summary: Option<String>,
    text: String,
    importance: Option<f64>,
    created_at: i64,
}

fn display_summary(record: &ScannedRecord) -> String {
    let base = record
        .summary
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(&record.text);
    base.lines().next().unwrap_or("").chars().take(120).collect()
}

/// Run the triage engine against the record store.
///
/// `now` is passed in so runs are reproducible in tests. Concurrent
/// runs against the same state are out of scope (single-writer
/// assumption).
pub async fn run_triage(
    pool: &SqlitePool,
    config: &TriageConfig,
    now: i64,
) -> Result<TriageReport> {
    let lookback_secs = config.lookback_days * 86_400;
    let window_start = now - lookback_secs;
    let stale_before = now - lookback_secs;

    // LOAD_STATE
    let state_rows = sqlx::query("SELECT dedupe_key, last_seen, count FROM triage_state")
        .fetch_all(pool)
        .await
        .context("failed to load triage state")?;

    let mut state: HashMap<String, (i64, i64)> = HashMap::new();
    for row in &state_rows {
        state.insert(
            row.get("dedupe_key"),
            (row.get("last_seen"), row.get("count")),
        );
    }

    // SCAN_RECORDS — deterministic order
    let record_rows = sqlx::query(
        "SELECT id, kind, summary, text, importance, created_at FROM records ORDER BY created_at ASC, id ASC",
    )
    .fetch_all(pool)
    .await?;

    let records: Vec<ScannedRecord> = record_rows
        .iter()
        .map(|row| ScannedRecord {
            id: row.get("id"),
            kind: row.get("kind"),
            summary: row.get("summary"),
            text: row.get("text"),
            importance: row.get("importance"),
            created_at: row.get("created_at"),
        })
        .collect();

    // CLASSIFY
    let mut alerts: BTreeMap<String, Alert> = BTreeMap::new();

    for record in &records {
        if is_task_candidate(&record.kind, record.summary.as_deref()) {
            let key = format!("task:{}", record.id);
            alerts.insert(
                key.clone(),
                Alert {
                    dedupe_key: key,
                    alert_type: "task".to_string(),
                    record_id: Some(record.id.clone()),
                    summary: display_summary(record),
                    count: 1,
                    new: false,
                    importance: record.importance,
                },
            );
        }
    }

    // Group in-window error records by signature.
    let mut error_groups: BTreeMap<String, (i64, String)> = BTreeMap::new();
    for record in &records {
        if record.kind == "error" && record.created_at >= window_start {
            let signature = error_signature(
                record
                    .summary
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or(&record.text),
            );
            let entry = error_groups
                .entry(signature)
                .or_insert_with(|| (0, display_summary(record)));
            entry.0 += 1;
        }
    }

    for (signature, (count, summary)) in &error_groups {
        if *count >= config.error_threshold {
            let key = format!("error:{}", signature);
            alerts.insert(
                key.clone(),
                Alert {
                    dedupe_key: key,
                    alert_type: "error".to_string(),
                    record_id: None,
                    summary: summary.clone(),
                    count: *count,
                    new: false,
                    importance: None,
                },
            );
        }
    }

    // DEDUPE_AGAINST_STATE
    for alert in alerts.values_mut() {
        alert.new = match state.get(&alert.dedupe_key) {
            None => true,
            Some((last_seen, _)) => *last_seen < stale_before,
        };
    }

    // PERSIST_STATE — one transaction; on failure the report must not
    // claim dedupe happened, so any error aborts the run.
    let mut tx = pool.begin().await.context("failed to open triage state transaction")?;
    for alert in alerts.values() {
        sqlx::query(
            r#"
            INSERT INTO triage_state (dedupe_key, last_seen, count)
            VALUES (?, ?, 1)
            ON CONFLICT(dedupe_key) DO UPDATE SET
                last_seen = excluded.last_seen,
                count = triage_state.count + 1
            "#,
        )
        .bind(&alert.dedupe_key)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("failed to persist triage state")?;
    }
    tx.commit().await.context("failed to commit triage state")?;

    // EMIT_REPORT
    let needs_attention = alerts.values().any(|a| match a.alert_type.as_str() {
        "error" => true,
        _ => a.importance.unwrap_or(0.0) >= config.attention_importance,
    });
    let found_new = alerts.values().any(|a| a.new);

    Ok(TriageReport {
        needs_attention,
        found_new,
        alerts: alerts.into_values().collect(),
    })
}

pub async fn run_triage_cmd(config: &crate::config::Config, json: bool) -> Result<()> {
    let pool = crate::db::connect(config).await?;
    let now = chrono::Utc::now().timestamp();
    let report = run_triage(&pool, &config.triage, now).await?;
    pool.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("triage");
    println!("  needs_attention: {}", report.needs_attention);
    println!("  found_new: {}", report.found_new);
    println!("  alerts: {}", report.alerts.len());
    for alert in &report.alerts {
        let marker = if alert.new { "NEW" } else { "seen" };
        println!(
            "  [{}] {} ({}, count={}): {}",
            marker, alert.dedupe_key, alert.alert_type, alert.count, alert.summary
        );
    }

    Ok(())
}
