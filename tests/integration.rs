use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn mled_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("mled");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    setup_test_env_with(
        r#"[retrieval]
fallback_threshold = 0.35

[pack]
max_items = 12
budget_tokens = 2000
"#,
    )
}

fn setup_test_env_with(extra_config: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/ledger.sqlite"

{}"#,
        root.display(),
        extra_config,
    );

    let config_path = config_dir.join("mled.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_mled(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = mled_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run mled binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn write_records(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, lines.join("\n")).unwrap();
    path
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_mled(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_mled(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_mled(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_load_records_and_skip_duplicates() {
    let (tmp, config_path) = setup_test_env();
    run_mled(&config_path, &["init"]);

    let records = write_records(
        tmp.path(),
        "records.jsonl",
        &[
            r#"{"id": "rec-1", "text": "deployment notes for the api service"}"#,
            r#"{"id": "rec-2", "text": "database migration checklist", "kind": "note"}"#,
        ],
    );

    let (stdout, _, success) = run_mled(&config_path, &["load", records.to_str().unwrap()]);
    assert!(success, "load failed: {}", stdout);
    assert!(stdout.contains("inserted records: 2"));

    // Records are immutable once written: a reload skips every line.
    let (stdout, _, success) = run_mled(&config_path, &["load", records.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("inserted records: 0"));
    assert!(stdout.contains("skipped (already present): 2"));
}

#[test]
fn test_search_end_to_end_vector_unavailable() {
    // A matches "timeout", B does not; embeddings are disabled so only
    // the lexical path runs.
    let (tmp, config_path) = setup_test_env();
    run_mled(&config_path, &["init"]);

    let records = write_records(
        tmp.path(),
        "records.jsonl",
        &[
            r#"{"id": "rec-a", "text": "timeout error", "importance": 0.9, "trust": "trusted"}"#,
            r#"{"id": "rec-b", "text": "unrelated note", "importance": 0.1, "trust": "unknown"}"#,
        ],
    );
    run_mled(&config_path, &["load", records.to_str().unwrap()]);

    let (stdout, stderr, success) = run_mled(&config_path, &["search", "timeout", "--json"]);
    assert!(success, "search failed: {}", stdout);

    // The disabled provider is a degraded path, surfaced as a warning.
    assert!(
        stderr.contains("vector search skipped"),
        "expected degraded-path warning, got: {}",
        stderr
    );

    let hits: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 1, "only rec-a should match: {}", stdout);
    assert_eq!(hits[0]["record_id"], "rec-a");
    assert_eq!(hits[0]["modality"], "lexical");
    assert_eq!(hits[0]["trust"], "trusted");
}

#[test]
fn test_pack_single_item_with_trace() {
    let (tmp, config_path) = setup_test_env();
    run_mled(&config_path, &["init"]);

    let records = write_records(
        tmp.path(),
        "records.jsonl",
        &[
            r#"{"id": "rec-a", "text": "timeout error", "importance": 0.9, "trust": "trusted"}"#,
            r#"{"id": "rec-b", "text": "unrelated note", "importance": 0.1, "trust": "unknown"}"#,
        ],
    );
    run_mled(&config_path, &["load", records.to_str().unwrap()]);

    let (stdout, _, success) = run_mled(
        &config_path,
        &["pack", "timeout", "--max-items", "1", "--budget-tokens", "100"],
    );
    assert!(success, "pack failed: {}", stdout);

    let pack: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(pack["schema"], "context-pack.v1");
    assert_eq!(pack["meta"]["max_items"], 1);
    assert_eq!(pack["meta"]["budget_tokens"], 100);

    let items = pack["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["record_ref"], "rec-a");
    assert_eq!(items[0]["trust"], "trusted");
    assert_eq!(items[0]["layer"], "core");

    // rec-b never matched, so it must not appear anywhere in the trace.
    let trace = pack["notes"]["trace"].as_array().unwrap();
    assert!(trace.iter().all(|t| t["record_ref"] != "rec-b"));
    let a_entry = trace.iter().find(|t| t["record_ref"] == "rec-a").unwrap();
    assert_eq!(a_entry["decision"], "included");
}

#[test]
fn test_pack_deterministic_apart_from_timestamp() {
    let (tmp, config_path) = setup_test_env();
    run_mled(&config_path, &["init"]);

    let records = write_records(
        tmp.path(),
        "records.jsonl",
        &[
            r#"{"id": "rec-1", "text": "timeout on the payments gateway", "importance": 0.8}"#,
            r#"{"id": "rec-2", "text": "gateway timeout threshold raised", "importance": 0.4}"#,
            r#"{"id": "rec-3", "text": "timeout budget for batch jobs", "importance": 0.2}"#,
        ],
    );
    run_mled(&config_path, &["load", records.to_str().unwrap()]);

    let (out1, _, _) = run_mled(&config_path, &["pack", "timeout"]);
    let (out2, _, _) = run_mled(&config_path, &["pack", "timeout"]);

    let strip_ts = |s: &str| -> String {
        s.lines()
            .filter(|l| !l.trim_start().starts_with("\"ts\""))
            .collect::<Vec<_>>()
            .join("\n")
    };
    assert_eq!(strip_ts(&out1), strip_ts(&out2));
}

#[test]
fn test_fallback_search_uses_companion_field() {
    let (tmp, config_path) = setup_test_env();
    run_mled(&config_path, &["init"]);

    // Primary text in one language, companion translation in another.
    let records = write_records(
        tmp.path(),
        "records.jsonl",
        &[
            r#"{"id": "rec-jp", "text": "支払いゲートウェイのタイムアウト障害", "text_alt": "payment gateway timeout failure", "lang": "ja"}"#,
        ],
    );
    run_mled(&config_path, &["load", records.to_str().unwrap()]);

    // Without --alt the primary lexical search finds nothing.
    let (stdout, _, success) = run_mled(&config_path, &["search", "timeout"]);
    assert!(success);
    assert!(stdout.contains("No results."));

    // With --alt the fallback path searches the companion field.
    let (stdout, _, success) =
        run_mled(&config_path, &["search", "timeout", "--alt", "timeout", "--json"]);
    assert!(success, "fallback search failed: {}", stdout);
    let hits: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["record_id"], "rec-jp");
    assert_eq!(hits[0]["modality"], "fallback-lexical");
}

#[test]
fn test_low_confidence_primary_still_triggers_fallback() {
    // A high threshold makes any lexical match count as low-confidence,
    // so the fallback must fire even though the primary set is nonempty.
    let (tmp, config_path) = setup_test_env_with(
        r#"[retrieval]
fallback_threshold = 0.99
"#,
    );
    run_mled(&config_path, &["init"]);

    let records = write_records(
        tmp.path(),
        "records.jsonl",
        &[
            r#"{"id": "rec-en", "text": "gateway timeout threshold raised"}"#,
            r#"{"id": "rec-jp", "text": "支払いゲートウェイのタイムアウト障害", "text_alt": "payment gateway timeout failure", "lang": "ja"}"#,
        ],
    );
    run_mled(&config_path, &["load", records.to_str().unwrap()]);

    let (stdout, _, success) =
        run_mled(&config_path, &["search", "timeout", "--alt", "timeout", "--json"]);
    assert!(success, "search failed: {}", stdout);

    let hits: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 2, "expected primary and fallback hits: {}", stdout);
    assert!(hits.iter().any(|h| h["record_id"] == "rec-en"));
    assert!(hits
        .iter()
        .any(|h| h["record_id"] == "rec-jp" && h["modality"] == "fallback-lexical"));
}

#[test]
fn test_strong_primary_match_suppresses_fallback_search() {
    // Default threshold: a solid primary match keeps the fallback off
    // even when a companion translation is supplied. Filler records
    // keep the matched term selective so its BM25 score is meaningful.
    let (tmp, config_path) = setup_test_env();
    run_mled(&config_path, &["init"]);

    let records = write_records(
        tmp.path(),
        "records.jsonl",
        &[
            r#"{"id": "rec-en", "text": "timeout raised, timeout retried, timeout budget exceeded"}"#,
            r#"{"id": "rec-jp", "text": "支払いゲートウェイのタイムアウト障害", "text_alt": "payment gateway timeout failure", "lang": "ja"}"#,
            r#"{"id": "filler-1", "text": "database migration checklist"}"#,
            r#"{"id": "filler-2", "text": "weekly sync meeting notes"}"#,
            r#"{"id": "filler-3", "text": "cache eviction policy review"}"#,
            r#"{"id": "filler-4", "text": "deploy pipeline hardening"}"#,
        ],
    );
    run_mled(&config_path, &["load", records.to_str().unwrap()]);

    let (stdout, _, success) =
        run_mled(&config_path, &["search", "timeout", "--alt", "timeout", "--json"]);
    assert!(success, "search failed: {}", stdout);

    let hits: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let hits = hits.as_array().unwrap();
    assert!(hits.iter().any(|h| h["record_id"] == "rec-en"));
    assert!(
        hits.iter().all(|h| h["record_id"] != "rec-jp"),
        "fallback should not have fired: {}",
        stdout
    );
}

#[test]
fn test_failed_rebuild_leaves_index_unstamped() {
    // Unreachable gateway: the rebuild must fail and must not stamp a
    // fingerprint or rebuild timestamp over the (empty) index.
    let (tmp, config_path) = setup_test_env_with(
        r#"[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = 768
url = "http://127.0.0.1:9"
max_retries = 0
timeout_secs = 1
"#,
    );
    run_mled(&config_path, &["init"]);

    let records = write_records(
        tmp.path(),
        "records.jsonl",
        &[r#"{"id": "r1", "text": "some text to embed"}"#],
    );
    run_mled(&config_path, &["load", records.to_str().unwrap()]);

    let (stdout, stderr, success) = run_mled(&config_path, &["rebuild"]);
    assert!(!success, "rebuild should fail: stdout={}", stdout);
    assert!(
        stderr.contains("left untouched"),
        "expected abort message, got: {}",
        stderr
    );

    let (stdout, _, success) = run_mled(&config_path, &["status", "--json"]);
    assert!(success, "status failed: {}", stdout);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(report["index"]["last_rebuild"].is_null());
    assert_eq!(report["index"]["vector"], false);
    assert_eq!(report["index"]["reason"], "unbuilt");
}

#[test]
fn test_triage_found_new_then_deduped() {
    let (tmp, config_path) = setup_test_env();
    run_mled(&config_path, &["init"]);

    let records = write_records(
        tmp.path(),
        "records.jsonl",
        &[
            r#"{"id": "t1", "text": "fix the flaky deploy", "summary": "TODO: fix the flaky deploy", "importance": 0.9}"#,
            r#"{"id": "e1", "text": "connection refused to cache node 1", "kind": "error"}"#,
            r#"{"id": "e2", "text": "connection refused to cache node 2", "kind": "error"}"#,
            r#"{"id": "e3", "text": "connection refused to cache node 3", "kind": "error"}"#,
        ],
    );
    run_mled(&config_path, &["load", records.to_str().unwrap()]);

    let (stdout, _, success) = run_mled(&config_path, &["triage", "--json"]);
    assert!(success, "triage failed: {}", stdout);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["found_new"], true);
    assert_eq!(report["needs_attention"], true);

    let alerts = report["alerts"].as_array().unwrap();
    assert_eq!(alerts.len(), 2, "one task + one error group: {}", stdout);
    assert!(alerts.iter().any(|a| a["alert_type"] == "task"
        && a["record_id"] == "t1"
        && a["new"] == true));
    assert!(alerts
        .iter()
        .any(|a| a["alert_type"] == "error" && a["count"] == 3));

    // Second run: same alerts, but nothing is new anymore.
    let (stdout, _, success) = run_mled(&config_path, &["triage", "--json"]);
    assert!(success);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["found_new"], false);
    assert_eq!(report["needs_attention"], true);
    assert!(report["alerts"]
        .as_array()
        .unwrap()
        .iter()
        .all(|a| a["new"] == false));
}

#[test]
fn test_triage_fullwidth_marker() {
    let (tmp, config_path) = setup_test_env();
    run_mled(&config_path, &["init"]);

    let records = write_records(
        tmp.path(),
        "records.jsonl",
        &[r#"{"id": "jp-task", "text": "修復が必要", "summary": "ＴＯＤＯ：修復"}"#],
    );
    run_mled(&config_path, &["load", records.to_str().unwrap()]);

    let (stdout, _, success) = run_mled(&config_path, &["triage", "--json"]);
    assert!(success, "triage failed: {}", stdout);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let alerts = report["alerts"].as_array().unwrap();
    assert!(alerts
        .iter()
        .any(|a| a["alert_type"] == "task" && a["record_id"] == "jp-task"));
}

#[test]
fn test_importance_fill_missing_only() {
    let (tmp, config_path) = setup_test_env();
    run_mled(&config_path, &["init"]);

    let records = write_records(
        tmp.path(),
        "records.jsonl",
        &[
            r#"{"id": "no-imp", "text": "a record without importance"}"#,
            r#"{"id": "has-imp", "text": "a record with importance", "importance": 0.6}"#,
        ],
    );
    run_mled(&config_path, &["load", records.to_str().unwrap()]);

    let (stdout, _, success) = run_mled(&config_path, &["importance", "no-imp", "0.5"]);
    assert!(success);
    assert!(stdout.contains("importance set"));

    // The value is now present, so a second write is ignored.
    let (stdout, _, success) = run_mled(&config_path, &["importance", "no-imp", "0.9"]);
    assert!(success);
    assert!(stdout.contains("unchanged"));

    // A record loaded with importance keeps it.
    let (stdout, _, success) = run_mled(&config_path, &["importance", "has-imp", "0.1"]);
    assert!(success);
    assert!(stdout.contains("unchanged"));
}

#[test]
fn test_status_reports_disabled_embedding() {
    let (tmp, config_path) = setup_test_env();
    run_mled(&config_path, &["init"]);

    let records = write_records(
        tmp.path(),
        "records.jsonl",
        &[r#"{"id": "r1", "text": "some indexed text"}"#],
    );
    run_mled(&config_path, &["load", records.to_str().unwrap()]);

    let (stdout, _, success) = run_mled(&config_path, &["status", "--json"]);
    assert!(success, "status failed: {}", stdout);

    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["embedding"]["available"], false);
    assert_eq!(report["embedding"]["reason"], "provider disabled");
    assert_eq!(report["index"]["fts"], true);
    assert_eq!(report["index"]["vector"], false);
    assert_eq!(report["records"], 1);
    assert_eq!(report["vectors"], 0);
}

#[test]
fn test_search_untrusted_ranks_below_trusted() {
    let (tmp, config_path) = setup_test_env();
    run_mled(&config_path, &["init"]);

    let records = write_records(
        tmp.path(),
        "records.jsonl",
        &[
            r#"{"id": "rec-untrusted", "text": "timeout in scraper output", "trust": "untrusted"}"#,
            r#"{"id": "rec-trusted", "text": "timeout in deploy logs", "trust": "trusted"}"#,
        ],
    );
    run_mled(&config_path, &["load", records.to_str().unwrap()]);

    let (stdout, _, success) = run_mled(&config_path, &["search", "timeout", "--json"]);
    assert!(success);
    let hits: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0]["record_id"], "rec-trusted");
    assert_eq!(hits[1]["record_id"], "rec-untrusted");
}
