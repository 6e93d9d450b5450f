// LogSentinel - tests/e2e_tailing.rs
//
// End-to-end tests for the scan -> read -> classify -> capture -> sink
// pipeline.
//
// These tests run against the real filesystem (temp directories), real
// walkdir traversal, real encoding_rs decoding and the built-in rule set.
// The only substitution is the sink: issues are collected from an mpsc
// channel instead of being printed.

use logsentinel::app::engine::TailEngine;
use logsentinel::app::scanner::DirectoryScanner;
use logsentinel::app::service::WatchService;
use logsentinel::app::sink::{EngineEvent, IssueSink};
use logsentinel::core::capture::CaptureSettings;
use logsentinel::core::classifier::{Classifier, RuleSetDefinition};
use logsentinel::core::model::{FinalizedIssue, LineFormat, Severity};
use logsentinel::platform::config::{self, AppConfig, EngineConfig, WatchEntry};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

// =============================================================================
// Helpers
// =============================================================================

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Engine over `entries` with the built-in rules and a channel sink.
fn engine_for(
    app: &AppConfig,
    entries: Vec<WatchEntry>,
) -> (TailEngine, Receiver<EngineEvent>) {
    let mut scanner = DirectoryScanner::new(
        &app.include_patterns,
        &app.exclude_patterns,
        app.engine.start_position,
    );
    for entry in entries {
        scanner.add_watch_target(entry);
    }
    let (classifier, errors) = Classifier::compile(&app.rules);
    assert!(errors.is_empty(), "rule errors: {errors:?}");
    let rules = Arc::new(arc_swap::ArcSwap::from_pointee(classifier));
    let (tx, rx) = mpsc::channel();
    let sink: Arc<dyn IssueSink> = Arc::new(tx);
    (
        TailEngine::new(app.engine.clone(), scanner, rules, sink),
        rx,
    )
}

fn issues(rx: &Receiver<EngineEvent>) -> Vec<FinalizedIssue> {
    rx.try_iter()
        .filter_map(|event| match event {
            EngineEvent::Issue(issue) => Some(issue),
            EngineEvent::Status(_) => None,
        })
        .collect()
}

fn statuses(rx: &Receiver<EngineEvent>) -> Vec<String> {
    rx.try_iter()
        .filter_map(|event| match event {
            EngineEvent::Status(s) => Some(s),
            EngineEvent::Issue(_) => None,
        })
        .collect()
}

fn append(path: &Path, text: &str) {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    f.write_all(text.as_bytes()).unwrap();
}

/// Capture with no trailing context so every anchor is emitted at once.
fn immediate_config() -> AppConfig {
    AppConfig {
        engine: EngineConfig {
            capture: CaptureSettings {
                lines_before: 0,
                lines_after: 0,
            },
            ..EngineConfig::default()
        },
        ..AppConfig::default()
    }
}

// =============================================================================
// Pipeline E2E
// =============================================================================

/// The Java service fixture yields one issue per anchor, in file order,
/// with the stack trace attached to the exception.
#[test]
fn e2e_java_fixture_produces_issues_with_context() {
    let dir = TempDir::new().unwrap();
    fs::copy(fixture("java_service.log"), dir.path().join("service.log")).unwrap();

    let app = AppConfig::default();
    let (mut engine, rx) = engine_for(&app, vec![WatchEntry::new(dir.path())]);
    engine.run_cycle(true);
    engine.shutdown();

    let found = issues(&rx);
    assert_eq!(found.len(), 3, "issues: {found:#?}");

    let exception = &found[0];
    assert_eq!(exception.severity, Severity::Exception);
    assert_eq!(exception.line_number, 3);
    assert_eq!(exception.issue_type, "java.lang.NullPointerException");
    assert_eq!(exception.file_name, "service.log");
    assert_eq!(exception.id, None);
    assert!(!exception.acknowledged);
    assert!(exception
        .captured_text
        .starts_with("2026-10-18 09:14:02.101 INFO  [main] Application starting\n"));
    assert!(exception
        .captured_text
        .contains("\tat com.example.orders.OrderService.place(OrderService.java:88)"));
    assert!(exception
        .captured_text
        .ends_with("Request completed in 1183 ms"));

    assert_eq!(found[1].severity, Severity::Warning);
    assert_eq!(found[1].line_number, 8);
    assert_eq!(found[1].issue_type, "WARNING");

    let fatal = &found[2];
    assert_eq!(fatal.severity, Severity::Critical);
    assert_eq!(fatal.line_number, 9);
    assert_eq!(fatal.issue_type, "java.lang.OutOfMemoryError");
    // Open capture is flushed on shutdown with the trailing line attached.
    assert!(fatal.captured_text.ends_with("Shutting down"));
}

/// Structured lines are classified by their level field; non-JSON lines
/// fall back to the regex tiers.
#[test]
fn e2e_json_lines_classified_by_level() {
    let dir = TempDir::new().unwrap();
    fs::copy(fixture("structured.jsonl"), dir.path().join("api.jsonl")).unwrap();

    let app = immediate_config();
    let mut entry = WatchEntry::new(dir.path());
    entry.format = LineFormat::Json;
    entry.patterns = Some(vec!["*.jsonl".to_string()]);
    entry.server = Some("api-01".to_string());
    let (mut engine, rx) = engine_for(&app, vec![entry]);
    engine.run_cycle(true);

    let found = issues(&rx);
    assert_eq!(found.len(), 3, "issues: {found:#?}");

    assert_eq!(found[0].severity, Severity::Exception);
    assert_eq!(found[0].line_number, 2);
    assert_eq!(found[0].message, "query failed");
    assert_eq!(found[0].issue_type, "java.sql.SQLTimeoutException");
    assert_eq!(found[0].server, "api-01");

    assert_eq!(found[1].severity, Severity::Warning);
    assert_eq!(found[1].message, "slow request /api/orders");

    assert_eq!(found[2].severity, Severity::Error);
    assert_eq!(found[2].line_number, 4);
    assert_eq!(found[2].message, "not json at all but still an ERROR line");
}

/// A truncated file is reread from byte 0 and line numbering restarts.
#[test]
fn e2e_truncation_restarts_reading() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("app.log");
    append(
        &log,
        "INFO boot\nERROR first failure with a fairly long message\nINFO idle\n",
    );

    let app = immediate_config();
    let (mut engine, rx) = engine_for(&app, vec![WatchEntry::new(dir.path())]);
    engine.run_cycle(true);
    let first = issues(&rx);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].line_number, 2);

    fs::write(&log, "WARN after rotation\n").unwrap();
    engine.run_cycle(false);

    let events: Vec<EngineEvent> = rx.try_iter().collect();
    let after: Vec<&FinalizedIssue> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Issue(i) => Some(i),
            EngineEvent::Status(_) => None,
        })
        .collect();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].severity, Severity::Warning);
    assert_eq!(after[0].line_number, 1);
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::Status(s) if s.contains("rotated"))));
    assert_eq!(engine.diagnostics().targets[0].counters.rotations, 1);
}

/// A UTF-16LE file with a byte-order mark is decoded when transcoding is on.
#[test]
fn e2e_utf16_bom_file_is_transcoded() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("win.log");
    let mut bytes = vec![0xFF, 0xFE];
    for unit in "INFO service started\r\nERROR broken pipe\r\n".encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    fs::write(&log, &bytes).unwrap();

    let app = immediate_config();
    let mut entry = WatchEntry::new(dir.path());
    entry.transcode = true;
    let (mut engine, rx) = engine_for(&app, vec![entry]);
    engine.run_cycle(true);

    let found = issues(&rx);
    assert_eq!(found.len(), 1, "issues: {found:#?}");
    assert_eq!(found[0].message, "ERROR broken pipe");
    assert_eq!(found[0].line_number, 2);

    let diag = engine.diagnostics();
    assert_eq!(diag.targets[0].encoding, "UTF-16LE");
    assert_eq!(diag.targets[0].offset, bytes.len() as u64);
}

/// Files created after the first scan are picked up by a later scan;
/// deleted files are dropped.
#[test]
fn e2e_directory_changes_follow_scans() {
    let dir = TempDir::new().unwrap();
    let app = immediate_config();
    let (mut engine, rx) = engine_for(&app, vec![WatchEntry::new(dir.path())]);
    engine.run_cycle(true);
    assert_eq!(engine.target_count(), 0);

    let late = dir.path().join("late.log");
    append(&late, "ERROR arrived late\n");
    fs::write(dir.path().join("notes.txt"), "ERROR not a log\n").unwrap();
    engine.force_rescan();
    engine.run_cycle(true);

    assert!(engine.is_registered(&late));
    assert_eq!(engine.target_count(), 1);
    let found = issues(&rx);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].message, "ERROR arrived late");

    fs::remove_file(&late).unwrap();
    engine.force_rescan();
    engine.run_cycle(true);
    assert!(!engine.is_registered(&late));
    assert!(statuses(&rx).iter().any(|s| s.contains("Stopped tailing")));
}

/// Rules and watches loaded from TOML drive the engine, including custom
/// rule names and exclusions.
#[test]
fn e2e_config_file_rules_and_watch() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("payments.log");
    append(
        &log,
        "INFO ok\nERROR card declined code=51\nERROR HealthCheck ping failed\nWARN retrying\n",
    );

    let toml = format!(
        r#"
[engine]
context_lines_before = 0
context_lines_after = 0

[[watch]]
path = '{}'
server = "pay-01"

[rules]
exclusion = ["HealthCheck"]
error = ['\bERROR\b']

[[rules.custom]]
name = "CardDeclined"
pattern = 'card declined'
severity = "critical"
"#,
        dir.path().display()
    );
    let (app, warnings) = config::parse_config(&toml, Path::new("test.toml"));
    assert!(warnings.is_empty(), "warnings: {warnings:?}");
    assert_eq!(app.watches.len(), 1);

    let (mut engine, rx) = engine_for(&app, app.watches.clone());
    engine.run_cycle(true);

    let found = issues(&rx);
    assert_eq!(found.len(), 1, "issues: {found:#?}");
    assert_eq!(found[0].severity, Severity::Critical);
    assert_eq!(found[0].issue_type, "CardDeclined");
    assert_eq!(found[0].server, "pay-01");
    assert_eq!(found[0].line_number, 2);
}

// =============================================================================
// Service E2E
// =============================================================================

fn recv_issue(rx: &Receiver<EngineEvent>, timeout: Duration) -> Option<FinalizedIssue> {
    let deadline = Instant::now() + timeout;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(left) {
            Ok(EngineEvent::Issue(issue)) => return Some(issue),
            Ok(EngineEvent::Status(_)) => continue,
            Err(_) => return None,
        }
    }
    None
}

/// The background service tails appended lines and stops cleanly.
#[test]
fn e2e_service_tails_appended_lines() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("live.log");
    append(&log, "INFO existing content\n");

    let mut app = immediate_config();
    app.engine.poll_interval = Duration::from_millis(100);
    app.watches.push(WatchEntry::new(dir.path()));
    let (classifier, _) = Classifier::compile(&RuleSetDefinition::builtin());
    let (tx, rx) = mpsc::channel();
    let mut service = WatchService::start(&app, classifier, Arc::new(tx));

    append(&log, "ERROR disk quota exceeded\n");
    let issue = recv_issue(&rx, Duration::from_secs(5)).expect("issue from service");
    assert_eq!(issue.message, "ERROR disk quota exceeded");
    assert_eq!(issue.line_number, 2);

    service.stop();
    assert!(!service.is_running());
}
