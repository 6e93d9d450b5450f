// LogSentinel - app/engine.rs
//
// Tail engine: the single-owner core scheduler. Each poll walks every
// registered target, pulls new complete lines through the line reader,
// classifies them against the current rule snapshot, feeds the per-target
// capture state machine, deduplicates finished captures and hands them to
// the issue sink.
//
// Threading: the engine is driven by exactly one thread (see
// `app::service`). Targets, captures, dedup windows and the position
// tracker are plain owned state with no locking. The only shared input is
// the rule snapshot, loaded once per poll from an `ArcSwap`.
//
// Failure handling:
//   - A stat or read error on one target is logged, recorded in that
//     target's counters, surfaced as a status message, and the target is
//     skipped for this poll. It stays registered and is retried next poll.
//   - Rotation/truncation rewinds the target to byte 0, flushes its open
//     capture and clears its before-context ring.
//   - Offsets are committed only after every line of the chunk has been
//     classified and captured.

use crate::app::scanner::{DirectoryScanner, NewTarget};
use crate::app::sink::IssueSink;
use crate::core::capture::{truncate_chars, CaptureAssembler, CapturedIssue};
use crate::core::classifier::{extract_exception_type, Classifier};
use crate::core::decode;
use crate::core::dedup::{fingerprint, DedupWindow};
use crate::core::model::{FinalizedIssue, WatchSpec};
use crate::core::tracker::PositionTracker;
use crate::platform::config::{EngineConfig, WatchEntry};
use crate::platform::fs;
use crate::platform::reader::{self, ReadRequest};
use crate::util::constants;
use crate::util::error::ReadError;
use crate::util::logging::preview;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use encoding_rs::Encoding;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

// =============================================================================
// Clock
// =============================================================================

/// Source of wall-clock time for detection timestamps and dedup windows.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used by tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// Per-target state
// =============================================================================

/// Running counters for one target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetCounters {
    pub lines_read: u64,
    pub issues_emitted: u64,
    pub duplicates_suppressed: u64,
    pub rotations: u64,
    pub read_errors: u64,
    /// Chunks that contained bytes invalid in the target's encoding.
    pub decode_errors: u64,
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct TargetState {
    spec: WatchSpec,
    /// Encoding in use; differs from `spec.encoding` after a BOM was seen.
    encoding: &'static Encoding,
    /// Seed the first read position at EOF instead of byte 0.
    start_at_end: bool,
    capture: CaptureAssembler,
    dedup: DedupWindow,
    counters: TargetCounters,
}

/// Diagnostics row for one tracked file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetDiagnostics {
    pub path: PathBuf,
    pub server: String,
    pub offset: u64,
    pub size: u64,
    pub lines: u64,
    pub encoding: &'static str,
    pub capturing: bool,
    pub counters: TargetCounters,
}

/// Read-only snapshot of engine state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub targets: Vec<TargetDiagnostics>,
    pub watch_roots: Vec<PathBuf>,
    pub cycles: u64,
    pub last_scan: Option<DateTime<Utc>>,
    pub verbose: bool,
    pub rule_count: usize,
}

/// Totals for one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub lines: u64,
    pub issues: u64,
    pub errors: u64,
}

// =============================================================================
// TailEngine
// =============================================================================

pub struct TailEngine {
    config: EngineConfig,
    rules: Arc<ArcSwap<Classifier>>,
    scanner: DirectoryScanner,
    tracker: PositionTracker,
    targets: BTreeMap<PathBuf, TargetState>,
    sink: Arc<dyn IssueSink>,
    clock: Arc<dyn Clock>,
    verbose: bool,
    cycles: u64,
    last_scan: Option<DateTime<Utc>>,
}

impl TailEngine {
    pub fn new(
        config: EngineConfig,
        scanner: DirectoryScanner,
        rules: Arc<ArcSwap<Classifier>>,
        sink: Arc<dyn IssueSink>,
    ) -> Self {
        Self {
            config,
            rules,
            scanner,
            tracker: PositionTracker::new(),
            targets: BTreeMap::new(),
            sink,
            clock: Arc::new(SystemClock),
            verbose: false,
            cycles: 0,
            last_scan: None,
        }
    }

    /// Replace the clock (tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // -------------------------------------------------------------------------
    // Reconfiguration
    // -------------------------------------------------------------------------

    /// Add a directory or file watch; takes effect at the next scan.
    pub fn add_watch_target(&mut self, entry: WatchEntry) {
        self.scanner.add_watch_target(entry);
    }

    /// Remove a watch; its files are unregistered at the next scan.
    pub fn remove_watch_target(&mut self, path: &Path) -> bool {
        self.scanner.remove_watch_target(path)
    }

    pub fn set_file_patterns(&mut self, patterns: &[String]) {
        self.scanner.set_file_patterns(patterns);
    }

    pub fn force_rescan(&mut self) {
        self.scanner.force_rescan();
    }

    /// Swap in a new rule snapshot. Polls already in progress keep the
    /// snapshot they loaded.
    pub fn set_rules(&self, classifier: Classifier) {
        self.rules.store(Arc::new(classifier));
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Start tracking a file. Its read position is seeded on the next poll.
    pub fn register(&mut self, target: NewTarget) {
        let path = target.spec.path.clone();
        if self.targets.contains_key(&path) {
            return;
        }
        tracing::info!(
            file = %path.display(),
            server = target.spec.server_name(),
            encoding = decode::encoding_name(target.spec.encoding),
            from_end = target.start_at_end,
            "Tailing file"
        );
        self.status(format!("Tailing {}", path.display()));
        self.targets.insert(
            path,
            TargetState {
                encoding: target.spec.encoding,
                spec: target.spec,
                start_at_end: target.start_at_end,
                capture: CaptureAssembler::new(self.config.capture),
                dedup: DedupWindow::new(self.config.dedup_window),
                counters: TargetCounters::default(),
            },
        );
    }

    /// Stop tracking a file, flushing any open capture. Re-registering the
    /// same path later starts fresh.
    pub fn unregister(&mut self, path: &Path) -> bool {
        let Some(mut state) = self.targets.remove(path) else {
            return false;
        };
        if let Some(capture) = state.capture.flush() {
            emit(
                self.sink.as_ref(),
                &mut state,
                capture,
                self.config.deduplicate,
            );
        }
        self.tracker.remove(path);
        tracing::info!(file = %path.display(), "Stopped tailing file");
        self.status(format!("Stopped tailing {}", path.display()));
        true
    }

    pub fn is_registered(&self, path: &Path) -> bool {
        self.targets.contains_key(path)
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    // -------------------------------------------------------------------------
    // Cycle
    // -------------------------------------------------------------------------

    /// List watches and apply the differences.
    pub fn run_scan(&mut self) {
        let outcome = self.scanner.scan();
        for e in &outcome.errors {
            self.status(format!("Scan: {e}"));
        }
        for root in &outcome.retired {
            tracing::warn!(watch = %root.display(), "Watch unreachable; retiring its files");
            self.status(format!(
                "Watch {} unreachable; its files are no longer tailed",
                root.display()
            ));
        }
        for path in &outcome.removed {
            self.unregister(path);
        }
        for target in outcome.added {
            self.register(target);
        }
        self.last_scan = Some(self.clock.now());
    }

    /// Read and process new lines from every registered target.
    pub fn poll(&mut self) -> PollStats {
        let classifier = self.rules.load_full();
        let paths: Vec<PathBuf> = self.targets.keys().cloned().collect();
        let mut stats = PollStats::default();
        for path in paths {
            self.poll_target(&path, &classifier, &mut stats);
        }
        stats
    }

    /// Polls needed to read everything pending at the last stat, given the
    /// per-poll read cap. Targets drain in parallel, so this is the largest
    /// per-target count.
    pub fn pending_polls(&self) -> u64 {
        let cap = self.config.max_read_bytes_per_tick.max(1) as u64;
        self.targets
            .keys()
            .filter_map(|path| self.tracker.position(path))
            .map(|p| p.signature.size.saturating_sub(p.offset).div_ceil(cap))
            .max()
            .unwrap_or(0)
    }

    /// One full cycle: optional scan, then a poll.
    pub fn run_cycle(&mut self, scan: bool) -> PollStats {
        if scan {
            self.run_scan();
        }
        let stats = self.poll();
        self.cycles += 1;
        if stats.lines > 0 || stats.issues > 0 {
            tracing::debug!(
                cycle = self.cycles,
                lines = stats.lines,
                issues = stats.issues,
                errors = stats.errors,
                "Poll cycle complete"
            );
        }
        stats
    }

    /// Finalize every open capture. Called once when the engine stops.
    pub fn shutdown(&mut self) {
        let mut flushed = 0usize;
        for state in self.targets.values_mut() {
            if let Some(capture) = state.capture.flush() {
                emit(self.sink.as_ref(), state, capture, self.config.deduplicate);
                flushed += 1;
            }
        }
        tracing::info!(
            targets = self.targets.len(),
            flushed,
            "Tail engine stopped"
        );
    }

    fn poll_target(&mut self, path: &Path, classifier: &Classifier, stats: &mut PollStats) {
        let Some(state) = self.targets.get_mut(path) else {
            return;
        };

        let signature = match fs::file_signature(path) {
            Ok(sig) => sig,
            Err(e) => {
                if e.is_not_found() {
                    tracing::debug!(file = %path.display(), "File missing; skipping this poll");
                } else {
                    tracing::warn!(file = %path.display(), error = %e, "Cannot stat file");
                }
                state.counters.read_errors += 1;
                state.counters.last_error = Some(e.to_string());
                stats.errors += 1;
                self.sink.on_status_message(&e.to_string());
                return;
            }
        };

        if !self.tracker.contains(path) {
            let (offset, lines) = if state.start_at_end {
                match seed_at_end(path, signature.size, state) {
                    Ok(prefix) => (prefix.end, prefix.lines),
                    Err(e) => {
                        tracing::warn!(file = %path.display(), error = %e, "Cannot count existing lines");
                        state.counters.read_errors += 1;
                        state.counters.last_error = Some(e.to_string());
                        stats.errors += 1;
                        return;
                    }
                }
            } else {
                (0, 0)
            };
            tracing::debug!(file = %path.display(), offset, lines, "Seeding read position");
            self.tracker.track(path, offset, signature, lines);
        } else if self.tracker.detect_rotation(path, &signature) {
            let previous = self.tracker.get_offset(path).map(|(o, _)| o).unwrap_or(0);
            tracing::info!(
                file = %path.display(),
                old_offset = previous,
                new_size = signature.size,
                "File rotated or truncated; reading from start"
            );
            state.counters.rotations += 1;
            if let Some(capture) = state.capture.reset() {
                emit(self.sink.as_ref(), state, capture, self.config.deduplicate);
            }
            state.encoding = state.spec.encoding;
            self.tracker.reset(path, signature);
            self.sink
                .on_status_message(&format!("{} rotated; reading from start", path.display()));
        }

        let Some(position) = self.tracker.position(path).copied() else {
            return;
        };
        if signature.size <= position.offset {
            self.tracker.touch(path, signature);
            return;
        }

        let request = ReadRequest {
            offset: position.offset,
            size: signature.size,
            encoding: state.encoding,
            transcode: state.spec.transcode,
            max_bytes: self.config.max_read_bytes_per_tick,
        };
        let chunk = match reader::read_new_lines(path, request) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Read failed; will retry");
                state.counters.read_errors += 1;
                state.counters.last_error = Some(e.to_string());
                stats.errors += 1;
                self.sink.on_status_message(&e.to_string());
                return;
            }
        };
        if let Some(enc) = chunk.detected_encoding {
            state.encoding = enc;
        }
        if chunk.had_decode_errors {
            state.counters.decode_errors += 1;
        }

        let verbose = self.verbose;
        let mut line_number = position.lines;
        for line in &chunk.lines {
            line_number += 1;
            let classification = classifier.classify_line(line, state.spec.format);
            if let Some(ref c) = classification {
                if verbose {
                    tracing::info!(
                        file = %path.display(),
                        line = line_number,
                        severity = %c.severity,
                        pattern = %c.matched_pattern,
                        text = preview(line),
                        "Anchor line"
                    );
                } else {
                    tracing::trace!(
                        file = %path.display(),
                        line = line_number,
                        severity = %c.severity,
                        pattern = %c.matched_pattern,
                        "Anchor line"
                    );
                }
            }
            let now = self.clock.now();
            for capture in state.capture.push(line, line_number, classification, now) {
                if emit(self.sink.as_ref(), state, capture, self.config.deduplicate) {
                    stats.issues += 1;
                }
            }
        }

        let line_count = chunk.lines.len() as u64;
        state.counters.lines_read += line_count;
        stats.lines += line_count;
        // A force-consumed fragment is not a complete line.
        let complete_lines = line_count - u64::from(chunk.forced);
        self.tracker.update_offset(
            path,
            position.offset + chunk.bytes_consumed,
            signature,
            complete_lines,
        );
    }

    // -------------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------------

    pub fn diagnostics(&self) -> Diagnostics {
        let targets = self
            .targets
            .iter()
            .map(|(path, state)| {
                let position = self.tracker.position(path);
                TargetDiagnostics {
                    path: path.clone(),
                    server: state.spec.server_name().to_string(),
                    offset: position.map(|p| p.offset).unwrap_or(0),
                    size: position.map(|p| p.signature.size).unwrap_or(0),
                    lines: position.map(|p| p.lines).unwrap_or(0),
                    encoding: decode::encoding_name(state.encoding),
                    capturing: state.capture.is_capturing(),
                    counters: state.counters.clone(),
                }
            })
            .collect();
        Diagnostics {
            targets,
            watch_roots: self.scanner.watch_roots(),
            cycles: self.cycles,
            last_scan: self.last_scan,
            verbose: self.verbose,
            rule_count: self.rules.load().rule_count(),
        }
    }

    fn status(&self, message: String) {
        self.sink.on_status_message(&message);
    }
}

/// Seed position for a target that starts at EOF: just past the last complete
/// line, so a partial trailing line is read once it is finished. A BOM is
/// honoured here because the reader only sniffs one at offset 0.
fn seed_at_end(
    path: &Path,
    size: u64,
    state: &mut TargetState,
) -> Result<fs::LinePrefix, ReadError> {
    if state.spec.transcode {
        if let Some(enc) = fs::leading_bom(path)? {
            state.encoding = enc;
        }
    }
    fs::complete_prefix(path, size, state.encoding)
}

/// Build the finalized issue for `capture`, apply deduplication and hand it
/// to `sink`. Returns `true` when the issue was emitted.
fn emit(
    sink: &dyn IssueSink,
    state: &mut TargetState,
    capture: CapturedIssue,
    deduplicate: bool,
) -> bool {
    let message = truncate_chars(capture.message(), constants::MAX_ISSUE_MESSAGE_CHARS).to_string();

    if deduplicate && !state.dedup.check_and_record(fingerprint(&message), capture.detected_at) {
        state.counters.duplicates_suppressed += 1;
        tracing::debug!(
            file = %state.spec.path.display(),
            line = capture.line_number,
            "Duplicate issue suppressed"
        );
        return false;
    }

    let issue_type = capture
        .classification
        .rule_name
        .clone()
        .or_else(|| extract_exception_type(&capture.anchor, &capture.after))
        .unwrap_or_else(|| capture.classification.severity.tag().to_string());

    let issue = FinalizedIssue {
        id: None,
        server: state.spec.server_name().to_string(),
        file_name: state.spec.file_name(),
        path: state.spec.path.clone(),
        line_number: capture.line_number,
        issue_type,
        message,
        captured_text: capture.block(),
        detected_at: capture.detected_at,
        severity: capture.classification.severity,
        matched_pattern: capture.classification.matched_pattern,
        acknowledged: false,
    };
    tracing::debug!(
        file = %issue.path.display(),
        line = issue.line_number,
        severity = %issue.severity,
        issue_type = %issue.issue_type,
        "Issue detected"
    );
    state.counters.issues_emitted += 1;
    sink.on_issue_detected(issue);
    true
}

// =============================================================================
// Tests
// =============================================================================
