// LogSentinel - app/service.rs
//
// Watch service: runs the tail engine on one dedicated background thread.
//
// Architecture:
//   - `WatchService` is the handle held by the caller; `run_poll_loop`
//     executes on the background thread and exclusively owns the engine.
//   - Reconfiguration requests are sent as `EngineCommand`s over an mpsc
//     channel and drained at the start of each cycle, so a scan never sees
//     a half-applied configuration.
//   - Rule sets are swapped through a shared `ArcSwap<Classifier>`; the
//     loop loads one snapshot per poll.
//   - After every cycle the loop publishes a `Diagnostics` snapshot through
//     an `ArcSwap`, so queries never touch engine state.
//   - An `Arc<AtomicBool>` stop flag is checked between cycles and during
//     the inter-cycle sleep (every CANCEL_CHECK_INTERVAL_MS). A cycle in
//     progress is never interrupted. On stop, open captures are flushed.

use crate::app::engine::{Diagnostics, TailEngine};
use crate::app::scanner::DirectoryScanner;
use crate::app::sink::IssueSink;
use crate::core::classifier::Classifier;
use crate::platform::config::{AppConfig, WatchEntry};
use crate::util::constants::CANCEL_CHECK_INTERVAL_MS;
use arc_swap::ArcSwap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Reconfiguration request applied at the next cycle boundary.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    AddWatchTarget(WatchEntry),
    RemoveWatchTarget(PathBuf),
    SetFilePatterns(Vec<String>),
    ForceRescan,
    SetVerbose(bool),
}

/// Handle to the background poll thread.
pub struct WatchService {
    commands: mpsc::Sender<EngineCommand>,
    cancel: Arc<AtomicBool>,
    rules: Arc<ArcSwap<Classifier>>,
    diagnostics: Arc<ArcSwap<Diagnostics>>,
    handle: Option<JoinHandle<()>>,
}

impl WatchService {
    /// Build an engine from `config` and start polling.
    ///
    /// Watches from `config.watches` are registered before the first cycle.
    pub fn start(config: &AppConfig, classifier: Classifier, sink: Arc<dyn IssueSink>) -> Self {
        let mut scanner = DirectoryScanner::new(
            &config.include_patterns,
            &config.exclude_patterns,
            config.engine.start_position,
        );
        for entry in &config.watches {
            scanner.add_watch_target(entry.clone());
        }
        let rules = Arc::new(ArcSwap::from_pointee(classifier));
        let engine = TailEngine::new(config.engine.clone(), scanner, Arc::clone(&rules), sink);
        Self::spawn(
            engine,
            rules,
            config.engine.poll_interval,
            config.engine.scan_interval,
        )
    }

    /// Start polling with a prepared engine. `rules` must be the snapshot
    /// cell the engine was built with.
    pub fn spawn(
        engine: TailEngine,
        rules: Arc<ArcSwap<Classifier>>,
        poll_interval: Duration,
        scan_interval: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let diagnostics = Arc::new(ArcSwap::from_pointee(engine.diagnostics()));

        let thread_cancel = Arc::clone(&cancel);
        let thread_diagnostics = Arc::clone(&diagnostics);
        let handle = std::thread::spawn(move || {
            run_poll_loop(
                engine,
                rx,
                thread_cancel,
                thread_diagnostics,
                poll_interval,
                scan_interval,
            );
        });

        tracing::info!(
            poll_ms = poll_interval.as_millis() as u64,
            scan_ms = scan_interval.as_millis() as u64,
            "Watch service started"
        );

        Self {
            commands: tx,
            cancel,
            rules,
            diagnostics,
            handle: Some(handle),
        }
    }

    fn send(&self, command: EngineCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("Poll thread has exited; command dropped");
        }
    }

    pub fn add_watch_target(&self, entry: WatchEntry) {
        self.send(EngineCommand::AddWatchTarget(entry));
    }

    pub fn remove_watch_target(&self, path: impl Into<PathBuf>) {
        self.send(EngineCommand::RemoveWatchTarget(path.into()));
    }

    pub fn set_file_patterns(&self, patterns: Vec<String>) {
        self.send(EngineCommand::SetFilePatterns(patterns));
    }

    /// Clear cached directory listings; the next cycle rescans everything.
    pub fn force_rescan(&self) {
        self.send(EngineCommand::ForceRescan);
    }

    /// Promote per-line classification traces to info level.
    pub fn set_verbose(&self, verbose: bool) {
        self.send(EngineCommand::SetVerbose(verbose));
    }

    /// Atomically replace the rule set. Takes effect at the next poll.
    pub fn set_rules(&self, classifier: Classifier) {
        tracing::info!(rules = classifier.rule_count(), "Rule set replaced");
        self.rules.store(Arc::new(classifier));
    }

    /// Latest published diagnostics snapshot.
    pub fn diagnostics(&self) -> Arc<Diagnostics> {
        self.diagnostics.load_full()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the poll thread to stop and wait for it to flush and exit.
    pub fn stop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Poll thread panicked");
            }
            tracing::info!("Watch service stopped");
        }
    }
}

impl Drop for WatchService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Apply one command. Returns `true` when the next cycle must scan.
fn apply_command(engine: &mut TailEngine, command: EngineCommand) -> bool {
    tracing::debug!(command = ?command, "Applying command");
    match command {
        EngineCommand::AddWatchTarget(entry) => {
            engine.add_watch_target(entry);
            true
        }
        EngineCommand::RemoveWatchTarget(path) => {
            if !engine.remove_watch_target(&path) {
                tracing::warn!(path = %path.display(), "No watch configured for path");
            }
            true
        }
        EngineCommand::SetFilePatterns(patterns) => {
            engine.set_file_patterns(&patterns);
            true
        }
        EngineCommand::ForceRescan => {
            engine.force_rescan();
            true
        }
        EngineCommand::SetVerbose(verbose) => {
            engine.set_verbose(verbose);
            false
        }
    }
}

/// Background poll loop. Owns the engine until stop.
fn run_poll_loop(
    mut engine: TailEngine,
    commands: mpsc::Receiver<EngineCommand>,
    cancel: Arc<AtomicBool>,
    diagnostics: Arc<ArcSwap<Diagnostics>>,
    poll_interval: Duration,
    scan_interval: Duration,
) {
    let cancel_check = Duration::from_millis(CANCEL_CHECK_INTERVAL_MS);
    let mut last_scan: Option<Instant> = None;

    'outer: loop {
        if cancel.load(Ordering::SeqCst) {
            break;
        }

        let mut scan_due = last_scan.map_or(true, |t| t.elapsed() >= scan_interval);
        loop {
            match commands.try_recv() {
                Ok(command) => scan_due |= apply_command(&mut engine, command),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => break 'outer,
            }
        }

        let cycle_start = Instant::now();
        engine.run_cycle(scan_due);
        if scan_due {
            last_scan = Some(cycle_start);
        }
        diagnostics.store(Arc::new(engine.diagnostics()));

        // Interruptible sleep for the remainder of the interval.
        while cycle_start.elapsed() < poll_interval {
            if cancel.load(Ordering::SeqCst) {
                break 'outer;
            }
            let remaining = poll_interval.saturating_sub(cycle_start.elapsed());
            std::thread::sleep(remaining.min(cancel_check));
        }
    }

    engine.shutdown();
    diagnostics.store(Arc::new(engine.diagnostics()));
    tracing::debug!("Poll thread exiting");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::sink::EngineEvent;
    use crate::core::capture::CaptureSettings;
    use crate::core::model::FinalizedIssue;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn test_config(dir: &std::path::Path, before: usize, after: usize) -> AppConfig {
        let mut config = AppConfig::default();
        config.engine.poll_interval = Duration::from_millis(100);
        config.engine.scan_interval = Duration::from_millis(500);
        config.engine.capture = CaptureSettings {
            lines_before: before,
            lines_after: after,
        };
        config.watches.push(WatchEntry::new(dir));
        config
    }

    fn append(path: &std::path::Path, text: &str) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    fn next_issue(rx: &mpsc::Receiver<EngineEvent>) -> Option<FinalizedIssue> {
        let deadline = Instant::now() + Duration::from_secs(10);
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            match rx.recv_timeout(left) {
                Ok(EngineEvent::Issue(issue)) => return Some(issue),
                Ok(EngineEvent::Status(_)) => continue,
                Err(_) => return None,
            }
        }
        None
    }

    fn wait_for<F: Fn(&Diagnostics) -> bool>(service: &WatchService, pred: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if pred(&service.diagnostics()) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_service_emits_and_flushes_on_stop() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("app.log");
        append(&log, "");
        let (tx, rx) = mpsc::channel();
        let mut service =
            WatchService::start(&test_config(dir.path(), 0, 50), Classifier::default(), Arc::new(tx));
        assert!(wait_for(&service, |d| d.targets.len() == 1));

        append(&log, "java.lang.IllegalStateException: bad\n\tat a.B.c(B.java:9)\n");
        assert!(wait_for(&service, |d| d.targets[0].capturing));

        service.stop();
        assert!(!service.is_running());
        let issue = next_issue(&rx).expect("flushed on stop");
        assert_eq!(issue.issue_type, "java.lang.IllegalStateException");
        assert!(issue.captured_text.ends_with("(B.java:9)"));
        assert!(!service.diagnostics().targets[0].capturing);
    }

    #[test]
    fn test_commands_apply_at_next_cycle() {
        let dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        append(&other.path().join("svc.out"), "FATAL boot failed\n");

        let (tx, rx) = mpsc::channel();
        let mut service =
            WatchService::start(&test_config(dir.path(), 0, 0), Classifier::default(), Arc::new(tx));

        let mut entry = WatchEntry::new(other.path());
        entry.server = Some("db-01".into());
        service.add_watch_target(entry);
        service.set_verbose(true);
        let issue = next_issue(&rx).expect("issue from added watch");
        assert_eq!(issue.server, "db-01");
        assert!(wait_for(&service, |d| d.verbose && d.watch_roots.len() == 2));

        service.remove_watch_target(other.path());
        assert!(wait_for(&service, |d| d.targets.is_empty()));
        service.stop();
    }

    #[test]
    fn test_rule_swap_and_pattern_change() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel();
        let mut service =
            WatchService::start(&test_config(dir.path(), 0, 0), Classifier::default(), Arc::new(tx));

        let def = crate::core::classifier::RuleSetDefinition {
            error: vec!["declined".into()],
            ..Default::default()
        };
        service.set_rules(Classifier::compile(&def).0);
        service.set_file_patterns(vec!["*.txt".into()]);
        append(&dir.path().join("pay.txt"), "card declined\n");
        service.force_rescan();

        let issue = next_issue(&rx).expect("issue after reconfiguration");
        assert_eq!(issue.file_name, "pay.txt");
        assert_eq!(issue.matched_pattern, "declined");
        service.stop();
    }
}
