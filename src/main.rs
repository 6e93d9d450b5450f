// LogSentinel - main.rs
//
// Command-line entry point. Handles:
// 1. CLI argument parsing
// 2. Config loading and logging initialisation (debug mode support)
// 3. Rule compilation
// 4. Either a single scan+poll pass (--once) or the background watch
//    service, printing every detected issue to stdout as one JSON object
//    per line
//
// While running, simple commands are read from stdin:
//   status | rescan | verbose on | verbose off | quit

use clap::Parser;
use logsentinel::app::engine::TailEngine;
use logsentinel::app::scanner::DirectoryScanner;
use logsentinel::app::service::WatchService;
use logsentinel::app::sink::{IssueSink, IssueStore};
use logsentinel::core::classifier::Classifier;
use logsentinel::core::decode;
use logsentinel::core::model::{FinalizedIssue, LineFormat};
use logsentinel::platform::config::{self, StartPosition, WatchEntry};
use logsentinel::util::constants;
use logsentinel::util::error::{ConfigError, LogSentinelError};
use logsentinel::util::logging;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// LogSentinel - tail log files and report exceptions, errors and warnings.
///
/// Watches directories (or single files) for log output, classifies new
/// lines against ordered severity rules, and prints each detected issue,
/// with its surrounding context, as a JSON line on stdout.
#[derive(Parser, Debug)]
#[command(name = "logsentinel", version, about)]
struct Cli {
    /// Directories or files to watch, in addition to `[[watch]]` entries.
    paths: Vec<PathBuf>,

    /// Path to config.toml (defaults to the platform config directory).
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Server/group name attached to issues from PATHS.
    #[arg(short = 's', long = "server")]
    server: Option<String>,

    /// Character encoding label for PATHS (e.g. utf-8, windows-1252, utf-16le).
    #[arg(short = 'e', long = "encoding")]
    encoding: Option<String>,

    /// Honour byte-order marks at the start of files in PATHS.
    #[arg(long = "transcode")]
    transcode: bool,

    /// Treat lines in PATHS as single-line JSON records.
    #[arg(long = "json")]
    json: bool,

    /// Skip content that exists before tailing starts.
    #[arg(long = "from-end")]
    from_end: bool,

    /// Scan and read once, flush open captures, then exit.
    #[arg(long = "once")]
    once: bool,

    /// Log every anchor line at info level.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

/// Sink that stores each issue and prints it with its assigned id.
struct JsonLinesSink {
    store: IssueStore,
}

impl IssueSink for JsonLinesSink {
    fn on_issue_detected(&self, mut issue: FinalizedIssue) {
        issue.id = Some(self.store.insert(issue.clone()));
        match serde_json::to_string(&issue) {
            Ok(line) => {
                let mut out = std::io::stdout().lock();
                if let Err(e) = writeln!(out, "{line}").and_then(|_| out.flush()) {
                    tracing::warn!(error = %e, "Failed to write issue to stdout");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialise issue"),
        }
    }

    fn on_status_message(&self, message: &str) {
        tracing::info!(status = %message, "Status");
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        tracing::error!(error = %e, "Startup failed");
        eprintln!("Error: {e}");
        std::process::exit(2);
    }
}

fn run(cli: Cli) -> logsentinel::util::error::Result<()> {
    let config_path = match cli.config.clone() {
        // An explicitly named config file must exist.
        Some(path) => {
            std::fs::metadata(&path).map_err(|source| LogSentinelError::Io {
                path: path.clone(),
                operation: "open config",
                source,
            })?;
            path
        }
        None => config::PlatformPaths::resolve().config_file(),
    };
    let (mut app_config, config_warnings) = config::load_config(&config_path);

    logging::init(
        cli.debug,
        app_config.log_level.as_deref(),
        app_config.log_file.as_deref(),
    );
    for warning in &config_warnings {
        tracing::warn!("{}", warning);
    }

    tracing::info!(
        version = constants::APP_VERSION,
        config = %config_path.display(),
        debug = cli.debug,
        "{} starting",
        constants::APP_NAME
    );

    if cli.from_end {
        app_config.engine.start_position = StartPosition::End;
    }
    let encoding = match cli.encoding.as_deref() {
        Some(label) => {
            decode::resolve_encoding(label).ok_or_else(|| ConfigError::UnknownEncoding {
                field: "--encoding".to_string(),
                label: label.to_string(),
            })?
        }
        None => encoding_rs::UTF_8,
    };
    for path in &cli.paths {
        let mut entry = WatchEntry::new(path.clone());
        entry.server = cli.server.clone();
        entry.encoding = encoding;
        entry.transcode = cli.transcode;
        entry.max_depth = app_config.max_depth;
        if cli.json {
            entry.format = LineFormat::Json;
        }
        app_config.watches.push(entry);
    }

    app_config.require_watches(&config_path)?;

    let (classifier, rule_errors) = Classifier::compile(&app_config.rules);
    if !rule_errors.is_empty() {
        tracing::warn!(
            skipped = rule_errors.len(),
            "Some classification rules were skipped"
        );
    }
    tracing::info!(
        rules = classifier.rule_count(),
        watches = app_config.watches.len(),
        "Ready"
    );

    let sink = Arc::new(JsonLinesSink {
        store: IssueStore::new(app_config.max_issues),
    });

    if cli.once {
        run_once(&app_config, classifier, Arc::clone(&sink), cli.verbose);
    } else {
        run_service(&app_config, classifier, Arc::clone(&sink), cli.verbose);
    }

    let counts = sink.store.counts_by_severity();
    tracing::info!(
        issues = sink.store.len(),
        by_severity = ?counts,
        "{} finished",
        constants::APP_NAME
    );
    Ok(())
}

fn run_once(
    app_config: &config::AppConfig,
    classifier: Classifier,
    sink: Arc<JsonLinesSink>,
    verbose: bool,
) {
    let mut scanner = DirectoryScanner::new(
        &app_config.include_patterns,
        &app_config.exclude_patterns,
        app_config.engine.start_position,
    );
    for entry in &app_config.watches {
        scanner.add_watch_target(entry.clone());
    }
    let rules = Arc::new(arc_swap::ArcSwap::from_pointee(classifier));
    let mut engine = TailEngine::new(app_config.engine.clone(), scanner, rules, sink);
    engine.set_verbose(verbose);

    engine.run_scan();
    let mut stats = engine.poll();
    // Drain the startup backlog past the per-poll cap, but stop there so a
    // file that keeps growing cannot hold the pass open.
    let budget = engine.pending_polls();
    let mut polls = 0u64;
    while stats.lines > 0 && polls < budget {
        stats = engine.poll();
        polls += 1;
    }
    if stats.lines > 0 && engine.pending_polls() > 0 {
        tracing::info!(
            polls = polls + 1,
            "Files still growing; stopping after the startup backlog"
        );
    }
    engine.shutdown();
}

fn run_service(
    app_config: &config::AppConfig,
    classifier: Classifier,
    sink: Arc<JsonLinesSink>,
    verbose: bool,
) {
    let mut service = WatchService::start(app_config, classifier, sink);
    if verbose {
        service.set_verbose(true);
    }

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        match line.trim() {
            "" => {}
            "status" => match serde_json::to_string_pretty(&*service.diagnostics()) {
                Ok(text) => eprintln!("{text}"),
                Err(e) => tracing::warn!(error = %e, "Failed to serialise diagnostics"),
            },
            "rescan" => service.force_rescan(),
            "verbose on" => service.set_verbose(true),
            "verbose off" => service.set_verbose(false),
            "quit" | "exit" => {
                service.stop();
                return;
            }
            other => eprintln!(
                "Unknown command '{other}'. Commands: status, rescan, verbose on, verbose off, quit"
            ),
        }
    }

    // stdin closed (e.g. running detached): keep tailing until killed.
    while service.is_running() {
        std::thread::park_timeout(app_config.engine.scan_interval);
    }
}
