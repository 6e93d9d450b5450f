// LogSentinel - platform/config.rs
//
// Platform directory resolution and config.toml loading with validation.
//
// Uses the `directories` crate for XDG (Linux), AppData (Windows) and
// Library (macOS) compliance.
//
// Loading never fails: a missing file yields defaults, an unparseable file
// yields defaults plus a warning, and every out-of-range value is replaced by
// its default with an actionable warning naming the field and the accepted
// range. The resulting `AppConfig` is an immutable snapshot.

use crate::core::capture::CaptureSettings;
use crate::core::classifier::RuleSetDefinition;
use crate::core::decode;
use crate::core::model::LineFormat;
use crate::util::constants;
use crate::util::error::ConfigError;
use directories::ProjectDirs;
use encoding_rs::Encoding;
use serde::Deserialize;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolved platform paths for LogSentinel configuration.
#[derive(Debug, Clone)]
pub struct PlatformPaths {
    /// Configuration directory (e.g. ~/.config/logsentinel/).
    pub config_dir: PathBuf,
}

impl PlatformPaths {
    /// Resolve platform-appropriate paths, falling back to the current
    /// directory when the platform directories cannot be determined.
    pub fn resolve() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("", "", constants::APP_ID) {
            let config_dir = proj_dirs.config_dir().to_path_buf();
            tracing::debug!(config = %config_dir.display(), "Platform paths resolved");
            Self { config_dir }
        } else {
            tracing::warn!("Could not determine platform directories, using current directory");
            Self {
                config_dir: PathBuf::from("."),
            }
        }
    }

    /// Default location of config.toml.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(constants::CONFIG_FILE_NAME)
    }
}

// =============================================================================
// Raw config.toml shape
// =============================================================================

/// Raw deserialisable shape of config.toml.
///
/// Unknown keys are silently ignored so a newer config file still loads
/// with an older binary.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub engine: EngineSection,
    pub discovery: DiscoverySection,
    pub watch: Vec<WatchSection>,
    /// `None` selects the built-in rule set.
    pub rules: Option<RuleSetDefinition>,
    pub store: StoreSection,
    pub logging: LoggingSection,
}

/// `[engine]` config section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub poll_interval_ms: Option<u64>,
    pub scan_interval_ms: Option<u64>,
    pub context_lines_before: Option<usize>,
    pub context_lines_after: Option<usize>,
    pub deduplicate: Option<bool>,
    pub dedup_window_secs: Option<u64>,
    /// "beginning", "end" or "end-on-startup".
    pub start_position: Option<String>,
    pub max_read_bytes_per_tick: Option<usize>,
}

/// `[discovery]` config section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub include_patterns: Option<Vec<String>>,
    pub exclude_patterns: Option<Vec<String>>,
    pub max_depth: Option<usize>,
}

/// One `[[watch]]` entry.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WatchSection {
    /// Directory or single file to watch.
    pub path: Option<PathBuf>,
    pub server: Option<String>,
    /// Include patterns for this directory; the global ones when absent.
    pub patterns: Option<Vec<String>>,
    /// WHATWG encoding label.
    pub encoding: Option<String>,
    pub transcode: bool,
    /// "plain" or "json".
    pub format: Option<String>,
    pub max_depth: Option<usize>,
}

/// `[store]` config section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub max_issues: Option<usize>,
}

/// `[logging]` config section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// "error", "warn", "info", "debug" or "trace".
    pub level: Option<String>,
    /// Log file path (empty = stderr only).
    pub file: Option<String>,
}

// =============================================================================
// Validated configuration
// =============================================================================

/// Where a newly discovered file starts being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// Every new file is read from byte 0.
    #[default]
    Beginning,
    /// Every new file starts at its current end.
    End,
    /// Files found by the first scan start at their end; files appearing
    /// later are read from byte 0.
    EndOnStartup,
}

impl StartPosition {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "beginning" | "start" => Some(Self::Beginning),
            "end" => Some(Self::End),
            "end-on-startup" | "end_on_startup" => Some(Self::EndOnStartup),
            _ => None,
        }
    }

    /// Whether a newly discovered file skips its existing content.
    /// `initial_scan` is true for files found by the very first scan.
    pub fn starts_at_end(self, initial_scan: bool) -> bool {
        match self {
            Self::Beginning => false,
            Self::End => true,
            Self::EndOnStartup => initial_scan,
        }
    }
}

/// Validated tail engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub poll_interval: Duration,
    pub scan_interval: Duration,
    pub capture: CaptureSettings,
    pub deduplicate: bool,
    pub dedup_window: Duration,
    pub start_position: StartPosition,
    pub max_read_bytes_per_tick: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(constants::DEFAULT_POLL_INTERVAL_MS),
            scan_interval: Duration::from_millis(constants::DEFAULT_SCAN_INTERVAL_MS),
            capture: CaptureSettings::default(),
            deduplicate: constants::DEFAULT_DEDUPLICATE,
            dedup_window: Duration::from_secs(constants::DEFAULT_DEDUP_WINDOW_SECS),
            start_position: StartPosition::default(),
            max_read_bytes_per_tick: constants::MAX_TAIL_READ_BYTES_PER_TICK,
        }
    }
}

/// Validated `[[watch]]` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEntry {
    pub path: PathBuf,
    pub server: Option<String>,
    pub patterns: Option<Vec<String>>,
    pub encoding: &'static Encoding,
    pub transcode: bool,
    pub format: LineFormat,
    pub max_depth: usize,
}

impl WatchEntry {
    /// A UTF-8 plain-text entry with default depth.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            server: None,
            patterns: None,
            encoding: encoding_rs::UTF_8,
            transcode: false,
            format: LineFormat::Plain,
            max_depth: constants::DEFAULT_MAX_DEPTH,
        }
    }
}

/// Validated application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_depth: usize,
    pub watches: Vec<WatchEntry>,
    pub rules: RuleSetDefinition,
    pub max_issues: usize,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            include_patterns: to_strings(constants::DEFAULT_INCLUDE_PATTERNS),
            exclude_patterns: to_strings(constants::DEFAULT_EXCLUDE_PATTERNS),
            max_depth: constants::DEFAULT_MAX_DEPTH,
            watches: Vec::new(),
            rules: RuleSetDefinition::builtin(),
            max_issues: constants::DEFAULT_MAX_STORED_ISSUES,
            log_level: None,
            log_file: None,
        }
    }
}

impl AppConfig {
    /// Fail when no watch is configured; `config_path` is named in the error.
    pub fn require_watches(&self, config_path: &Path) -> Result<(), ConfigError> {
        if self.watches.is_empty() {
            return Err(ConfigError::NoWatchTargets {
                path: config_path.to_path_buf(),
            });
        }
        Ok(())
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// Loading
// =============================================================================

/// Load and validate the config file at `path`.
///
/// Returns the validated config and a list of non-fatal warnings. A missing
/// file returns defaults with no warnings.
pub fn load_config(path: &Path) -> (AppConfig, Vec<String>) {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No config file found; using defaults");
        return (AppConfig::default(), Vec::new());
    }

    match std::fs::read_to_string(path) {
        Ok(content) => {
            let (config, warnings) = parse_config(&content, path);
            tracing::info!(path = %path.display(), watches = config.watches.len(), "Loaded config");
            (config, warnings)
        }
        Err(source) => {
            let msg = format!(
                "{}. Using defaults.",
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            );
            tracing::warn!("{}", msg);
            (AppConfig::default(), vec![msg])
        }
    }
}

/// Parse and validate config text. `source` is used in messages only.
pub fn parse_config(content: &str, source: &Path) -> (AppConfig, Vec<String>) {
    let mut warnings: Vec<String> = Vec::new();

    let raw: RawConfig = match toml::from_str(content) {
        Ok(r) => r,
        Err(e) => {
            let msg = format!(
                "{}. Using defaults.",
                ConfigError::TomlParse {
                    path: source.to_path_buf(),
                    source: e,
                }
            );
            tracing::warn!("{}", msg);
            warnings.push(msg);
            return (AppConfig::default(), warnings);
        }
    };

    let mut config = AppConfig::default();

    // -- [engine] --
    let e = &raw.engine;
    config.engine.poll_interval = Duration::from_millis(check_range(
        "engine.poll_interval_ms",
        e.poll_interval_ms,
        constants::MIN_POLL_INTERVAL_MS..=constants::MAX_POLL_INTERVAL_MS,
        constants::DEFAULT_POLL_INTERVAL_MS,
        &mut warnings,
    ));
    config.engine.scan_interval = Duration::from_millis(check_range(
        "engine.scan_interval_ms",
        e.scan_interval_ms,
        constants::MIN_SCAN_INTERVAL_MS..=constants::MAX_SCAN_INTERVAL_MS,
        constants::DEFAULT_SCAN_INTERVAL_MS,
        &mut warnings,
    ));
    config.engine.capture = CaptureSettings {
        lines_before: check_range(
            "engine.context_lines_before",
            e.context_lines_before,
            0..=constants::MAX_CONTEXT_LINES,
            constants::DEFAULT_CONTEXT_LINES_BEFORE,
            &mut warnings,
        ),
        lines_after: check_range(
            "engine.context_lines_after",
            e.context_lines_after,
            0..=constants::MAX_CONTEXT_LINES,
            constants::DEFAULT_CONTEXT_LINES_AFTER,
            &mut warnings,
        ),
    };
    if let Some(dedup) = e.deduplicate {
        config.engine.deduplicate = dedup;
    }
    config.engine.dedup_window = Duration::from_secs(check_range(
        "engine.dedup_window_secs",
        e.dedup_window_secs,
        0..=constants::MAX_DEDUP_WINDOW_SECS,
        constants::DEFAULT_DEDUP_WINDOW_SECS,
        &mut warnings,
    ));
    if let Some(ref name) = e.start_position {
        match StartPosition::from_name(name) {
            Some(pos) => config.engine.start_position = pos,
            None => warnings.push(format!(
                "[engine] start_position = \"{name}\" is not recognised. \
                 Expected \"beginning\", \"end\" or \"end-on-startup\". Using default (beginning).",
            )),
        }
    }
    config.engine.max_read_bytes_per_tick = check_range(
        "engine.max_read_bytes_per_tick",
        e.max_read_bytes_per_tick,
        constants::MIN_TAIL_READ_BYTES_PER_TICK..=constants::ABSOLUTE_MAX_TAIL_READ_BYTES_PER_TICK,
        constants::MAX_TAIL_READ_BYTES_PER_TICK,
        &mut warnings,
    );

    // -- [discovery] --
    if let Some(ref patterns) = raw.discovery.include_patterns {
        config.include_patterns = valid_globs("discovery.include_patterns", patterns, &mut warnings);
    }
    if let Some(ref patterns) = raw.discovery.exclude_patterns {
        config.exclude_patterns = valid_globs("discovery.exclude_patterns", patterns, &mut warnings);
    }
    config.max_depth = check_range(
        "discovery.max_depth",
        raw.discovery.max_depth,
        1..=constants::ABSOLUTE_MAX_DEPTH,
        constants::DEFAULT_MAX_DEPTH,
        &mut warnings,
    );

    // -- [[watch]] --
    for (i, w) in raw.watch.iter().enumerate() {
        if let Some(entry) = validate_watch(i, w, config.max_depth, &mut warnings) {
            config.watches.push(entry);
        }
    }

    // -- [rules] --
    if let Some(rules) = raw.rules {
        config.rules = rules;
    }

    // -- [store] --
    config.max_issues = check_range(
        "store.max_issues",
        raw.store.max_issues,
        1..=constants::ABSOLUTE_MAX_STORED_ISSUES,
        constants::DEFAULT_MAX_STORED_ISSUES,
        &mut warnings,
    );

    // -- [logging] --
    if let Some(ref level) = raw.logging.level {
        let valid = ["error", "warn", "info", "debug", "trace"];
        if valid.contains(&level.to_lowercase().as_str()) {
            config.log_level = Some(level.to_lowercase());
        } else {
            warnings.push(format!(
                "[logging] level = \"{level}\" is not recognised. \
                 Valid values: error, warn, info, debug, trace. Using default (info).",
            ));
        }
    }
    if let Some(ref file) = raw.logging.file {
        if !file.is_empty() {
            config.log_file = Some(file.clone());
        }
    }

    if !warnings.is_empty() {
        tracing::warn!(count = warnings.len(), "Config validation produced warnings");
    }

    (config, warnings)
}

fn validate_watch(
    index: usize,
    w: &WatchSection,
    default_depth: usize,
    warnings: &mut Vec<String>,
) -> Option<WatchEntry> {
    let path = match w.path {
        Some(ref p) if !p.as_os_str().is_empty() => p.clone(),
        _ => {
            warnings.push(format!("[[watch]] entry {index} has no path. Entry ignored."));
            return None;
        }
    };
    let mut entry = WatchEntry::new(path);
    entry.server = w.server.clone().filter(|s| !s.trim().is_empty());
    entry.transcode = w.transcode;

    if let Some(ref patterns) = w.patterns {
        entry.patterns = Some(valid_globs(
            &format!("watch[{index}].patterns"),
            patterns,
            warnings,
        ));
    }

    if let Some(ref label) = w.encoding {
        match decode::resolve_encoding(label) {
            Some(enc) => entry.encoding = enc,
            None => warnings.push(format!(
                "{}. Using UTF-8.",
                ConfigError::UnknownEncoding {
                    field: format!("watch[{index}].encoding"),
                    label: label.clone(),
                }
            )),
        }
    }

    if let Some(ref format) = w.format {
        match format.trim().to_ascii_lowercase().as_str() {
            "plain" | "text" => entry.format = LineFormat::Plain,
            "json" => entry.format = LineFormat::Json,
            other => warnings.push(format!(
                "watch[{index}].format = \"{other}\" is not recognised. \
                 Expected \"plain\" or \"json\". Using plain.",
            )),
        }
    }

    entry.max_depth = check_range(
        &format!("watch[{index}].max_depth"),
        w.max_depth,
        1..=constants::ABSOLUTE_MAX_DEPTH,
        default_depth,
        warnings,
    );
    Some(entry)
}

/// Return `value` when inside `range`, else `default` plus a warning.
fn check_range<T>(
    field: &str,
    value: Option<T>,
    range: RangeInclusive<T>,
    default: T,
    warnings: &mut Vec<String>,
) -> T
where
    T: PartialOrd + Display + Copy,
{
    match value {
        None => default,
        Some(v) if range.contains(&v) => v,
        Some(v) => {
            warnings.push(format!(
                "{}. Using default ({default}).",
                ConfigError::ValueOutOfRange {
                    field: field.to_string(),
                    value: v.to_string(),
                    expected: format!("{}-{}", range.start(), range.end()),
                }
            ));
            default
        }
    }
}

/// Keep the glob patterns that compile; warn about the rest.
fn valid_globs(field: &str, patterns: &[String], warnings: &mut Vec<String>) -> Vec<String> {
    patterns
        .iter()
        .filter(|p| match glob::Pattern::new(p) {
            Ok(_) => true,
            Err(e) => {
                warnings.push(format!("{field}: invalid glob \"{p}\": {e}. Pattern ignored."));
                false
            }
        })
        .cloned()
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
