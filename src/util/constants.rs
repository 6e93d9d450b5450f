// LogSentinel - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.
// Every bound enforced by the engine, scanner, reader and config loader is
// declared here so it can be audited in one place.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "LogSentinel";

/// Application identifier used for config/data directories.
pub const APP_ID: &str = "LogSentinel";

/// Current application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Poll loop cadence
// =============================================================================

/// How often the tail engine polls every registered target (ms).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Minimum user-configurable poll interval (ms).
pub const MIN_POLL_INTERVAL_MS: u64 = 100;

/// Maximum user-configurable poll interval (ms).
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;

/// How often the directory scanner re-lists watched directories (ms).
/// Listing is more expensive than reading known offsets, so this is slower
/// than the tail poll.
pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 10_000;

/// Minimum user-configurable scan interval (ms).
pub const MIN_SCAN_INTERVAL_MS: u64 = 500;

/// Maximum user-configurable scan interval (ms).
pub const MAX_SCAN_INTERVAL_MS: u64 = 600_000;

/// How often the stop flag is checked while the poll loop sleeps (ms).
pub const CANCEL_CHECK_INTERVAL_MS: u64 = 50;

// =============================================================================
// Reading limits
// =============================================================================

/// Maximum bytes read from a single file in one poll.
/// Remaining bytes are picked up on the following polls.
pub const MAX_TAIL_READ_BYTES_PER_TICK: usize = 512 * 1_024; // 512 KiB

/// Smallest accepted value for `[engine] max_read_bytes_per_tick`.
pub const MIN_TAIL_READ_BYTES_PER_TICK: usize = 4 * 1_024;

/// Largest accepted value for `[engine] max_read_bytes_per_tick`.
pub const ABSOLUTE_MAX_TAIL_READ_BYTES_PER_TICK: usize = 16 * 1_024 * 1_024;

/// Chunk size used when counting existing lines of a file seeded at EOF.
pub const LINE_COUNT_CHUNK_SIZE: usize = 64 * 1_024;

// =============================================================================
// Capture and issue limits
// =============================================================================

/// Default number of lines kept before an anchor line.
pub const DEFAULT_CONTEXT_LINES_BEFORE: usize = 2;

/// Default number of lines captured after an anchor line.
pub const DEFAULT_CONTEXT_LINES_AFTER: usize = 10;

/// Upper bound for either context line count.
pub const MAX_CONTEXT_LINES: usize = 500;

/// Maximum characters kept for an issue message (anchor text).
pub const MAX_ISSUE_MESSAGE_CHARS: usize = 2_000;

/// Maximum characters of a single captured context line.
pub const MAX_CAPTURED_LINE_CHARS: usize = 4_000;

/// Maximum number of issues retained by the in-memory issue store.
pub const DEFAULT_MAX_STORED_ISSUES: usize = 10_000;

/// Hard upper bound on the issue store capacity.
pub const ABSOLUTE_MAX_STORED_ISSUES: usize = 1_000_000;

// =============================================================================
// Deduplication
// =============================================================================

/// Whether near-duplicate suppression is enabled by default.
pub const DEFAULT_DEDUPLICATE: bool = true;

/// Default dedup window (seconds).
pub const DEFAULT_DEDUP_WINDOW_SECS: u64 = 5;

/// Maximum configurable dedup window (seconds).
pub const MAX_DEDUP_WINDOW_SECS: u64 = 3_600;

// =============================================================================
// Discovery
// =============================================================================

/// Default recursion depth for a watched directory (1 = the directory's own
/// entries, no subdirectories).
pub const DEFAULT_MAX_DEPTH: usize = 1;

/// Hard upper bound on max depth (prevents runaway traversal).
pub const ABSOLUTE_MAX_DEPTH: usize = 32;

/// Consecutive failed scans of a watch (directory listing or single-file
/// stat) before its targets are retired.
pub const DIR_UNREACHABLE_SCANS_BEFORE_RETIRE: u32 = 3;

/// A depth-1 listing is only cached once the directory's mtime is at least
/// this old, so entries created within the same timestamp tick are not
/// hidden behind an unchanged mtime.
pub const LISTING_CACHE_SETTLE_SECS: u64 = 2;

/// Default include glob patterns for log file discovery.
pub const DEFAULT_INCLUDE_PATTERNS: &[&str] = &["*.log", "*.log.[0-9]*", "*.out"];

/// Default exclude glob patterns for log file discovery.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "*.gz",
    "*.zip",
    "*.bak",
    "*.tmp",
    ".git",
    "node_modules",
];

// =============================================================================
// Rule limits
// =============================================================================

/// Maximum regex pattern length to bound compile and match cost.
pub const MAX_REGEX_PATTERN_LENGTH: usize = 4_096;

/// Compiled regex size limit handed to `RegexBuilder`.
pub const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Default JSON field holding the level of a structured log line.
pub const DEFAULT_JSON_LEVEL_FIELD: &str = "level";

/// Default JSON field holding the message of a structured log line.
pub const DEFAULT_JSON_MESSAGE_FIELD: &str = "message";

/// Default JSON field holding an exception/stack trace.
pub const DEFAULT_JSON_EXCEPTION_FIELD: &str = "exception";

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Maximum length of a log line included in debug output.
pub const DEBUG_MAX_LINE_PREVIEW: usize = 200;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.toml";
