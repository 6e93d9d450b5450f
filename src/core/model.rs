// LogSentinel - core/model.rs
//
// Core data model types. Pure data definitions with no I/O.
// These types are the shared vocabulary across all layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

// =============================================================================
// Severity
// =============================================================================

/// Issue severity, ordered from most to least severe.
///
/// The derive order doubles as the classifier's evaluation order:
/// critical rules are tried first, warning rules last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    Exception,
    Error,
    Warning,
}

impl Severity {
    /// Returns all variants in evaluation order (most severe first).
    pub fn all() -> &'static [Severity] {
        &[
            Severity::Critical,
            Severity::Exception,
            Severity::Error,
            Severity::Warning,
        ]
    }

    /// Upper-case tag used as the default issue type.
    pub fn tag(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Exception => "EXCEPTION",
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
        }
    }

    /// Human-readable label for display.
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::Exception => "Exception",
            Severity::Error => "Error",
            Severity::Warning => "Warning",
        }
    }

    /// Parse a config/severity name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Severity> {
        match name.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "exception" => Some(Severity::Exception),
            "error" => Some(Severity::Error),
            "warning" | "warn" => Some(Severity::Warning),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

// =============================================================================
// Classification outcome
// =============================================================================

/// Result of classifying one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationResult {
    /// Severity tier that matched.
    pub severity: Severity,
    /// Source text of the pattern that matched (or `field=value` for
    /// structured lines).
    pub matched_pattern: String,
    /// Name of the custom rule that matched, if any.
    pub rule_name: Option<String>,
    /// Message extracted from a structured line. `None` means the raw line
    /// is the message.
    pub message: Option<String>,
}

// =============================================================================
// Watch targets
// =============================================================================

/// How lines of a target are interpreted before classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LineFormat {
    /// Raw text, classified by regex only.
    #[default]
    Plain,
    /// Single-line JSON objects; the level/message fields drive
    /// classification, with regex fallback for non-JSON lines.
    Json,
}

/// Identity of one tailed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSpec {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Optional server/group name shown on emitted issues.
    pub server: Option<String>,
    /// Character encoding used to decode the file.
    pub encoding: &'static encoding_rs::Encoding,
    /// Honour a byte-order mark at the start of the file (overrides
    /// `encoding` for the lifetime of the file).
    pub transcode: bool,
    /// Line interpretation.
    pub format: LineFormat,
}

impl WatchSpec {
    /// A UTF-8, plain-text spec for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            server: None,
            encoding: encoding_rs::UTF_8,
            transcode: false,
            format: LineFormat::Plain,
        }
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn with_encoding(mut self, encoding: &'static encoding_rs::Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_transcode(mut self, transcode: bool) -> Self {
        self.transcode = transcode;
        self
    }

    pub fn with_format(mut self, format: LineFormat) -> Self {
        self.format = format;
        self
    }

    /// Server name, or the local placeholder when none is configured.
    pub fn server_name(&self) -> &str {
        self.server.as_deref().unwrap_or("local")
    }

    /// File name component of the path.
    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }
}

/// File name component of `path`, falling back to the full path.
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// =============================================================================
// File signature
// =============================================================================

/// Cheap identity of a file used to detect rotation and truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSignature {
    /// Current size in bytes.
    pub size: u64,
    /// Last modification time, if the platform reports one.
    pub modified: Option<SystemTime>,
    /// (device, inode) where the platform exposes it.
    pub file_id: Option<(u64, u64)>,
}

impl FileSignature {
    pub fn new(size: u64, modified: Option<SystemTime>, file_id: Option<(u64, u64)>) -> Self {
        Self {
            size,
            modified,
            file_id,
        }
    }
}

// =============================================================================
// Finalized issue
// =============================================================================

/// One detected issue, emitted exactly once by the tail engine.
///
/// Once handed to the sink it is an immutable snapshot; the engine keeps no
/// reference to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizedIssue {
    /// Identity assigned by the sink. Always `None` when emitted.
    pub id: Option<u64>,
    /// Server/group name of the watch target.
    pub server: String,
    /// File name of the watch target.
    pub file_name: String,
    /// Full path of the watch target.
    pub path: PathBuf,
    /// 1-based line number of the anchor line.
    pub line_number: u64,
    /// Extracted exception class, custom rule name, or severity tag.
    pub issue_type: String,
    /// Anchor text (or structured message).
    pub message: String,
    /// Before-context, anchor and after-context joined with newlines.
    pub captured_text: String,
    /// Wall-clock time of the anchor match.
    pub detected_at: DateTime<Utc>,
    pub severity: Severity,
    /// Pattern that matched the anchor line.
    pub matched_pattern: String,
    /// Acknowledged by an operator. Always `false` when emitted.
    pub acknowledged: bool,
}
