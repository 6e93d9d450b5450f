// LogSentinel - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// No string-based error propagation across module boundaries.
// All errors preserve the causal chain for diagnostic logging.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Top-level error type for all LogSentinel operations.
/// Errors are categorised by the subsystem that produced them.
#[derive(Debug)]
pub enum LogSentinelError {
    /// A classification rule could not be compiled.
    Rule(RuleError),

    /// Directory listing failed.
    Scan(ScanError),

    /// Reading a watched file failed.
    Read(ReadError),

    /// Configuration loading or validation failed.
    Config(ConfigError),

    /// I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },
}

impl fmt::Display for LogSentinelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule(e) => write!(f, "Rule error: {e}"),
            Self::Scan(e) => write!(f, "Scan error: {e}"),
            Self::Read(e) => write!(f, "Read error: {e}"),
            Self::Config(e) => write!(f, "Configuration error: {e}"),
            Self::Io {
                path,
                operation,
                source,
            } => write!(
                f,
                "I/O error during {operation} on '{}': {source}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for LogSentinelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rule(e) => Some(e),
            Self::Scan(e) => Some(e),
            Self::Read(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Io { source, .. } => Some(source),
        }
    }
}

// ---------------------------------------------------------------------------
// Rule errors
// ---------------------------------------------------------------------------

/// Errors produced while compiling classification rules.
///
/// These are always non-fatal: the offending rule is dropped and the rest of
/// the rule set stays active.
#[derive(Debug)]
pub enum RuleError {
    /// A regex pattern is syntactically invalid.
    InvalidRegex {
        rule: String,
        pattern: String,
        source: regex::Error,
    },

    /// A regex pattern exceeds the maximum allowed length.
    RegexTooLong {
        rule: String,
        length: usize,
        max_length: usize,
    },

    /// A pattern string is empty (would match every line).
    EmptyPattern { rule: String },

    /// A custom rule names a severity that does not exist.
    UnknownSeverity { rule: String, value: String },
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRegex {
                rule,
                pattern,
                source,
            } => write!(f, "Rule '{rule}': invalid regex '{pattern}': {source}"),
            Self::RegexTooLong {
                rule,
                length,
                max_length,
            } => write!(
                f,
                "Rule '{rule}': pattern is {length} chars, exceeds maximum of {max_length}"
            ),
            Self::EmptyPattern { rule } => write!(f, "Rule '{rule}': pattern is empty"),
            Self::UnknownSeverity { rule, value } => write!(
                f,
                "Rule '{rule}': unknown severity '{value}'. \
                 Expected critical, exception, error, warning or exclude"
            ),
        }
    }
}

impl std::error::Error for RuleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidRegex { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<RuleError> for LogSentinelError {
    fn from(e: RuleError) -> Self {
        Self::Rule(e)
    }
}

// ---------------------------------------------------------------------------
// Scan errors
// ---------------------------------------------------------------------------

/// Errors related to listing a watched directory or stat-ing a watched file.
#[derive(Debug)]
pub enum ScanError {
    /// The watched path does not exist or is not accessible.
    RootNotFound { path: PathBuf },

    /// The watched path is not a directory.
    NotADirectory { path: PathBuf },

    /// Permission denied accessing the watched path.
    PermissionDenied { path: PathBuf, source: io::Error },

    /// Walkdir traversal error on the root itself.
    Traversal {
        path: PathBuf,
        source: walkdir::Error,
    },

    /// Any other failure to stat a watched path.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RootNotFound { path } => {
                write!(f, "Watch path '{}' does not exist", path.display())
            }
            Self::NotADirectory { path } => {
                write!(f, "Watch path '{}' is not a directory", path.display())
            }
            Self::PermissionDenied { path, source } => {
                write!(
                    f,
                    "Permission denied accessing '{}': {source}",
                    path.display()
                )
            }
            Self::Traversal { path, source } => {
                write!(f, "Error traversing '{}': {source}", path.display())
            }
            Self::Io { path, source } => {
                write!(f, "Cannot stat '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::PermissionDenied { source, .. } => Some(source),
            Self::Traversal { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ScanError> for LogSentinelError {
    fn from(e: ScanError) -> Self {
        Self::Scan(e)
    }
}

// ---------------------------------------------------------------------------
// Read errors
// ---------------------------------------------------------------------------

/// Errors related to reading new content from a watched file.
///
/// All of these are transient from the engine's point of view: the target is
/// skipped for the current cycle and retried on the next.
#[derive(Debug)]
pub enum ReadError {
    /// The file no longer exists.
    NotFound { path: PathBuf },

    /// The file exists but cannot be opened or stat'ed.
    PermissionDenied { path: PathBuf, source: io::Error },

    /// Any other I/O failure.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },
}

impl ReadError {
    /// Classify an `io::Error` raised during `operation` on `path`.
    pub fn from_io(path: &std::path::Path, operation: &'static str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound {
                path: path.to_path_buf(),
            },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: path.to_path_buf(),
                source,
            },
            _ => Self::Io {
                path: path.to_path_buf(),
                operation,
                source,
            },
        }
    }

    /// Returns `true` when the file has disappeared.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { path } => write!(f, "'{}' no longer exists", path.display()),
            Self::PermissionDenied { path, source } => {
                write!(f, "Permission denied reading '{}': {source}", path.display())
            }
            Self::Io {
                path,
                operation,
                source,
            } => write!(f, "'{}': {operation} failed: {source}", path.display()),
        }
    }
}

impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::PermissionDenied { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            Self::NotFound { .. } => None,
        }
    }
}

impl From<ReadError> for LogSentinelError {
    fn from(e: ReadError) -> Self {
        Self::Read(e)
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors related to configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// TOML parsing failed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A config value is out of the allowed range.
    ValueOutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    /// An encoding label is not known.
    UnknownEncoding { field: String, label: String },

    /// Neither the command line nor the config file names anything to watch.
    NoWatchTargets { path: PathBuf },

    /// I/O error reading config file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TomlParse { path, source } => {
                write!(f, "Config parse error '{}': {source}", path.display())
            }
            Self::ValueOutOfRange {
                field,
                value,
                expected,
            } => write!(
                f,
                "Config '{field}' = '{value}' is out of range. Expected: {expected}"
            ),
            Self::UnknownEncoding { field, label } => write!(
                f,
                "Config '{field}' = '{label}' is not a known encoding label"
            ),
            Self::NoWatchTargets { path } => write!(
                f,
                "Nothing to watch. Pass one or more paths or add [[watch]] entries to '{}'",
                path.display()
            ),
            Self::Io { path, source } => {
                write!(f, "Config I/O error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for LogSentinelError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Convenience type alias for LogSentinel results.
pub type Result<T> = std::result::Result<T, LogSentinelError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::path::Path;

    #[test]
    fn test_read_error_classifies_io_kinds() {
        let path = Path::new("/var/log/app.log");
        let not_found = ReadError::from_io(path, "open", io::Error::from(io::ErrorKind::NotFound));
        assert!(not_found.is_not_found());

        let denied = ReadError::from_io(
            path,
            "open",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(denied, ReadError::PermissionDenied { .. }));
        assert!(denied.source().is_some());

        let other = ReadError::from_io(path, "seek", io::Error::other("boom"));
        assert!(other.to_string().contains("seek failed"));
    }

    #[test]
    fn test_top_level_error_preserves_chain() {
        let inner = RuleError::EmptyPattern {
            rule: "error[0]".to_string(),
        };
        let top: LogSentinelError = inner.into();
        assert!(top.to_string().starts_with("Rule error:"));
        assert!(top.source().is_some());
    }
}
