// LogSentinel - core/classifier.rs
//
// Pattern classifier: rule set definitions, compilation, and line
// classification. Core layer: accepts rule definitions (deserialised from
// TOML by the platform layer) and text lines, never touches the filesystem.
//
// Evaluation order is fixed: exclusion rules first (a match suppresses the
// line unconditionally), then critical, exception, error and warning. The
// first matching rule of the first matching tier wins.
//
// A compiled `Classifier` is immutable. Reconfiguration builds a new one and
// swaps the whole snapshot; nothing mutates a classifier in place.

use crate::core::model::{ClassificationResult, LineFormat, Severity};
use crate::util::constants;
use crate::util::error::RuleError;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;

// =============================================================================
// Rule definitions (raw input)
// =============================================================================

/// Raw rule set as deserialised from the `[rules]` config section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuleSetDefinition {
    /// Compile the tier pattern lists case-insensitively.
    pub case_insensitive: bool,
    pub exclusion: Vec<String>,
    pub critical: Vec<String>,
    pub exception: Vec<String>,
    pub error: Vec<String>,
    pub warning: Vec<String>,
    /// User-defined rules, each targeting one tier.
    pub custom: Vec<CustomRuleDef>,
    /// Field names for structured (JSON) lines.
    pub structured: StructuredDef,
}

/// `[[rules.custom]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomRuleDef {
    pub name: String,
    pub pattern: String,
    /// critical | exception | error | warning | exclude
    pub severity: String,
    /// Overrides the rule set's `case_insensitive` for this rule.
    #[serde(default)]
    pub case_insensitive: Option<bool>,
}

/// `[rules.structured]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StructuredDef {
    pub level_field: String,
    pub message_field: String,
    pub exception_field: String,
}

impl Default for StructuredDef {
    fn default() -> Self {
        Self {
            level_field: constants::DEFAULT_JSON_LEVEL_FIELD.to_string(),
            message_field: constants::DEFAULT_JSON_MESSAGE_FIELD.to_string(),
            exception_field: constants::DEFAULT_JSON_EXCEPTION_FIELD.to_string(),
        }
    }
}

impl RuleSetDefinition {
    /// Rule set used when the configuration has no `[rules]` section.
    pub fn builtin() -> Self {
        Self {
            case_insensitive: false,
            exclusion: Vec::new(),
            critical: vec![
                r"\b(FATAL|CRITICAL)\b".to_string(),
                r"\b(OutOfMemoryError|StackOverflowError)\b".to_string(),
            ],
            exception: vec![r"\b[\w$.]*(Exception|Throwable)\b".to_string()],
            error: vec![r"\bERROR\b".to_string(), r"\bSEVERE\b".to_string()],
            warning: vec![r"\bWARN(ING)?\b".to_string()],
            custom: Vec::new(),
            structured: StructuredDef::default(),
        }
    }
}

// =============================================================================
// Compiled classifier
// =============================================================================

#[derive(Debug, Clone)]
struct CompiledRule {
    regex: Regex,
    name: Option<String>,
}

impl CompiledRule {
    fn pattern(&self) -> &str {
        self.regex.as_str()
    }
}

/// Immutable, compiled rule set.
#[derive(Debug, Clone)]
pub struct Classifier {
    exclusion: Vec<CompiledRule>,
    /// One entry per severity, in evaluation order.
    tiers: Vec<(Severity, Vec<CompiledRule>)>,
    structured: StructuredDef,
}

impl Default for Classifier {
    /// The built-in rule set. Built-in patterns always compile.
    fn default() -> Self {
        Self::compile(&RuleSetDefinition::builtin()).0
    }
}

/// Target of a custom rule after parsing its `severity` string.
enum RuleTarget {
    Exclude,
    Tier(Severity),
}

impl Classifier {
    /// Compile a rule set definition.
    ///
    /// Invalid rules are reported in the returned error list and skipped;
    /// the remaining rules are always usable.
    pub fn compile(def: &RuleSetDefinition) -> (Classifier, Vec<RuleError>) {
        let mut errors = Vec::new();
        let ci = def.case_insensitive;

        let mut exclusion = Vec::new();
        let mut tiers: Vec<(Severity, Vec<CompiledRule>)> =
            Severity::all().iter().map(|s| (*s, Vec::new())).collect();

        // Custom rules go ahead of the standard patterns of their tier so the
        // rule name becomes the issue type when both would match.
        for rule in &def.custom {
            let label = format!("custom:{}", rule.name);
            let target = if rule.severity.trim().eq_ignore_ascii_case("exclude") {
                RuleTarget::Exclude
            } else if let Some(sev) = Severity::from_name(&rule.severity) {
                RuleTarget::Tier(sev)
            } else {
                errors.push(RuleError::UnknownSeverity {
                    rule: label,
                    value: rule.severity.clone(),
                });
                continue;
            };
            let case_insensitive = rule.case_insensitive.unwrap_or(ci);
            match compile_regex(&label, &rule.pattern, case_insensitive) {
                Ok(regex) => {
                    let compiled = CompiledRule {
                        regex,
                        name: Some(rule.name.clone()),
                    };
                    match target {
                        RuleTarget::Exclude => exclusion.push(compiled),
                        RuleTarget::Tier(sev) => {
                            if let Some((_, rules)) = tiers.iter_mut().find(|(s, _)| *s == sev) {
                                rules.push(compiled);
                            }
                        }
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        compile_list("exclusion", &def.exclusion, ci, &mut exclusion, &mut errors);
        for (severity, rules) in tiers.iter_mut() {
            let patterns = match severity {
                Severity::Critical => &def.critical,
                Severity::Exception => &def.exception,
                Severity::Error => &def.error,
                Severity::Warning => &def.warning,
            };
            let tier_name = severity.label().to_lowercase();
            compile_list(&tier_name, patterns, ci, rules, &mut errors);
        }

        for e in &errors {
            tracing::warn!(error = %e, "Skipping invalid classification rule");
        }

        let classifier = Classifier {
            exclusion,
            tiers,
            structured: def.structured.clone(),
        };
        tracing::debug!(
            rules = classifier.rule_count(),
            skipped = errors.len(),
            "Classifier compiled"
        );
        (classifier, errors)
    }

    /// Total number of compiled rules, exclusions included.
    pub fn rule_count(&self) -> usize {
        self.exclusion.len() + self.tiers.iter().map(|(_, r)| r.len()).sum::<usize>()
    }

    /// Returns `true` if `line` matches any exclusion rule.
    pub fn is_excluded(&self, line: &str) -> bool {
        self.exclusion.iter().any(|r| r.regex.is_match(line))
    }

    /// Classify a raw text line.
    ///
    /// Returns `None` when the line is excluded or matches no tier.
    pub fn classify(&self, line: &str) -> Option<ClassificationResult> {
        if self.is_excluded(line) {
            return None;
        }
        self.match_tiers(line)
    }

    /// Classify a line according to the target's line format.
    pub fn classify_line(&self, line: &str, format: LineFormat) -> Option<ClassificationResult> {
        match format {
            LineFormat::Plain => self.classify(line),
            LineFormat::Json => self.classify_structured(line),
        }
    }

    /// Classify a line that is expected to be a single-line JSON object.
    ///
    /// Falls back to raw regex classification when the line is not a JSON
    /// object. Exclusion rules always apply to the raw line first.
    pub fn classify_structured(&self, line: &str) -> Option<ClassificationResult> {
        if self.is_excluded(line) {
            return None;
        }
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return self.match_tiers(line);
        }
        let object = match serde_json::from_str::<serde_json::Map<String, Value>>(trimmed) {
            Ok(o) => o,
            Err(_) => return self.match_tiers(line),
        };

        let fields = &self.structured;
        let message = object
            .get(&fields.message_field)
            .map(value_text)
            .filter(|m| !m.is_empty());
        let has_exception = object
            .get(&fields.exception_field)
            .is_some_and(|v| !v.is_null() && !value_text(v).is_empty());

        match object.get(&fields.level_field) {
            Some(level_value) => {
                let level_text = value_text(level_value);
                let severity = match (map_level(level_value), has_exception) {
                    (Some(Severity::Critical), _) => Severity::Critical,
                    (Some(Severity::Error), true) => Severity::Exception,
                    (Some(sev), _) => sev,
                    (None, _) => return None,
                };
                Some(ClassificationResult {
                    severity,
                    matched_pattern: format!("{}={}", fields.level_field, level_text),
                    rule_name: None,
                    message,
                })
            }
            None if has_exception => Some(ClassificationResult {
                severity: Severity::Exception,
                matched_pattern: format!("{}=<present>", fields.exception_field),
                rule_name: None,
                message,
            }),
            None => {
                let text = message.clone().unwrap_or_else(|| line.to_string());
                let mut result = self.match_tiers(&text)?;
                result.message = message;
                Some(result)
            }
        }
    }

    fn match_tiers(&self, text: &str) -> Option<ClassificationResult> {
        for (severity, rules) in &self.tiers {
            if let Some(rule) = rules.iter().find(|r| r.regex.is_match(text)) {
                return Some(ClassificationResult {
                    severity: *severity,
                    matched_pattern: rule.pattern().to_string(),
                    rule_name: rule.name.clone(),
                    message: None,
                });
            }
        }
        None
    }
}

/// Render a JSON value as plain text (strings unquoted).
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Map a structured level value to an issue severity.
///
/// Accepts level names and the numeric levels used by bunyan/pino
/// (60 fatal, 50 error, 40 warn).
fn map_level(value: &Value) -> Option<Severity> {
    if let Some(n) = value.as_f64() {
        return match n {
            n if n >= 60.0 => Some(Severity::Critical),
            n if n >= 50.0 => Some(Severity::Error),
            n if n >= 40.0 => Some(Severity::Warning),
            _ => None,
        };
    }
    match value.as_str()?.trim().to_ascii_lowercase().as_str() {
        "fatal" | "critical" | "crit" | "emerg" | "emergency" | "alert" | "panic" => {
            Some(Severity::Critical)
        }
        "error" | "err" | "severe" => Some(Severity::Error),
        "warn" | "warning" => Some(Severity::Warning),
        _ => None,
    }
}

fn compile_list(
    tier: &str,
    patterns: &[String],
    case_insensitive: bool,
    out: &mut Vec<CompiledRule>,
    errors: &mut Vec<RuleError>,
) {
    for (idx, pattern) in patterns.iter().enumerate() {
        let label = format!("{tier}[{idx}]");
        match compile_regex(&label, pattern, case_insensitive) {
            Ok(regex) => out.push(CompiledRule { regex, name: None }),
            Err(e) => errors.push(e),
        }
    }
}

/// Compile a regex pattern with length validation.
fn compile_regex(rule: &str, pattern: &str, case_insensitive: bool) -> Result<Regex, RuleError> {
    if pattern.trim().is_empty() {
        return Err(RuleError::EmptyPattern {
            rule: rule.to_string(),
        });
    }
    if pattern.len() > constants::MAX_REGEX_PATTERN_LENGTH {
        return Err(RuleError::RegexTooLong {
            rule: rule.to_string(),
            length: pattern.len(),
            max_length: constants::MAX_REGEX_PATTERN_LENGTH,
        });
    }
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .size_limit(constants::REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| RuleError::InvalidRegex {
            rule: rule.to_string(),
            pattern: pattern.to_string(),
            source: e,
        })
}

// =============================================================================
// Exception type extraction
// =============================================================================

fn exception_class_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Built-in pattern, exercised by the unit tests below.
    RE.get_or_init(|| {
        Regex::new(r"\b((?:[A-Za-z_$][\w$]*\.)*[A-Z][\w$]*(?:Exception|Error|Throwable))\b")
            .expect("exception_class_regex: invalid regex")
    })
}

fn stack_header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:Caused by:\s*)?((?:[A-Za-z_$][\w$]*\.)*[A-Z][\w$]*(?:Exception|Error|Throwable))(?::|\s*$)",
        )
        .expect("stack_header_regex: invalid regex")
    })
}

/// Best-effort extraction of an exception class name.
///
/// Looks at the anchor line first, then at stack trace header lines
/// (`pkg.SomeException: msg`, `Caused by: ...`) in the trailing context.
pub fn extract_exception_type(anchor: &str, trailing: &[String]) -> Option<String> {
    if let Some(caps) = exception_class_regex().captures(anchor) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }
    trailing.iter().find_map(|line| {
        stack_header_regex()
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    })
}

// =============================================================================
// Tests
// =============================================================================
