// LogSentinel - core/capture.rs
//
// Multi-line issue capture. One `CaptureAssembler` per watch target turns a
// stream of (line, classification) pairs into finished captures:
//
//   IDLE --anchor--> CAPTURING --N trailing lines--> IDLE (emit)
//                    CAPTURING --new anchor-------> CAPTURING (emit previous)
//                    CAPTURING --flush (stop/removal/rotation)--> IDLE (emit)
//
// A ring of the most recent lines is kept regardless of state so that an
// anchor can be seeded with context that predates its match.
//
// An open capture survives across poll cycles; running out of lines never
// finalizes it on its own.

use crate::core::model::ClassificationResult;
use crate::util::constants;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Context line counts for a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub lines_before: usize,
    pub lines_after: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            lines_before: constants::DEFAULT_CONTEXT_LINES_BEFORE,
            lines_after: constants::DEFAULT_CONTEXT_LINES_AFTER,
        }
    }
}

/// An issue capture, in flight or finished.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedIssue {
    /// Text of the line that matched.
    pub anchor: String,
    /// 1-based line number of the anchor.
    pub line_number: u64,
    pub classification: ClassificationResult,
    /// Lines seen immediately before the anchor, oldest first.
    pub before: Vec<String>,
    /// Lines captured after the anchor.
    pub after: Vec<String>,
    /// Wall-clock time of the anchor match.
    pub detected_at: DateTime<Utc>,
}

impl CapturedIssue {
    /// Before-context, anchor and after-context joined with newlines.
    pub fn block(&self) -> String {
        self.lines().collect::<Vec<_>>().join("\n")
    }

    /// All captured lines in file order.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.before
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.anchor.as_str()))
            .chain(self.after.iter().map(String::as_str))
    }

    /// Structured message if one was extracted, else the anchor text.
    pub fn message(&self) -> &str {
        self.classification
            .message
            .as_deref()
            .unwrap_or(&self.anchor)
    }
}

/// Per-target capture state machine.
#[derive(Debug)]
pub struct CaptureAssembler {
    settings: CaptureSettings,
    recent: VecDeque<String>,
    in_flight: Option<CapturedIssue>,
}

impl CaptureAssembler {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            settings,
            recent: VecDeque::with_capacity(settings.lines_before),
            in_flight: None,
        }
    }

    /// Returns `true` while an anchor is gathering trailing context.
    pub fn is_capturing(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Feed one line. `classification` is `Some` when the line is an anchor.
    ///
    /// Returns the captures finished by this line, in emission order (at most
    /// two: a capture cut short by this anchor, and this anchor's own capture
    /// when no trailing context is configured).
    pub fn push(
        &mut self,
        line: &str,
        line_number: u64,
        classification: Option<ClassificationResult>,
        now: DateTime<Utc>,
    ) -> Vec<CapturedIssue> {
        let line = truncate_chars(line, constants::MAX_CAPTURED_LINE_CHARS);
        let mut finished = Vec::new();

        match classification {
            Some(classification) => {
                if let Some(previous) = self.in_flight.take() {
                    finished.push(previous);
                }
                let issue = CapturedIssue {
                    anchor: line.to_string(),
                    line_number,
                    classification,
                    before: self.recent.iter().cloned().collect(),
                    after: Vec::with_capacity(self.settings.lines_after),
                    detected_at: now,
                };
                if self.settings.lines_after == 0 {
                    finished.push(issue);
                } else {
                    self.in_flight = Some(issue);
                }
            }
            None => {
                let complete = match self.in_flight.as_mut() {
                    Some(current) => {
                        current.after.push(line.to_string());
                        current.after.len() >= self.settings.lines_after
                    }
                    None => false,
                };
                if complete {
                    if let Some(done) = self.in_flight.take() {
                        finished.push(done);
                    }
                }
            }
        }

        if self.settings.lines_before > 0 {
            if self.recent.len() == self.settings.lines_before {
                self.recent.pop_front();
            }
            self.recent.push_back(line.to_string());
        }

        finished
    }

    /// Finalize the open capture, if any, with whatever context it has.
    pub fn flush(&mut self) -> Option<CapturedIssue> {
        self.in_flight.take()
    }

    /// Flush and forget the recent-line ring (the file was replaced).
    pub fn reset(&mut self) -> Option<CapturedIssue> {
        self.recent.clear();
        self.flush()
    }
}

/// Truncate `s` to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Severity;

    fn hit(severity: Severity) -> Option<ClassificationResult> {
        Some(ClassificationResult {
            severity,
            matched_pattern: "p".into(),
            rule_name: None,
            message: None,
        })
    }

    fn feed(
        asm: &mut CaptureAssembler,
        lines: &[&str],
        anchor: impl Fn(&str) -> Option<ClassificationResult>,
    ) -> Vec<CapturedIssue> {
        let now = Utc::now();
        let mut out = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            out.extend(asm.push(line, i as u64 + 1, anchor(line), now));
        }
        out
    }

    #[test]
    fn test_context_before_and_bounded_after() {
        let mut asm = CaptureAssembler::new(CaptureSettings {
            lines_before: 2,
            lines_after: 3,
        });
        let lines = [
            "INFO start",
            "DEBUG step1",
            "NullPointerException at Foo.bar",
            "a1",
            "a2",
            "a3",
            "a4",
        ];
        let out = feed(&mut asm, &lines, |l| {
            l.contains("Exception").then(|| hit(Severity::Exception)).flatten()
        });
        assert_eq!(out.len(), 1);
        let issue = &out[0];
        assert_eq!(issue.line_number, 3);
        assert_eq!(
            issue.lines().collect::<Vec<_>>(),
            vec![
                "INFO start",
                "DEBUG step1",
                "NullPointerException at Foo.bar",
                "a1",
                "a2",
                "a3"
            ]
        );
        assert!(!asm.is_capturing());
        assert!(asm.flush().is_none());
    }

    #[test]
    fn test_new_anchor_finalizes_previous_capture() {
        let mut asm = CaptureAssembler::new(CaptureSettings {
            lines_before: 1,
            lines_after: 5,
        });
        let lines = ["FATAL one", "x", "FATAL two", "y"];
        let out = feed(&mut asm, &lines, |l| {
            l.starts_with("FATAL").then(|| hit(Severity::Critical)).flatten()
        });
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].anchor, "FATAL one");
        assert_eq!(out[0].after, vec!["x"]);

        // The second capture stays open across "cycles" until flushed.
        assert!(asm.is_capturing());
        let second = asm.flush().unwrap();
        assert_eq!(second.anchor, "FATAL two");
        assert_eq!(second.before, vec!["x"]);
        assert_eq!(second.after, vec!["y"]);
    }

    #[test]
    fn test_back_to_back_anchors_emit_separately() {
        let mut asm = CaptureAssembler::new(CaptureSettings {
            lines_before: 0,
            lines_after: 3,
        });
        let out = feed(&mut asm, &["CRIT a", "CRIT b"], |_| hit(Severity::Critical));
        assert_eq!(out.len(), 1);
        assert_eq!(asm.flush().map(|c| c.anchor), Some("CRIT b".to_string()));
    }

    #[test]
    fn test_zero_trailing_lines_emits_immediately() {
        let mut asm = CaptureAssembler::new(CaptureSettings {
            lines_before: 0,
            lines_after: 0,
        });
        let now = Utc::now();
        let out = asm.push("ERROR x", 1, hit(Severity::Error), now);
        assert_eq!(out.len(), 1);
        assert!(!asm.is_capturing());
        assert_eq!(out[0].block(), "ERROR x");
    }

    #[test]
    fn test_reset_clears_ring_and_flushes() {
        let mut asm = CaptureAssembler::new(CaptureSettings {
            lines_before: 2,
            lines_after: 2,
        });
        let now = Utc::now();
        asm.push("old context", 1, None, now);
        asm.push("ERROR old", 2, hit(Severity::Error), now);
        let flushed = asm.reset().unwrap();
        assert_eq!(flushed.before, vec!["old context"]);

        let out = asm.push("ERROR new", 1, hit(Severity::Error), now);
        assert!(out.is_empty());
        assert!(asm.flush().unwrap().before.is_empty());
    }

    #[test]
    fn test_structured_message_preferred() {
        let mut asm = CaptureAssembler::new(CaptureSettings {
            lines_before: 0,
            lines_after: 0,
        });
        let mut c = hit(Severity::Error).unwrap();
        c.message = Some("db down".into());
        let out = asm.push(r#"{"level":"error","message":"db down"}"#, 1, Some(c), Utc::now());
        assert_eq!(out[0].message(), "db down");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("ab", 3), "ab");
        assert_eq!(truncate_chars("ééé", 2), "éé");
    }
}
