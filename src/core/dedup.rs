// LogSentinel - core/dedup.rs
//
// Near-duplicate suppression for bursty logs.
//
// A message is normalised by replacing volatile tokens with placeholders,
// in this order: UUIDs, dates, times, hex literals, remaining digit runs.
// The normalised text is hashed into a fingerprint; a `DedupWindow` remembers
// when each fingerprint was last emitted and rejects repeats inside the
// window. Expired entries are evicted lazily on every check.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in normalisation regex is invalid")
}

fn uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        re(r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b")
    })
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| re(r"\b\d{4}[-/.]\d{1,2}[-/.]\d{1,2}\b|\b\d{1,2}[-/.]\d{1,2}[-/.]\d{4}\b"))
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| re(r"\b\d{1,2}:\d{2}(?::\d{2})?(?:[.,]\d+)?\b"))
}

fn hex_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| re(r"\b0[xX][0-9a-fA-F]+\b"))
}

fn digits_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| re(r"\d+"))
}

/// Replace volatile tokens with fixed placeholders.
///
/// ```
/// use logsentinel::core::dedup::normalize_message;
/// assert_eq!(
///     normalize_message("2024-01-05 10:22:01 request 42 failed"),
///     "<DATE> <TIME> request <N> failed"
/// );
/// ```
pub fn normalize_message(message: &str) -> String {
    let s = uuid_re().replace_all(message.trim(), "<UUID>");
    let s = date_re().replace_all(&s, "<DATE>");
    let s = time_re().replace_all(&s, "<TIME>");
    let s = hex_re().replace_all(&s, "<HEX>");
    digits_re().replace_all(&s, "<N>").into_owned()
}

/// Fingerprint of the normalised form of `message`.
pub fn fingerprint(message: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    normalize_message(message).hash(&mut hasher);
    hasher.finish()
}

/// Trailing time window of recently emitted fingerprints for one target.
#[derive(Debug)]
pub struct DedupWindow {
    window: Duration,
    seen: HashMap<u64, DateTime<Utc>>,
}

impl DedupWindow {
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            window: Duration::from_std(window).unwrap_or_else(|_| Duration::zero()),
            seen: HashMap::new(),
        }
    }

    /// Returns `true` when `fp` may be emitted at `now` and records it.
    /// Returns `false` for a repeat inside the window; the original entry's
    /// timestamp is left unchanged so a steady stream of duplicates cannot
    /// keep the window open forever.
    pub fn check_and_record(&mut self, fp: u64, now: DateTime<Utc>) -> bool {
        self.evict_expired(now);
        if self.seen.contains_key(&fp) {
            return false;
        }
        self.seen.insert(fp, now);
        true
    }

    fn evict_expired(&mut self, now: DateTime<Utc>) {
        let window = self.window;
        self.seen.retain(|_, &mut at| now - at < window);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
