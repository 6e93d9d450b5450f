// LogSentinel - core/decode.rs
//
// Encoding-aware line framing and decoding for raw bytes read from a
// watched file. Core layer: operates on byte slices only.
//
// Line terminators are located in the encoded byte stream, before decoding,
// so the reader can report exactly how many bytes belong to complete lines.
// For ASCII-compatible encodings the terminator is the single byte 0x0A; for
// UTF-16 it is the code unit 0x000A at an even byte position.
//
// Undecodable byte sequences become U+FFFD; decoding never fails.

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};

/// Resolve a WHATWG encoding label ("utf-8", "latin1", "windows-1252",
/// "utf-16le", "shift_jis", ...). Returns `None` for unknown labels.
pub fn resolve_encoding(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

/// Detect a byte-order mark at the start of `bytes`.
///
/// Returns the encoding it selects and the BOM length in bytes.
pub fn sniff_bom(bytes: &[u8]) -> Option<(&'static Encoding, usize)> {
    Encoding::for_bom(bytes)
}

/// Width in bytes of one code unit for line framing purposes.
pub fn unit_width(encoding: &'static Encoding) -> usize {
    if is_utf16(encoding) {
        2
    } else {
        1
    }
}

fn is_utf16(encoding: &'static Encoding) -> bool {
    encoding == UTF_16LE || encoding == UTF_16BE
}

fn is_terminator_at(bytes: &[u8], i: usize, encoding: &'static Encoding) -> bool {
    if encoding == UTF_16LE {
        bytes[i] == b'\n' && bytes[i + 1] == 0
    } else {
        bytes[i] == 0 && bytes[i + 1] == b'\n'
    }
}

/// Index just past the last line terminator in `bytes`, or `None` when the
/// slice contains no complete line.
pub fn complete_boundary(bytes: &[u8], encoding: &'static Encoding) -> Option<usize> {
    if is_utf16(encoding) {
        let even_len = bytes.len() - bytes.len() % 2;
        (0..even_len)
            .step_by(2)
            .rev()
            .find(|&i| is_terminator_at(bytes, i, encoding))
            .map(|i| i + 2)
    } else {
        bytes.iter().rposition(|&b| b == b'\n').map(|i| i + 1)
    }
}

/// Number of line terminators in `bytes`.
pub fn count_terminators(bytes: &[u8], encoding: &'static Encoding) -> u64 {
    if is_utf16(encoding) {
        let even_len = bytes.len() - bytes.len() % 2;
        (0..even_len)
            .step_by(2)
            .filter(|&i| is_terminator_at(bytes, i, encoding))
            .count() as u64
    } else {
        bytes.iter().filter(|&&b| b == b'\n').count() as u64
    }
}

/// Result of decoding a framed byte range.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DecodedLines {
    /// Decoded lines without their terminators (a trailing CR is removed).
    pub lines: Vec<String>,
    /// Whether any byte sequence had to be replaced with U+FFFD.
    pub had_errors: bool,
}

/// Decode `bytes` with `encoding` and split into lines.
///
/// `bytes` normally ends with a terminator. When it does not (a force-consumed
/// over-long line) the trailing fragment is returned as the last line.
pub fn decode_lines(bytes: &[u8], encoding: &'static Encoding) -> DecodedLines {
    if bytes.is_empty() {
        return DecodedLines::default();
    }
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    let mut lines: Vec<String> = text
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
        .collect();
    if text.ends_with('\n') {
        lines.pop();
    }
    DecodedLines { lines, had_errors }
}

/// Encoding name for diagnostics.
pub fn encoding_name(encoding: &'static Encoding) -> &'static str {
    if encoding == UTF_8 {
        "UTF-8"
    } else {
        encoding.name()
    }
}

// =============================================================================
// Tests
// =============================================================================
