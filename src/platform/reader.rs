// LogSentinel - platform/reader.rs
//
// Line reader: opens a watched file, seeks to the committed offset, reads
// what is available (bounded per poll), and returns complete decoded lines
// together with the number of bytes they occupied.
//
// Guarantees:
//   - An unterminated trailing line is never returned and its bytes are
//     never counted as consumed; it is re-read in full once its terminator
//     arrives.
//   - Undecodable bytes become U+FFFD; a bad byte never stalls a file.
//   - The reader does not touch tracker state. The caller commits
//     `bytes_consumed` after it has processed the lines.
//
// The file handle is opened per call and dropped before returning, so the
// number of open handles stays bounded regardless of how many files are
// watched.

use crate::core::decode;
use crate::util::error::ReadError;
use encoding_rs::Encoding;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Parameters for one read.
#[derive(Debug, Clone, Copy)]
pub struct ReadRequest {
    /// Committed offset to read from.
    pub offset: u64,
    /// Size observed when the file was stat'ed this cycle. Bytes beyond it
    /// are left for the next poll.
    pub size: u64,
    /// Encoding to decode with (the BOM-detected one if previously found).
    pub encoding: &'static Encoding,
    /// Honour a byte-order mark when reading from offset 0.
    pub transcode: bool,
    /// Per-poll byte cap.
    pub max_bytes: usize,
}

/// Outcome of one read.
#[derive(Debug, Default)]
pub struct ReadChunk {
    /// Complete lines, terminators stripped.
    pub lines: Vec<String>,
    /// Bytes covered by `lines` (plus any consumed BOM). Add to the offset.
    pub bytes_consumed: u64,
    /// Encoding selected by a byte-order mark, when one was found.
    pub detected_encoding: Option<&'static Encoding>,
    /// Whether any bytes were replaced during decoding.
    pub had_decode_errors: bool,
    /// Whether an over-long line was force-consumed without a terminator.
    pub forced: bool,
}

/// Read the complete lines available in `path` after `req.offset`.
pub fn read_new_lines(path: &Path, req: ReadRequest) -> Result<ReadChunk, ReadError> {
    if req.size <= req.offset {
        return Ok(ReadChunk::default());
    }
    let available = req.size - req.offset;
    let limit = available.min(req.max_bytes as u64);

    let buf = read_bytes_at(path, req.offset, limit)?;
    if buf.is_empty() {
        return Ok(ReadChunk::default());
    }

    let mut encoding = req.encoding;
    let mut skip = 0usize;
    let mut detected_encoding = None;
    if req.transcode && req.offset == 0 {
        if let Some((enc, bom_len)) = decode::sniff_bom(&buf) {
            tracing::debug!(
                file = %path.display(),
                encoding = decode::encoding_name(enc),
                "Byte-order mark detected"
            );
            encoding = enc;
            skip = bom_len;
            detected_encoding = Some(enc);
        }
    }

    let body = &buf[skip..];
    let (framed, forced) = match decode::complete_boundary(body, encoding) {
        Some(end) => (end, false),
        // A full-cap read with no terminator: the line is longer than the
        // cap and would stall the target forever. Consume it as one line.
        None if buf.len() as u64 == req.max_bytes as u64 && limit < available => {
            let width = decode::unit_width(encoding);
            let end = body.len() - body.len() % width;
            tracing::warn!(
                file = %path.display(),
                offset = req.offset,
                bytes = end,
                "Line exceeds per-poll read cap; consuming it unterminated"
            );
            (end, true)
        }
        None => (0, false),
    };

    let decoded = decode::decode_lines(&body[..framed], encoding);
    if decoded.had_errors {
        tracing::debug!(
            file = %path.display(),
            offset = req.offset,
            "Undecodable bytes replaced with U+FFFD"
        );
    }

    Ok(ReadChunk {
        lines: decoded.lines,
        bytes_consumed: (skip + framed) as u64,
        detected_encoding,
        had_decode_errors: decoded.had_errors,
        forced,
    })
}

/// Read up to `limit` bytes from `path` starting at `offset`.
///
/// Returns fewer bytes if the file ends first.
fn read_bytes_at(path: &Path, offset: u64, limit: u64) -> Result<Vec<u8>, ReadError> {
    let mut file = File::open(path).map_err(|e| ReadError::from_io(path, "open", e))?;
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| ReadError::from_io(path, "seek", e))?;
    let mut buf = Vec::with_capacity(limit as usize);
    file.take(limit)
        .read_to_end(&mut buf)
        .map_err(|e| ReadError::from_io(path, "read", e))?;
    Ok(buf)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::path::PathBuf;

    fn append(path: &Path, bytes: &[u8]) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(bytes).unwrap();
    }

    fn size(path: &Path) -> u64 {
        std::fs::metadata(path).unwrap().len()
    }

    fn req(path: &Path, offset: u64) -> ReadRequest {
        ReadRequest {
            offset,
            size: size(path),
            encoding: encoding_rs::UTF_8,
            transcode: false,
            max_bytes: 1024,
        }
    }

    fn temp_log() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        (dir, path)
    }

    #[test]
    fn test_partial_line_is_not_consumed() {
        let (_dir, path) = temp_log();
        append(&path, b"first\nsecond\nthi");

        let chunk = read_new_lines(&path, req(&path, 0)).unwrap();
        assert_eq!(chunk.lines, vec!["first", "second"]);
        assert_eq!(chunk.bytes_consumed, 13);

        // Nothing new beyond the partial line: nothing consumed.
        let again = read_new_lines(&path, req(&path, 13)).unwrap();
        assert!(again.lines.is_empty());
        assert_eq!(again.bytes_consumed, 0);

        append(&path, b"rd\n");
        let done = read_new_lines(&path, req(&path, 13)).unwrap();
        assert_eq!(done.lines, vec!["third"]);
        assert_eq!(done.bytes_consumed, 6);
    }

    #[test]
    fn test_crlf_and_bytes_beyond_stat_size_are_ignored() {
        let (_dir, path) = temp_log();
        append(&path, b"a\r\nb\r\n");
        let mut r = req(&path, 0);
        append(&path, b"late\n");
        let chunk = read_new_lines(&path, r).unwrap();
        assert_eq!(chunk.lines, vec!["a", "b"]);
        assert_eq!(chunk.bytes_consumed, 6);

        r.offset = 6;
        r.size = size(&path);
        assert_eq!(read_new_lines(&path, r).unwrap().lines, vec!["late"]);
    }

    #[test]
    fn test_bom_selects_encoding_and_is_consumed() {
        let (_dir, path) = temp_log();
        let mut bytes = vec![0xFF, 0xFE];
        bytes.extend("ERROR x\n".encode_utf16().flat_map(|u| u.to_le_bytes()));
        append(&path, &bytes);

        let mut r = req(&path, 0);
        r.transcode = true;
        let chunk = read_new_lines(&path, r).unwrap();
        assert_eq!(chunk.lines, vec!["ERROR x"]);
        assert_eq!(chunk.detected_encoding, Some(encoding_rs::UTF_16LE));
        assert_eq!(chunk.bytes_consumed, bytes.len() as u64);

        // Without the transcode flag the BOM is not interpreted.
        let plain = read_new_lines(&path, req(&path, 0)).unwrap();
        assert_eq!(plain.detected_encoding, None);
    }

    #[test]
    fn test_cap_spreads_reads_over_polls() {
        let (_dir, path) = temp_log();
        append(&path, b"aaaa\nbbbb\ncccc\n");
        let mut r = req(&path, 0);
        r.max_bytes = 12;

        let first = read_new_lines(&path, r).unwrap();
        assert_eq!(first.lines, vec!["aaaa", "bbbb"]);
        assert!(!first.forced);

        r.offset = first.bytes_consumed;
        let second = read_new_lines(&path, r).unwrap();
        assert_eq!(second.lines, vec!["cccc"]);
    }

    #[test]
    fn test_over_long_line_is_force_consumed() {
        let (_dir, path) = temp_log();
        append(&path, &[b'x'; 40]);
        append(&path, b"\nnext\n");
        let mut r = req(&path, 0);
        r.max_bytes = 16;

        let chunk = read_new_lines(&path, r).unwrap();
        assert!(chunk.forced);
        assert_eq!(chunk.bytes_consumed, 16);
        assert_eq!(chunk.lines, vec!["x".repeat(16)]);
    }

    #[test]
    fn test_short_unterminated_read_is_not_forced() {
        let (_dir, path) = temp_log();
        append(&path, b"no newline yet");
        let chunk = read_new_lines(&path, req(&path, 0)).unwrap();
        assert!(!chunk.forced);
        assert_eq!(chunk.bytes_consumed, 0);
    }

    #[test]
    fn test_missing_file_reports_not_found() {
        let (_dir, path) = temp_log();
        let r = ReadRequest {
            offset: 0,
            size: 10,
            encoding: encoding_rs::UTF_8,
            transcode: false,
            max_bytes: 1024,
        };
        assert!(read_new_lines(&path, r).unwrap_err().is_not_found());
    }
}
