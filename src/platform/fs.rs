// LogSentinel - platform/fs.rs
//
// Filesystem checks used by the tail engine: cheap file signatures for
// rotation detection, and the complete-line prefix for targets seeded at EOF.

use crate::core::decode;
use crate::core::model::FileSignature;
use crate::util::constants::LINE_COUNT_CHUNK_SIZE;
use crate::util::error::ReadError;
use encoding_rs::Encoding;
use std::fs::{File, Metadata};
use std::io::Read;
use std::path::Path;

/// Stat `path` and build its signature (size, mtime, and on Unix the
/// device/inode pair).
pub fn file_signature(path: &Path) -> Result<FileSignature, ReadError> {
    let meta = std::fs::metadata(path).map_err(|e| ReadError::from_io(path, "stat", e))?;
    if !meta.is_file() {
        return Err(ReadError::Io {
            path: path.to_path_buf(),
            operation: "stat",
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
        });
    }
    Ok(signature_of(&meta))
}

/// Signature from already-fetched metadata.
pub fn signature_of(meta: &Metadata) -> FileSignature {
    FileSignature::new(meta.len(), meta.modified().ok(), file_id(meta))
}

#[cfg(unix)]
fn file_id(meta: &Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_id(_meta: &Metadata) -> Option<(u64, u64)> {
    None
}

/// Complete lines at the start of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinePrefix {
    /// Line terminators seen.
    pub lines: u64,
    /// Byte offset just past the last terminator (0 when there is none).
    pub end: u64,
}

/// Count complete lines in the first `upto` bytes of `path`.
///
/// Used once per target when tailing starts at EOF: `end` is where reading
/// begins, so a trailing partial line is read once it is completed, and
/// `lines` gives later issues their real line numbers.
pub fn complete_prefix(
    path: &Path,
    upto: u64,
    encoding: &'static Encoding,
) -> Result<LinePrefix, ReadError> {
    let file = File::open(path).map_err(|e| ReadError::from_io(path, "open", e))?;
    let mut reader = file.take(upto);
    let mut buf = vec![0u8; LINE_COUNT_CHUNK_SIZE];
    let mut carry: Option<u8> = None;
    let mut total = 0u64;
    let mut end = 0u64;
    // File offset of buf[0].
    let mut base = 0u64;
    let width = decode::unit_width(encoding);

    loop {
        let start = usize::from(carry.is_some());
        if let Some(b) = carry.take() {
            buf[0] = b;
        }
        let n = reader
            .read(&mut buf[start..])
            .map_err(|e| ReadError::from_io(path, "read", e))?;
        if n == 0 {
            break;
        }
        let filled = start + n;
        // Keep UTF-16 code units aligned across chunk boundaries.
        let usable = filled - filled % width;
        total += decode::count_terminators(&buf[..usable], encoding);
        if let Some(boundary) = decode::complete_boundary(&buf[..usable], encoding) {
            end = base + boundary as u64;
        }
        base += usable as u64;
        if usable < filled {
            carry = Some(buf[usable]);
        }
    }
    Ok(LinePrefix { lines: total, end })
}

/// Encoding named by a byte-order mark at the start of `path`, if any.
pub fn leading_bom(path: &Path) -> Result<Option<&'static Encoding>, ReadError> {
    let file = File::open(path).map_err(|e| ReadError::from_io(path, "open", e))?;
    let mut head = Vec::with_capacity(3);
    file.take(3)
        .read_to_end(&mut head)
        .map_err(|e| ReadError::from_io(path, "read", e))?;
    Ok(decode::sniff_bom(&head).map(|(enc, _)| enc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_signature_tracks_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, b"hello\n").unwrap();
        let sig = file_signature(&path).unwrap();
        assert_eq!(sig.size, 6);
        assert!(sig.modified.is_some());
        #[cfg(unix)]
        assert!(sig.file_id.is_some());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = file_signature(&dir.path().join("gone.log")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(file_signature(dir.path()).is_err());
    }

    #[test]
    fn test_complete_prefix_stops_before_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.log");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"a\nb\nc\npartial").unwrap();
        drop(f);
        assert_eq!(
            complete_prefix(&path, 100, encoding_rs::UTF_8).unwrap(),
            LinePrefix { lines: 3, end: 6 }
        );
        assert_eq!(
            complete_prefix(&path, 4, encoding_rs::UTF_8).unwrap(),
            LinePrefix { lines: 2, end: 4 }
        );

        let none = dir.path().join("n.log");
        std::fs::write(&none, b"no newline yet").unwrap();
        assert_eq!(
            complete_prefix(&none, 14, encoding_rs::UTF_8).unwrap(),
            LinePrefix { lines: 0, end: 0 }
        );
    }

    #[test]
    fn test_complete_prefix_utf16() {
        let dir = tempfile::tempdir().unwrap();
        let wide = dir.path().join("w.log");
        let bytes: Vec<u8> = "x\ny\nzz".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        std::fs::write(&wide, &bytes).unwrap();
        assert_eq!(
            complete_prefix(&wide, bytes.len() as u64, encoding_rs::UTF_16LE).unwrap(),
            LinePrefix { lines: 2, end: 8 }
        );
    }

    #[test]
    fn test_leading_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bom.log");
        std::fs::write(&path, b"\xFF\xFEa\x00").unwrap();
        assert_eq!(leading_bom(&path).unwrap(), Some(encoding_rs::UTF_16LE));
        std::fs::write(&path, b"plain").unwrap();
        assert_eq!(leading_bom(&path).unwrap(), None);
    }
}
