// LogSentinel - core/tracker.rs
//
// File position tracker: remembers, per watched file, how many bytes have
// been consumed, how many lines those bytes contained, and the file's last
// known signature. Pure bookkeeping; signatures are produced by the
// platform layer.
//
// Rotation/truncation rule:
//   - current size < tracked offset                      -> rotated
//   - (device, inode) known on both sides and different   -> rotated
//   - no identity available: size shrank below the last
//     known size and the mtime changed                   -> rotated
// A same-size truncate-and-rewrite with no inode change is NOT detected;
// see the ignored test at the bottom of this file.

use crate::core::model::FileSignature;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Tracked read state for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedPosition {
    /// Bytes consumed so far (always at a line boundary).
    pub offset: u64,
    /// Signature observed at the last update.
    pub signature: FileSignature,
    /// Number of complete lines consumed so far.
    pub lines: u64,
}

/// Per-file byte offsets and signatures.
#[derive(Debug, Default)]
pub struct PositionTracker {
    positions: HashMap<PathBuf, TrackedPosition>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `path` at `offset` (0 for a fresh file, the current
    /// size when skipping existing content). Replaces any previous state.
    pub fn track(&mut self, path: &Path, offset: u64, signature: FileSignature, lines: u64) {
        let offset = offset.min(signature.size);
        self.positions.insert(
            path.to_path_buf(),
            TrackedPosition {
                offset,
                signature,
                lines,
            },
        );
    }

    /// Offset and signature last recorded for `path`.
    pub fn get_offset(&self, path: &Path) -> Option<(u64, FileSignature)> {
        self.positions.get(path).map(|p| (p.offset, p.signature))
    }

    /// Full tracked state for `path`.
    pub fn position(&self, path: &Path) -> Option<&TrackedPosition> {
        self.positions.get(path)
    }

    /// Commit a successful read: the offset advances to `new_offset` and
    /// `lines_consumed` complete lines are added to the line counter.
    ///
    /// Untracked paths are ignored. The offset never exceeds the size in
    /// `new_signature`.
    pub fn update_offset(
        &mut self,
        path: &Path,
        new_offset: u64,
        new_signature: FileSignature,
        lines_consumed: u64,
    ) {
        if let Some(pos) = self.positions.get_mut(path) {
            debug_assert!(
                new_offset >= pos.offset,
                "offset must not move backwards without a reset"
            );
            pos.offset = new_offset.min(new_signature.size);
            pos.signature = new_signature;
            pos.lines += lines_consumed;
        }
    }

    /// Record a new signature without consuming anything (nothing new to
    /// read this cycle).
    pub fn touch(&mut self, path: &Path, signature: FileSignature) {
        if let Some(pos) = self.positions.get_mut(path) {
            pos.signature = signature;
        }
    }

    /// Returns `true` when `current` indicates the file was truncated or
    /// replaced since the last update.
    pub fn detect_rotation(&self, path: &Path, current: &FileSignature) -> bool {
        let Some(pos) = self.positions.get(path) else {
            return false;
        };

        if current.size < pos.offset {
            return true;
        }

        match (pos.signature.file_id, current.file_id) {
            (Some(old), Some(new)) => old != new,
            _ => current.size < pos.signature.size && current.modified != pos.signature.modified,
        }
    }

    /// Rewind `path` to the start of the file after a rotation.
    pub fn reset(&mut self, path: &Path, signature: FileSignature) {
        if let Some(pos) = self.positions.get_mut(path) {
            pos.offset = 0;
            pos.lines = 0;
            pos.signature = signature;
        }
    }

    /// Forget `path`. Re-adding it later starts fresh.
    pub fn remove(&mut self, path: &Path) -> Option<TrackedPosition> {
        self.positions.remove(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.positions.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn sig(size: u64, mtime_secs: u64, id: Option<(u64, u64)>) -> FileSignature {
        FileSignature::new(
            size,
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(mtime_secs)),
            id,
        )
    }

    #[test]
    fn test_offset_is_monotonic_under_growth() {
        let path = Path::new("/logs/app.log");
        let mut t = PositionTracker::new();
        t.track(path, 0, sig(0, 1, Some((1, 7))), 0);

        let mut last = 0;
        for (i, size) in [10u64, 25, 25, 80].into_iter().enumerate() {
            let current = sig(size, 2 + i as u64, Some((1, 7)));
            assert!(!t.detect_rotation(path, &current));
            t.update_offset(path, size, current, 1);
            let (offset, s) = t.get_offset(path).unwrap();
            assert!(offset >= last);
            assert!(offset <= s.size);
            last = offset;
        }
        assert_eq!(t.position(path).unwrap().lines, 4);
    }

    #[test]
    fn test_truncation_below_offset_is_rotation() {
        let path = Path::new("/logs/app.log");
        let mut t = PositionTracker::new();
        t.track(path, 0, sig(0, 1, None), 0);
        t.update_offset(path, 500, sig(500, 2, None), 10);

        let truncated = sig(20, 3, None);
        assert!(t.detect_rotation(path, &truncated));
        t.reset(path, truncated);
        let pos = t.position(path).unwrap();
        assert_eq!(pos.offset, 0);
        assert_eq!(pos.lines, 0);
    }

    #[test]
    fn test_inode_change_is_rotation_even_when_larger() {
        let path = Path::new("/logs/app.log");
        let mut t = PositionTracker::new();
        t.track(path, 100, sig(100, 1, Some((1, 7))), 3);
        assert!(t.detect_rotation(path, &sig(400, 2, Some((1, 8)))));
        assert!(!t.detect_rotation(path, &sig(400, 2, Some((1, 7)))));
    }

    #[test]
    fn test_shrink_without_identity_is_rotation() {
        let path = Path::new("/logs/app.log");
        let mut t = PositionTracker::new();
        // 100 bytes consumed, 30 more bytes of an unterminated line seen.
        t.track(path, 0, sig(0, 1, None), 0);
        t.update_offset(path, 100, sig(130, 2, None), 4);
        // Still at or beyond the offset but smaller than before, new mtime.
        assert!(t.detect_rotation(path, &sig(110, 3, None)));
        // Same shrink but identical mtime: treated as no rotation.
        assert!(!t.detect_rotation(path, &sig(110, 2, None)));
    }

    #[test]
    fn test_track_clamps_offset_to_size_and_remove_forgets() {
        let path = Path::new("/logs/app.log");
        let mut t = PositionTracker::new();
        t.track(path, 999, sig(50, 1, None), 0);
        assert_eq!(t.get_offset(path).unwrap().0, 50);
        assert!(t.remove(path).is_some());
        assert!(!t.contains(path));
        assert!(!t.detect_rotation(path, &sig(0, 1, None)));
    }

    /// Known limitation: a file truncated and rewritten to exactly the same
    /// size with the same inode between two polls is indistinguishable from
    /// an unchanged file by (size, mtime, inode) alone once the offset equals
    /// the size, so the rewritten content is never read.
    #[test]
    #[ignore = "known limitation: same-size truncate+rewrite is not detected"]
    fn test_same_size_rewrite_is_detected() {
        let path = Path::new("/logs/app.log");
        let mut t = PositionTracker::new();
        t.track(path, 0, sig(0, 1, Some((1, 7))), 0);
        t.update_offset(path, 64, sig(64, 2, Some((1, 7))), 2);
        assert!(t.detect_rotation(path, &sig(64, 3, Some((1, 7)))));
    }
}
