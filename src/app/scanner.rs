// LogSentinel - app/scanner.rs
//
// Directory scanner: lists configured watch directories (and explicit
// single-file watches), filters entries by glob patterns, and diffs the
// result against the set of registered targets.
//
// Rules:
//   - Directory walks use `walkdir` with `filter_entry`, so excluded
//     directories are pruned without descending into them.
//   - A directory that cannot be listed keeps its existing targets until it
//     has failed DIR_UNREACHABLE_SCANS_BEFORE_RETIRE consecutive scans; only
//     then are its targets reported as removed.
//   - Single-file watches get the same tolerance. Only a NotFound for the
//     file while its parent directory is still listable removes it at once.
//   - Depth-1 listings are cached by directory mtime once that mtime is
//     older than LISTING_CACHE_SETTLE_SECS. `force_rescan` drops the cache
//     so the next scan enumerates everything again.
//   - The scanner only reports changes; the tail engine owns registration
//     and tracker state.

use crate::core::model::WatchSpec;
use crate::platform::config::{StartPosition, WatchEntry};
use crate::util::constants;
use crate::util::error::ScanError;
use glob::Pattern;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

// =============================================================================
// Public types
// =============================================================================

/// A file that should start being tailed.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTarget {
    pub spec: WatchSpec,
    /// Skip the file's existing content.
    pub start_at_end: bool,
}

/// Differences found by one scan.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Newly matching files, sorted by path.
    pub added: Vec<NewTarget>,
    /// Registered files that vanished, stopped matching, or whose directory
    /// was retired. Sorted.
    pub removed: Vec<PathBuf>,
    /// Watch roots whose targets were retired this scan.
    pub retired: Vec<PathBuf>,
    /// Listing failures, one per unreachable directory or file watch.
    pub errors: Vec<ScanError>,
}

impl ScanOutcome {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Cached result of a non-recursive listing.
#[derive(Debug)]
struct ListingCache {
    mtime: SystemTime,
    files: Vec<PathBuf>,
}

#[derive(Debug)]
struct WatchDirectory {
    entry: WatchEntry,
    consecutive_failures: u32,
    cache: Option<ListingCache>,
}

#[derive(Debug)]
struct WatchFile {
    entry: WatchEntry,
    consecutive_failures: u32,
}

/// Result of checking a single-file watch.
#[derive(Debug)]
enum FileCheck {
    Present,
    /// Confirmed gone: NotFound inside a listable parent, or no longer a
    /// regular file.
    Gone,
    Unreachable(ScanError),
}

// =============================================================================
// DirectoryScanner
// =============================================================================

/// Tracks configured watches and the set of files registered from them.
#[derive(Debug)]
pub struct DirectoryScanner {
    directories: Vec<WatchDirectory>,
    files: Vec<WatchFile>,
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    start_position: StartPosition,
    /// Registered file path -> root of the watch it came from.
    registered: HashMap<PathBuf, PathBuf>,
    scans_completed: u64,
}

impl DirectoryScanner {
    pub fn new(
        include_patterns: &[String],
        exclude_patterns: &[String],
        start_position: StartPosition,
    ) -> Self {
        Self {
            directories: Vec::new(),
            files: Vec::new(),
            include: compile_patterns(include_patterns),
            exclude: compile_patterns(exclude_patterns),
            start_position,
            registered: HashMap::new(),
            scans_completed: 0,
        }
    }

    /// Add a watch. An existing regular file becomes a single-file watch;
    /// anything else is treated as a directory (it may not exist yet).
    /// Re-adding a known path replaces its settings.
    pub fn add_watch_target(&mut self, entry: WatchEntry) {
        self.remove_watch_config(&entry.path);
        if entry.path.is_file() {
            tracing::info!(file = %entry.path.display(), "Watching file");
            self.files.push(WatchFile {
                entry,
                consecutive_failures: 0,
            });
        } else {
            tracing::info!(
                dir = %entry.path.display(),
                depth = entry.max_depth,
                "Watching directory"
            );
            self.directories.push(WatchDirectory {
                entry,
                consecutive_failures: 0,
                cache: None,
            });
        }
    }

    /// Remove the watch rooted at `path`. Its files are reported as removed
    /// by the next scan. Returns `false` if no such watch exists.
    pub fn remove_watch_target(&mut self, path: &Path) -> bool {
        let removed = self.remove_watch_config(path);
        if removed {
            tracing::info!(path = %path.display(), "Watch removed");
        }
        removed
    }

    fn remove_watch_config(&mut self, path: &Path) -> bool {
        let before = self.directories.len() + self.files.len();
        self.directories.retain(|d| d.entry.path != path);
        self.files.retain(|f| f.entry.path != path);
        before != self.directories.len() + self.files.len()
    }

    /// Replace the global include patterns. Invalid globs are skipped.
    pub fn set_file_patterns(&mut self, patterns: &[String]) {
        self.include = compile_patterns(patterns);
        self.clear_caches();
        tracing::info!(patterns = ?patterns, "File patterns updated");
    }

    /// Forget cached listings so the next scan enumerates every directory.
    /// Byte offsets are untouched.
    pub fn force_rescan(&mut self) {
        self.clear_caches();
        tracing::debug!("Listing cache cleared");
    }

    fn clear_caches(&mut self) {
        for dir in &mut self.directories {
            dir.cache = None;
        }
    }

    /// Configured watch roots (directories first, then single files).
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        self.directories
            .iter()
            .map(|d| d.entry.path.clone())
            .chain(self.files.iter().map(|f| f.entry.path.clone()))
            .collect()
    }

    /// Consecutive failed scans of the watch rooted at `root`.
    pub fn failures(&self, root: &Path) -> Option<u32> {
        self.directories
            .iter()
            .find(|d| d.entry.path == root)
            .map(|d| d.consecutive_failures)
            .or_else(|| {
                self.files
                    .iter()
                    .find(|f| f.entry.path == root)
                    .map(|f| f.consecutive_failures)
            })
    }

    pub fn is_registered(&self, path: &Path) -> bool {
        self.registered.contains_key(path)
    }

    pub fn registered_count(&self) -> usize {
        self.registered.len()
    }

    pub fn scans_completed(&self) -> u64 {
        self.scans_completed
    }

    /// List every watch and diff against the registered set.
    pub fn scan(&mut self) -> ScanOutcome {
        let initial = self.scans_completed == 0;
        let start_at_end = self.start_position.starts_at_end(initial);
        let mut outcome = ScanOutcome::default();

        // path -> (spec, owning root)
        let mut desired: HashMap<PathBuf, (WatchSpec, PathBuf)> = HashMap::new();
        // Registered paths held over from unreachable directories.
        let mut kept: HashSet<PathBuf> = HashSet::new();

        let include = &self.include;
        let exclude = &self.exclude;
        for dir in &mut self.directories {
            let root = dir.entry.path.clone();
            match list_directory(dir, include, exclude) {
                Ok(files) => {
                    if dir.consecutive_failures > 0 {
                        tracing::info!(dir = %root.display(), "Directory reachable again");
                    }
                    dir.consecutive_failures = 0;
                    for path in files {
                        let spec = spec_for(&dir.entry, &path);
                        desired.entry(path).or_insert((spec, root.clone()));
                    }
                }
                Err(e) => {
                    dir.consecutive_failures += 1;
                    tracing::warn!(
                        dir = %root.display(),
                        failures = dir.consecutive_failures,
                        error = %e,
                        "Cannot list watched directory"
                    );
                    if dir.consecutive_failures < constants::DIR_UNREACHABLE_SCANS_BEFORE_RETIRE {
                        kept.extend(
                            self.registered
                                .iter()
                                .filter(|(_, owner)| **owner == root)
                                .map(|(p, _)| p.clone()),
                        );
                    } else if dir.consecutive_failures
                        == constants::DIR_UNREACHABLE_SCANS_BEFORE_RETIRE
                    {
                        outcome.retired.push(root.clone());
                    }
                    outcome.errors.push(e);
                }
            }
        }

        for file in &mut self.files {
            let path = file.entry.path.clone();
            match check_file(&path) {
                FileCheck::Present => {
                    if file.consecutive_failures > 0 {
                        tracing::info!(file = %path.display(), "Watched file reachable again");
                    }
                    file.consecutive_failures = 0;
                    let spec = spec_for(&file.entry, &path);
                    desired.entry(path.clone()).or_insert((spec, path));
                }
                FileCheck::Gone => {
                    file.consecutive_failures = 0;
                }
                FileCheck::Unreachable(e) => {
                    file.consecutive_failures += 1;
                    tracing::warn!(
                        file = %path.display(),
                        failures = file.consecutive_failures,
                        error = %e,
                        "Cannot reach watched file"
                    );
                    if file.consecutive_failures < constants::DIR_UNREACHABLE_SCANS_BEFORE_RETIRE {
                        if self.registered.contains_key(&path) {
                            kept.insert(path);
                        }
                    } else if file.consecutive_failures
                        == constants::DIR_UNREACHABLE_SCANS_BEFORE_RETIRE
                    {
                        outcome.retired.push(path);
                    }
                    outcome.errors.push(e);
                }
            }
        }

        // Diff.
        let mut removed: Vec<PathBuf> = self
            .registered
            .keys()
            .filter(|p| !desired.contains_key(*p) && !kept.contains(*p))
            .cloned()
            .collect();
        removed.sort();
        for path in &removed {
            self.registered.remove(path);
        }

        let mut added: Vec<NewTarget> = Vec::new();
        for (path, (spec, owner)) in desired {
            if !self.registered.contains_key(&path) {
                self.registered.insert(path, owner);
                added.push(NewTarget { spec, start_at_end });
            }
        }
        added.sort_by(|a, b| a.spec.path.cmp(&b.spec.path));

        outcome.added = added;
        outcome.removed = removed;
        self.scans_completed += 1;

        if !outcome.is_empty() {
            tracing::debug!(
                added = outcome.added.len(),
                removed = outcome.removed.len(),
                registered = self.registered.len(),
                "Scan complete"
            );
        }
        outcome
    }
}

// =============================================================================
// Listing
// =============================================================================

fn compile_patterns(patterns: &[String]) -> Vec<Pattern> {
    patterns
        .iter()
        .filter_map(|p| match Pattern::new(p) {
            Ok(pat) => Some(pat),
            Err(e) => {
                tracing::warn!(pattern = %p, error = %e, "Ignoring invalid glob pattern");
                None
            }
        })
        .collect()
}

fn spec_for(entry: &WatchEntry, path: &Path) -> WatchSpec {
    let mut spec = WatchSpec::new(path)
        .with_encoding(entry.encoding)
        .with_transcode(entry.transcode)
        .with_format(entry.format);
    if let Some(ref server) = entry.server {
        spec = spec.with_server(server.clone());
    }
    spec
}

fn check_root(root: &Path) -> Result<std::fs::Metadata, ScanError> {
    match std::fs::metadata(root) {
        Ok(meta) if meta.is_dir() => Ok(meta),
        Ok(_) => Err(ScanError::NotADirectory {
            path: root.to_path_buf(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(ScanError::PermissionDenied {
                path: root.to_path_buf(),
                source: e,
            })
        }
        Err(_) => Err(ScanError::RootNotFound {
            path: root.to_path_buf(),
        }),
    }
}

/// Classify a single-file watch. A missing file only counts as gone when its
/// parent directory can still be listed; a vanished mount or parent is a
/// transient failure.
fn check_file(path: &Path) -> FileCheck {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => FileCheck::Present,
        Ok(_) => FileCheck::Gone,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let parent = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            if std::fs::read_dir(parent).is_ok() {
                FileCheck::Gone
            } else {
                FileCheck::Unreachable(ScanError::RootNotFound {
                    path: path.to_path_buf(),
                })
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            FileCheck::Unreachable(ScanError::PermissionDenied {
                path: path.to_path_buf(),
                source: e,
            })
        }
        Err(e) => FileCheck::Unreachable(ScanError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Whether a directory mtime is old enough that a later change will move it.
fn mtime_settled(mtime: SystemTime) -> bool {
    SystemTime::now()
        .duration_since(mtime)
        .map(|age| age >= Duration::from_secs(constants::LISTING_CACHE_SETTLE_SECS))
        .unwrap_or(false)
}

/// Matching files under `dir`, honouring the mtime cache for depth-1 watches.
fn list_directory(
    dir: &mut WatchDirectory,
    global_include: &[Pattern],
    exclude: &[Pattern],
) -> Result<Vec<PathBuf>, ScanError> {
    let root = dir.entry.path.clone();
    let meta = check_root(&root)?;
    let cacheable = dir.entry.max_depth == 1;
    let mtime = meta.modified().ok();

    if cacheable {
        if let (Some(cache), Some(mtime)) = (&dir.cache, mtime) {
            if cache.mtime == mtime {
                tracing::trace!(dir = %root.display(), "Listing unchanged; using cache");
                return Ok(cache.files.clone());
            }
        }
    }

    let local_include;
    let include = match dir.entry.patterns {
        Some(ref p) => {
            local_include = compile_patterns(p);
            &local_include[..]
        }
        None => global_include,
    };

    let files = walk_matching(&root, dir.entry.max_depth, include, exclude)?;

    dir.cache = match (cacheable, mtime) {
        (true, Some(mtime)) if mtime_settled(mtime) => Some(ListingCache {
            mtime,
            files: files.clone(),
        }),
        _ => None,
    };
    Ok(files)
}

/// Walk `root` up to `max_depth` levels and return regular files whose name
/// matches an include pattern (empty list = all) and no exclude pattern.
/// Per-entry errors below the root are skipped.
fn walk_matching(
    root: &Path,
    max_depth: usize,
    include: &[Pattern],
    exclude: &[Pattern],
) -> Result<Vec<PathBuf>, ScanError> {
    let walker = walkdir::WalkDir::new(root)
        .max_depth(max_depth)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            !exclude.iter().any(|p| p.matches(&name))
        });

    let mut found = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(ScanError::Traversal {
                    path: root.to_path_buf(),
                    source: e,
                });
            }
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        let is_file = entry.file_type().is_file()
            || (entry.path_is_symlink() && entry.path().is_file());
        if !is_file {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if include.is_empty() || include.iter().any(|p| p.matches(&name)) {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

// =============================================================================
// Tests
// =============================================================================
