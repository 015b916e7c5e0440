use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::error::{BackupError, FailureKind};
use crate::core::models::CopyResult;

/// Directory names never worth backing up: caches, build output, trash.
const EXCLUDED_FOLDERS: &[&str] = &[
    "Temp",
    "Cache",
    "cache",
    "cache2",
    "LocalCache",
    "CacheStorage",
    "Code Cache",
    "GPUCache",
    "ShaderCache",
    "node_modules",
    ".git",
    "__pycache__",
    ".cache",
    "venv",
    ".venv",
    "Logs",
    "logs",
    "lost+found",
    "$Recycle.Bin",
    "System Volume Information",
];

/// Path fragments excluded wherever they appear in the tree.
const EXCLUDED_PATTERNS: &[&str] = &[
    r"\.local/share/Trash",
    r"\.cargo/registry",
    r"\.npm/_cacache",
    r"\.mozilla/firefox/.*/cache2",
];

/// Decides which directories are skipped during enumeration.
#[derive(Debug, Clone)]
pub struct ExcludeRules {
    names: HashSet<String>,
    patterns: Vec<Regex>,
}

impl ExcludeRules {
    /// Built-in rules plus any user-configured patterns.
    pub fn from_config(extra_patterns: &[String]) -> Result<Self, BackupError> {
        let names = EXCLUDED_FOLDERS.iter().map(|s| s.to_string()).collect();

        let mut patterns = Vec::with_capacity(EXCLUDED_PATTERNS.len() + extra_patterns.len());
        for pattern in EXCLUDED_PATTERNS.iter().copied().map(str::to_owned) {
            patterns.push(compile(&pattern)?);
        }
        for pattern in extra_patterns {
            patterns.push(compile(pattern)?);
        }

        Ok(Self { names, patterns })
    }

    pub fn is_excluded(&self, dir: &Path) -> bool {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if name.starts_with('$') || self.names.contains(name.as_ref()) {
            return true;
        }

        let full = dir.to_string_lossy();
        self.patterns.iter().any(|re| re.is_match(&full))
    }
}

fn compile(pattern: &str) -> Result<Regex, BackupError> {
    Regex::new(pattern).map_err(|source| BackupError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// One file found during enumeration.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
}

/// Lazily walks a source tree depth-first, in directory-traversal order.
///
/// Unreadable subpaths are skipped with a warning and recorded as failed
/// items; only a missing or unreadable root aborts. The walker is not
/// restartable; create a new one to re-walk from scratch.
#[derive(Debug)]
pub struct FileWalker {
    base: PathBuf,
    pending: Vec<PathBuf>,
    stack: Vec<(PathBuf, fs::ReadDir)>,
    rules: ExcludeRules,
    directories: Vec<PathBuf>,
    failures: Vec<CopyResult>,
}

impl FileWalker {
    /// `subfolders` limits the walk to those entries directly under `base`;
    /// an empty list walks the whole tree. Missing subfolders are skipped
    /// silently.
    pub fn new(
        base: impl Into<PathBuf>,
        subfolders: &[String],
        rules: ExcludeRules,
    ) -> Result<Self, BackupError> {
        let base = base.into();

        let meta = fs::metadata(&base).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BackupError::SourceMissing(base.clone()),
            io::ErrorKind::PermissionDenied => BackupError::SourceUnreadable(base.clone()),
            _ => BackupError::Io(e),
        })?;
        if !meta.is_dir() {
            return Err(BackupError::SourceMissing(base));
        }

        let root = fs::read_dir(&base).map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => BackupError::SourceUnreadable(base.clone()),
            _ => BackupError::Io(e),
        })?;

        let (pending, stack) = if subfolders.is_empty() {
            (Vec::new(), vec![(base.clone(), root)])
        } else {
            let roots = subfolders.iter().rev().map(|f| base.join(f)).collect();
            (roots, Vec::new())
        };

        Ok(Self {
            base,
            pending,
            stack,
            rules,
            directories: Vec::new(),
            failures: Vec::new(),
        })
    }

    /// Subpaths that could not be enumerated, for the end-of-job report.
    pub fn failures(&self) -> &[CopyResult] {
        &self.failures
    }

    /// Directories seen so far, parents before children.
    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    pub fn into_parts(self) -> (Vec<PathBuf>, Vec<CopyResult>) {
        (self.directories, self.failures)
    }

    fn record_skip(&mut self, path: &Path, error: &io::Error) {
        warn!(path = %path.display(), error = %error, "skipping unreadable entry");
        let item = path.strip_prefix(&self.base).unwrap_or(path).to_path_buf();
        self.failures.push(CopyResult::failed(
            item,
            FailureKind::from_io_error(error),
            error.to_string(),
        ));
    }
}

impl Iterator for FileWalker {
    type Item = FileEntry;

    fn next(&mut self) -> Option<FileEntry> {
        loop {
            let step = self
                .stack
                .last_mut()
                .map(|(dir, iter)| (dir.clone(), iter.next()));

            if let Some((dir, step)) = step {
                match step {
                    None => {
                        self.stack.pop();
                    }
                    Some(Err(e)) => {
                        self.record_skip(&dir, &e);
                        self.stack.pop();
                    }
                    Some(Ok(entry)) => {
                        let path = entry.path();

                        // symlink_metadata so symlinks are never followed
                        let meta = match path.symlink_metadata() {
                            Ok(m) => m,
                            Err(e) => {
                                self.record_skip(&path, &e);
                                continue;
                            }
                        };

                        if meta.is_dir() {
                            if self.rules.is_excluded(&path) {
                                debug!(path = %path.display(), "excluded directory");
                                continue;
                            }
                            match fs::read_dir(&path) {
                                Ok(rd) => {
                                    self.directories.push(path.clone());
                                    self.stack.push((path, rd));
                                }
                                Err(e) => self.record_skip(&path, &e),
                            }
                        } else if meta.is_file() {
                            return Some(FileEntry {
                                path,
                                size: meta.len(),
                            });
                        }
                        // symlinks and special files are skipped
                    }
                }
                continue;
            }

            let root = self.pending.pop()?;
            match fs::read_dir(&root) {
                Ok(rd) => self.stack.push((root, rd)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %root.display(), "configured folder not present, skipping");
                }
                Err(e) => self.record_skip(&root, &e),
            }
        }
    }
}

/// Result of eagerly draining a walker: everything the executor needs, plus
/// totals for progress reporting.
#[derive(Debug)]
pub struct ScanResult {
    pub files: Vec<FileEntry>,
    pub directories: Vec<PathBuf>,
    pub total_bytes: u64,
    pub failures: Vec<CopyResult>,
}

/// Pre-count files and bytes before copying so progress has stable totals.
pub fn scan(
    base: &Path,
    subfolders: &[String],
    rules: &ExcludeRules,
    cancel: &CancellationToken,
) -> Result<ScanResult, BackupError> {
    let mut walker = FileWalker::new(base, subfolders, rules.clone())?;

    let mut files = Vec::new();
    let mut total_bytes = 0u64;
    for entry in walker.by_ref() {
        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }
        total_bytes += entry.size;
        files.push(entry);
    }

    let (directories, failures) = walker.into_parts();
    Ok(ScanResult {
        files,
        directories,
        total_bytes,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::CopyStatus;
    use std::fs;
    use tempfile::tempdir;

    fn rules() -> ExcludeRules {
        ExcludeRules::from_config(&[]).unwrap()
    }

    fn touch(path: &Path, content: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn walks_nested_files() {
        let temp = tempdir().unwrap();
        touch(&temp.path().join("a.txt"), b"0123456789");
        touch(&temp.path().join("sub/b.txt"), b"");

        let result = scan(temp.path(), &[], &rules(), &CancellationToken::new()).unwrap();

        assert_eq!(result.files.len(), 2);
        assert_eq!(result.total_bytes, 10);
        assert_eq!(result.directories.len(), 1);
        assert!(result.failures.is_empty());
    }

    #[test]
    fn walker_is_lazy() {
        let temp = tempdir().unwrap();
        touch(&temp.path().join("a.txt"), b"x");
        touch(&temp.path().join("b.txt"), b"y");

        let mut walker = FileWalker::new(temp.path(), &[], rules()).unwrap();
        assert!(walker.next().is_some());
        assert!(walker.next().is_some());
        assert!(walker.next().is_none());
    }

    #[test]
    fn junk_directories_are_excluded() {
        let temp = tempdir().unwrap();
        touch(&temp.path().join("keep.txt"), b"k");
        touch(&temp.path().join("node_modules/pkg/index.js"), b"js");
        touch(&temp.path().join(".git/config"), b"cfg");
        touch(&temp.path().join("$RECYCLE.BIN/junk"), b"j");

        let result = scan(temp.path(), &[], &rules(), &CancellationToken::new()).unwrap();

        assert_eq!(result.files.len(), 1);
        assert!(result.files[0].path.ends_with("keep.txt"));
        assert!(result.directories.is_empty());
    }

    #[test]
    fn user_patterns_exclude_matching_directories() {
        let temp = tempdir().unwrap();
        touch(&temp.path().join("private-stuff/secret.txt"), b"s");
        touch(&temp.path().join("public/open.txt"), b"o");

        let rules = ExcludeRules::from_config(&["private-stuff".to_string()]).unwrap();
        let result = scan(temp.path(), &[], &rules, &CancellationToken::new()).unwrap();

        assert_eq!(result.files.len(), 1);
        assert!(result.files[0].path.ends_with("open.txt"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = ExcludeRules::from_config(&["[unclosed".to_string()]).unwrap_err();
        assert!(matches!(err, BackupError::InvalidPattern { .. }));
    }

    #[test]
    fn missing_root_aborts_with_not_found() {
        let temp = tempdir().unwrap();
        let missing = temp.path().join("nope");

        let err = FileWalker::new(&missing, &[], rules()).unwrap_err();
        assert!(matches!(err, BackupError::SourceMissing(_)));
    }

    #[test]
    fn subfolder_filter_limits_the_walk() {
        let temp = tempdir().unwrap();
        touch(&temp.path().join("Documents/report.txt"), b"r");
        touch(&temp.path().join("Downloads/installer.bin"), b"i");
        touch(&temp.path().join("loose.txt"), b"l");

        let subfolders = vec!["Documents".to_string(), "Pictures".to_string()];
        let result = scan(temp.path(), &subfolders, &rules(), &CancellationToken::new()).unwrap();

        assert_eq!(result.files.len(), 1);
        assert!(result.files[0].path.ends_with("Documents/report.txt"));
    }

    #[test]
    fn cancellation_stops_the_scan() {
        let temp = tempdir().unwrap();
        touch(&temp.path().join("a.txt"), b"x");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = scan(temp.path(), &[], &rules(), &cancel).unwrap_err();
        assert!(matches!(err, BackupError::Cancelled));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_directory_is_recorded_not_fatal() {
        use std::os::unix::fs::PermissionsExt;

        // root bypasses permission checks, making this scenario untestable
        if unsafe { libc::geteuid() } == 0 {
            return;
        }

        let temp = tempdir().unwrap();
        touch(&temp.path().join("ok.txt"), b"fine");
        let locked = temp.path().join("locked");
        fs::create_dir(&locked).unwrap();
        touch(&locked.join("hidden.txt"), b"h");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let result = scan(temp.path(), &[], &rules(), &CancellationToken::new()).unwrap();

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(result.files.len(), 1);
        assert_eq!(result.failures.len(), 1);
        match &result.failures[0].status {
            CopyStatus::Failed { kind, .. } => {
                assert_eq!(*kind, FailureKind::PermissionDenied);
            }
            other => panic!("expected a failure, got {other:?}"),
        }
    }
}
