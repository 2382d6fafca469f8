//! Sandboxed file browsing and reading. Every path is checked against the
//! root before the filesystem is touched.

mod watch;

pub use watch::WatchManager;

use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;
use serde::Serialize;

use crate::config::limits;
use crate::error::{AppError, AppResult};

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub is_dir: bool,
    pub len: u64,
}

/// The filesystem operations file access needs, so tests can count them.
pub trait FileSystem: Send + Sync {
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
    fn metadata(&self, path: &Path) -> io::Result<FileMeta>;
    fn read_head(&self, path: &Path, max: usize) -> io::Result<Vec<u8>>;
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn list_dir(&self, path: &Path, show_hidden: bool) -> io::Result<Vec<DirEntry>>;
}

/// The host filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl FileSystem for RealFs {
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::canonicalize(path)
    }

    fn metadata(&self, path: &Path) -> io::Result<FileMeta> {
        let meta = std::fs::metadata(path)?;
        Ok(FileMeta {
            is_dir: meta.is_dir(),
            len: meta.len(),
        })
    }

    fn read_head(&self, path: &Path, max: usize) -> io::Result<Vec<u8>> {
        let mut head = Vec::with_capacity(max);
        std::fs::File::open(path)?
            .take(max as u64)
            .read_to_end(&mut head)?;
        Ok(head)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn list_dir(&self, path: &Path, show_hidden: bool) -> io::Result<Vec<DirEntry>> {
        // Ignore rules are for source trees; a file browser shows everything
        // except (optionally) dotfiles.
        let walker = WalkBuilder::new(path)
            .max_depth(Some(1))
            .standard_filters(false)
            .hidden(!show_hidden)
            .build();

        let mut entries = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            if entry.depth() == 0 {
                continue;
            }
            let is_directory = entry.file_type().is_some_and(|t| t.is_dir())
                || (entry.path_is_symlink() && entry.path().is_dir());
            let size = if is_directory {
                None
            } else {
                entry.metadata().ok().map(|m| m.len())
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                path: entry.path().to_string_lossy().to_string(),
                is_directory,
                size,
            });
        }
        Ok(entries)
    }
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Directories first, then by name ignoring case.
fn sort_entries(entries: &mut [DirEntry]) {
    entries.sort_by(|a, b| {
        b.is_directory
            .cmp(&a.is_directory)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
}

/// Access-controlled view of the filesystem below one root.
pub struct FileAccess {
    root: PathBuf,
    canonical_root: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl FileAccess {
    pub fn new(root: PathBuf, fs: Arc<dyn FileSystem>) -> Self {
        let root = normalize(&root);
        let canonical_root = fs.canonicalize(&root).unwrap_or_else(|_| root.clone());
        Self {
            root,
            canonical_root,
            fs,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a client path to an absolute path inside the root.
    ///
    /// `~` stands for the root and relative paths are taken from it. The
    /// lexical check runs first so a denied path never reaches the
    /// filesystem; the canonical check then catches symlinks pointing out.
    pub fn resolve(&self, raw: &str) -> AppResult<PathBuf> {
        let expanded = match raw.strip_prefix('~') {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => {
                self.root.join(rest.trim_start_matches('/'))
            }
            _ => self.root.join(raw),
        };
        let lexical = normalize(&expanded);
        if !lexical.starts_with(&self.root) && !lexical.starts_with(&self.canonical_root) {
            return Err(AppError::AccessDenied);
        }

        let canonical = self.fs.canonicalize(&lexical).map_err(AppError::from_io)?;
        if !canonical.starts_with(&self.canonical_root) {
            return Err(AppError::AccessDenied);
        }
        Ok(canonical)
    }

    pub fn list_directory(&self, raw: &str, show_hidden: bool) -> AppResult<(PathBuf, Vec<DirEntry>)> {
        let path = self.resolve(raw)?;
        let mut entries = self.fs.list_dir(&path, show_hidden).map_err(AppError::from_io)?;
        sort_entries(&mut entries);
        Ok((path, entries))
    }

    /// Full UTF-8 text of a file, rejecting directories, oversize files
    /// and anything that looks binary.
    pub fn read_file(&self, raw: &str) -> AppResult<(PathBuf, String)> {
        let path = self.resolve(raw)?;
        self.check_regular(&path, limits::READ_FILE_MAX_BYTES)?;

        let head = self
            .fs
            .read_head(&path, limits::BINARY_PROBE_BYTES)
            .map_err(AppError::from_io)?;
        if head.contains(&0) {
            return Err(AppError::BinaryContent);
        }
        let bytes = self.fs.read(&path).map_err(AppError::from_io)?;
        let text = String::from_utf8(bytes).map_err(|_| AppError::BinaryContent)?;
        Ok((path, text))
    }

    /// Resolve a file for streaming under the larger ceiling. Returns the
    /// path and its size.
    pub fn stream_target(&self, raw: &str) -> AppResult<(PathBuf, u64)> {
        let path = self.resolve(raw)?;
        let len = self.check_regular(&path, limits::STREAM_FILE_MAX_BYTES)?;
        Ok((path, len))
    }

    fn check_regular(&self, path: &Path, limit: u64) -> AppResult<u64> {
        let meta = self.fs.metadata(path).map_err(AppError::from_io)?;
        if meta.is_dir {
            return Err(AppError::ReadFailure(format!("{} is a directory", path.display())));
        }
        if meta.len > limit {
            return Err(AppError::Oversize {
                size: meta.len,
                limit,
            });
        }
        Ok(meta.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts every call, and fails them all.
    #[derive(Default)]
    struct SpyFs {
        calls: AtomicUsize,
    }

    impl SpyFs {
        fn hit(&self) -> io::Error {
            self.calls.fetch_add(1, Ordering::SeqCst);
            io::Error::new(io::ErrorKind::Other, "spy")
        }
    }

    impl FileSystem for SpyFs {
        fn canonicalize(&self, _: &Path) -> io::Result<PathBuf> {
            Err(self.hit())
        }
        fn metadata(&self, _: &Path) -> io::Result<FileMeta> {
            Err(self.hit())
        }
        fn read_head(&self, _: &Path, _: usize) -> io::Result<Vec<u8>> {
            Err(self.hit())
        }
        fn read(&self, _: &Path) -> io::Result<Vec<u8>> {
            Err(self.hit())
        }
        fn list_dir(&self, _: &Path, _: bool) -> io::Result<Vec<DirEntry>> {
            Err(self.hit())
        }
    }

    fn real(dir: &Path) -> FileAccess {
        FileAccess::new(dir.to_path_buf(), Arc::new(RealFs))
    }

    #[test]
    fn test_denied_paths_never_touch_filesystem() {
        let spy = Arc::new(SpyFs::default());
        let access = FileAccess::new(PathBuf::from("/home/me"), spy.clone());
        let baseline = spy.calls.load(Ordering::SeqCst);

        for path in ["/etc/passwd", "../other/secret", "~/../../etc/shadow", "/home/meow/x"] {
            assert!(matches!(access.read_file(path), Err(AppError::AccessDenied)), "{}", path);
            assert!(matches!(access.list_directory(path, true), Err(AppError::AccessDenied)));
            assert!(matches!(access.stream_target(path), Err(AppError::AccessDenied)));
        }
        assert_eq!(spy.calls.load(Ordering::SeqCst), baseline);
    }

    #[test]
    fn test_reads_text_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "# hi\n").unwrap();
        let access = real(dir.path());

        let (path, text) = access.read_file("~/notes.md").unwrap();
        assert!(path.ends_with("notes.md"));
        assert_eq!(text, "# hi\n");
        assert_eq!(access.read_file("notes.md").unwrap().1, "# hi\n");
    }

    #[test]
    fn test_binary_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blob.bin"), [0x89, b'P', 0, 1]).unwrap();
        let access = real(dir.path());

        assert!(matches!(access.read_file("blob.bin"), Err(AppError::BinaryContent)));
        assert!(matches!(access.read_file("missing.txt"), Err(AppError::NotFound(_))));
        assert!(matches!(access.read_file("."), Err(AppError::ReadFailure(_))));
    }

    #[test]
    fn test_oversize_rejected_before_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = std::fs::File::create(dir.path().join("big.log")).unwrap();
        file.set_len(limits::READ_FILE_MAX_BYTES + 1).unwrap();
        let access = real(dir.path());

        assert!(matches!(access.read_file("big.log"), Err(AppError::Oversize { .. })));
        assert!(access.stream_target("big.log").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_root_is_denied() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), "x").unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"), dir.path().join("link")).unwrap();
        let access = real(dir.path());

        assert!(matches!(access.read_file("link"), Err(AppError::AccessDenied)));
    }

    #[test]
    fn test_listing_sorts_dirs_first_and_hides_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "abc").unwrap();
        std::fs::write(dir.path().join(".env"), "").unwrap();
        let access = real(dir.path());

        let (_, entries) = access.list_directory("~", false).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["src", "a.txt", "Cargo.toml"]);
        assert_eq!(entries[1].size, Some(3));
        assert_eq!(entries[0].size, None);

        let (_, entries) = access.list_directory("~", true).unwrap();
        assert!(entries.iter().any(|e| e.name == ".env"));
    }
}
