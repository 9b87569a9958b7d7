// Trap directory
// Sandboxed root exposed to FTP clients; only metadata is ever read from it

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Metadata of an entry inside the trap root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrapEntry {
    pub size: u64,
    pub is_directory: bool,
    pub modified: DateTime<Utc>,
}

/// Sandboxed filesystem root with list-only rights
#[derive(Debug, Clone)]
pub struct TrapRoot {
    root: PathBuf,
}

impl TrapRoot {
    /// Open the trap root, creating it if absent (idempotent)
    pub fn ensure(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Map a client path onto the real filesystem; never escapes the root
    pub fn resolve(&self, virtual_path: &str) -> PathBuf {
        let normalized = normalize_path(Path::new(virtual_path));
        let relative = normalized.strip_prefix("/").unwrap_or(&normalized);
        self.root.join(relative)
    }

    /// Metadata for a regular file or directory under the root
    ///
    /// Symlinks are not followed, so a link planted in the trap cannot point
    /// clients at the real filesystem.
    pub fn entry(&self, virtual_path: &str) -> Option<TrapEntry> {
        let meta = fs::symlink_metadata(self.resolve(virtual_path)).ok()?;
        if meta.file_type().is_symlink() {
            return None;
        }
        let modified = meta.modified().ok()?;
        Some(TrapEntry {
            size: meta.len(),
            is_directory: meta.is_dir(),
            modified: modified.into(),
        })
    }
}

/// Normalize a path by resolving . and .. components, clamped at `/`
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::Normal(part) => {
                components.push(part);
            }
            Component::ParentDir => {
                components.pop();
            }
            Component::RootDir => {
                components.clear();
            }
            _ => {}
        }
    }

    let mut result = PathBuf::from("/");
    for comp in components {
        result.push(comp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("ftp_trap_dir");

        TrapRoot::ensure(&root).unwrap();
        fs::write(root.join("keep.txt"), "x").unwrap();
        TrapRoot::ensure(&root).unwrap();

        assert!(root.join("keep.txt").exists());
    }

    #[test]
    fn normalize_clamps_at_root() {
        assert_eq!(normalize_path(Path::new("../../../etc/passwd")), PathBuf::from("/etc/passwd"));
        assert_eq!(normalize_path(Path::new("/pub/./a/../b")), PathBuf::from("/pub/b"));
        assert_eq!(normalize_path(Path::new("..")), PathBuf::from("/"));
    }

    #[test]
    fn resolve_never_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let trap = TrapRoot::ensure(dir.path()).unwrap();

        for path in ["../../etc/shadow", "/../../root/.ssh/id_rsa", "a/../../../b"] {
            assert!(trap.resolve(path).starts_with(dir.path()), "{} escaped", path);
        }
    }

    #[test]
    fn entry_reads_metadata_only() {
        let dir = tempfile::tempdir().unwrap();
        let trap = TrapRoot::ensure(dir.path()).unwrap();
        fs::write(dir.path().join("readme.txt"), "hello").unwrap();

        let entry = trap.entry("/readme.txt").unwrap();
        assert_eq!(entry.size, 5);
        assert!(!entry.is_directory);
        assert!(trap.entry("missing").is_none());
        assert!(trap.entry("/").unwrap().is_directory);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let trap = TrapRoot::ensure(dir.path()).unwrap();
        std::os::unix::fs::symlink("/etc/hostname", dir.path().join("link")).unwrap();

        assert!(trap.entry("link").is_none());
    }
}
