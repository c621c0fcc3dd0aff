//! Interned file identities for cheap copying and O(1) equality comparison.

use std::path::{Component, Path, PathBuf};

use lasso::ThreadedRodeo;

/// Whether the host file system compares paths case-insensitively.
const CASE_INSENSITIVE_HOST: bool = cfg!(any(windows, target_os = "macos"));

/// Canonical identity of a file on disk.
///
/// A handle is a `u32` index into a [`FileTable`]. Two handles from the same
/// table are equal exactly when their normalized paths are equal. Handles are
/// only meaningful inside the process that created them; persisted stores
/// record path strings and re-intern them on load.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct FileHandle(u32);

impl FileHandle {
    /// Creates a `FileHandle` from a raw `u32` index.
    ///
    /// Intended for tests that fabricate graphs without touching the disk.
    pub fn from_raw(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw `u32` index of this handle.
    pub fn as_raw(self) -> u32 {
        self.0
    }
}

// SAFETY: `FileHandle` wraps a `u32` which is always a valid `usize` on 32-bit
// and 64-bit platforms. `try_from_usize` rejects values that don't fit in `u32`.
unsafe impl lasso::Key for FileHandle {
    fn into_usize(self) -> usize {
        self.0 as usize
    }

    fn try_from_usize(int: usize) -> Option<Self> {
        u32::try_from(int).ok().map(FileHandle)
    }
}

/// Thread-safe table of known files backed by [`lasso::ThreadedRodeo`].
///
/// Entries are created lazily the first time a path is seen and are never
/// removed for the lifetime of the table.
pub struct FileTable {
    rodeo: ThreadedRodeo<FileHandle>,
}

impl FileTable {
    /// Creates a new empty file table.
    pub fn new() -> Self {
        Self {
            rodeo: ThreadedRodeo::new(),
        }
    }

    /// Returns the handle for `path`, creating one if the path is new.
    pub fn intern(&self, path: &Path) -> FileHandle {
        self.rodeo.get_or_intern(normalize_path(path))
    }

    /// Returns the handle for `path` if it was interned before.
    pub fn lookup(&self, path: &Path) -> Option<FileHandle> {
        self.rodeo.get(normalize_path(path))
    }

    /// Resolves a handle back to its normalized path.
    ///
    /// # Panics
    ///
    /// Panics if the handle was not created by this table.
    pub fn path(&self, handle: FileHandle) -> &Path {
        Path::new(self.rodeo.resolve(&handle))
    }

    /// Resolves a handle, returning `None` for handles from another table.
    pub fn try_path(&self, handle: FileHandle) -> Option<&Path> {
        self.rodeo.try_resolve(&handle).map(Path::new)
    }

    /// Returns the number of distinct files interned so far.
    pub fn len(&self) -> usize {
        self.rodeo.len()
    }

    /// Returns `true` if no file has been interned.
    pub fn is_empty(&self) -> bool {
        self.rodeo.is_empty()
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Produces the canonical spelling of a path.
///
/// The result is absolute (relative paths are joined onto the current
/// directory), lexically cleaned of `.` and `..` components, uses `/` as the
/// separator, and is lower-cased on hosts with case-insensitive file systems.
/// Symbolic links are not resolved.
pub fn normalize_path(path: &Path) -> String {
    let absolute: PathBuf = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut prefix = String::new();
    let mut parts: Vec<String> = Vec::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(p) => prefix = p.as_os_str().to_string_lossy().into_owned(),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                parts.pop();
            }
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
        }
    }

    let mut normalized = prefix;
    normalized.push('/');
    normalized.push_str(&parts.join("/"));
    if CASE_INSENSITIVE_HOST {
        normalized = normalized.to_lowercase();
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_resolve_roundtrip() {
        let table = FileTable::new();
        let h = table.intern(Path::new("/src/a.cpp"));
        assert_eq!(table.path(h), Path::new("/src/a.cpp"));
    }

    #[test]
    fn equivalent_spellings_share_a_handle() {
        let table = FileTable::new();
        let a = table.intern(Path::new("/src/module/../a.h"));
        let b = table.intern(Path::new("/src/./a.h"));
        assert_eq!(a, b);
    }

    #[test]
    fn different_files_differ() {
        let table = FileTable::new();
        let a = table.intern(Path::new("/src/a.h"));
        let b = table.intern(Path::new("/src/b.h"));
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn lookup_does_not_intern() {
        let table = FileTable::new();
        assert!(table.lookup(Path::new("/nowhere/x.h")).is_none());
        assert!(table.is_empty());
        let h = table.intern(Path::new("/nowhere/x.h"));
        assert_eq!(table.lookup(Path::new("/nowhere/x.h")), Some(h));
    }

    #[test]
    fn relative_paths_become_absolute() {
        let normalized = normalize_path(Path::new("some/dir/file.h"));
        assert!(normalized.starts_with('/') || normalized.contains(":/"));
        assert!(normalized.ends_with("file.h"));
    }

    #[test]
    fn foreign_handle_does_not_resolve() {
        let table = FileTable::new();
        assert!(table.try_path(FileHandle::from_raw(99)).is_none());
    }

    #[cfg(not(any(windows, target_os = "macos")))]
    #[test]
    fn case_preserved_on_case_sensitive_hosts() {
        let table = FileTable::new();
        let a = table.intern(Path::new("/src/A.h"));
        let b = table.intern(Path::new("/src/a.h"));
        assert_ne!(a, b);
    }
}
