//! Persisted per-target cache of each file's direct include directives.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use kiln_common::{FileHandle, FileTable};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CacheError;
use crate::store::{read_store, write_store, StoreKind};

/// Schema version of the direct-include store payload.
pub const DIRECT_INCLUDES_VERSION: u32 = 1;

/// File name of the direct-include store inside a target's intermediate directory.
pub const DIRECT_INCLUDES_FILE: &str = "DirectIncludes.kiln";

/// One include directive of a file, with its resolution if one was attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveRecord {
    /// The raw directive payload with separators normalized to `/`.
    pub directive: String,
    /// Whether the header search ran for this directive.
    pub has_attempted_resolve: bool,
    /// The resolved file, or `None` if unresolved or not yet attempted.
    pub resolved: Option<FileHandle>,
}

impl DirectiveRecord {
    /// Creates a record that has not been resolved yet.
    pub fn unresolved(directive: impl Into<String>) -> Self {
        Self {
            directive: directive.into(),
            has_attempted_resolve: false,
            resolved: None,
        }
    }
}

/// Cached directives of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectIncludeEntry {
    /// Modification stamp of the file when it was scanned.
    pub stamp: u64,
    /// Whether the file contains a reflected-type marker.
    pub reflected: bool,
    /// Directives in source order.
    pub directives: Vec<DirectiveRecord>,
}

/// Per-target mapping from file identity to its direct include directives.
///
/// Entries are valid only while the file's modification stamp matches the one
/// recorded at scan time; validity is decided by the caller.
pub struct DirectIncludeCache {
    path: PathBuf,
    entries: HashMap<FileHandle, DirectIncludeEntry>,
    dirty: bool,
}

#[derive(Serialize, Deserialize)]
struct PersistedDirectIncludes {
    entries: Vec<PersistedEntry>,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    file: String,
    stamp: u64,
    reflected: bool,
    directives: Vec<PersistedDirective>,
}

#[derive(Serialize, Deserialize)]
struct PersistedDirective {
    directive: String,
    attempted: bool,
    resolved: Option<String>,
}

impl DirectIncludeCache {
    /// Creates an empty cache that will be saved to `path`.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            entries: HashMap::new(),
            dirty: false,
        }
    }

    /// Returns the store location inside a target's intermediate directory.
    pub fn store_path(intermediate_dir: &Path) -> PathBuf {
        intermediate_dir.join(DIRECT_INCLUDES_FILE)
    }

    /// Loads the cache stored at `path`, interning its files into `files`.
    ///
    /// A missing, corrupt or version-mismatched store yields an empty cache.
    pub fn load(path: &Path, files: &FileTable) -> Self {
        let persisted: PersistedDirectIncludes =
            match read_store(path, StoreKind::DirectIncludes, DIRECT_INCLUDES_VERSION) {
                Ok(p) => p,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "starting with an empty direct-include cache");
                    return Self::new(path);
                }
            };

        let entries = persisted
            .entries
            .into_iter()
            .map(|e| {
                let file = files.intern(Path::new(&e.file));
                let directives = e
                    .directives
                    .into_iter()
                    .map(|d| DirectiveRecord {
                        directive: d.directive,
                        has_attempted_resolve: d.attempted,
                        resolved: d.resolved.map(|r| files.intern(Path::new(&r))),
                    })
                    .collect();
                (
                    file,
                    DirectIncludeEntry {
                        stamp: e.stamp,
                        reflected: e.reflected,
                        directives,
                    },
                )
            })
            .collect::<HashMap<_, _>>();

        debug!(path = %path.display(), entries = entries.len(), "loaded direct-include cache");
        Self {
            path: path.to_path_buf(),
            entries,
            dirty: false,
        }
    }

    /// Returns the cached entry for `file`.
    pub fn get(&self, file: FileHandle) -> Option<&DirectIncludeEntry> {
        self.entries.get(&file)
    }

    /// Returns the cached entry for `file` for in-place update.
    pub fn get_mut(&mut self, file: FileHandle) -> Option<&mut DirectIncludeEntry> {
        let entry = self.entries.get_mut(&file);
        if entry.is_some() {
            self.dirty = true;
        }
        entry
    }

    /// Stores the entry for `file`, replacing any previous one.
    pub fn insert(&mut self, file: FileHandle, entry: DirectIncludeEntry) {
        self.entries.insert(file, entry);
        self.dirty = true;
    }

    /// Returns the number of cached files.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no file is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if the cache changed since it was loaded or saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns the path this cache is saved to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the cache to disk if it changed.
    pub fn save(&mut self, files: &FileTable) -> Result<(), CacheError> {
        if !self.dirty {
            return Ok(());
        }
        let mut entries: Vec<PersistedEntry> = self
            .entries
            .iter()
            .map(|(file, entry)| PersistedEntry {
                file: files.path(*file).to_string_lossy().into_owned(),
                stamp: entry.stamp,
                reflected: entry.reflected,
                directives: entry
                    .directives
                    .iter()
                    .map(|d| PersistedDirective {
                        directive: d.directive.clone(),
                        attempted: d.has_attempted_resolve,
                        resolved: d
                            .resolved
                            .map(|r| files.path(r).to_string_lossy().into_owned()),
                    })
                    .collect(),
            })
            .collect();
        entries.sort_by(|a, b| a.file.cmp(&b.file));

        write_store(
            &self.path,
            StoreKind::DirectIncludes,
            DIRECT_INCLUDES_VERSION,
            &PersistedDirectIncludes { entries },
        )?;
        debug!(path = %self.path.display(), entries = self.entries.len(), "saved direct-include cache");
        self.dirty = false;
        Ok(())
    }
}
