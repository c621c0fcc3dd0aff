//! Persisted per-target cache of flattened include closures.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use kiln_common::{FileHandle, FileTable};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CacheError;
use crate::store::{read_store, write_store, StoreKind};

/// Schema version of the flat-closure store payload.
pub const FLAT_CLOSURES_VERSION: u32 = 1;

/// File name of the flat-closure store inside a target's intermediate directory.
pub const FLAT_CLOSURES_FILE: &str = "FlatIncludes.kiln";

/// The flattened include set of one translation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatClosureEntry {
    /// Precompiled header the unit was compiled against, if any.
    pub pch: Option<FileHandle>,
    /// Every directly or indirectly included file.
    pub includes: Vec<FileHandle>,
}

/// Per-target mapping from translation unit to its flattened include set.
///
/// Written from the closure results of a run and read by later assemble-only
/// runs. A missing entry means the unit's dependencies are unknown.
pub struct FlatClosureCache {
    path: PathBuf,
    entries: HashMap<FileHandle, FlatClosureEntry>,
    dirty: bool,
}

#[derive(Serialize, Deserialize)]
struct PersistedFlatClosures {
    entries: Vec<PersistedFlatEntry>,
}

#[derive(Serialize, Deserialize)]
struct PersistedFlatEntry {
    file: String,
    pch: Option<String>,
    includes: Vec<String>,
}

impl FlatClosureCache {
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
        intermediate_dir.join(FLAT_CLOSURES_FILE)
    }

    /// Loads the cache stored at `path`; any problem yields an empty cache.
    pub fn load(path: &Path, files: &FileTable) -> Self {
        let persisted: PersistedFlatClosures =
            match read_store(path, StoreKind::FlatClosures, FLAT_CLOSURES_VERSION) {
                Ok(p) => p,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "starting with an empty flat-closure cache");
                    return Self::new(path);
                }
            };

        let intern = |s: &str| files.intern(Path::new(s));
        let entries = persisted
            .entries
            .into_iter()
            .map(|e| {
                (
                    intern(&e.file),
                    FlatClosureEntry {
                        pch: e.pch.as_deref().map(intern),
                        includes: e.includes.iter().map(|s| intern(s)).collect(),
                    },
                )
            })
            .collect::<HashMap<_, _>>();

        debug!(path = %path.display(), entries = entries.len(), "loaded flat-closure cache");
        Self {
            path: path.to_path_buf(),
            entries,
            dirty: false,
        }
    }

    /// Returns the flattened includes recorded for `file`.
    pub fn get(&self, file: FileHandle) -> Option<&FlatClosureEntry> {
        self.entries.get(&file)
    }

    /// Records the flattened includes of `file`.
    pub fn set(&mut self, file: FileHandle, pch: Option<FileHandle>, includes: Vec<FileHandle>) {
        let entry = FlatClosureEntry { pch, includes };
        if self.entries.get(&file) != Some(&entry) {
            self.entries.insert(file, entry);
            self.dirty = true;
        }
    }

    /// Forgets `file`, forcing its dependencies to be treated as unknown.
    pub fn remove(&mut self, file: FileHandle) {
        if self.entries.remove(&file).is_some() {
            self.dirty = true;
        }
    }

    /// Returns the number of cached translation units.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no translation unit is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the cache to disk if it changed.
    pub fn save(&mut self, files: &FileTable) -> Result<(), CacheError> {
        if !self.dirty {
            return Ok(());
        }
        let name = |h: FileHandle| files.path(h).to_string_lossy().into_owned();
        let mut entries: Vec<PersistedFlatEntry> = self
            .entries
            .iter()
            .map(|(file, entry)| PersistedFlatEntry {
                file: name(*file),
                pch: entry.pch.map(name),
                includes: entry.includes.iter().map(|h| name(*h)).collect(),
            })
            .collect();
        entries.sort_by(|a, b| a.file.cmp(&b.file));

        write_store(
            &self.path,
            StoreKind::FlatClosures,
            FLAT_CLOSURES_VERSION,
            &PersistedFlatClosures { entries },
        )?;
        debug!(path = %self.path.display(), entries = self.entries.len(), "saved flat-closure cache");
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = FlatClosureCache::store_path(dir.path());
        let files = FileTable::new();
        let unit = files.intern(Path::new("/ws/A.cpp"));
        let pch = files.intern(Path::new("/ws/PCH.h"));
        let b = files.intern(Path::new("/ws/B.h"));

        let mut cache = FlatClosureCache::new(&path);
        cache.set(unit, Some(pch), vec![b]);
        cache.save(&files).unwrap();

        let fresh = FileTable::new();
        let loaded = FlatClosureCache::load(&path, &fresh);
        let entry = loaded
            .get(fresh.lookup(Path::new("/ws/A.cpp")).unwrap())
            .unwrap();
        assert_eq!(entry.includes.len(), 1);
        assert_eq!(fresh.path(entry.includes[0]), Path::new("/ws/B.h"));
        assert_eq!(entry.pch.map(|h| fresh.path(h).to_path_buf()), Some(PathBuf::from("/ws/PCH.h")));
    }

    #[test]
    fn setting_identical_entry_stays_clean() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileTable::new();
        let unit = files.intern(Path::new("/ws/A.cpp"));
        let mut cache = FlatClosureCache::new(&FlatClosureCache::store_path(dir.path()));
        cache.set(unit, None, vec![]);
        cache.save(&files).unwrap();
        cache.set(unit, None, vec![]);
        assert!(!cache.dirty);
    }

    #[test]
    fn missing_store_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileTable::new();
        let cache = FlatClosureCache::load(&dir.path().join("absent.kiln"), &files);
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_forgets_unit() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileTable::new();
        let unit = files.intern(Path::new("/ws/A.cpp"));
        let mut cache = FlatClosureCache::new(&FlatClosureCache::store_path(dir.path()));
        cache.set(unit, None, vec![]);
        cache.remove(unit);
        assert!(cache.get(unit).is_none());
        assert_eq!(cache.len(), 0);
    }
}
