//! Header search: mapping a raw include token to a file on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use kiln_common::{FileHandle, FileTable};
use kiln_config::ResolvedModule;

/// Ordered include directories of a translation unit's module.
///
/// The directory of the including file is probed first and is supplied per
/// request; this context holds the module include paths followed, when
/// enabled, by the system include paths.
#[derive(Debug, Clone, Default)]
pub struct SearchContext {
    directories: Vec<PathBuf>,
}

impl SearchContext {
    /// Creates a context from directories in search order.
    pub fn new(directories: Vec<PathBuf>) -> Self {
        Self { directories }
    }

    /// Creates the context of a module.
    pub fn for_module(module: &ResolvedModule, system: &[PathBuf], use_system: bool) -> Self {
        let mut directories = module.include_paths.clone();
        if use_system {
            directories.extend(system.iter().cloned());
        }
        Self { directories }
    }

    /// Returns the directories in search order.
    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }
}

/// Diagnostic counters of a [`HeaderSearch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Resolve requests.
    pub attempts: u64,
    /// Requests that found nothing.
    pub misses: u64,
    /// File-system existence checks.
    pub probes: u64,
    /// Requests answered from the memo.
    pub memo_hits: u64,
}

impl SearchStats {
    /// Adds another set of counters to this one.
    pub fn absorb(&mut self, other: &SearchStats) {
        self.attempts += other.attempts;
        self.misses += other.misses;
        self.probes += other.probes;
        self.memo_hits += other.memo_hits;
    }
}

/// Memoizing header resolver for one module.
///
/// Tokens are memoized lower-cased, so repeated requests for the same header
/// cost a single pass over the directories.
#[derive(Debug, Default)]
pub struct HeaderSearch {
    memo: HashMap<String, Option<FileHandle>>,
    relative_memo: HashMap<(PathBuf, String), Option<FileHandle>>,
    stats: SearchStats,
}

impl HeaderSearch {
    /// Creates a resolver with an empty memo.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `token` as written in a file located in `including_dir`.
    ///
    /// Absolute tokens are checked directly. Otherwise the including file's
    /// directory is probed first, then each directory of `context` in order;
    /// the first existing file wins. Not finding a header is not an error.
    pub fn resolve(
        &mut self,
        token: &str,
        including_dir: Option<&Path>,
        context: &SearchContext,
        files: &FileTable,
    ) -> Option<FileHandle> {
        self.stats.attempts += 1;

        if Path::new(token).is_absolute() {
            let found = self.probe(Path::new(token), files);
            if found.is_none() {
                self.stats.misses += 1;
            }
            return found;
        }

        let key = token.to_lowercase();

        if let Some(dir) = including_dir {
            let relative_key = (dir.to_path_buf(), key.clone());
            let found = match self.relative_memo.get(&relative_key) {
                Some(cached) => {
                    self.stats.memo_hits += 1;
                    *cached
                }
                None => {
                    let found = self.probe(&dir.join(token), files);
                    self.relative_memo.insert(relative_key, found);
                    found
                }
            };
            if found.is_some() {
                return found;
            }
        }

        if let Some(cached) = self.memo.get(&key) {
            self.stats.memo_hits += 1;
            if cached.is_none() {
                self.stats.misses += 1;
            }
            return *cached;
        }

        let mut found = None;
        for dir in context.directories() {
            if let Some(handle) = self.probe(&dir.join(token), files) {
                found = Some(handle);
                break;
            }
        }
        if found.is_none() {
            self.stats.misses += 1;
        }
        self.memo.insert(key, found);
        found
    }

    /// Returns the counters accumulated so far.
    pub fn stats(&self) -> SearchStats {
        self.stats
    }

    fn probe(&mut self, candidate: &Path, files: &FileTable) -> Option<FileHandle> {
        self.stats.probes += 1;
        candidate.is_file().then(|| files.intern(candidate))
    }
}
