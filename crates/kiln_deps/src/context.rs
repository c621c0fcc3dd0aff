//! Per-target scanning state.
//!
//! A [`TargetScanContext`] owns everything include discovery needs for one
//! target: the header search memo of each module, the directive extractor,
//! two closure caches (exhaustive, and restricted to persisted data) and the
//! target's persisted direct-include and flat-closure stores. Nothing is
//! shared between targets.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_cache::{
    CacheError, DirectIncludeCache, DirectIncludeEntry, DirectiveRecord, FlatClosureCache,
    FlatClosureEntry,
};
use kiln_common::{file_stamp, normalize_path, FileHandle, FileTable, InternalError};
use kiln_config::{BackslashPolicy, BuildConfig, ResolveMode, ResolvedTarget};
use tracing::{debug, warn};

use crate::closure::{ClosureCache, DirectiveSource, IncludeSet};
use crate::error::ScanError;
use crate::extract::{DirectiveExtractor, SourceKind};
use crate::search::{HeaderSearch, SearchContext, SearchStats};

/// Scanning policy switches for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPolicy {
    /// Whether stored resolutions are trusted.
    pub resolve_mode: ResolveMode,
    /// Treatment of `\` separators in first-party directives.
    pub backslashes: BackslashPolicy,
    /// Search system include paths.
    pub use_system_includes: bool,
    /// Ignore cached directives and scan every file once more.
    pub force_rescan: bool,
}

impl ScanPolicy {
    /// Derives the policy from the `[build]` configuration.
    pub fn from_build(build: &BuildConfig) -> Self {
        Self {
            resolve_mode: build.resolve_mode,
            backslashes: build.backslash_includes,
            use_system_includes: build.use_system_includes,
            force_rescan: false,
        }
    }
}

/// Counters describing the scanning work done by a context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Files whose text was scanned.
    pub extractions: u64,
    /// Files answered from the direct-include cache.
    pub direct_hits: u64,
    /// Cached resolutions that disagreed with a fresh search.
    pub resolve_conflicts: u64,
    /// Header search counters summed over modules.
    pub search: SearchStats,
}

impl ScanReport {
    /// Adds another report to this one.
    pub fn absorb(&mut self, other: &ScanReport) {
        self.extractions += other.extractions;
        self.direct_hits += other.direct_hits;
        self.resolve_conflicts += other.resolve_conflicts;
        self.search.absorb(&other.search);
    }
}

struct ModuleScope {
    name: String,
    root: PathBuf,
    context: SearchContext,
    search: HeaderSearch,
    third_party: bool,
    pch: Option<FileHandle>,
}

/// Everything the closure engine reads through [`DirectiveSource`].
struct IncludeResolver {
    files: Arc<FileTable>,
    direct: DirectIncludeCache,
    extractor: DirectiveExtractor,
    modules: Vec<ModuleScope>,
    active: usize,
    generated_dir: PathBuf,
    policy: ScanPolicy,
    rescanned: HashSet<FileHandle>,
    report: ScanReport,
}

/// Include-discovery state of one target.
pub struct TargetScanContext {
    target: String,
    exhaustive: ClosureCache,
    persisted_only: ClosureCache,
    flat: FlatClosureCache,
    resolver: IncludeResolver,
}

impl TargetScanContext {
    /// Creates the context of `target`, loading its persisted include caches.
    pub fn new(
        target: &ResolvedTarget,
        files: Arc<FileTable>,
        policy: ScanPolicy,
    ) -> Result<Self, ScanError> {
        let extractor =
            DirectiveExtractor::new(&target.scan.reflection_markers, target.scan.chunk_size)?;
        let direct =
            DirectIncludeCache::load(&DirectIncludeCache::store_path(&target.intermediate_dir), &files);
        let flat =
            FlatClosureCache::load(&FlatClosureCache::store_path(&target.intermediate_dir), &files);

        let modules = target
            .modules
            .iter()
            .map(|m| ModuleScope {
                name: m.name.clone(),
                root: PathBuf::from(normalize_path(&m.source_root)),
                context: SearchContext::for_module(
                    m,
                    &target.system_include_paths,
                    policy.use_system_includes,
                ),
                search: HeaderSearch::new(),
                third_party: m.third_party,
                pch: m.pch.as_deref().map(|p| files.intern(p)),
            })
            .collect();

        debug!(
            target = %target.name,
            cached_files = direct.len(),
            cached_units = flat.len(),
            "created scan context"
        );

        Ok(Self {
            target: target.name.clone(),
            exhaustive: ClosureCache::new(),
            persisted_only: ClosureCache::new(),
            flat,
            resolver: IncludeResolver {
                files,
                direct,
                extractor,
                modules,
                active: 0,
                generated_dir: PathBuf::from(normalize_path(&target.intermediate_dir)),
                policy,
                rescanned: HashSet::new(),
                report: ScanReport::default(),
            },
        })
    }

    /// Returns the target name.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the shared file table.
    pub fn files(&self) -> &Arc<FileTable> {
        &self.resolver.files
    }

    /// Returns the full include closure of `file`, scanning as needed.
    ///
    /// Directives are resolved in the search context of `module`.
    pub fn closure(&mut self, file: FileHandle, module: &str) -> Result<IncludeSet, ScanError> {
        if let Some(done) = self.exhaustive.get(file) {
            return Ok(done.clone());
        }
        self.resolver.select(module, &self.target)?;
        Ok(self.exhaustive.compute(&mut self.resolver, file, false)?.includes)
    }

    /// Returns the include closure of `file` using persisted data only.
    ///
    /// `None` means some file in the closure has no valid cached directives;
    /// the caller must treat the unit's dependencies as unknown.
    pub fn cached_closure(
        &mut self,
        file: FileHandle,
        module: &str,
    ) -> Result<Option<IncludeSet>, ScanError> {
        self.resolver.select(module, &self.target)?;
        let closure = self.persisted_only.compute(&mut self.resolver, file, true)?;
        Ok((!closure.unknown).then_some(closure.includes))
    }

    /// Returns whether `file` contains a reflected-type marker, scanning it
    /// if its cached entry is missing or stale.
    pub fn has_reflected_types(&mut self, file: FileHandle, module: &str) -> Result<bool, ScanError> {
        self.resolver.select(module, &self.target)?;
        let path = self.resolver.files.path(file).to_path_buf();
        let Some(stamp) = file_stamp(&path) else {
            return Ok(false);
        };
        if !self.resolver.entry_is_current(file, stamp) {
            self.resolver.scan_file(file, &path, stamp)?;
        }
        Ok(self
            .resolver
            .direct
            .get(file)
            .is_some_and(|e| e.reflected))
    }

    /// Returns the precompiled header of `module`.
    pub fn module_pch(&self, module: &str) -> Option<FileHandle> {
        self.resolver
            .modules
            .iter()
            .find(|m| m.name == module)
            .and_then(|m| m.pch)
    }

    /// Returns the persisted flat closure of a translation unit.
    pub fn flat_includes(&self, file: FileHandle) -> Option<&FlatClosureEntry> {
        self.flat.get(file)
    }

    /// Records the flat closure of a translation unit for later runs.
    pub fn record_flat(&mut self, file: FileHandle, pch: Option<FileHandle>, includes: &IncludeSet) {
        self.flat.set(file, pch, includes.iter().copied().collect());
    }

    /// Forgets the flat closure of a translation unit.
    pub fn forget_flat(&mut self, file: FileHandle) {
        self.flat.remove(file);
    }

    /// Recomputes and records the closures of outdated translation units.
    ///
    /// Returns the number of units rescanned.
    pub fn rescan_units(&mut self, units: &[(FileHandle, String)]) -> Result<usize, ScanError> {
        for (unit, module) in units {
            let includes = self.closure(*unit, module)?;
            let pch = self.module_pch(module);
            self.record_flat(*unit, pch, &includes);
        }
        debug!(target = %self.target, units = units.len(), "rescanned outdated units");
        Ok(units.len())
    }

    /// Returns the counters accumulated by this context.
    pub fn report(&self) -> ScanReport {
        let mut report = self.resolver.report;
        for module in &self.resolver.modules {
            report.search.absorb(&module.search.stats());
        }
        report
    }

    /// Persists both include caches of the target.
    pub fn save(&mut self) -> Result<(), CacheError> {
        let files = Arc::clone(&self.resolver.files);
        self.resolver.direct.save(&files)?;
        self.flat.save(&files)
    }
}

impl IncludeResolver {
    fn select(&mut self, module: &str, target: &str) -> Result<(), ScanError> {
        self.active = self
            .modules
            .iter()
            .position(|m| m.name == module)
            .ok_or_else(|| ScanError::UnknownModule {
                module: module.to_string(),
                target: target.to_string(),
            })?;
        Ok(())
    }

    fn entry_is_current(&self, file: FileHandle, stamp: u64) -> bool {
        let fresh = self.direct.get(file).is_some_and(|e| e.stamp == stamp);
        fresh && (!self.policy.force_rescan || self.rescanned.contains(&file))
    }

    fn backslash_policy(&self, path: &Path) -> BackslashPolicy {
        let exempt = path.starts_with(&self.generated_dir)
            || self
                .modules
                .iter()
                .any(|m| m.third_party && path.starts_with(&m.root));
        if exempt {
            BackslashPolicy::Allow
        } else {
            self.policy.backslashes
        }
    }

    fn scan_file(&mut self, file: FileHandle, path: &Path, stamp: u64) -> Result<(), ScanError> {
        let bytes = std::fs::read(path).map_err(|e| ScanError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let text = String::from_utf8_lossy(&bytes);
        let extraction = self.extractor.extract(
            path,
            &text,
            SourceKind::from_path(path),
            self.backslash_policy(path),
        )?;

        self.report.extractions += 1;
        self.rescanned.insert(file);
        self.direct.insert(
            file,
            DirectIncludeEntry {
                stamp,
                reflected: extraction.reflected,
                directives: extraction
                    .directives
                    .into_iter()
                    .map(DirectiveRecord::unresolved)
                    .collect(),
            },
        );
        Ok(())
    }

    fn resolve_directives(&mut self, file: FileHandle, path: &Path) -> Result<Vec<FileHandle>, ScanError> {
        let records = self
            .direct
            .get(file)
            .map(|e| e.directives.clone())
            .ok_or_else(|| {
                ScanError::from(InternalError::new(format!(
                    "no directives cached for {}",
                    path.display()
                )))
            })?;

        let including_dir = path.parent();
        let trust = self.policy.resolve_mode == ResolveMode::TrustCache;
        let scope = &mut self.modules[self.active];
        let mut resolved = Vec::with_capacity(records.len());
        let mut updates = Vec::new();

        for (index, record) in records.iter().enumerate() {
            let target = if record.has_attempted_resolve && trust {
                record.resolved
            } else {
                let found =
                    scope
                        .search
                        .resolve(&record.directive, including_dir, &scope.context, &self.files);
                if record.has_attempted_resolve && found != record.resolved {
                    self.report.resolve_conflicts += 1;
                    warn!(
                        file = %path.display(),
                        directive = %record.directive,
                        cached = ?record.resolved.map(|h| self.files.path(h).display().to_string()),
                        fresh = ?found.map(|h| self.files.path(h).display().to_string()),
                        "include resolution changed"
                    );
                }
                if !record.has_attempted_resolve || found != record.resolved {
                    updates.push((index, found));
                }
                found
            };
            if let Some(handle) = target {
                if !resolved.contains(&handle) {
                    resolved.push(handle);
                }
            }
        }

        if !updates.is_empty() {
            if let Some(entry) = self.direct.get_mut(file) {
                for (index, found) in updates {
                    entry.directives[index].has_attempted_resolve = true;
                    entry.directives[index].resolved = found;
                }
            }
        }
        Ok(resolved)
    }
}

impl DirectiveSource for IncludeResolver {
    fn direct_includes(
        &mut self,
        file: FileHandle,
        only_from_cache: bool,
    ) -> Result<Option<Vec<FileHandle>>, ScanError> {
        let path = self.files.path(file).to_path_buf();
        let Some(stamp) = file_stamp(&path) else {
            return Ok(Some(Vec::new()));
        };

        if self.entry_is_current(file, stamp) {
            self.report.direct_hits += 1;
        } else if only_from_cache {
            return Ok(None);
        } else {
            self.scan_file(file, &path, stamp)?;
        }
        self.resolve_directives(file, &path).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_config::{load_config_from_str, resolve_target};

    struct Workspace {
        dir: tempfile::TempDir,
        target: ResolvedTarget,
        files: Arc<FileTable>,
    }

    impl Workspace {
        fn new(extra: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let toml = format!(
                r#"
[workspace]
name = "scan"

[modules.Game]
source_root = "Game"
include_paths = ["Game/Public"]
dependencies = ["Lib"]

[modules.Lib]
source_root = "ThirdParty/Lib"
third_party = true

[targets.Scan]
modules = ["Game"]
{extra}
"#
            );
            let config = load_config_from_str(&toml).unwrap();
            let target = resolve_target(&config, dir.path(), "Scan").unwrap();
            Self {
                dir,
                target,
                files: Arc::new(FileTable::new()),
            }
        }

        fn write(&self, rel: &str, text: &str) -> FileHandle {
            let path = self.dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, text).unwrap();
            self.files.intern(&path)
        }

        fn context(&self) -> TargetScanContext {
            TargetScanContext::new(
                &self.target,
                Arc::clone(&self.files),
                ScanPolicy::from_build(&self.target.build),
            )
            .unwrap()
        }
    }

    #[test]
    fn closure_follows_includes_across_directories() {
        let ws = Workspace::new("");
        let a = ws.write("Game/A.cpp", "#include \"B.h\"\n#include <vector>\n");
        let b = ws.write("Game/Public/B.h", "#include \"A.h\"\n");
        let ah = ws.write("Game/A.h", "#pragma once\n");

        let mut ctx = ws.context();
        let set = ctx.closure(a, "Game").unwrap();
        assert_eq!(set, [b, ah].into_iter().collect());
        assert_eq!(ctx.report().extractions, 3);
    }

    #[test]
    fn persisted_directives_skip_extraction() {
        let ws = Workspace::new("");
        let a = ws.write("Game/A.cpp", "#include \"A.h\"\n");
        ws.write("Game/A.h", "#pragma once\n");

        let mut first = ws.context();
        let expected = first.closure(a, "Game").unwrap();
        first.save().unwrap();

        let mut second = ws.context();
        assert_eq!(second.cached_closure(a, "Game").unwrap(), Some(expected.clone()));
        assert_eq!(second.closure(a, "Game").unwrap(), expected);
        assert_eq!(second.report().extractions, 0);
        assert!(second.report().direct_hits > 0);
    }

    #[test]
    fn cached_closure_is_unknown_without_data() {
        let ws = Workspace::new("");
        let a = ws.write("Game/A.cpp", "#include \"A.h\"\n");
        let mut ctx = ws.context();
        assert_eq!(ctx.cached_closure(a, "Game").unwrap(), None);
        assert_eq!(ctx.report().extractions, 0);
    }

    #[test]
    fn corrupt_direct_store_matches_fresh_scan() {
        let ws = Workspace::new("");
        let a = ws.write("Game/A.cpp", "#include \"B.h\"\n");
        ws.write("Game/B.h", "#include \"A.cpp\"\n");

        let fresh = ws.context().closure(a, "Game").unwrap();

        let store = DirectIncludeCache::store_path(&ws.target.intermediate_dir);
        std::fs::create_dir_all(store.parent().unwrap()).unwrap();
        std::fs::write(&store, b"definitely not a store").unwrap();

        let mut ctx = ws.context();
        assert_eq!(ctx.closure(a, "Game").unwrap(), fresh);
    }

    #[test]
    fn backslash_in_first_party_fails_but_third_party_passes() {
        let ws = Workspace::new("");
        let a = ws.write("Game/A.cpp", "#include \"Sub\\B.h\"\n");
        let lib = ws.write("ThirdParty/Lib/L.cpp", "#include \"Sub\\B.h\"\n");
        ws.write("ThirdParty/Lib/Sub/B.h", "\n");

        let mut ctx = ws.context();
        assert!(matches!(
            ctx.closure(a, "Game").unwrap_err(),
            ScanError::BackslashSeparator { .. }
        ));
        let set = ctx.closure(lib, "Lib").unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn changed_file_is_rescanned() {
        let ws = Workspace::new("");
        let a = ws.write("Game/A.cpp", "#include \"A.h\"\n");
        let ah = ws.write("Game/A.h", "\n");
        let bh = ws.write("Game/B.h", "\n");

        let mut first = ws.context();
        first.closure(a, "Game").unwrap();
        first.save().unwrap();

        ws.write("Game/A.cpp", "#include \"B.h\"\n");
        kiln_common::set_modified(
            ws.files.path(a),
            std::time::SystemTime::now() + std::time::Duration::from_secs(5),
        )
        .unwrap();

        let mut second = ws.context();
        let set = second.closure(a, "Game").unwrap();
        assert!(set.contains(&bh));
        assert!(!set.contains(&ah));
        // A.cpp changed and B.h was never scanned before.
        assert_eq!(second.report().extractions, 2);
    }

    #[test]
    fn always_resolve_counts_conflicts() {
        let ws = Workspace::new("");
        let a = ws.write("Game/A.cpp", "#include \"X.h\"\n");
        let public = ws.write("Game/Public/X.h", "\n");

        let mut first = ws.context();
        assert!(first.closure(a, "Game").unwrap().contains(&public));
        first.save().unwrap();

        // A closer match appears next to the including file.
        let local = ws.write("Game/X.h", "\n");
        let mut policy = ScanPolicy::from_build(&ws.target.build);
        policy.resolve_mode = ResolveMode::AlwaysResolve;
        let mut second =
            TargetScanContext::new(&ws.target, Arc::clone(&ws.files), policy).unwrap();
        let set = second.closure(a, "Game").unwrap();
        assert!(set.contains(&local));
        assert_eq!(second.report().resolve_conflicts, 1);
    }

    #[test]
    fn reflected_marker_reported() {
        let ws = Workspace::new("");
        let h = ws.write("Game/Thing.h", "UCLASS()\nclass UThing {};\n");
        let plain = ws.write("Game/Plain.h", "struct P {};\n");
        let mut ctx = ws.context();
        assert!(ctx.has_reflected_types(h, "Game").unwrap());
        assert!(!ctx.has_reflected_types(plain, "Game").unwrap());
    }

    #[test]
    fn unknown_module_is_rejected() {
        let ws = Workspace::new("");
        let a = ws.write("Game/A.cpp", "\n");
        let mut ctx = ws.context();
        assert!(matches!(
            ctx.closure(a, "Audio").unwrap_err(),
            ScanError::UnknownModule { .. }
        ));
    }

    #[test]
    fn rescan_units_records_flat_closures() {
        let ws = Workspace::new("");
        let a = ws.write("Game/A.cpp", "#include \"A.h\"\n");
        let ah = ws.write("Game/A.h", "\n");
        let mut ctx = ws.context();
        assert_eq!(ctx.rescan_units(&[(a, "Game".to_string())]).unwrap(), 1);
        assert_eq!(ctx.flat_includes(a).unwrap().includes, vec![ah]);
    }
}
