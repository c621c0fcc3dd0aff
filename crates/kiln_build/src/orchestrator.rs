//! Gather and assemble phases of a build invocation.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kiln_common::{FileHandle, FileTable, InternalError};
use kiln_config::{config_files, project_files, resolve_target, KilnConfig, ResolvedTarget};
use kiln_deps::{ScanError, ScanPolicy, ScanReport, TargetScanContext};
use kiln_graph::{
    execute_plan, is_in_working_set, load_validated, plan_outdated, snapshot_path, walk_module,
    ActionId, ActionKind, BuildGraphSnapshot, DescribeRequest, HotReloadPatcher,
    InvalidationReason, ModuleRecord, ModuleSuffix, ScannedHeader, TargetRecord, Toolchain,
    ValidationInputs,
};
use tracing::{debug, info, warn};

use crate::error::BuildError;
use crate::lock::InstanceLock;
use crate::options::{BuildOptions, Phases};
use crate::oracle::{FlatOracle, MarkerProbe};

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Outdated actions ran and succeeded.
    Succeeded,
    /// Nothing needed to run.
    UpToDate,
    /// The graph was gathered and persisted without building.
    Gathered,
}

impl BuildOutcome {
    /// Process exit code for this outcome.
    pub fn exit_code(self) -> i32 {
        match self {
            BuildOutcome::Succeeded | BuildOutcome::Gathered => 0,
            BuildOutcome::UpToDate => 2,
        }
    }
}

impl fmt::Display for BuildOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildOutcome::Succeeded => write!(f, "succeeded"),
            BuildOutcome::UpToDate => write!(f, "up to date"),
            BuildOutcome::Gathered => write!(f, "gathered"),
        }
    }
}

/// What a run did.
#[derive(Debug)]
pub struct BuildReport {
    /// How the run ended.
    pub outcome: BuildOutcome,
    /// Whether a fresh graph was gathered.
    pub gathered: bool,
    /// Why the persisted snapshot was not reused, if one was checked.
    pub invalidation: Option<InvalidationReason>,
    /// Number of actions executed.
    pub executed: usize,
    /// Number of translation units whose includes were rescanned after the
    /// outdated check.
    pub rescanned: usize,
    /// Include discovery counters over all targets.
    pub scan: ScanReport,
    /// JSON description of the graph, when requested.
    pub explain: Option<serde_json::Value>,
}

impl BuildReport {
    fn new() -> Self {
        Self {
            outcome: BuildOutcome::UpToDate,
            gathered: false,
            invalidation: None,
            executed: 0,
            rescanned: 0,
            scan: ScanReport::default(),
            explain: None,
        }
    }
}

/// Drives builds of one workspace.
///
/// An orchestrator can run several builds in a row. Hot reload builds keep
/// their snapshot in memory so the next hot reload reuses it without
/// revalidation, and so binary suffixes stay unique across the session.
pub struct Orchestrator<'t> {
    root: PathBuf,
    config: KilnConfig,
    toolchain: &'t dyn Toolchain,
    files: Arc<FileTable>,
    patcher: HotReloadPatcher,
    loaded: Option<(PathBuf, BuildGraphSnapshot)>,
}

impl<'t> Orchestrator<'t> {
    /// Creates an orchestrator for the workspace at `root`.
    pub fn new(root: impl Into<PathBuf>, config: KilnConfig, toolchain: &'t dyn Toolchain) -> Self {
        Self {
            root: root.into(),
            config,
            toolchain,
            files: Arc::new(FileTable::new()),
            patcher: HotReloadPatcher::new(),
            loaded: None,
        }
    }

    /// Replaces the hot reload patcher, e.g. with a seeded one.
    pub fn with_patcher(mut self, patcher: HotReloadPatcher) -> Self {
        self.patcher = patcher;
        self
    }

    /// Returns the file table shared by every scan context.
    pub fn files(&self) -> &Arc<FileTable> {
        &self.files
    }

    /// Returns the workspace configuration.
    pub fn config(&self) -> &KilnConfig {
        &self.config
    }

    /// Returns the hot reload patcher, to release binaries the running
    /// process has unloaded.
    pub fn patcher_mut(&mut self) -> &mut HotReloadPatcher {
        &mut self.patcher
    }

    /// Runs one build invocation.
    pub fn run(&mut self, options: &BuildOptions) -> Result<BuildReport, BuildError> {
        if options.targets.is_empty() {
            return Err(BuildError::NoTargets);
        }
        let targets = options
            .targets
            .iter()
            .map(|name| resolve_target(&self.config, &self.root, name))
            .collect::<Result<Vec<_>, _>>()?;

        let executable = options
            .executable
            .clone()
            .or_else(|| std::env::current_exe().ok());
        let _lock = if options.no_lock {
            None
        } else {
            let lock_dir = self.root.join(&self.config.workspace.intermediate_dir);
            let holder = executable.clone().unwrap_or_else(|| PathBuf::from("kiln"));
            let timeout = Duration::from_secs(self.config.build.lock_timeout_secs);
            Some(InstanceLock::acquire(&lock_dir, &holder, timeout)?)
        };

        let target_refs: Vec<&ResolvedTarget> = targets.iter().collect();
        let snapshot_file =
            snapshot_path(&target_refs, options.hot_reload).ok_or(BuildError::NoTargets)?;

        let started = Instant::now();
        let mut contexts = targets
            .iter()
            .map(|t| TargetScanContext::new(t, Arc::clone(&self.files), scan_policy(t, options)))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "loaded include caches"
        );

        let result = self.run_phases(
            options,
            &targets,
            &mut contexts,
            &snapshot_file,
            executable.as_deref(),
        );

        let mut scan = ScanReport::default();
        for context in &mut contexts {
            scan.absorb(&context.report());
            if let Err(e) = context.save() {
                warn!(scan_target = %context.target(), "failed to save include caches: {e}");
            }
        }
        info!(
            extractions = scan.extractions,
            direct_hits = scan.direct_hits,
            resolve_conflicts = scan.resolve_conflicts,
            search_attempts = scan.search.attempts,
            search_misses = scan.search.misses,
            search_probes = scan.search.probes,
            memo_hits = scan.search.memo_hits,
            "include discovery"
        );
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "build invocation finished"
        );

        let mut report = result?;
        report.scan = scan;
        Ok(report)
    }

    /// Deletes the persisted snapshots of `target`, both regular and hot
    /// reload. Returns how many files were removed.
    pub fn invalidate_snapshots(&self, target: &str) -> Result<usize, BuildError> {
        let resolved = resolve_target(&self.config, &self.root, target)?;
        let mut removed = 0;
        for hot_reload in [false, true] {
            let Some(path) = snapshot_path(&[&resolved], hot_reload) else {
                continue;
            };
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    info!("deleted {}", path.display());
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(BuildError::Delete { path, source }),
            }
        }
        Ok(removed)
    }

    fn run_phases(
        &mut self,
        options: &BuildOptions,
        targets: &[ResolvedTarget],
        contexts: &mut [TargetScanContext],
        snapshot_file: &Path,
        executable: Option<&Path>,
    ) -> Result<BuildReport, BuildError> {
        let mut report = BuildReport::new();
        let use_snapshots = options.uses_snapshots(self.config.build.use_snapshots);

        let mut reused = None;
        if let Some((path, snapshot)) = self.loaded.take() {
            if options.hot_reload && !options.forces_gather() && path == snapshot_file {
                debug!("reusing in-memory hot reload snapshot");
                reused = Some(snapshot);
            }
        }
        if reused.is_none() && use_snapshots && !options.forces_gather() {
            let started = Instant::now();
            match self.validate_snapshot(targets, snapshot_file, executable) {
                Ok(snapshot) => reused = Some(snapshot),
                Err(reason) => report.invalidation = Some(reason),
            }
            debug!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "checked snapshot"
            );
        }

        if options.phases == Phases::AssembleOnly && reused.is_none() {
            return Err(BuildError::NoValidSnapshot {
                reason: report.invalidation.take().unwrap_or(InvalidationReason::Missing),
            });
        }

        let mut snapshot = match reused {
            Some(snapshot) => snapshot,
            None => {
                let snapshot = self.gather(options, targets, contexts)?;
                if use_snapshots {
                    snapshot.save(snapshot_file, &self.files)?;
                    debug!(path = %snapshot_file.display(), "saved snapshot");
                }
                report.gathered = true;
                snapshot
            }
        };

        if options.explain {
            report.explain = Some(snapshot.describe_json(&self.files));
        }
        if options.skips_execution() {
            report.outcome = BuildOutcome::Gathered;
            return Ok(report);
        }

        let started = Instant::now();
        let plan = {
            let mut oracle = FlatOracle::new(contexts);
            plan_outdated(
                &snapshot.graph,
                &snapshot.prerequisite_actions,
                &self.files,
                &mut oracle,
            )
        };
        let mut actions = if options.single_file.is_some() {
            snapshot.prerequisite_actions.clone()
        } else {
            plan.actions.clone()
        };
        for id in &actions {
            if let (Some(action), Some(reason)) = (snapshot.graph.get(*id), plan.reasons.get(id)) {
                debug!(action = %action.status, "outdated: {reason}");
            }
        }
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            outdated = actions.len(),
            "checked outdated actions"
        );

        if options.hot_reload {
            let compiles = actions
                .iter()
                .filter(|id| {
                    snapshot
                        .graph
                        .get(**id)
                        .is_some_and(|a| a.kind == ActionKind::Compile)
                })
                .count();
            if compiles == 0 {
                if !actions.is_empty() {
                    info!("nothing to compile; skipping link for hot reload");
                }
                actions.clear();
            } else {
                self.patcher
                    .patch(&mut snapshot.graph, &actions, &options.modules, &self.files)?;
                let removed = self.patcher.remove_stale_binaries(&snapshot.graph, &self.files);
                if removed > 0 {
                    debug!(removed, "removed stale hot reload binaries");
                }
            }
        }

        if actions.is_empty() {
            info!("target is up to date");
            if options.hot_reload {
                self.loaded = Some((snapshot_file.to_path_buf(), snapshot));
            }
            return Ok(report);
        }

        let units = if report.gathered {
            Vec::new()
        } else {
            rescan_units(&snapshot, &plan.rescan, contexts)
        };

        let started = Instant::now();
        let toolchain = self.toolchain;
        let files: &FileTable = &self.files;
        let background = &mut *contexts;
        let (summary, rescanned) = std::thread::scope(|scope| {
            let units = &units;
            let worker = (!units.iter().all(Vec::is_empty))
                .then(|| scope.spawn(move || rescan_in_background(background, units)));
            let summary = execute_plan(
                &snapshot.graph,
                &actions,
                toolchain,
                &snapshot.environment,
                files,
            );
            let rescanned = match worker {
                Some(handle) => handle.join().unwrap_or_else(|_| {
                    Err(ScanError::from(InternalError::new("background include rescan panicked")))
                }),
                None => Ok(0),
            };
            (summary, rescanned)
        });
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "executed actions"
        );

        match rescanned {
            Ok(count) => report.rescanned = count,
            Err(e) => {
                warn!("failed to rescan outdated includes: {e}");
                forget_units(contexts, &units);
            }
        }

        let summary = summary?;
        report.executed = summary.succeeded.len();
        let failure = (!summary.is_success()).then(|| BuildError::ActionsFailed {
            failed: summary.failed.len(),
            skipped: summary.skipped.len(),
            first: summary
                .failed
                .first()
                .map(|(_, f)| f.to_string())
                .unwrap_or_default(),
        });

        if options.hot_reload {
            self.loaded = Some((snapshot_file.to_path_buf(), snapshot));
        }
        if let Some(error) = failure {
            return Err(error);
        }
        report.outcome = BuildOutcome::Succeeded;
        Ok(report)
    }

    fn validate_snapshot(
        &self,
        targets: &[ResolvedTarget],
        snapshot_file: &Path,
        executable: Option<&Path>,
    ) -> Result<BuildGraphSnapshot, InvalidationReason> {
        let project_files = project_files(&self.config, &self.root);
        let config_files = config_files(&self.config, &self.root);
        let mut target_files: Vec<PathBuf> = targets.iter().map(|t| t.target_file.clone()).collect();
        target_files.sort();
        target_files.dedup();
        let mut module_files: Vec<PathBuf> = targets
            .iter()
            .flat_map(|t| t.modules.iter().map(|m| m.rules_file.clone()))
            .collect();
        module_files.sort();
        module_files.dedup();

        let inputs = ValidationInputs {
            snapshot_path: snapshot_file,
            project_files: &project_files,
            target_files: &target_files,
            module_files: &module_files,
            executable,
            config_files: &config_files,
            adaptive_working_set: self.config.build.adaptive_working_set,
        };
        let scan = targets
            .first()
            .map(|t| t.scan.clone())
            .unwrap_or_else(|| self.config.scan.clone());
        let mut probe = MarkerProbe::new(&scan).map_err(|e| InvalidationReason::Unreadable {
            reason: e.to_string(),
        })?;
        load_validated(&inputs, &self.files, &mut probe)
    }

    fn gather(
        &self,
        options: &BuildOptions,
        targets: &[ResolvedTarget],
        contexts: &mut [TargetScanContext],
    ) -> Result<BuildGraphSnapshot, BuildError> {
        let started = Instant::now();
        let mut snapshot = BuildGraphSnapshot::default();
        let mut outputs = Vec::new();
        let link_suffixes: &[ModuleSuffix] = if options.hot_reload {
            &options.modules
        } else {
            &[]
        };

        for (target, context) in targets.iter().zip(contexts.iter_mut()) {
            info!("gathering {} {} {}", target.name, target.platform, target.configuration);
            let mut modules = Vec::with_capacity(target.modules.len());
            let mut sources = Vec::new();

            for module in &target.modules {
                let found = walk_module(&module.source_root)?;
                let mut headers = Vec::with_capacity(found.headers.len());
                for header in &found.headers {
                    let file = self.files.intern(header);
                    headers.push(ScannedHeader {
                        file,
                        reflected: context.has_reflected_types(file, &module.name)?,
                    });
                }
                sources.extend(found.sources.iter().map(|s| self.files.intern(s)));
                modules.push(ModuleRecord {
                    name: module.name.clone(),
                    rules_file: self.files.intern(&module.rules_file),
                    headers,
                });
            }

            let working_set: HashSet<FileHandle> = if target.build.adaptive_working_set {
                sources
                    .iter()
                    .copied()
                    .filter(|s| is_in_working_set(self.files.path(*s)))
                    .collect()
            } else {
                HashSet::new()
            };

            let request = DescribeRequest {
                target,
                link_suffixes,
                working_set: &working_set,
            };
            let described = self.toolchain.describe(&request, &mut snapshot.graph, &self.files)?;
            for (unit, module) in &described.units {
                let includes = context.closure(*unit, module)?;
                let pch = context.module_pch(module);
                context.record_flat(*unit, pch, &includes);
            }
            outputs.extend(described.outputs);

            let mut members: Vec<FileHandle> = working_set.into_iter().collect();
            members.sort_by(|a, b| self.files.path(*a).cmp(self.files.path(*b)));
            snapshot.working_set.extend(members);
            snapshot.targets.push(TargetRecord {
                name: target.name.clone(),
                platform: target.platform.clone(),
                configuration: target.configuration.to_string(),
                target_file: self.files.intern(&target.target_file),
                modules,
                sources,
            });
        }

        snapshot.graph.validate(&self.files)?;
        snapshot.prerequisite_actions = match &options.single_file {
            Some(path) => self.single_file_actions(&snapshot, path)?,
            None => snapshot.graph.prerequisite_actions(&outputs),
        };
        snapshot.environment = BuildGraphSnapshot::capture_environment();

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            actions = snapshot.graph.len(),
            prerequisites = snapshot.prerequisite_actions.len(),
            "gathered build graph"
        );
        Ok(snapshot)
    }

    fn single_file_actions(
        &self,
        snapshot: &BuildGraphSnapshot,
        path: &Path,
    ) -> Result<Vec<ActionId>, BuildError> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let file = self.files.intern(&absolute);
        let actions: Vec<ActionId> = snapshot
            .graph
            .iter()
            .filter(|(_, a)| a.kind == ActionKind::Compile && a.primary_source == Some(file))
            .map(|(id, _)| id)
            .collect();
        if actions.is_empty() {
            return Err(BuildError::SingleFileNotFound { path: absolute });
        }
        Ok(actions)
    }
}

fn scan_policy(target: &ResolvedTarget, options: &BuildOptions) -> ScanPolicy {
    let mut policy = ScanPolicy::from_build(&target.build);
    policy.force_rescan = options.force_rescan;
    if let Some(backslashes) = options.backslash_includes {
        policy.backslashes = backslashes;
    }
    policy
}

/// Groups outdated compile units by the scan context of their target.
fn rescan_units(
    snapshot: &BuildGraphSnapshot,
    outdated: &[ActionId],
    contexts: &[TargetScanContext],
) -> Vec<Vec<(FileHandle, String)>> {
    let mut units = vec![Vec::new(); contexts.len()];
    for action in outdated.iter().filter_map(|id| snapshot.graph.get(*id)) {
        let (Some(source), Some(module)) = (action.primary_source, action.module.as_ref()) else {
            continue;
        };
        if let Some(index) = contexts.iter().position(|c| c.target() == action.target) {
            units[index].push((source, module.clone()));
        }
    }
    units
}

fn rescan_in_background(
    contexts: &mut [TargetScanContext],
    units: &[Vec<(FileHandle, String)>],
) -> Result<usize, ScanError> {
    let started = Instant::now();
    let mut total = 0;
    for (context, units) in contexts.iter_mut().zip(units) {
        if !units.is_empty() {
            total += context.rescan_units(units)?;
        }
    }
    debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        units = total,
        "rescanned outdated includes"
    );
    Ok(total)
}

fn forget_units(contexts: &mut [TargetScanContext], units: &[Vec<(FileHandle, String)>]) {
    for (context, units) in contexts.iter_mut().zip(units) {
        for (unit, _) in units {
            context.forget_flat(*unit);
        }
    }
}
