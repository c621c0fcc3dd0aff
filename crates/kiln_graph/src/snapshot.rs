//! Persisted build-graph snapshots.
//!
//! A snapshot captures everything a gather run learned: the action graph,
//! the actions needed for the requested targets, the environment the tools
//! ran under, and enough per-target bookkeeping (rule files, reflected
//! headers, working-set membership) to decide later whether the snapshot is
//! still trustworthy. File handles are process-local, so the payload stores
//! a string table of paths and refers to files by index.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use kiln_cache::{read_store, write_store, CacheError, StoreKind};
use kiln_common::{FileHandle, FileTable};
use kiln_config::ResolvedTarget;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::action::{Action, ActionId, ActionKind, CommandSpec};
use crate::error::GraphError;
use crate::graph::ActionGraph;

/// Schema version of the snapshot payload.
pub const SNAPSHOT_VERSION: u32 = 1;

/// File name of a regular snapshot.
pub const SNAPSHOT_FILE: &str = "Makefile.kiln";

/// File name of a snapshot used for hot reload builds.
pub const HOT_RELOAD_SNAPSHOT_FILE: &str = "HotReloadMakefile.kiln";

/// A header scanned for reflected-type markers during gather.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannedHeader {
    /// The header.
    pub file: FileHandle,
    /// Whether it contained a reflected-type marker.
    pub reflected: bool,
}

/// Per-module bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    /// Module name.
    pub name: String,
    /// File describing the module.
    pub rules_file: FileHandle,
    /// Every header of the module with its marker state.
    pub headers: Vec<ScannedHeader>,
}

/// Per-target bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRecord {
    /// Target name.
    pub name: String,
    /// Platform name.
    pub platform: String,
    /// Configuration name.
    pub configuration: String,
    /// File describing the target.
    pub target_file: FileHandle,
    /// Modules of the target.
    pub modules: Vec<ModuleRecord>,
    /// Every source file of the target, for working-set checks.
    pub sources: Vec<FileHandle>,
}

/// Everything a gather run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildGraphSnapshot {
    /// All actions.
    pub graph: ActionGraph,
    /// Actions needed for the requested targets.
    pub prerequisite_actions: Vec<ActionId>,
    /// Environment captured at gather time, applied to every action.
    pub environment: Vec<(String, String)>,
    /// Target bookkeeping.
    pub targets: Vec<TargetRecord>,
    /// Sources that were in the working set at gather time.
    pub working_set: Vec<FileHandle>,
}

impl BuildGraphSnapshot {
    /// A snapshot is usable when it has actions, prerequisite actions and
    /// targets, and every prerequisite action id refers to an action.
    pub fn is_valid(&self) -> bool {
        !self.graph.is_empty()
            && !self.prerequisite_actions.is_empty()
            && !self.targets.is_empty()
            && self
                .prerequisite_actions
                .iter()
                .all(|id| id.index() < self.graph.len())
    }

    /// Returns the process environment as sorted key/value pairs.
    pub fn capture_environment() -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = std::env::vars_os()
            .map(|(k, v)| (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned()))
            .collect();
        vars.sort();
        vars
    }

    /// Writes the snapshot to `path`.
    pub fn save(&self, path: &Path, files: &FileTable) -> Result<(), GraphError> {
        if !self.is_valid() {
            return Err(GraphError::InvalidSnapshot {
                reason: "no actions, prerequisite actions or targets".to_string(),
            });
        }
        let persisted = self.to_persisted(files);
        write_store(path, StoreKind::Snapshot, SNAPSHOT_VERSION, &persisted)?;
        Ok(())
    }

    /// Reads a snapshot from `path`, interning its paths into `files`.
    ///
    /// The result is not validity-checked; see [`BuildGraphSnapshot::is_valid`].
    pub fn load(path: &Path, files: &FileTable) -> Result<Self, CacheError> {
        let persisted: PersistedSnapshot = read_store(path, StoreKind::Snapshot, SNAPSHOT_VERSION)?;
        Self::from_persisted(persisted, files)
    }

    /// Renders the snapshot as JSON for inspection.
    pub fn describe_json(&self, files: &FileTable) -> serde_json::Value {
        let path = |h: &FileHandle| files.path(*h).display().to_string();
        let actions: Vec<serde_json::Value> = self
            .graph
            .iter()
            .map(|(id, a)| {
                json!({
                    "id": id.index(),
                    "kind": a.kind,
                    "status": a.status,
                    "target": a.target,
                    "module": a.module,
                    "prerequisites": a.prerequisites.iter().map(path).collect::<Vec<_>>(),
                    "produced": a.produced.iter().map(path).collect::<Vec<_>>(),
                    "command": a.command.display(),
                })
            })
            .collect();
        let targets: Vec<serde_json::Value> = self
            .targets
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "platform": t.platform,
                    "configuration": t.configuration,
                    "target_file": path(&t.target_file),
                    "modules": t.modules.iter().map(|m| json!({
                        "name": m.name,
                        "rules_file": path(&m.rules_file),
                        "reflected_headers": m.headers.iter()
                            .filter(|h| h.reflected)
                            .map(|h| path(&h.file))
                            .collect::<Vec<_>>(),
                    })).collect::<Vec<_>>(),
                    "sources": t.sources.len(),
                })
            })
            .collect();
        json!({
            "version": SNAPSHOT_VERSION,
            "targets": targets,
            "prerequisite_actions": self.prerequisite_actions.iter().map(|id| id.index()).collect::<Vec<_>>(),
            "working_set": self.working_set.iter().map(path).collect::<Vec<_>>(),
            "actions": actions,
        })
    }

    fn to_persisted(&self, files: &FileTable) -> PersistedSnapshot {
        let mut table = PathTable::default();
        let actions = self
            .graph
            .iter()
            .map(|(_, a)| PersistedAction {
                kind: a.kind,
                prerequisites: table.indices(files, &a.prerequisites),
                produced: table.indices(files, &a.produced),
                command: a.command.clone(),
                status: a.status.clone(),
                target: a.target.clone(),
                module: a.module.clone(),
                primary_source: a.primary_source.map(|h| table.index(files, h)),
            })
            .collect();
        let targets = self
            .targets
            .iter()
            .map(|t| PersistedTarget {
                name: t.name.clone(),
                platform: t.platform.clone(),
                configuration: t.configuration.clone(),
                target_file: table.index(files, t.target_file),
                modules: t
                    .modules
                    .iter()
                    .map(|m| PersistedModule {
                        name: m.name.clone(),
                        rules_file: table.index(files, m.rules_file),
                        headers: m
                            .headers
                            .iter()
                            .map(|h| (table.index(files, h.file), h.reflected))
                            .collect(),
                    })
                    .collect(),
                sources: table.indices(files, &t.sources),
            })
            .collect();
        let working_set = table.indices(files, &self.working_set);

        PersistedSnapshot {
            actions,
            prerequisite_actions: self.prerequisite_actions.iter().map(|id| id.index() as u32).collect(),
            environment: self.environment.clone(),
            targets,
            working_set,
            paths: table.paths,
        }
    }

    fn from_persisted(persisted: PersistedSnapshot, files: &FileTable) -> Result<Self, CacheError> {
        let handles: Vec<FileHandle> = persisted
            .paths
            .iter()
            .map(|p| files.intern(Path::new(p)))
            .collect();
        let file = |index: u32| {
            handles
                .get(index as usize)
                .copied()
                .ok_or_else(|| CacheError::Serialization {
                    reason: format!("file index {index} out of range"),
                })
        };
        let many = |indices: &[u32]| indices.iter().map(|&i| file(i)).collect::<Result<Vec<_>, _>>();

        let mut graph = ActionGraph::new();
        for a in persisted.actions {
            graph.push(Action {
                kind: a.kind,
                prerequisites: many(&a.prerequisites)?,
                produced: many(&a.produced)?,
                command: a.command,
                status: a.status,
                target: a.target,
                module: a.module,
                primary_source: a.primary_source.map(file).transpose()?,
            });
        }

        let mut targets = Vec::with_capacity(persisted.targets.len());
        for t in persisted.targets {
            let mut modules = Vec::with_capacity(t.modules.len());
            for m in t.modules {
                let headers = m
                    .headers
                    .iter()
                    .map(|&(i, reflected)| file(i).map(|file| ScannedHeader { file, reflected }))
                    .collect::<Result<Vec<_>, _>>()?;
                modules.push(ModuleRecord {
                    name: m.name,
                    rules_file: file(m.rules_file)?,
                    headers,
                });
            }
            targets.push(TargetRecord {
                name: t.name,
                platform: t.platform,
                configuration: t.configuration,
                target_file: file(t.target_file)?,
                modules,
                sources: many(&t.sources)?,
            });
        }

        Ok(Self {
            graph,
            prerequisite_actions: persisted
                .prerequisite_actions
                .iter()
                .map(|&i| ActionId::from_index(i as usize))
                .collect(),
            environment: persisted.environment,
            targets,
            working_set: many(&persisted.working_set)?,
        })
    }
}

/// Location of the snapshot for a set of targets.
///
/// A single target keeps its snapshot in its intermediate directory. Several
/// targets share one under `<intermediate>/Build/<combined name>`, where the
/// combined name joins `<Target>-<Platform>-<Configuration>` of each target,
/// sorted, with `_`.
pub fn snapshot_path(targets: &[&ResolvedTarget], hot_reload: bool) -> Option<PathBuf> {
    let file_name = if hot_reload {
        HOT_RELOAD_SNAPSHOT_FILE
    } else {
        SNAPSHOT_FILE
    };
    match targets {
        [] => None,
        [single] => Some(single.intermediate_dir.join(file_name)),
        [first, ..] => {
            let mut names: Vec<String> = targets
                .iter()
                .map(|t| format!("{}-{}-{}", t.name, t.platform, t.configuration))
                .collect();
            names.sort();
            let build_dir = first
                .intermediate_dir
                .ancestors()
                .nth(3)
                .unwrap_or(&first.intermediate_dir);
            Some(build_dir.join(names.join("_")).join(file_name))
        }
    }
}

#[derive(Default)]
struct PathTable {
    paths: Vec<String>,
    index: HashMap<FileHandle, u32>,
}

impl PathTable {
    fn index(&mut self, files: &FileTable, handle: FileHandle) -> u32 {
        if let Some(&i) = self.index.get(&handle) {
            return i;
        }
        let i = self.paths.len() as u32;
        self.paths.push(files.path(handle).to_string_lossy().into_owned());
        self.index.insert(handle, i);
        i
    }

    fn indices(&mut self, files: &FileTable, handles: &[FileHandle]) -> Vec<u32> {
        handles.iter().map(|&h| self.index(files, h)).collect()
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedSnapshot {
    paths: Vec<String>,
    actions: Vec<PersistedAction>,
    prerequisite_actions: Vec<u32>,
    environment: Vec<(String, String)>,
    targets: Vec<PersistedTarget>,
    working_set: Vec<u32>,
}

#[derive(Serialize, Deserialize)]
struct PersistedAction {
    kind: ActionKind,
    prerequisites: Vec<u32>,
    produced: Vec<u32>,
    command: CommandSpec,
    status: String,
    target: String,
    module: Option<String>,
    primary_source: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct PersistedTarget {
    name: String,
    platform: String,
    configuration: String,
    target_file: u32,
    modules: Vec<PersistedModule>,
    sources: Vec<u32>,
}

#[derive(Serialize, Deserialize)]
struct PersistedModule {
    name: String,
    rules_file: u32,
    headers: Vec<(u32, bool)>,
}
