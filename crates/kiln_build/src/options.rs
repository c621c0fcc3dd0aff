//! Per-invocation switches.

use std::path::PathBuf;

use kiln_config::BackslashPolicy;
use kiln_graph::ModuleSuffix;

/// Which phases a run performs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phases {
    /// Assemble from a valid snapshot, or gather and assemble otherwise.
    #[default]
    Auto,
    /// Gather and persist a snapshot without building.
    GatherOnly,
    /// Build from the persisted snapshot; fail if it is unusable.
    AssembleOnly,
    /// Gather and build in one run, ignoring any persisted snapshot.
    Both,
}

/// Options of one build invocation.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Targets to build.
    pub targets: Vec<String>,
    /// Phases to run.
    pub phases: Phases,
    /// Neither read nor write snapshots.
    pub no_snapshot: bool,
    /// Rescan every file's include directives.
    pub force_rescan: bool,
    /// Compile only this file. Implies `no_snapshot`.
    pub single_file: Option<PathBuf>,
    /// Override of the configured backslash policy.
    pub backslash_includes: Option<BackslashPolicy>,
    /// Build for hot reload into a running process.
    pub hot_reload: bool,
    /// Modules being hot reloaded, with optional fixed suffixes.
    pub modules: Vec<ModuleSuffix>,
    /// Gather and persist the graph without building.
    pub graph_only: bool,
    /// Include a JSON description of the graph in the report.
    pub explain: bool,
    /// Skip the instance lock.
    pub no_lock: bool,
    /// Executable whose timestamp invalidates snapshots; the running one if unset.
    pub executable: Option<PathBuf>,
}

impl BuildOptions {
    /// Options building the given targets with defaults otherwise.
    pub fn for_targets<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Whether this run may read and write snapshots, given the configured
    /// default.
    pub fn uses_snapshots(&self, configured: bool) -> bool {
        configured && !self.no_snapshot && self.single_file.is_none()
    }

    /// Whether this run must gather even when a valid snapshot exists.
    pub fn forces_gather(&self) -> bool {
        self.graph_only || matches!(self.phases, Phases::GatherOnly | Phases::Both)
    }

    /// Whether this run stops after gathering.
    pub fn skips_execution(&self) -> bool {
        self.graph_only || self.phases == Phases::GatherOnly
    }
}
