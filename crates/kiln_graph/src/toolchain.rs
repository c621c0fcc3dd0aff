//! The seam between the orchestrator and the tools that describe and run
//! actions.

use std::collections::HashSet;
use std::fmt;

use kiln_common::{FileHandle, FileTable};
use kiln_config::ResolvedTarget;

use crate::action::Action;
use crate::error::GraphError;
use crate::graph::ActionGraph;
use crate::hot_reload::ModuleSuffix;

/// What a toolchain is asked to describe for one target.
#[derive(Debug, Clone, Copy)]
pub struct DescribeRequest<'a> {
    /// The target to describe.
    pub target: &'a ResolvedTarget,
    /// Suffixes appended to modular link outputs, for hot reload builds.
    pub link_suffixes: &'a [ModuleSuffix],
    /// Sources in the adaptive working set; compiled individually when
    /// unity builds are enabled.
    pub working_set: &'a HashSet<FileHandle>,
}

/// What describing a target added to the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetActions {
    /// Files the target ultimately produces.
    pub outputs: Vec<FileHandle>,
    /// Every compiled translation unit with its module name.
    pub units: Vec<(FileHandle, String)>,
}

/// Why an action failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionFailure {
    /// Status line of the failed action.
    pub status: String,
    /// Process exit code, if the process ran to completion.
    pub exit_code: Option<i32>,
    /// Captured tool output.
    pub output: String,
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "{} failed with exit code {code}", self.status)?,
            None => write!(f, "{} failed to run", self.status)?,
        }
        if !self.output.is_empty() {
            write!(f, "\n{}", self.output.trim_end())?;
        }
        Ok(())
    }
}

impl std::error::Error for ActionFailure {}

/// A platform toolchain: turns targets into actions and runs them.
pub trait Toolchain: Sync {
    /// Appends the actions building `request.target` to `graph`.
    fn describe(
        &self,
        request: &DescribeRequest<'_>,
        graph: &mut ActionGraph,
        files: &FileTable,
    ) -> Result<TargetActions, GraphError>;

    /// Runs one action with the given environment applied.
    fn execute(
        &self,
        action: &Action,
        environment: &[(String, String)],
        files: &FileTable,
    ) -> Result<(), ActionFailure>;
}
