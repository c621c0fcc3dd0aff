//! A single build step.

use std::path::PathBuf;

use kiln_common::FileHandle;
use serde::{Deserialize, Serialize};

/// Index of an action within its [`ActionGraph`](crate::ActionGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(u32);

impl ActionId {
    /// Creates an id from a position in the action list.
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// Returns the position in the action list.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What an action does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    /// Compiles one translation unit.
    Compile,
    /// Links objects into a binary.
    Link,
}

/// Program and arguments of an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program to run.
    pub program: String,
    /// Arguments, one element per argument.
    pub arguments: Vec<String>,
    /// Directory to run in; the orchestrator's directory if unset.
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    /// Renders the command as a single line for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.arguments.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One node of the build graph.
///
/// Immutable once gathered, except for output renaming during hot reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// What the action does.
    pub kind: ActionKind,
    /// Files that must be up to date before this action runs.
    pub prerequisites: Vec<FileHandle>,
    /// Files this action writes.
    pub produced: Vec<FileHandle>,
    /// How to run it.
    pub command: CommandSpec,
    /// Short human-readable description, e.g. the source file name.
    pub status: String,
    /// Target the action belongs to.
    pub target: String,
    /// Module the action belongs to, if any.
    pub module: Option<String>,
    /// The translation unit of a compile action.
    pub primary_source: Option<FileHandle>,
}
