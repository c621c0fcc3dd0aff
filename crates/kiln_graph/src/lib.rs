//! Build actions, their persisted snapshot, and their execution.
//!
//! An [`ActionGraph`] holds every compile and link step of a build. Gather
//! runs ask a [`Toolchain`] to describe the actions of each target and
//! persist them as a [`BuildGraphSnapshot`]; later assemble runs reload the
//! snapshot after [`load_validated`] accepts it, plan the outdated subset and
//! hand it to [`execute_plan`]. [`HotReloadPatcher`] renames link outputs of
//! an already loaded graph between in-process reload cycles.

#![warn(missing_docs)]

pub mod action;
pub mod command;
pub mod error;
pub mod executor;
pub mod graph;
pub mod hot_reload;
pub mod invalidation;
pub mod outdated;
pub mod snapshot;
pub mod sources;
pub mod toolchain;

pub use action::{Action, ActionId, ActionKind, CommandSpec};
pub use command::CommandToolchain;
pub use error::GraphError;
pub use executor::{execute_plan, ExecutionSummary};
pub use graph::ActionGraph;
pub use hot_reload::{HotReloadPatch, HotReloadPatcher, ModuleSuffix};
pub use invalidation::{load_validated, InvalidationReason, ReflectionProbe, ValidationInputs};
pub use outdated::{plan_outdated, IncludeOracle, OutdatedPlan};
pub use snapshot::{snapshot_path, BuildGraphSnapshot, ModuleRecord, ScannedHeader, TargetRecord};
pub use sources::{is_in_working_set, walk_module, ModuleFiles};
pub use toolchain::{ActionFailure, DescribeRequest, TargetActions, Toolchain};
