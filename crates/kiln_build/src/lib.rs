//! The incremental build orchestrator.
//!
//! [`Orchestrator::run`] decides between gathering a fresh build graph and
//! assembling from a persisted snapshot, drives include discovery through
//! one [`kiln_deps::TargetScanContext`] per target, executes outdated actions
//! through a [`kiln_graph::Toolchain`] and persists every cache before
//! returning. An [`InstanceLock`] keeps concurrent invocations from racing on
//! the persisted caches.

#![warn(missing_docs)]

pub mod error;
pub mod lock;
pub mod options;
pub mod orchestrator;
mod oracle;

pub use error::BuildError;
pub use lock::InstanceLock;
pub use options::{BuildOptions, Phases};
pub use orchestrator::{BuildOutcome, BuildReport, Orchestrator};
