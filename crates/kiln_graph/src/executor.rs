//! Running planned actions in dependency order.

use std::collections::HashSet;

use kiln_common::{FileHandle, FileTable};
use rayon::prelude::*;
use tracing::{error, info};

use crate::action::ActionId;
use crate::error::GraphError;
use crate::graph::ActionGraph;
use crate::toolchain::{ActionFailure, Toolchain};

/// Outcome of running a plan.
#[derive(Debug, Clone, Default)]
pub struct ExecutionSummary {
    /// Actions that completed successfully.
    pub succeeded: Vec<ActionId>,
    /// Actions that ran and failed.
    pub failed: Vec<(ActionId, ActionFailure)>,
    /// Actions not run because something they depend on failed.
    pub skipped: Vec<ActionId>,
}

impl ExecutionSummary {
    /// Whether every action succeeded.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Runs `plan` wave by wave, actions within a wave in parallel.
///
/// After a failure, actions depending on the failed action's outputs are
/// skipped; independent actions still run.
pub fn execute_plan(
    graph: &ActionGraph,
    plan: &[ActionId],
    toolchain: &dyn Toolchain,
    environment: &[(String, String)],
    files: &FileTable,
) -> Result<ExecutionSummary, GraphError> {
    let waves = graph.waves(plan)?;
    let total = plan.len();
    let mut summary = ExecutionSummary::default();
    let mut broken: HashSet<FileHandle> = HashSet::new();
    let mut started = 0usize;

    for wave in waves {
        let (runnable, blocked): (Vec<ActionId>, Vec<ActionId>) =
            wave.into_iter().partition(|&id| {
                graph
                    .get(id)
                    .is_some_and(|a| !a.prerequisites.iter().any(|p| broken.contains(p)))
            });

        for id in blocked {
            if let Some(action) = graph.get(id) {
                broken.extend(action.produced.iter().copied());
            }
            summary.skipped.push(id);
        }

        for &id in &runnable {
            started += 1;
            if let Some(action) = graph.get(id) {
                info!("[{started}/{total}] {}", action.status);
            }
        }

        let results: Vec<(ActionId, Result<(), ActionFailure>)> = runnable
            .par_iter()
            .filter_map(|&id| {
                graph
                    .get(id)
                    .map(|action| (id, toolchain.execute(action, environment, files)))
            })
            .collect();

        for (id, result) in results {
            match result {
                Ok(()) => summary.succeeded.push(id),
                Err(failure) => {
                    error!("{failure}");
                    if let Some(action) = graph.get(id) {
                        broken.extend(action.produced.iter().copied());
                    }
                    summary.failed.push((id, failure));
                }
            }
        }
    }

    Ok(summary)
}
