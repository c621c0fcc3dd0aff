//! The action graph: every build step of one or more targets.

use std::collections::{HashMap, HashSet};

use kiln_common::{FileHandle, FileTable};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::action::{Action, ActionId};
use crate::error::GraphError;

/// An ordered list of actions, linked implicitly through produced and
/// prerequisite files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionGraph {
    actions: Vec<Action>,
}

impl ActionGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an action and returns its id.
    pub fn push(&mut self, action: Action) -> ActionId {
        let id = ActionId::from_index(self.actions.len());
        self.actions.push(action);
        id
    }

    /// Returns the action with the given id.
    pub fn get(&self, id: ActionId) -> Option<&Action> {
        self.actions.get(id.index())
    }

    /// Returns the action with the given id, mutably.
    pub fn get_mut(&mut self, id: ActionId) -> Option<&mut Action> {
        self.actions.get_mut(id.index())
    }

    /// Iterates over all actions with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (ActionId, &Action)> {
        self.actions
            .iter()
            .enumerate()
            .map(|(i, a)| (ActionId::from_index(i), a))
    }

    /// Iterates mutably over all actions with their ids.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ActionId, &mut Action)> {
        self.actions
            .iter_mut()
            .enumerate()
            .map(|(i, a)| (ActionId::from_index(i), a))
    }

    /// Number of actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the graph has no actions.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Maps every produced file to the action producing it.
    pub fn producers(&self) -> HashMap<FileHandle, ActionId> {
        let mut map = HashMap::new();
        for (id, action) in self.iter() {
            for &item in &action.produced {
                map.insert(item, id);
            }
        }
        map
    }

    /// Checks that no file is produced by two actions.
    pub fn validate(&self, files: &FileTable) -> Result<(), GraphError> {
        let mut seen = HashSet::new();
        for (_, action) in self.iter() {
            for &item in &action.produced {
                if !seen.insert(item) {
                    return Err(GraphError::DuplicateProducer {
                        path: files.path(item).to_path_buf(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Returns the actions needed to produce `outputs`, including everything
    /// they transitively depend on, in ascending id order.
    pub fn prerequisite_actions(&self, outputs: &[FileHandle]) -> Vec<ActionId> {
        let producers = self.producers();
        let mut visited = HashSet::new();
        let mut stack: Vec<ActionId> = outputs
            .iter()
            .filter_map(|f| producers.get(f).copied())
            .collect();

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            if let Some(action) = self.get(id) {
                stack.extend(
                    action
                        .prerequisites
                        .iter()
                        .filter_map(|f| producers.get(f).copied())
                        .filter(|p| !visited.contains(p)),
                );
            }
        }

        let mut result: Vec<ActionId> = visited.into_iter().collect();
        result.sort();
        result
    }

    /// Groups `subset` into waves: every action in a wave depends only on
    /// actions of earlier waves. Dependencies outside `subset` are ignored.
    pub fn waves(&self, subset: &[ActionId]) -> Result<Vec<Vec<ActionId>>, GraphError> {
        let producers = self.producers();
        let mut graph: DiGraph<ActionId, ()> = DiGraph::new();
        let mut nodes: HashMap<ActionId, NodeIndex> = HashMap::new();
        for &id in subset {
            nodes.entry(id).or_insert_with(|| graph.add_node(id));
        }

        for &id in subset {
            let Some(action) = self.get(id) else { continue };
            for prereq in &action.prerequisites {
                if let Some(producer) = producers.get(prereq) {
                    if let (Some(&from), Some(&to)) = (nodes.get(producer), nodes.get(&id)) {
                        if from != to {
                            graph.update_edge(from, to, ());
                        }
                    }
                }
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| GraphError::DependencyCycle {
            status: self
                .get(graph[cycle.node_id()])
                .map(|a| a.status.clone())
                .unwrap_or_default(),
        })?;

        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        let mut waves: Vec<Vec<ActionId>> = Vec::new();
        for node in order {
            let level = graph
                .neighbors_directed(node, petgraph::Direction::Incoming)
                .filter_map(|pred| depth.get(&pred).map(|d| d + 1))
                .max()
                .unwrap_or(0);
            depth.insert(node, level);
            if waves.len() <= level {
                waves.resize_with(level + 1, Vec::new);
            }
            waves[level].push(graph[node]);
        }
        for wave in &mut waves {
            wave.sort();
        }
        Ok(waves)
    }

    /// Replaces prerequisite files according to `renames`.
    pub fn remap_prerequisites(&mut self, renames: &HashMap<FileHandle, FileHandle>) {
        for action in &mut self.actions {
            for prereq in &mut action.prerequisites {
                if let Some(&renamed) = renames.get(prereq) {
                    *prereq = renamed;
                }
            }
        }
    }
}
