//! Transitive include closure with cycle tolerance.
//!
//! The engine walks the include graph depth first. A file that is reached
//! again while it is still being expanded (an include cycle) cannot report
//! its final set yet; the file that reached it records the dependency in its
//! `awaiting` set and, once finished itself, registers as a *waiter*. When
//! the in-progress file completes it pushes its accumulated set to every
//! waiter. Waiting relations are inherited through finished children, so
//! every member of a cycle ends with the same set regardless of the entry
//! point.

use std::collections::{BTreeSet, HashMap, HashSet};

use kiln_common::{FileHandle, InternalError, KilnResult};

use crate::error::ScanError;

/// Set of files included directly or indirectly.
pub type IncludeSet = BTreeSet<FileHandle>;

/// Traversal state of one file within a [`ClosureCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureState {
    /// Never reached.
    Unvisited,
    /// Being expanded; its set is not final.
    InProgress,
    /// Fully expanded.
    Done,
}

/// Whether a recursive visit produced a final set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    /// The visited file is [`ClosureState::Done`].
    Complete,
    /// The visited file is still in progress higher up the stack.
    Incomplete,
}

/// Supplies the resolved direct includes of a file.
pub trait DirectiveSource {
    /// Returns the resolved direct includes of `file`.
    ///
    /// With `only_from_cache`, implementations must not scan the file; `None`
    /// means no valid persisted data exists and the file's dependencies are
    /// unknown.
    fn direct_includes(
        &mut self,
        file: FileHandle,
        only_from_cache: bool,
    ) -> Result<Option<Vec<FileHandle>>, ScanError>;
}

/// The result of a top-level closure request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Closure {
    /// Every file reachable through includes. A file on a cycle contains itself.
    pub includes: IncludeSet,
    /// Some reachable file had no usable persisted data.
    pub unknown: bool,
}

#[derive(Debug)]
struct ClosureNode {
    state: ClosureState,
    includes: IncludeSet,
    waiters: Vec<FileHandle>,
    awaiting: BTreeSet<FileHandle>,
    unknown: bool,
}

impl ClosureNode {
    fn in_progress() -> Self {
        Self {
            state: ClosureState::InProgress,
            includes: IncludeSet::new(),
            waiters: Vec::new(),
            awaiting: BTreeSet::new(),
            unknown: false,
        }
    }
}

/// Per-target memo of closure results. Not persisted.
#[derive(Debug, Default)]
pub struct ClosureCache {
    nodes: HashMap<FileHandle, ClosureNode>,
}

impl ClosureCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the traversal state of `file`.
    pub fn state(&self, file: FileHandle) -> ClosureState {
        self.nodes
            .get(&file)
            .map_or(ClosureState::Unvisited, |n| n.state)
    }

    /// Returns the final set of `file` if it has been computed.
    pub fn get(&self, file: FileHandle) -> Option<&IncludeSet> {
        self.nodes
            .get(&file)
            .filter(|n| n.state == ClosureState::Done)
            .map(|n| &n.includes)
    }

    /// Returns the number of files visited.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if nothing has been visited.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Forgets every result.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Computes the closure of `file`.
    ///
    /// A second request for the same file is answered from memory without
    /// consulting `source`. If `source` fails, every memoized result is
    /// dropped, since waiters of the abandoned traversal would never receive
    /// their final sets.
    pub fn compute<S: DirectiveSource>(
        &mut self,
        source: &mut S,
        file: FileHandle,
        only_from_cache: bool,
    ) -> Result<Closure, ScanError> {
        match self.visit(source, file, only_from_cache) {
            Ok(Completeness::Complete) => {
                let node = self.node(file)?;
                Ok(Closure {
                    includes: node.includes.clone(),
                    unknown: node.unknown,
                })
            }
            Ok(Completeness::Incomplete) => Err(InternalError::new(format!(
                "closure of file #{} requested while it is still in progress",
                file.as_raw()
            ))
            .into()),
            Err(e) => {
                self.nodes.clear();
                Err(e)
            }
        }
    }

    fn visit<S: DirectiveSource>(
        &mut self,
        source: &mut S,
        file: FileHandle,
        only_from_cache: bool,
    ) -> Result<Completeness, ScanError> {
        match self.state(file) {
            ClosureState::Done => return Ok(Completeness::Complete),
            ClosureState::InProgress => return Ok(Completeness::Incomplete),
            ClosureState::Unvisited => {}
        }
        self.nodes.insert(file, ClosureNode::in_progress());

        let direct = match source.direct_includes(file, only_from_cache)? {
            Some(direct) => direct,
            None => {
                self.node_mut(file)?.unknown = true;
                Vec::new()
            }
        };

        let mut seen = HashSet::new();
        for dep in direct {
            if !seen.insert(dep) {
                continue;
            }
            self.node_mut(file)?.includes.insert(dep);
            match self.visit(source, dep, only_from_cache)? {
                Completeness::Complete => self.absorb(file, dep)?,
                Completeness::Incomplete => {
                    if dep != file {
                        self.node_mut(file)?.awaiting.insert(dep);
                    }
                }
            }
        }

        self.finish(file)?;
        Ok(Completeness::Complete)
    }

    /// Merges the finished set of `dep` into `file`, inheriting the
    /// in-progress files `dep` is still waiting on.
    fn absorb(&mut self, file: FileHandle, dep: FileHandle) -> KilnResult<()> {
        let (includes, awaiting, unknown) = {
            let d = self.node(dep)?;
            (d.includes.clone(), d.awaiting.clone(), d.unknown)
        };
        let pending: Vec<FileHandle> = awaiting
            .into_iter()
            .filter(|a| *a != file && self.state(*a) == ClosureState::InProgress)
            .collect();

        let node = self.node_mut(file)?;
        node.includes.extend(includes);
        node.unknown |= unknown;
        node.awaiting.extend(pending);
        Ok(())
    }

    /// Marks `file` done, pushes its set to its waiters and registers it
    /// (and those waiters) on every file it still waits for.
    fn finish(&mut self, file: FileHandle) -> KilnResult<()> {
        let (includes, unknown, waiters, candidates) = {
            let node = self.node_mut(file)?;
            node.state = ClosureState::Done;
            (
                node.includes.clone(),
                node.unknown,
                std::mem::take(&mut node.waiters),
                node.awaiting.iter().copied().collect::<Vec<_>>(),
            )
        };
        let awaiting: Vec<FileHandle> = candidates
            .into_iter()
            .filter(|a| self.state(*a) == ClosureState::InProgress)
            .collect();

        for waiter in &waiters {
            let node = self.node_mut(*waiter)?;
            node.includes.extend(includes.iter().copied());
            node.unknown |= unknown;
            node.awaiting
                .extend(awaiting.iter().copied().filter(|a| a != waiter));
        }

        for pending in &awaiting {
            let node = self.node_mut(*pending)?;
            for w in std::iter::once(file).chain(waiters.iter().copied()) {
                if w != *pending && !node.waiters.contains(&w) {
                    node.waiters.push(w);
                }
            }
        }
        Ok(())
    }

    fn node(&self, file: FileHandle) -> KilnResult<&ClosureNode> {
        self.nodes.get(&file).ok_or_else(|| missing_node(file))
    }

    fn node_mut(&mut self, file: FileHandle) -> KilnResult<&mut ClosureNode> {
        self.nodes.get_mut(&file).ok_or_else(|| missing_node(file))
    }
}

fn missing_node(file: FileHandle) -> InternalError {
    InternalError::new(format!("closure node for file #{} vanished", file.as_raw()))
}
