//! Deciding which actions must run.

use std::collections::HashMap;
use std::time::SystemTime;

use kiln_common::{modified_time, FileHandle, FileTable};
use tracing::debug;

use crate::action::{Action, ActionId, ActionKind};
use crate::graph::ActionGraph;

/// Supplies the headers a compile action depends on.
pub trait IncludeOracle {
    /// Returns the transitive includes of a compile action's source, or
    /// `None` when they are not known yet.
    fn includes_of(&mut self, action: &Action) -> Option<Vec<FileHandle>>;
}

/// Outcome of outdatedness planning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutdatedPlan {
    /// Actions to run, in ascending id order.
    pub actions: Vec<ActionId>,
    /// Outdated compile actions. Their include caches are stale and should be
    /// refreshed while the build runs.
    pub rescan: Vec<ActionId>,
    /// Why each outdated action must run.
    pub reasons: HashMap<ActionId, String>,
}

impl OutdatedPlan {
    /// Whether nothing needs to run.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Computes which of `requested` must run.
///
/// An action is outdated when an output is missing, a prerequisite or
/// included header is newer than its oldest output, an action producing one
/// of its prerequisites is outdated, or its includes are unknown.
pub fn plan_outdated(
    graph: &ActionGraph,
    requested: &[ActionId],
    files: &FileTable,
    oracle: &mut dyn IncludeOracle,
) -> OutdatedPlan {
    let mut planner = Planner {
        graph,
        files,
        oracle,
        producers: graph.producers(),
        times: HashMap::new(),
        verdicts: HashMap::new(),
        reasons: HashMap::new(),
    };
    for &id in requested {
        planner.is_outdated(id);
    }

    let mut actions: Vec<ActionId> = requested
        .iter()
        .copied()
        .filter(|id| planner.verdicts.get(id).copied().unwrap_or(false))
        .collect();
    actions.sort();
    actions.dedup();

    let rescan = actions
        .iter()
        .copied()
        .filter(|&id| graph.get(id).is_some_and(|a| a.kind == ActionKind::Compile))
        .collect();
    let reasons = planner.reasons;

    OutdatedPlan {
        actions,
        rescan,
        reasons,
    }
}

struct Planner<'a> {
    graph: &'a ActionGraph,
    files: &'a FileTable,
    oracle: &'a mut dyn IncludeOracle,
    producers: HashMap<FileHandle, ActionId>,
    times: HashMap<FileHandle, Option<SystemTime>>,
    verdicts: HashMap<ActionId, bool>,
    reasons: HashMap<ActionId, String>,
}

impl Planner<'_> {
    fn mtime(&mut self, file: FileHandle) -> Option<SystemTime> {
        let files = self.files;
        *self
            .times
            .entry(file)
            .or_insert_with(|| modified_time(files.path(file)))
    }

    fn is_outdated(&mut self, id: ActionId) -> bool {
        if let Some(&verdict) = self.verdicts.get(&id) {
            return verdict;
        }
        // Provisional verdict so a dependency loop terminates.
        self.verdicts.insert(id, false);

        let reason = self.check(id);
        let outdated = reason.is_some();
        if let Some(reason) = reason {
            if let Some(action) = self.graph.get(id) {
                debug!(action = %action.status, %reason, "outdated");
            }
            self.reasons.insert(id, reason);
        }
        self.verdicts.insert(id, outdated);
        outdated
    }

    fn check(&mut self, id: ActionId) -> Option<String> {
        let graph = self.graph;
        let action = graph.get(id)?;

        let mut oldest: Option<SystemTime> = None;
        for &item in &action.produced {
            match self.mtime(item) {
                Some(time) => oldest = Some(oldest.map_or(time, |o| o.min(time))),
                None => {
                    return Some(format!(
                        "missing output {}",
                        self.files.path(item).display()
                    ))
                }
            }
        }
        let oldest = oldest?;

        let mut reason = None;
        for &prereq in &action.prerequisites {
            if let Some(&producer) = self.producers.get(&prereq) {
                if producer != id && self.is_outdated(producer) {
                    reason.get_or_insert_with(|| {
                        format!("{} is being rebuilt", self.files.path(prereq).display())
                    });
                    continue;
                }
            }
            if reason.is_some() {
                continue;
            }
            match self.mtime(prereq) {
                Some(time) if time > oldest => {
                    reason = Some(format!("{} is newer", self.files.path(prereq).display()));
                }
                None if !self.producers.contains_key(&prereq) => {
                    reason = Some(format!("{} is missing", self.files.path(prereq).display()));
                }
                _ => {}
            }
        }
        if reason.is_some() {
            return reason;
        }

        if action.kind == ActionKind::Compile {
            let Some(includes) = self.oracle.includes_of(action) else {
                return Some("include dependencies are unknown".to_string());
            };
            for include in includes {
                match self.mtime(include) {
                    Some(time) if time > oldest => {
                        return Some(format!("{} is newer", self.files.path(include).display()));
                    }
                    None => {
                        return Some(format!("{} was deleted", self.files.path(include).display()));
                    }
                    _ => {}
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::action;
    use kiln_common::set_modified;
    use std::path::Path;
    use std::time::Duration;

    struct MapOracle(HashMap<FileHandle, Option<Vec<FileHandle>>>);

    impl IncludeOracle for MapOracle {
        fn includes_of(&mut self, action: &Action) -> Option<Vec<FileHandle>> {
            let source = action.primary_source?;
            self.0.get(&source).cloned().unwrap_or(Some(Vec::new()))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        files: FileTable,
        graph: ActionGraph,
        compile: ActionId,
        link: ActionId,
        source: FileHandle,
        header: FileHandle,
        object: FileHandle,
        exe: FileHandle,
    }

    fn write_at(path: &Path, age_secs: u64) {
        std::fs::write(path, "x").unwrap();
        let time = SystemTime::now() - Duration::from_secs(age_secs);
        set_modified(path, time).unwrap();
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_at(&root.join("a.cpp"), 300);
        write_at(&root.join("a.h"), 300);
        write_at(&root.join("a.o"), 200);
        write_at(&root.join("game"), 100);

        let files = FileTable::new();
        let source = files.intern(&root.join("a.cpp"));
        let header = files.intern(&root.join("a.h"));
        let object = files.intern(&root.join("a.o"));
        let exe = files.intern(&root.join("game"));

        let mut graph = ActionGraph::new();
        let mut compile_action = action(ActionKind::Compile, vec![source], vec![object], "a.cpp");
        compile_action.primary_source = Some(source);
        let compile = graph.push(compile_action);
        let link = graph.push(action(ActionKind::Link, vec![object], vec![exe], "game"));

        Fixture {
            _dir: dir,
            files,
            graph,
            compile,
            link,
            source,
            header,
            object,
            exe,
        }
    }

    fn oracle(f: &Fixture) -> MapOracle {
        let mut map = HashMap::new();
        map.insert(f.source, Some(vec![f.header]));
        MapOracle(map)
    }

    #[test]
    fn everything_current_means_empty_plan() {
        let f = fixture();
        let plan = plan_outdated(&f.graph, &[f.compile, f.link], &f.files, &mut oracle(&f));
        assert!(plan.is_empty());
        assert!(plan.rescan.is_empty());
    }

    #[test]
    fn newer_header_rebuilds_compile_and_link() {
        let f = fixture();
        write_at(f.files.path(f.header), 0);
        let plan = plan_outdated(&f.graph, &[f.compile, f.link], &f.files, &mut oracle(&f));
        assert_eq!(plan.actions, vec![f.compile, f.link]);
        assert_eq!(plan.rescan, vec![f.compile]);
        assert!(plan.reasons[&f.compile].contains("a.h"));
    }

    #[test]
    fn missing_output_is_outdated() {
        let f = fixture();
        std::fs::remove_file(f.files.path(f.exe)).unwrap();
        let plan = plan_outdated(&f.graph, &[f.compile, f.link], &f.files, &mut oracle(&f));
        assert_eq!(plan.actions, vec![f.link]);
        assert!(plan.reasons[&f.link].starts_with("missing output"));
    }

    #[test]
    fn newer_object_relinks_only() {
        let f = fixture();
        write_at(f.files.path(f.object), 0);
        let plan = plan_outdated(&f.graph, &[f.compile, f.link], &f.files, &mut oracle(&f));
        assert_eq!(plan.actions, vec![f.link]);
    }

    #[test]
    fn unknown_includes_force_compile() {
        let f = fixture();
        let mut map = HashMap::new();
        map.insert(f.source, None);
        let plan = plan_outdated(&f.graph, &[f.compile, f.link], &f.files, &mut MapOracle(map));
        assert_eq!(plan.actions, vec![f.compile, f.link]);
        assert_eq!(plan.reasons[&f.compile], "include dependencies are unknown");
    }

    #[test]
    fn deleted_header_forces_compile() {
        let f = fixture();
        std::fs::remove_file(f.files.path(f.header)).unwrap();
        let plan = plan_outdated(&f.graph, &[f.compile], &f.files, &mut oracle(&f));
        assert_eq!(plan.actions, vec![f.compile]);
    }

    #[test]
    fn only_requested_actions_are_planned() {
        let f = fixture();
        write_at(f.files.path(f.source), 0);
        let plan = plan_outdated(&f.graph, &[f.compile], &f.files, &mut oracle(&f));
        assert_eq!(plan.actions, vec![f.compile]);
    }
}
