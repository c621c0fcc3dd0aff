//! Whole-invocation tests against a throwaway workspace and a toolchain that
//! only touches its outputs.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use kiln_build::{BuildError, BuildOptions, BuildOutcome, Orchestrator, Phases};
use kiln_cache::{DirectIncludeCache, FlatClosureCache};
use kiln_common::{set_modified, FileTable};
use kiln_config::{load_config, resolve_target, BackslashPolicy};
use kiln_graph::{
    Action, ActionFailure, ActionGraph, CommandToolchain, DescribeRequest, GraphError,
    HotReloadPatcher, InvalidationReason, ModuleSuffix, TargetActions, Toolchain,
};

const CONFIG: &str = r#"
[workspace]
name = "demo"

[toolchain]
output_prefix = "Demo"

[modules.Game]
source_root = "Source/Game"
dependencies = ["Core"]

[modules.Core]
source_root = "Source/Core"

[targets.Game]
modules = ["Game"]
platform = "Linux"

[targets.Editor]
modules = ["Game"]
platform = "Linux"
kind = "editor"
configuration = "debug"
"#;

/// Describes actions like the real toolchain but fakes execution.
#[derive(Default)]
struct TouchToolchain {
    ran: Mutex<Vec<String>>,
    fail_on: Option<String>,
}

impl TouchToolchain {
    fn failing_on(status: &str) -> Self {
        Self {
            fail_on: Some(status.to_string()),
            ..Self::default()
        }
    }

    fn take(&self) -> Vec<String> {
        let mut ran = std::mem::take(&mut *self.ran.lock().unwrap());
        ran.sort();
        ran
    }
}

impl Toolchain for TouchToolchain {
    fn describe(
        &self,
        request: &DescribeRequest<'_>,
        graph: &mut ActionGraph,
        files: &FileTable,
    ) -> Result<TargetActions, GraphError> {
        CommandToolchain::new().describe(request, graph, files)
    }

    fn execute(
        &self,
        action: &Action,
        _environment: &[(String, String)],
        files: &FileTable,
    ) -> Result<(), ActionFailure> {
        self.ran.lock().unwrap().push(action.status.clone());
        if self.fail_on.as_deref() == Some(action.status.as_str()) {
            return Err(ActionFailure {
                status: action.status.clone(),
                exit_code: Some(1),
                output: "error: expected ';'".to_string(),
            });
        }
        for output in &action.produced {
            let path = files.path(*output);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "").unwrap();
        }
        Ok(())
    }
}

fn an_hour_ago() -> SystemTime {
    SystemTime::now() - Duration::from_secs(3600)
}

fn in_an_hour() -> SystemTime {
    SystemTime::now() + Duration::from_secs(3600)
}

fn workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let files = [
        ("kiln.toml", CONFIG),
        ("bin/kiln", ""),
        ("Source/Game/Game.cpp", "#include \"Core.h\"\nint main() {}\n"),
        ("Source/Game/Actor.cpp", "#include \"Actor.h\"\n"),
        ("Source/Game/Actor.h", "#pragma once\nUCLASS()\nclass AActor {};\n"),
        ("Source/Core/Core.h", "#pragma once\n#include \"Types.h\"\n"),
        ("Source/Core/Types.h", "#pragma once\n#include \"Core.h\"\n"),
        ("Source/Core/Core.cpp", "#include \"Core.h\"\n"),
    ];
    for (name, contents) in files {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        set_modified(&path, an_hour_ago()).unwrap();
    }
    dir
}

fn options(root: &Path, target: &str) -> BuildOptions {
    BuildOptions {
        executable: Some(root.join("bin/kiln")),
        ..BuildOptions::for_targets([target])
    }
}

fn orchestrator<'t>(root: &Path, toolchain: &'t TouchToolchain) -> Orchestrator<'t> {
    Orchestrator::new(root, load_config(root).unwrap(), toolchain)
        .with_patcher(HotReloadPatcher::with_seed(7))
}

fn intermediate(root: &Path, target: &str) -> PathBuf {
    let config = load_config(root).unwrap();
    resolve_target(&config, root, target).unwrap().intermediate_dir
}

#[test]
fn first_build_gathers_and_rebuild_is_up_to_date() {
    let dir = workspace();
    let root = dir.path();
    let toolchain = TouchToolchain::default();

    let report = orchestrator(root, &toolchain).run(&options(root, "Game")).unwrap();
    assert_eq!(report.outcome, BuildOutcome::Succeeded);
    assert!(report.gathered);
    assert_eq!(report.invalidation, Some(InvalidationReason::Missing));
    assert_eq!(report.executed, 4);
    assert!(report.scan.extractions > 0);
    assert_eq!(toolchain.take(), vec!["Actor.cpp", "Core.cpp", "Game", "Game.cpp"]);
    assert!(intermediate(root, "Game").join("Makefile.kiln").exists());

    let report = orchestrator(root, &toolchain).run(&options(root, "Game")).unwrap();
    assert_eq!(report.outcome, BuildOutcome::UpToDate);
    assert_eq!(report.outcome.exit_code(), 2);
    assert!(!report.gathered);
    assert_eq!(report.invalidation, None);
    assert_eq!(report.scan.extractions, 0);
    assert!(toolchain.take().is_empty());
}

#[test]
fn header_edit_rebuilds_only_its_includers() {
    let dir = workspace();
    let root = dir.path();
    let toolchain = TouchToolchain::default();
    orchestrator(root, &toolchain).run(&options(root, "Game")).unwrap();
    toolchain.take();

    // Types.h is reached from Game.cpp and Core.cpp through a Core.h cycle.
    set_modified(&root.join("Source/Core/Types.h"), in_an_hour()).unwrap();
    let report = orchestrator(root, &toolchain).run(&options(root, "Game")).unwrap();

    assert_eq!(report.outcome, BuildOutcome::Succeeded);
    assert!(!report.gathered);
    assert_eq!(report.rescanned, 2);
    assert_eq!(toolchain.take(), vec!["Core.cpp", "Game", "Game.cpp"]);
}

#[test]
fn rules_edit_forces_gather() {
    let dir = workspace();
    let root = dir.path();
    let toolchain = TouchToolchain::default();
    orchestrator(root, &toolchain).run(&options(root, "Game")).unwrap();

    set_modified(&root.join("kiln.toml"), in_an_hour()).unwrap();
    let report = orchestrator(root, &toolchain).run(&options(root, "Game")).unwrap();

    assert!(report.gathered);
    let reason = report.invalidation.unwrap();
    assert_ne!(reason, InvalidationReason::Missing);
    assert!(reason.to_string().contains("kiln.toml"));
}

#[test]
fn newer_executable_forces_gather() {
    let dir = workspace();
    let root = dir.path();
    let toolchain = TouchToolchain::default();
    orchestrator(root, &toolchain).run(&options(root, "Game")).unwrap();

    set_modified(&root.join("bin/kiln"), in_an_hour()).unwrap();
    let report = orchestrator(root, &toolchain).run(&options(root, "Game")).unwrap();
    assert_eq!(report.invalidation, Some(InvalidationReason::ExecutableNewer));
}

#[test]
fn graph_only_persists_and_explains_without_building() {
    let dir = workspace();
    let root = dir.path();
    let toolchain = TouchToolchain::default();
    let opts = BuildOptions {
        graph_only: true,
        explain: true,
        ..options(root, "Game")
    };

    let report = orchestrator(root, &toolchain).run(&opts).unwrap();
    assert_eq!(report.outcome, BuildOutcome::Gathered);
    assert!(toolchain.take().is_empty());
    assert!(intermediate(root, "Game").join("Makefile.kiln").exists());

    let explain = report.explain.unwrap();
    assert_eq!(explain["actions"].as_array().unwrap().len(), 4);
    let reflected = &explain["targets"][0]["modules"][0]["reflected_headers"];
    assert_eq!(reflected.as_array().unwrap().len(), 1);
}

#[test]
fn assemble_only_requires_a_snapshot() {
    let dir = workspace();
    let root = dir.path();
    let toolchain = TouchToolchain::default();
    let opts = BuildOptions {
        phases: Phases::AssembleOnly,
        ..options(root, "Game")
    };

    let err = orchestrator(root, &toolchain).run(&opts).unwrap_err();
    assert!(matches!(
        err,
        BuildError::NoValidSnapshot {
            reason: InvalidationReason::Missing
        }
    ));

    let gather = BuildOptions {
        phases: Phases::GatherOnly,
        ..options(root, "Game")
    };
    orchestrator(root, &toolchain).run(&gather).unwrap();
    let report = orchestrator(root, &toolchain).run(&opts).unwrap();
    assert_eq!(report.outcome, BuildOutcome::Succeeded);
    assert!(!report.gathered);
}

#[test]
fn single_file_compiles_just_that_file() {
    let dir = workspace();
    let root = dir.path();
    let toolchain = TouchToolchain::default();
    let opts = BuildOptions {
        single_file: Some(PathBuf::from("Source/Game/Actor.cpp")),
        ..options(root, "Game")
    };

    let report = orchestrator(root, &toolchain).run(&opts).unwrap();
    assert_eq!(report.executed, 1);
    assert_eq!(toolchain.take(), vec!["Actor.cpp"]);
    assert!(!intermediate(root, "Game").join("Makefile.kiln").exists());

    let missing = BuildOptions {
        single_file: Some(PathBuf::from("Source/Game/Nope.cpp")),
        ..options(root, "Game")
    };
    let err = orchestrator(root, &toolchain).run(&missing).unwrap_err();
    assert!(matches!(err, BuildError::SingleFileNotFound { .. }));
}

#[test]
fn failed_compile_skips_the_link() {
    let dir = workspace();
    let root = dir.path();
    let toolchain = TouchToolchain::failing_on("Actor.cpp");

    let err = orchestrator(root, &toolchain).run(&options(root, "Game")).unwrap_err();
    match err {
        BuildError::ActionsFailed { failed, skipped, first } => {
            assert_eq!(failed, 1);
            assert_eq!(skipped, 1);
            assert!(first.contains("Actor.cpp failed with exit code 1"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!toolchain.take().contains(&"Game".to_string()));
    assert!(DirectIncludeCache::store_path(&intermediate(root, "Game")).exists());
}

#[test]
fn aborted_gather_still_persists_include_caches() {
    let dir = workspace();
    let root = dir.path();
    let bad = root.join("Source/Game/Bad.cpp");
    fs::write(&bad, "#include \"Core.h\"\n#include \"Sub\\Types.h\"\n").unwrap();
    set_modified(&bad, an_hour_ago()).unwrap();
    let toolchain = TouchToolchain::default();
    let opts = BuildOptions {
        backslash_includes: Some(BackslashPolicy::Error),
        ..options(root, "Game")
    };

    let err = orchestrator(root, &toolchain).run(&opts).unwrap_err();
    assert!(err.to_string().contains("path separator"), "{err}");
    assert!(toolchain.take().is_empty());
    assert!(!intermediate(root, "Game").join("Makefile.kiln").exists());
    assert!(DirectIncludeCache::store_path(&intermediate(root, "Game")).exists());
}

#[test]
fn corrupt_include_store_degrades_to_rescan() {
    let dir = workspace();
    let root = dir.path();
    let toolchain = TouchToolchain::default();
    orchestrator(root, &toolchain).run(&options(root, "Game")).unwrap();
    toolchain.take();

    let store = DirectIncludeCache::store_path(&intermediate(root, "Game"));
    fs::write(&store, b"not a kiln store").unwrap();
    set_modified(&root.join("Source/Game/Game.cpp"), in_an_hour()).unwrap();

    let report = orchestrator(root, &toolchain).run(&options(root, "Game")).unwrap();
    assert_eq!(report.outcome, BuildOutcome::Succeeded);
    assert!(report.scan.extractions > 0);
    assert_eq!(toolchain.take(), vec!["Game", "Game.cpp"]);
}

#[test]
fn lost_flat_store_is_rebuilt_from_direct_includes() {
    let dir = workspace();
    let root = dir.path();
    let toolchain = TouchToolchain::default();
    orchestrator(root, &toolchain).run(&options(root, "Game")).unwrap();
    toolchain.take();

    let store = FlatClosureCache::store_path(&intermediate(root, "Game"));
    fs::remove_file(&store).unwrap();

    let report = orchestrator(root, &toolchain).run(&options(root, "Game")).unwrap();
    assert_eq!(report.outcome, BuildOutcome::UpToDate);
    assert_eq!(report.scan.extractions, 0);
    assert!(report.scan.direct_hits > 0);
    assert!(toolchain.take().is_empty());
    assert!(store.exists());
}

#[test]
fn clean_snapshot_deletes_persisted_graph() {
    let dir = workspace();
    let root = dir.path();
    let toolchain = TouchToolchain::default();
    let kiln = orchestrator(root, &toolchain);
    assert_eq!(kiln.invalidate_snapshots("Game").unwrap(), 0);

    let mut kiln = kiln;
    kiln.run(&options(root, "Game")).unwrap();
    assert_eq!(kiln.invalidate_snapshots("Game").unwrap(), 1);
    assert!(!intermediate(root, "Game").join("Makefile.kiln").exists());
}

fn game_binaries(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(root.join("Binaries"))
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("Demo-Game-") && n.ends_with(".so"))
        .collect();
    names.sort();
    names
}

#[test]
fn hot_reload_links_under_fresh_names() {
    let dir = workspace();
    let root = dir.path();
    let toolchain = TouchToolchain::default();
    let mut kiln = orchestrator(root, &toolchain);

    let first = BuildOptions {
        hot_reload: true,
        modules: vec!["Game=0042".parse::<ModuleSuffix>().unwrap()],
        ..options(root, "Editor")
    };
    let report = kiln.run(&first).unwrap();
    assert_eq!(report.outcome, BuildOutcome::Succeeded);
    assert!(intermediate(root, "Editor").join("HotReloadMakefile.kiln").exists());
    assert_eq!(game_binaries(root), vec!["Demo-Game-0042-Linux-Debug.so"]);
    toolchain.take();

    // Nothing compiled, so nothing is linked either.
    let again = BuildOptions {
        hot_reload: true,
        modules: vec!["Game".parse::<ModuleSuffix>().unwrap()],
        ..options(root, "Editor")
    };
    let report = kiln.run(&again).unwrap();
    assert_eq!(report.outcome, BuildOutcome::UpToDate);
    assert!(toolchain.take().is_empty());

    set_modified(&root.join("Source/Game/Game.cpp"), in_an_hour()).unwrap();
    let report = kiln.run(&again).unwrap();
    assert_eq!(report.outcome, BuildOutcome::Succeeded);
    assert!(!report.gathered);

    let binaries = game_binaries(root);
    assert_eq!(binaries.len(), 2, "{binaries:?}");
    assert!(binaries.contains(&"Demo-Game-0042-Linux-Debug.so".to_string()));
    assert!(kiln.patcher_mut().is_outstanding("Demo-Game-0042-Linux-Debug"));
}

#[test]
fn hot_reload_refuses_a_suffix_that_is_still_loaded() {
    let dir = workspace();
    let root = dir.path();
    let toolchain = TouchToolchain::default();
    let mut kiln = orchestrator(root, &toolchain);
    let pinned = BuildOptions {
        hot_reload: true,
        modules: vec!["Game=0042".parse::<ModuleSuffix>().unwrap()],
        ..options(root, "Editor")
    };
    kiln.run(&pinned).unwrap();
    assert!(kiln.patcher_mut().is_outstanding("Demo-Game-0042-Linux-Debug"));
    toolchain.take();

    set_modified(&root.join("Source/Game/Game.cpp"), in_an_hour()).unwrap();
    let err = kiln.run(&pinned).unwrap_err();
    assert!(matches!(
        err,
        BuildError::Graph(GraphError::SuffixInUse { ref suffix, .. }) if suffix == "0042"
    ));
    assert!(toolchain.take().is_empty());
    assert_eq!(game_binaries(root), vec!["Demo-Game-0042-Linux-Debug.so"]);

    // Once the host unloads it, the name may be linked again.
    assert!(kiln.patcher_mut().release("Demo-Game-0042-Linux-Debug"));
    let report = kiln.run(&pinned).unwrap();
    assert_eq!(report.outcome, BuildOutcome::Succeeded);
    assert!(toolchain.take().contains(&"Demo-Game-0042-Linux-Debug.so".to_string()));
}
