//! A toolchain driving a command-line compiler and linker.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use kiln_common::{normalize_path, FileHandle, FileTable};
use kiln_config::{Configuration, ResolvedModule, ResolvedTarget};
use kiln_deps::SourceKind;
use tracing::debug;

use crate::action::{Action, ActionKind, CommandSpec};
use crate::error::GraphError;
use crate::graph::ActionGraph;
use crate::sources::walk_module;
use crate::toolchain::{ActionFailure, DescribeRequest, TargetActions, Toolchain};

/// Compiles with `toolchain.compiler` and links with `toolchain.linker`
/// using GCC-style arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandToolchain;

impl CommandToolchain {
    /// Creates the toolchain.
    pub fn new() -> Self {
        Self
    }
}

/// File stem of a linked binary.
///
/// Modular targets link `<Prefix>-<Module>`, monolithic ones link the target
/// name. A hot reload suffix follows as `-<suffix>`, and configurations other
/// than Development append `-<Platform>-<Configuration>`.
pub fn link_stem(target: &ResolvedTarget, module: Option<&str>, suffix: Option<&str>) -> String {
    let mut stem = match module {
        Some(module) => format!("{}-{module}", target.toolchain.output_prefix),
        None => target.name.clone(),
    };
    if let Some(suffix) = suffix {
        stem.push('-');
        stem.push_str(suffix);
    }
    if target.configuration != Configuration::Development {
        stem.push_str(&format!("-{}-{}", target.platform, target.configuration));
    }
    stem
}

impl Toolchain for CommandToolchain {
    fn describe(
        &self,
        request: &DescribeRequest<'_>,
        graph: &mut ActionGraph,
        files: &FileTable,
    ) -> Result<TargetActions, GraphError> {
        let target = request.target;
        let mut result = TargetActions::default();
        let mut module_objects: Vec<(&ResolvedModule, Vec<FileHandle>)> = Vec::new();

        for module in &target.modules {
            let object_dir = target.intermediate_dir.join(&module.name);
            let found = walk_module(&module.source_root)?;
            let units = compile_units(target, module, &found.sources, request.working_set, files, &object_dir)?;

            let mut objects = Vec::new();
            for unit in units {
                let action = compile_action(target, module, unit, &object_dir, files);
                objects.extend(action.produced.iter().copied());
                graph.push(action);
                result.units.push((unit, module.name.clone()));
            }
            module_objects.push((module, objects));
        }

        let toolchain = &target.toolchain;
        if target.kind.is_modular() {
            let libraries: HashMap<&str, FileHandle> = target
                .modules
                .iter()
                .map(|m| {
                    let suffix = request
                        .link_suffixes
                        .iter()
                        .find(|s| s.module.eq_ignore_ascii_case(&m.name))
                        .and_then(|s| s.suffix.as_deref());
                    let stem = link_stem(target, Some(&m.name), suffix);
                    let path = target
                        .output_dir
                        .join(format!("{stem}.{}", toolchain.shared_library_extension));
                    (m.name.as_str(), files.intern(&path))
                })
                .collect();

            for (module, objects) in module_objects {
                let Some(&output) = libraries.get(module.name.as_str()) else {
                    continue;
                };
                let mut inputs = objects;
                inputs.extend(
                    module
                        .dependencies
                        .iter()
                        .filter(|d| **d != module.name)
                        .filter_map(|d| libraries.get(d.as_str()).copied()),
                );
                let action = link_action(target, Some(&module.name), inputs, output, files)?;
                graph.push(action);
                result.outputs.push(output);
            }
        } else {
            let inputs: Vec<FileHandle> = module_objects
                .into_iter()
                .flat_map(|(_, objects)| objects)
                .collect();
            let output = files.intern(&target.output_dir.join(link_stem(target, None, None)));
            let action = link_action(target, None, inputs, output, files)?;
            graph.push(action);
            result.outputs.push(output);
        }

        Ok(result)
    }

    fn execute(
        &self,
        action: &Action,
        environment: &[(String, String)],
        files: &FileTable,
    ) -> Result<(), ActionFailure> {
        let failure = |exit_code, output: String| ActionFailure {
            status: action.status.clone(),
            exit_code,
            output,
        };

        for &item in &action.produced {
            if let Some(parent) = files.path(item).parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| failure(None, format!("{}: {e}", parent.display())))?;
            }
        }

        let mut command = Command::new(&action.command.program);
        command.args(&action.command.arguments);
        if let Some(dir) = &action.command.working_dir {
            command.current_dir(dir);
        }
        if !environment.is_empty() {
            command.env_clear();
            command.envs(environment.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }

        debug!(command = %action.command.display(), "spawning");
        let output = command
            .output()
            .map_err(|e| failure(None, format!("{}: {e}", action.command.program)))?;
        if output.status.success() {
            return Ok(());
        }

        let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stdout));
        Err(failure(output.status.code(), text))
    }
}

/// Decides which files a module compiles.
///
/// With unity builds enabled, C++ sources outside the working set are
/// combined into one generated `Module.<Name>.cpp`; everything else compiles
/// on its own.
fn compile_units(
    target: &ResolvedTarget,
    module: &ResolvedModule,
    sources: &[PathBuf],
    working_set: &HashSet<FileHandle>,
    files: &FileTable,
    object_dir: &Path,
) -> Result<Vec<FileHandle>, GraphError> {
    let handles: Vec<FileHandle> = sources.iter().map(|s| files.intern(s)).collect();
    if !target.build.unity {
        return Ok(handles);
    }

    let (grouped, mut individual): (Vec<FileHandle>, Vec<FileHandle>) =
        handles.into_iter().partition(|&h| {
            SourceKind::from_path(files.path(h)) == SourceKind::Cpp && !working_set.contains(&h)
        });
    if grouped.len() < 2 {
        individual.extend(grouped);
        individual.sort_by(|a, b| files.path(*a).cmp(files.path(*b)));
        return Ok(individual);
    }

    let contents: String = grouped
        .iter()
        .map(|&h| format!("#include \"{}\"\n", normalize_path(files.path(h))))
        .collect();
    let unity = object_dir.join(format!("Module.{}.cpp", module.name));
    write_if_changed(&unity, &contents)?;
    individual.push(files.intern(&unity));
    Ok(individual)
}

fn compile_action(
    target: &ResolvedTarget,
    module: &ResolvedModule,
    unit: FileHandle,
    object_dir: &Path,
    files: &FileTable,
) -> Action {
    let toolchain = &target.toolchain;
    let source = files.path(unit).to_path_buf();
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let object = files.intern(&object_dir.join(format!("{file_name}.{}", toolchain.object_extension)));

    let mut arguments = toolchain.compile_flags.clone();
    for dir in &module.include_paths {
        arguments.push(format!("-I{}", dir.display()));
    }
    if target.build.use_system_includes {
        for dir in &target.system_include_paths {
            arguments.push("-isystem".to_string());
            arguments.push(dir.display().to_string());
        }
    }
    let mut prerequisites = vec![unit];
    if let Some(pch) = &module.pch {
        arguments.push("-include".to_string());
        arguments.push(pch.display().to_string());
        prerequisites.push(files.intern(pch));
    }
    arguments.extend([
        "-c".to_string(),
        source.display().to_string(),
        "-o".to_string(),
        files.path(object).display().to_string(),
    ]);

    Action {
        kind: ActionKind::Compile,
        prerequisites,
        produced: vec![object],
        command: CommandSpec {
            program: toolchain.compiler.clone(),
            arguments,
            working_dir: None,
        },
        status: file_name,
        target: target.name.clone(),
        module: Some(module.name.clone()),
        primary_source: Some(unit),
    }
}

fn link_action(
    target: &ResolvedTarget,
    module: Option<&str>,
    inputs: Vec<FileHandle>,
    output: FileHandle,
    files: &FileTable,
) -> Result<Action, GraphError> {
    let toolchain = &target.toolchain;
    let output_path = files.path(output).to_path_buf();
    let output_name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut arguments = toolchain.link_flags.clone();
    if module.is_some() {
        arguments.push("-shared".to_string());
    }
    arguments.push("-o".to_string());
    arguments.push(output_path.display().to_string());

    if toolchain.response_files {
        let response = target.intermediate_dir.join(format!("{output_name}.response"));
        let contents: String = inputs
            .iter()
            .map(|&h| format!("\"{}\"\n", files.path(h).display()))
            .collect();
        write_if_changed(&response, &contents)?;
        arguments.push(format!("@{}", response.display()));
    } else {
        arguments.extend(inputs.iter().map(|&h| files.path(h).display().to_string()));
    }

    Ok(Action {
        kind: ActionKind::Link,
        prerequisites: inputs,
        produced: vec![output],
        command: CommandSpec {
            program: toolchain.linker.clone(),
            arguments,
            working_dir: None,
        },
        status: output_name,
        target: target.name.clone(),
        module: module.map(str::to_string),
        primary_source: None,
    })
}

/// Writes `contents` unless the file already holds exactly that, keeping
/// its modification time stable across gathers.
fn write_if_changed(path: &Path, contents: &str) -> Result<(), GraphError> {
    if fs::read_to_string(path).is_ok_and(|existing| existing == contents) {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| GraphError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    fs::write(path, contents).map_err(|e| GraphError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_config::{load_config_from_str, resolve_target};

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

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("Source/Game")).unwrap();
        fs::create_dir_all(root.join("Source/Core")).unwrap();
        fs::write(root.join("Source/Game/Game.cpp"), "#include \"Core.h\"\n").unwrap();
        fs::write(root.join("Source/Game/Actor.cpp"), "").unwrap();
        fs::write(root.join("Source/Core/Core.h"), "").unwrap();
        fs::write(root.join("Source/Core/Core.cpp"), "").unwrap();
        dir
    }

    fn target(root: &Path, name: &str, edit: impl FnOnce(&mut kiln_config::KilnConfig)) -> ResolvedTarget {
        let mut config = load_config_from_str(CONFIG).unwrap();
        edit(&mut config);
        resolve_target(&config, root, name).unwrap()
    }

    fn describe(target: &ResolvedTarget, files: &FileTable) -> (ActionGraph, TargetActions) {
        let mut graph = ActionGraph::new();
        let working_set = HashSet::new();
        let request = DescribeRequest {
            target,
            link_suffixes: &[],
            working_set: &working_set,
        };
        let actions = CommandToolchain::new()
            .describe(&request, &mut graph, files)
            .unwrap();
        (graph, actions)
    }

    #[test]
    fn monolithic_target_compiles_every_source_and_links_once() {
        let dir = workspace();
        let t = target(dir.path(), "Game", |_| {});
        let files = FileTable::new();
        let (graph, actions) = describe(&t, &files);

        assert_eq!(actions.units.len(), 3);
        assert_eq!(graph.len(), 4);
        assert_eq!(actions.outputs.len(), 1);
        assert_eq!(files.path(actions.outputs[0]), dir.path().join("Binaries/Game"));

        let link = graph.iter().find(|(_, a)| a.kind == ActionKind::Link).unwrap().1;
        assert_eq!(link.prerequisites.len(), 3);
        let response = link.command.arguments.last().unwrap();
        assert!(response.starts_with('@'));
        let contents = fs::read_to_string(&response[1..]).unwrap();
        assert_eq!(contents.lines().count(), 3);
    }

    #[test]
    fn compile_actions_carry_search_paths() {
        let dir = workspace();
        let t = target(dir.path(), "Game", |_| {});
        let files = FileTable::new();
        let (graph, _) = describe(&t, &files);
        let game_cpp = files.intern(&dir.path().join("Source/Game/Game.cpp"));
        let compile = graph
            .iter()
            .find(|(_, a)| a.primary_source == Some(game_cpp))
            .unwrap()
            .1;
        let core_dir = format!("-I{}", dir.path().join("Source/Core").display());
        assert!(compile.command.arguments.contains(&core_dir));
        assert_eq!(compile.status, "Game.cpp");
        assert_eq!(compile.module.as_deref(), Some("Game"));
    }

    #[test]
    fn modular_target_links_per_module_with_suffix_and_tail() {
        let dir = workspace();
        let t = target(dir.path(), "Editor", |_| {});
        let files = FileTable::new();
        let mut graph = ActionGraph::new();
        let working_set = HashSet::new();
        let suffixes = vec![
            "Game=0042".parse::<crate::ModuleSuffix>().unwrap(),
            "Core=0042".parse::<crate::ModuleSuffix>().unwrap(),
        ];
        let request = DescribeRequest {
            target: &t,
            link_suffixes: &suffixes,
            working_set: &working_set,
        };
        let actions = CommandToolchain::new()
            .describe(&request, &mut graph, &files)
            .unwrap();

        let names: Vec<String> = actions
            .outputs
            .iter()
            .map(|&o| files.path(o).file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["Demo-Game-0042-Linux-Debug.so", "Demo-Core-0042-Linux-Debug.so"]
        );

        let core_lib = actions.outputs[1];
        let game_link = graph
            .iter()
            .find(|(_, a)| a.kind == ActionKind::Link && a.module.as_deref() == Some("Game"))
            .unwrap()
            .1;
        assert!(game_link.prerequisites.contains(&core_lib));
        assert!(game_link.command.arguments.contains(&"-shared".to_string()));
    }

    #[test]
    fn unity_groups_sources_outside_working_set() {
        let dir = workspace();
        let t = target(dir.path(), "Game", |c| c.build.unity = true);
        let files = FileTable::new();
        let actor = files.intern(&dir.path().join("Source/Game/Actor.cpp"));

        let (_, all_grouped) = describe(&t, &files);
        let unity = t.intermediate_dir.join("Game/Module.Game.cpp");
        let unity_handle = files.intern(&unity);
        assert!(all_grouped.units.iter().any(|(u, _)| *u == unity_handle));
        let text = fs::read_to_string(&unity).unwrap();
        assert!(text.contains("Actor.cpp"));
        assert!(text.contains("Game.cpp"));

        let mut graph = ActionGraph::new();
        let working_set: HashSet<FileHandle> = [actor].into_iter().collect();
        let request = DescribeRequest {
            target: &t,
            link_suffixes: &[],
            working_set: &working_set,
        };
        let adaptive = CommandToolchain::new()
            .describe(&request, &mut graph, &files)
            .unwrap();
        let game_units: Vec<FileHandle> = adaptive
            .units
            .iter()
            .filter(|(_, m)| m == "Game")
            .map(|(u, _)| *u)
            .collect();
        assert!(game_units.contains(&actor));
        assert!(!game_units.contains(&unity_handle));
    }

    #[test]
    fn unchanged_generated_files_keep_their_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gen/a.response");
        write_if_changed(&path, "x\n").unwrap();
        let old = std::time::SystemTime::now() - std::time::Duration::from_secs(60);
        kiln_common::set_modified(&path, old).unwrap();
        write_if_changed(&path, "x\n").unwrap();
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), old);
    }

    #[test]
    fn stems_follow_naming_rules() {
        let dir = workspace();
        let game = target(dir.path(), "Game", |_| {});
        let editor = target(dir.path(), "Editor", |_| {});
        assert_eq!(link_stem(&game, None, None), "Game");
        assert_eq!(link_stem(&game, Some("Core"), Some("7")), "Demo-Core-7");
        assert_eq!(link_stem(&editor, Some("Core"), None), "Demo-Core-Linux-Debug");
    }

    #[cfg(unix)]
    #[test]
    fn execute_reports_exit_code_and_output() {
        let files = FileTable::new();
        let dir = tempfile::tempdir().unwrap();
        let out = files.intern(&dir.path().join("obj/out.o"));
        let action = Action {
            kind: ActionKind::Compile,
            prerequisites: Vec::new(),
            produced: vec![out],
            command: CommandSpec {
                program: "sh".to_string(),
                arguments: vec!["-c".to_string(), "echo broken >&2; exit 3".to_string()],
                working_dir: None,
            },
            status: "out.cpp".to_string(),
            target: "Game".to_string(),
            module: None,
            primary_source: None,
        };
        let failure = CommandToolchain::new().execute(&action, &[], &files).unwrap_err();
        assert_eq!(failure.exit_code, Some(3));
        assert_eq!(failure.output.trim(), "broken");
        assert!(dir.path().join("obj").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn execute_applies_captured_environment() {
        let files = FileTable::new();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("env.txt");
        let action = Action {
            kind: ActionKind::Link,
            prerequisites: Vec::new(),
            produced: Vec::new(),
            command: CommandSpec {
                program: "/bin/sh".to_string(),
                arguments: vec![
                    "-c".to_string(),
                    format!("echo \"$KILN_PROBE\" > '{}'", marker.display()),
                ],
                working_dir: None,
            },
            status: "probe".to_string(),
            target: "Game".to_string(),
            module: None,
            primary_source: None,
        };
        let env = vec![("KILN_PROBE".to_string(), "captured".to_string())];
        CommandToolchain::new().execute(&action, &env, &files).unwrap();
        assert_eq!(fs::read_to_string(&marker).unwrap().trim(), "captured");
    }
}
