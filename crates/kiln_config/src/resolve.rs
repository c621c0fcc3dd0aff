//! Target resolution: turning a named target into absolute module descriptors.

use crate::error::ConfigError;
use crate::loader::CONFIG_FILE_NAME;
use crate::types::{BuildConfig, Configuration, KilnConfig, ScanConfig, TargetKind, ToolchainConfig};
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

/// A module with every path made absolute and its include search order fixed.
#[derive(Debug, Clone)]
pub struct ResolvedModule {
    /// The module name.
    pub name: String,
    /// Absolute source root.
    pub source_root: PathBuf,
    /// Include directories in search order: the module's own root and include
    /// paths, then those of its dependencies (breadth first).
    pub include_paths: Vec<PathBuf>,
    /// Direct dependencies by name.
    pub dependencies: Vec<String>,
    /// Whether the module is exempt from the backslash policy.
    pub third_party: bool,
    /// Absolute precompiled header path, if any.
    pub pch: Option<PathBuf>,
    /// File describing this module.
    pub rules_file: PathBuf,
}

/// A fully resolved target.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    /// The target name.
    pub name: String,
    /// Platform name.
    pub platform: String,
    /// Build configuration.
    pub configuration: Configuration,
    /// Kind of binaries produced.
    pub kind: TargetKind,
    /// File describing this target.
    pub target_file: PathBuf,
    /// Root modules followed by their transitive dependencies.
    pub modules: Vec<ResolvedModule>,
    /// Absolute system include directories.
    pub system_include_paths: Vec<PathBuf>,
    /// Per-target intermediate directory:
    /// `<root>/<intermediate>/Build/<platform>/<target>/<configuration>`.
    pub intermediate_dir: PathBuf,
    /// Directory receiving linked binaries.
    pub output_dir: PathBuf,
    /// Build policy switches.
    pub build: BuildConfig,
    /// Directive extraction settings.
    pub scan: ScanConfig,
    /// Compiler and linker settings.
    pub toolchain: ToolchainConfig,
}

impl ResolvedTarget {
    /// Returns the module with the given name.
    pub fn module(&self, name: &str) -> Option<&ResolvedModule> {
        self.modules.iter().find(|m| m.name == name)
    }
}

/// Resolves a named target against the workspace rooted at `root`.
///
/// Modules named by the target come first, in declaration order, followed by
/// every module reachable through dependencies. Dependency cycles between
/// modules are tolerated.
pub fn resolve_target(
    config: &KilnConfig,
    root: &Path,
    target_name: &str,
) -> Result<ResolvedTarget, ConfigError> {
    let target = config
        .targets
        .get(target_name)
        .ok_or_else(|| ConfigError::UnknownTarget(target_name.to_string()))?;

    let config_path = root.join(CONFIG_FILE_NAME);
    let platform = target
        .platform
        .clone()
        .unwrap_or_else(|| std::env::consts::OS.to_string());

    let mut order = Vec::new();
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<&str> = target.modules.iter().map(String::as_str).collect();
    while let Some(name) = queue.pop_front() {
        if !seen.insert(name) {
            continue;
        }
        let module = config
            .modules
            .get(name)
            .ok_or_else(|| ConfigError::UnknownModule(name.to_string()))?;
        order.push(name);
        queue.extend(module.dependencies.iter().map(String::as_str));
    }

    let modules = order
        .iter()
        .map(|name| resolve_module(config, root, &config_path, name))
        .collect::<Result<Vec<_>, _>>()?;

    let intermediate_dir = root
        .join(&config.workspace.intermediate_dir)
        .join("Build")
        .join(&platform)
        .join(target_name)
        .join(target.configuration.to_string());

    Ok(ResolvedTarget {
        name: target_name.to_string(),
        platform,
        configuration: target.configuration,
        kind: target.kind,
        target_file: target
            .rules_file
            .as_ref()
            .map(|f| root.join(f))
            .unwrap_or_else(|| config_path.clone()),
        modules,
        system_include_paths: config
            .build
            .system_include_paths
            .iter()
            .map(|p| root.join(p))
            .collect(),
        intermediate_dir,
        output_dir: root.join(&config.workspace.output_dir),
        build: config.build.clone(),
        scan: config.scan.clone(),
        toolchain: config.toolchain.clone(),
    })
}

fn resolve_module(
    config: &KilnConfig,
    root: &Path,
    config_path: &Path,
    name: &str,
) -> Result<ResolvedModule, ConfigError> {
    let module = config
        .modules
        .get(name)
        .ok_or_else(|| ConfigError::UnknownModule(name.to_string()))?;

    let mut include_paths: Vec<PathBuf> = Vec::new();
    let mut push = |path: PathBuf| {
        if !include_paths.contains(&path) {
            include_paths.push(path);
        }
    };

    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([name]);
    while let Some(current) = queue.pop_front() {
        if !seen.insert(current) {
            continue;
        }
        let m = config
            .modules
            .get(current)
            .ok_or_else(|| ConfigError::UnknownModule(current.to_string()))?;
        push(root.join(&m.source_root));
        for path in &m.include_paths {
            push(root.join(path));
        }
        queue.extend(m.dependencies.iter().map(String::as_str));
    }

    Ok(ResolvedModule {
        name: name.to_string(),
        source_root: root.join(&module.source_root),
        include_paths,
        dependencies: module.dependencies.clone(),
        third_party: module.third_party,
        pch: module.pch.as_ref().map(|p| root.join(p)),
        rules_file: module
            .rules_file
            .as_ref()
            .map(|f| root.join(f))
            .unwrap_or_else(|| config_path.to_path_buf()),
    })
}

/// Returns every configuration file consulted for the workspace.
pub fn config_files(config: &KilnConfig, root: &Path) -> Vec<PathBuf> {
    std::iter::once(root.join(CONFIG_FILE_NAME))
        .chain(config.workspace.extra_config_files.iter().map(|f| root.join(f)))
        .collect()
}

/// Returns the generated project files tracked for staleness.
pub fn project_files(config: &KilnConfig, root: &Path) -> Vec<PathBuf> {
    config
        .workspace
        .project_files
        .iter()
        .map(|f| root.join(f))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_config_from_str;

    const WORKSPACE: &str = r#"
[workspace]
name = "shooter"
extra_config_files = ["Config/Engine.ini"]

[build]
system_include_paths = ["/usr/include"]

[modules.Core]
source_root = "Source/Core"
include_paths = ["Source/Core/Public"]

[modules.Render]
source_root = "Source/Render"
dependencies = ["Core"]
third_party = true

[modules.Game]
source_root = "Source/Game"
dependencies = ["Render", "Core"]
rules_file = "Source/Game/Game.build.toml"

[targets.Shooter]
modules = ["Game"]
platform = "Linux"
configuration = "shipping"
"#;

    #[test]
    fn resolve_pulls_in_dependencies() {
        let config = load_config_from_str(WORKSPACE).unwrap();
        let root = Path::new("/ws");
        let t = resolve_target(&config, root, "Shooter").unwrap();
        let names: Vec<_> = t.modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Game", "Render", "Core"]);
        assert_eq!(t.platform, "Linux");
        assert_eq!(
            t.intermediate_dir,
            PathBuf::from("/ws/Intermediate/Build/Linux/Shooter/Shipping")
        );
        assert_eq!(t.target_file, PathBuf::from("/ws/kiln.toml"));
    }

    #[test]
    fn include_paths_follow_dependency_order() {
        let config = load_config_from_str(WORKSPACE).unwrap();
        let t = resolve_target(&config, Path::new("/ws"), "Shooter").unwrap();
        let game = t.module("Game").unwrap();
        assert_eq!(
            game.include_paths,
            vec![
                PathBuf::from("/ws/Source/Game"),
                PathBuf::from("/ws/Source/Render"),
                PathBuf::from("/ws/Source/Core"),
                PathBuf::from("/ws/Source/Core/Public"),
            ]
        );
        assert_eq!(game.rules_file, PathBuf::from("/ws/Source/Game/Game.build.toml"));
        assert!(t.module("Render").unwrap().third_party);
    }

    #[test]
    fn unknown_target_errors() {
        let config = load_config_from_str(WORKSPACE).unwrap();
        let err = resolve_target(&config, Path::new("/ws"), "Nope").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTarget(_)));
    }

    #[test]
    fn module_dependency_cycles_terminate() {
        let toml = r#"
[workspace]
name = "cyclic"

[modules.A]
source_root = "A"
dependencies = ["B"]

[modules.B]
source_root = "B"
dependencies = ["A"]

[targets.T]
modules = ["A"]
"#;
        let config = load_config_from_str(toml).unwrap();
        let t = resolve_target(&config, Path::new("/ws"), "T").unwrap();
        assert_eq!(t.modules.len(), 2);
        assert_eq!(t.module("B").unwrap().include_paths.len(), 2);
    }

    #[test]
    fn consulted_files_include_extras() {
        let config = load_config_from_str(WORKSPACE).unwrap();
        let files = config_files(&config, Path::new("/ws"));
        assert_eq!(
            files,
            vec![
                PathBuf::from("/ws/kiln.toml"),
                PathBuf::from("/ws/Config/Engine.ini")
            ]
        );
        assert!(project_files(&config, Path::new("/ws")).is_empty());
    }
}
