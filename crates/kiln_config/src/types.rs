//! Configuration types deserialized from `kiln.toml`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// The top-level workspace configuration parsed from `kiln.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct KilnConfig {
    /// Workspace metadata and directory layout.
    pub workspace: WorkspaceMeta,
    /// Build policy switches.
    #[serde(default)]
    pub build: BuildConfig,
    /// Directive extraction settings.
    #[serde(default)]
    pub scan: ScanConfig,
    /// Compiler and linker invocation settings.
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    /// Named module descriptors.
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleConfig>,
    /// Named target descriptors.
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
}

/// Workspace metadata and directory layout.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceMeta {
    /// The workspace name.
    pub name: String,
    /// Directory (relative to the workspace root) holding caches, snapshots
    /// and object files.
    #[serde(default = "default_intermediate_dir")]
    pub intermediate_dir: String,
    /// Directory (relative to the workspace root) receiving linked binaries.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Generated IDE project files; a snapshot older than any of them is stale.
    #[serde(default)]
    pub project_files: Vec<String>,
    /// Additional configuration files whose edits invalidate snapshots.
    #[serde(default)]
    pub extra_config_files: Vec<String>,
}

fn default_intermediate_dir() -> String {
    "Intermediate".to_string()
}

fn default_output_dir() -> String {
    "Binaries".to_string()
}

/// Policy switches for gather/assemble runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Persist and reuse build-graph snapshots.
    pub use_snapshots: bool,
    /// Whether cached include resolutions are trusted.
    pub resolve_mode: ResolveMode,
    /// Treatment of `\` separators in first-party include directives.
    pub backslash_includes: BackslashPolicy,
    /// Search system include paths after module include paths.
    pub use_system_includes: bool,
    /// System include directories, searched last.
    pub system_include_paths: Vec<String>,
    /// Combine the sources of each module into one generated unity file.
    pub unity: bool,
    /// Compile writable sources individually instead of through unity files.
    pub adaptive_working_set: bool,
    /// Seconds to wait for the instance lock before giving up.
    pub lock_timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            use_snapshots: true,
            resolve_mode: ResolveMode::TrustCache,
            backslash_includes: BackslashPolicy::Error,
            use_system_includes: false,
            system_include_paths: Vec::new(),
            unity: false,
            adaptive_working_set: false,
            lock_timeout_secs: 60,
        }
    }
}

/// Whether prior include resolutions stored in the direct-include cache are reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolveMode {
    /// Reuse stored resolutions.
    TrustCache,
    /// Re-resolve every directive and warn when the answer changed.
    AlwaysResolve,
}

/// Treatment of `\` path separators in include directives of first-party code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackslashPolicy {
    /// Fail extraction of the file.
    Error,
    /// Normalize to `/` silently.
    Allow,
}

/// Directive extraction settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Macro names whose invocation marks a header as declaring reflected types.
    pub reflection_markers: Vec<String>,
    /// Inputs larger than this many bytes are scanned in line-aligned chunks.
    pub chunk_size: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            reflection_markers: ["UCLASS", "USTRUCT", "UENUM", "UINTERFACE", "UDELEGATE"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            chunk_size: 1 << 20,
        }
    }
}

/// Compiler and linker invocation settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Compiler program.
    pub compiler: String,
    /// Linker program.
    pub linker: String,
    /// Extra arguments for every compile.
    pub compile_flags: Vec<String>,
    /// Extra arguments for every link.
    pub link_flags: Vec<String>,
    /// Object file extension.
    pub object_extension: String,
    /// Shared library extension (editor targets link one per module).
    pub shared_library_extension: String,
    /// Prefix of every linked module binary, as in `<Prefix>-<Module>`.
    pub output_prefix: String,
    /// Pass link inputs through an `@file` response file.
    pub response_files: bool,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: "cc".to_string(),
            linker: "cc".to_string(),
            compile_flags: Vec::new(),
            link_flags: Vec::new(),
            object_extension: "o".to_string(),
            shared_library_extension: "so".to_string(),
            output_prefix: "Kiln".to_string(),
            response_files: true,
        }
    }
}

/// A module descriptor: a directory of sources compiled together.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleConfig {
    /// Source root, relative to the workspace root.
    pub source_root: String,
    /// Additional include directories, relative to the workspace root.
    #[serde(default)]
    pub include_paths: Vec<String>,
    /// Modules whose include paths this module may use.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Third-party code is exempt from the backslash policy.
    #[serde(default)]
    pub third_party: bool,
    /// Precompiled header, relative to the workspace root.
    #[serde(default)]
    pub pch: Option<String>,
    /// Separate rules file describing this module; defaults to `kiln.toml`.
    #[serde(default)]
    pub rules_file: Option<String>,
}

/// A target descriptor: a set of modules linked for one platform and configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Root modules of the target; their dependencies are pulled in.
    pub modules: Vec<String>,
    /// Platform name; defaults to the host operating system.
    #[serde(default)]
    pub platform: Option<String>,
    /// Build configuration.
    #[serde(default)]
    pub configuration: Configuration,
    /// What kind of binaries the target produces.
    #[serde(default)]
    pub kind: TargetKind,
    /// Separate descriptor file for this target; defaults to `kiln.toml`.
    #[serde(default)]
    pub rules_file: Option<String>,
}

/// Build configuration of a target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Configuration {
    /// Unoptimized with full debug information.
    Debug,
    /// Optimized with debug information.
    #[default]
    Development,
    /// Fully optimized.
    Shipping,
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Configuration::Debug => "Debug",
            Configuration::Development => "Development",
            Configuration::Shipping => "Shipping",
        };
        f.write_str(name)
    }
}

/// What kind of binaries a target produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// A single monolithic executable.
    #[default]
    Game,
    /// One shared library per module, eligible for hot reload.
    Editor,
    /// A standalone tool executable.
    Program,
}

impl TargetKind {
    /// Returns `true` if each module links into its own shared library.
    pub fn is_modular(self) -> bool {
        matches!(self, TargetKind::Editor)
    }
}
