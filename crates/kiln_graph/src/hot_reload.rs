//! Renaming link outputs so a running process can load new binaries next to
//! the ones it already has loaded.
//!
//! Every link output about to be relinked gets a fresh `-<suffix>` inserted
//! after its `<Prefix>-<Module>` stem and before any
//! `-<Platform>-<Configuration>` tail. Response files referencing the old
//! names are copied under the new names and rewritten, and every action that
//! consumed a renamed output is pointed at the new file.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use kiln_common::{FileHandle, FileTable};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::action::{ActionId, ActionKind};
use crate::error::GraphError;
use crate::graph::ActionGraph;

/// Suffixes are drawn from `0..SUFFIX_RANGE`.
const SUFFIX_RANGE: u32 = 10_000;

/// A module to hot reload, optionally with a caller-chosen suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSuffix {
    /// Module name.
    pub module: String,
    /// Suffix to use instead of a random one.
    pub suffix: Option<String>,
}

impl FromStr for ModuleSuffix {
    type Err = String;

    /// Parses `Module` or `Module=Suffix`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (module, suffix) = match s.split_once('=') {
            Some((module, suffix)) => (module, Some(suffix)),
            None => (s, None),
        };
        if module.is_empty() {
            return Err(format!("missing module name in '{s}'"));
        }
        if suffix.is_some_and(str::is_empty) {
            return Err(format!("empty suffix in '{s}'"));
        }
        Ok(Self {
            module: module.to_string(),
            suffix: suffix.map(str::to_string),
        })
    }
}

/// What one patching pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HotReloadPatch {
    /// Old and new stems of every renamed binary.
    pub renamed: Vec<(String, String)>,
    /// Response files written under new names.
    pub response_files: Vec<PathBuf>,
}

/// Hands out unique suffixes across reload cycles of one process.
#[derive(Debug)]
pub struct HotReloadPatcher {
    rng: StdRng,
    outstanding: HashSet<String>,
}

impl Default for HotReloadPatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HotReloadPatcher {
    /// Creates a patcher with an entropy-seeded generator.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            outstanding: HashSet::new(),
        }
    }

    /// Creates a patcher with a fixed seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            outstanding: HashSet::new(),
        }
    }

    /// Whether a binary stem is still in use.
    pub fn is_outstanding(&self, stem: &str) -> bool {
        self.outstanding.contains(stem)
    }

    /// Marks a binary stem as no longer loaded, making its suffix reusable.
    pub fn release(&mut self, stem: &str) -> bool {
        self.outstanding.remove(stem)
    }

    /// Renames the outputs of the link actions among `actions`.
    ///
    /// Consumers of a renamed output anywhere in `graph` are rewired to the
    /// new file. Every link stem in scope becomes outstanding, renamed or not,
    /// and a requested suffix whose stem is outstanding is refused even when
    /// the output already carries it.
    pub fn patch(
        &mut self,
        graph: &mut ActionGraph,
        actions: &[ActionId],
        modules: &[ModuleSuffix],
        files: &FileTable,
    ) -> Result<HotReloadPatch, GraphError> {
        let mut patch = HotReloadPatch::default();
        let mut remap: HashMap<FileHandle, FileHandle> = HashMap::new();
        let mut responses: Vec<PathBuf> = Vec::new();
        let scope: HashSet<ActionId> = actions.iter().copied().collect();

        for (id, action) in graph.iter_mut() {
            if action.kind != ActionKind::Link || !scope.contains(&id) {
                continue;
            }
            let Some(&primary) = action.produced.first() else {
                continue;
            };
            let primary_path = files.path(primary).to_path_buf();
            let old_stem = stem_of(&primary_path);
            let name = split_stem(&old_stem)?;

            let requested = modules
                .iter()
                .find(|m| m.module.eq_ignore_ascii_case(&name.module))
                .and_then(|m| m.suffix.as_deref());
            let new_stem = match requested {
                Some(suffix) => {
                    let stem = name.with_suffix(suffix);
                    if self.outstanding.contains(&stem) {
                        return Err(GraphError::SuffixInUse {
                            module: name.module.clone(),
                            suffix: suffix.to_string(),
                        });
                    }
                    stem
                }
                None => self.unused_stem(&name, &old_stem, &primary_path)?,
            };
            if new_stem == old_stem {
                self.outstanding.insert(new_stem);
                continue;
            }
            debug!(from = %old_stem, to = %new_stem, "renaming hot reload output");

            for argument in &mut action.command.arguments {
                if let Some(response) = argument.strip_prefix('@') {
                    let old_path = PathBuf::from(response.trim_matches('"'));
                    let new_path = PathBuf::from(replace_stem(&old_path.to_string_lossy(), &old_stem, &new_stem));
                    if new_path != old_path {
                        fs::copy(&old_path, &new_path).map_err(|e| GraphError::ResponseFile {
                            path: old_path.clone(),
                            source: e,
                        })?;
                        responses.push(new_path);
                    }
                }
                *argument = replace_stem(argument, &old_stem, &new_stem);
            }
            action.status = replace_stem(&action.status, &old_stem, &new_stem);

            for item in &mut action.produced {
                let path = files.path(*item).to_string_lossy().into_owned();
                let renamed = replace_stem(&path, &old_stem, &new_stem);
                if renamed != path {
                    let handle = files.intern(Path::new(&renamed));
                    remap.insert(*item, handle);
                    *item = handle;
                }
            }

            self.outstanding.insert(old_stem.clone());
            self.outstanding.insert(new_stem.clone());
            patch.renamed.push((old_stem, new_stem));
        }

        graph.remap_prerequisites(&remap);

        for response in &responses {
            let contents = fs::read_to_string(response).map_err(|e| GraphError::ResponseFile {
                path: response.clone(),
                source: e,
            })?;
            let rewritten = patch
                .renamed
                .iter()
                .fold(contents, |text, (old, new)| replace_stem(&text, old, new));
            fs::write(response, rewritten).map_err(|e| GraphError::ResponseFile {
                path: response.clone(),
                source: e,
            })?;
        }
        patch.response_files = responses;

        if !patch.renamed.is_empty() {
            info!("patched {} binaries for hot reload", patch.renamed.len());
        }
        Ok(patch)
    }

    /// Deletes earlier hot reload binaries of the graph's link outputs that
    /// are neither current nor still loaded. Returns how many were removed.
    pub fn remove_stale_binaries(&self, graph: &ActionGraph, files: &FileTable) -> usize {
        let mut removed = 0;
        for (_, action) in graph.iter() {
            if action.kind != ActionKind::Link {
                continue;
            }
            let Some(&primary) = action.produced.first() else {
                continue;
            };
            let primary_path = files.path(primary);
            let current = stem_of(primary_path);
            let Ok(name) = split_stem(&current) else {
                continue;
            };
            let Some(dir) = primary_path.parent() else {
                continue;
            };
            let Ok(entries) = fs::read_dir(dir) else {
                continue;
            };

            for entry in entries.flatten() {
                let path = entry.path();
                let stem = stem_of(&path);
                if stem == current || self.outstanding.contains(&stem) {
                    continue;
                }
                let is_earlier = split_stem(&stem).is_ok_and(|other| {
                    other.base == name.base && other.tail == name.tail && other.has_suffix
                });
                if is_earlier && fs::remove_file(&path).is_ok() {
                    debug!(path = %path.display(), "removed stale hot reload binary");
                    removed += 1;
                }
            }
        }
        removed
    }

    fn unused_stem(
        &mut self,
        name: &StemParts,
        old_stem: &str,
        primary: &Path,
    ) -> Result<String, GraphError> {
        let file_name = primary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        for _ in 0..SUFFIX_RANGE {
            let suffix = self.rng.gen_range(0..SUFFIX_RANGE).to_string();
            let stem = name.with_suffix(&suffix);
            if stem == old_stem || self.outstanding.contains(&stem) {
                continue;
            }
            let candidate = primary.with_file_name(replace_stem(&file_name, old_stem, &stem));
            if !candidate.exists() {
                return Ok(stem);
            }
        }
        Err(GraphError::SuffixesExhausted {
            base: name.base.clone(),
        })
    }
}

/// A link output stem taken apart.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StemParts {
    /// `<Prefix>-<Module>`.
    base: String,
    /// The module part of `base`.
    module: String,
    /// `-<Platform>-<Configuration>`, or empty.
    tail: String,
    /// Whether a numeric suffix was present.
    has_suffix: bool,
}

impl StemParts {
    fn with_suffix(&self, suffix: &str) -> String {
        format!("{}-{suffix}{}", self.base, self.tail)
    }
}

/// Splits `<Prefix>-<Module>[-<digits>][-<Platform>-<Debug|Shipping>]`.
fn split_stem(stem: &str) -> Result<StemParts, GraphError> {
    let mut parts: Vec<&str> = stem.split('-').collect();
    let mut tail = String::new();
    if parts.len() >= 4 && matches!(parts.last(), Some(&("Debug" | "Shipping"))) {
        let configuration = parts.pop().unwrap_or_default();
        let platform = parts.pop().unwrap_or_default();
        tail = format!("-{platform}-{configuration}");
    }
    let has_suffix = parts.len() >= 3
        && parts
            .last()
            .is_some_and(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if has_suffix {
        parts.pop();
    }

    if parts.len() < 2 || parts.iter().any(|p| p.is_empty()) {
        return Err(GraphError::MissingPrefix {
            name: stem.to_string(),
        });
    }
    Ok(StemParts {
        base: parts.join("-"),
        module: parts[1..].join("-"),
        tail,
        has_suffix,
    })
}

/// File name up to the first `.`.
fn stem_of(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.split_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => name,
    }
}

/// Replaces whole-name occurrences of `old` in `text`.
///
/// An occurrence counts only when it is not embedded in a longer name, so
/// renaming `Kiln-Game` leaves `Kiln-GameTools` alone.
fn replace_stem(text: &str, old: &str, new: &str) -> String {
    let is_name_char = |c: char| c.is_alphanumeric() || c == '-' || c == '_';
    let mut result = String::with_capacity(text.len());
    let mut last = 0;
    for (start, _) in text.match_indices(old) {
        if start < last {
            continue;
        }
        let end = start + old.len();
        let before = text[..start].chars().next_back();
        let after = text[end..].chars().next();
        if before.is_some_and(is_name_char) || after.is_some_and(is_name_char) {
            continue;
        }
        result.push_str(&text[last..start]);
        result.push_str(new);
        last = end;
    }
    result.push_str(&text[last..]);
    result
}
