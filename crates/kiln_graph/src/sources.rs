//! Module source discovery and working-set membership.

use std::fs;
use std::path::{Path, PathBuf};

use kiln_deps::SourceKind;

use crate::error::GraphError;

/// Files found under a module's source root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleFiles {
    /// Translation units, sorted.
    pub sources: Vec<PathBuf>,
    /// Headers, sorted.
    pub headers: Vec<PathBuf>,
}

/// Recursively lists the translation units and headers under `root`.
///
/// Hidden directories are skipped. A missing root yields no files.
pub fn walk_module(root: &Path) -> Result<ModuleFiles, GraphError> {
    let mut files = ModuleFiles::default();
    if !root.is_dir() {
        return Ok(files);
    }

    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| GraphError::Io {
            path: dir.clone(),
            source: e,
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| GraphError::Io {
                path: dir.clone(),
                source: e,
            })?;
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if hidden {
                continue;
            }
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            match SourceKind::from_path(&path) {
                SourceKind::Header => files.headers.push(path),
                kind if kind.is_compilable() => files.sources.push(path),
                _ => {}
            }
        }
    }

    files.sources.sort();
    files.headers.sort();
    Ok(files)
}

/// Whether a file counts as part of the developer's working set.
///
/// Files under source control are typically checked out read-only until
/// edited, so a writable file is one being worked on.
pub fn is_in_working_set(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}
