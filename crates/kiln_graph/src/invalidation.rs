//! Deciding whether a persisted snapshot can be reused.
//!
//! Checks run in a fixed order and the first failing one names the reason:
//!
//! 1. the snapshot exists;
//! 2. no generated project file is newer;
//! 3. no target descriptor is newer or deleted;
//! 4. no module rules file is newer or deleted;
//! 5. the running executable is not newer;
//! 6. no consulted configuration file is newer;
//! 7. the header carries the current schema version and the payload decodes
//!    into a valid snapshot;
//! 8. no scanned header was deleted or changed its reflected-marker state;
//! 9. with adaptive unity builds, no modified source changed working-set
//!    membership.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use kiln_cache::{read_header, CacheError, StoreKind};
use kiln_common::{modified_time, FileTable};
use tracing::{debug, info};

use crate::snapshot::{BuildGraphSnapshot, SNAPSHOT_VERSION};
use crate::sources::is_in_working_set;

/// Why a snapshot was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationReason {
    /// No snapshot file exists.
    Missing,
    /// A generated project file is newer than the snapshot.
    ProjectFilesNewer {
        /// The newer file.
        path: PathBuf,
    },
    /// A target descriptor changed or was deleted.
    TargetFileChanged {
        /// The changed file.
        path: PathBuf,
    },
    /// A module rules file changed or was deleted.
    ModuleFileChanged {
        /// The changed file.
        path: PathBuf,
    },
    /// The running executable was rebuilt after the snapshot was written.
    ExecutableNewer,
    /// A consulted configuration file is newer than the snapshot.
    ConfigNewer {
        /// The newer file.
        path: PathBuf,
    },
    /// The snapshot was written with another schema version.
    VersionMismatch {
        /// Version found in the file.
        found: u32,
        /// Version this build writes.
        expected: u32,
    },
    /// The snapshot could not be read or decoded.
    Unreadable {
        /// What went wrong.
        reason: String,
    },
    /// The snapshot decoded but is missing actions or targets.
    InvalidContents,
    /// A scanned header was deleted or gained or lost reflected types.
    ReflectedHeadersChanged {
        /// The header.
        path: PathBuf,
    },
    /// A modified source entered or left the adaptive working set.
    WorkingSetChanged {
        /// The source.
        path: PathBuf,
    },
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationReason::Missing => write!(f, "no existing snapshot"),
            InvalidationReason::ProjectFilesNewer { path } => {
                write!(f, "project files are newer ({})", path.display())
            }
            InvalidationReason::TargetFileChanged { path } => {
                write!(f, "changes to target files ({})", path.display())
            }
            InvalidationReason::ModuleFileChanged { path } => {
                write!(f, "changes to module files ({})", path.display())
            }
            InvalidationReason::ExecutableNewer => write!(f, "kiln executable is newer"),
            InvalidationReason::ConfigNewer { path } => {
                write!(f, "configuration files are newer ({})", path.display())
            }
            InvalidationReason::VersionMismatch { found, expected } => write!(
                f,
                "snapshot schema version mismatch (found {found}, expected {expected})"
            ),
            InvalidationReason::Unreadable { reason } => {
                write!(f, "couldn't read existing snapshot ({reason})")
            }
            InvalidationReason::InvalidContents => write!(f, "existing snapshot appears to be invalid"),
            InvalidationReason::ReflectedHeadersChanged { path } => {
                write!(f, "reflected type headers changed ({})", path.display())
            }
            InvalidationReason::WorkingSetChanged { path } => {
                write!(f, "adaptive working set changed ({})", path.display())
            }
        }
    }
}

/// Files consulted when validating a snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ValidationInputs<'a> {
    /// The snapshot file.
    pub snapshot_path: &'a Path,
    /// Generated project files.
    pub project_files: &'a [PathBuf],
    /// Descriptor files of the requested targets.
    pub target_files: &'a [PathBuf],
    /// Rules files of every module of the requested targets.
    pub module_files: &'a [PathBuf],
    /// The running executable, when known.
    pub executable: Option<&'a Path>,
    /// Configuration files consulted by the build.
    pub config_files: &'a [PathBuf],
    /// Whether adaptive unity builds are enabled.
    pub adaptive_working_set: bool,
}

/// Re-reads the reflected-marker state of a header.
pub trait ReflectionProbe {
    /// Returns whether `path` declares reflected types, or `None` when it
    /// cannot be read.
    fn has_reflected_types(&mut self, path: &Path) -> Option<bool>;
}

/// Loads the snapshot at `inputs.snapshot_path` if every staleness check
/// passes, or returns the first failing check's reason.
pub fn load_validated(
    inputs: &ValidationInputs<'_>,
    files: &FileTable,
    probe: &mut dyn ReflectionProbe,
) -> Result<BuildGraphSnapshot, InvalidationReason> {
    let result = validate(inputs, files, probe);
    match &result {
        Ok(_) => debug!(path = %inputs.snapshot_path.display(), "reusing snapshot"),
        Err(reason) => info!("snapshot is invalid: {reason}"),
    }
    result
}

fn validate(
    inputs: &ValidationInputs<'_>,
    files: &FileTable,
    probe: &mut dyn ReflectionProbe,
) -> Result<BuildGraphSnapshot, InvalidationReason> {
    let Some(written) = modified_time(inputs.snapshot_path) else {
        return Err(InvalidationReason::Missing);
    };

    if let Some(path) = first_newer(inputs.project_files, written) {
        return Err(InvalidationReason::ProjectFilesNewer { path });
    }
    if let Some(path) = first_changed(inputs.target_files, written) {
        return Err(InvalidationReason::TargetFileChanged { path });
    }
    if let Some(path) = first_changed(inputs.module_files, written) {
        return Err(InvalidationReason::ModuleFileChanged { path });
    }
    if let Some(exe) = inputs.executable {
        if modified_time(exe).is_some_and(|t| t > written) {
            return Err(InvalidationReason::ExecutableNewer);
        }
    }
    if let Some(path) = first_newer(inputs.config_files, written) {
        return Err(InvalidationReason::ConfigNewer { path });
    }

    let header = read_header(inputs.snapshot_path).map_err(unreadable)?;
    if header.kind != StoreKind::Snapshot {
        return Err(InvalidationReason::Unreadable {
            reason: format!("not a snapshot ({:?})", header.kind),
        });
    }
    if header.schema_version != SNAPSHOT_VERSION {
        return Err(InvalidationReason::VersionMismatch {
            found: header.schema_version,
            expected: SNAPSHOT_VERSION,
        });
    }
    let snapshot = BuildGraphSnapshot::load(inputs.snapshot_path, files).map_err(unreadable)?;
    if !snapshot.is_valid() {
        return Err(InvalidationReason::InvalidContents);
    }

    for module in snapshot.targets.iter().flat_map(|t| &t.modules) {
        for header in &module.headers {
            let path = files.path(header.file);
            match modified_time(path) {
                None => {
                    return Err(InvalidationReason::ReflectedHeadersChanged {
                        path: path.to_path_buf(),
                    })
                }
                Some(time) if time > written => {
                    if probe.has_reflected_types(path) != Some(header.reflected) {
                        return Err(InvalidationReason::ReflectedHeadersChanged {
                            path: path.to_path_buf(),
                        });
                    }
                }
                Some(_) => {}
            }
        }
    }

    if inputs.adaptive_working_set {
        let recorded: std::collections::HashSet<_> = snapshot.working_set.iter().copied().collect();
        for &source in snapshot.targets.iter().flat_map(|t| &t.sources) {
            let path = files.path(source);
            if modified_time(path).is_some_and(|t| t > written)
                && is_in_working_set(path) != recorded.contains(&source)
            {
                return Err(InvalidationReason::WorkingSetChanged {
                    path: path.to_path_buf(),
                });
            }
        }
    }

    Ok(snapshot)
}

fn unreadable(error: CacheError) -> InvalidationReason {
    InvalidationReason::Unreadable {
        reason: error.to_string(),
    }
}

fn first_newer(paths: &[PathBuf], written: SystemTime) -> Option<PathBuf> {
    paths
        .iter()
        .find(|p| modified_time(p).is_some_and(|t| t > written))
        .cloned()
}

fn first_changed(paths: &[PathBuf], written: SystemTime) -> Option<PathBuf> {
    paths
        .iter()
        .find(|p| modified_time(p).map_or(true, |t| t > written))
        .cloned()
}
