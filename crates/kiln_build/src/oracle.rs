//! Adapters feeding scan results into graph planning and snapshot validation.

use std::path::Path;

use kiln_common::FileHandle;
use kiln_config::{BackslashPolicy, ScanConfig};
use kiln_deps::{DirectiveExtractor, ScanError, SourceKind, TargetScanContext};
use kiln_graph::{Action, IncludeOracle, ReflectionProbe};
use tracing::debug;

/// Answers include queries from the persisted flat closures of each target.
///
/// A unit missing from the flat store falls back to a closure built from
/// persisted direct includes alone, which is recorded for later runs. Only
/// when that is incomplete too are the unit's dependencies unknown.
pub(crate) struct FlatOracle<'a> {
    contexts: &'a mut [TargetScanContext],
}

impl<'a> FlatOracle<'a> {
    pub(crate) fn new(contexts: &'a mut [TargetScanContext]) -> Self {
        Self { contexts }
    }
}

impl IncludeOracle for FlatOracle<'_> {
    fn includes_of(&mut self, action: &Action) -> Option<Vec<FileHandle>> {
        let Some(source) = action.primary_source else {
            return Some(Vec::new());
        };
        let context = self
            .contexts
            .iter_mut()
            .find(|c| c.target() == action.target)?;
        if let Some(entry) = context.flat_includes(source) {
            let mut includes = entry.includes.clone();
            includes.extend(entry.pch);
            return Some(includes);
        }

        let module = action.module.as_deref()?;
        let closure = match context.cached_closure(source, module) {
            Ok(closure) => closure?,
            Err(e) => {
                debug!(action = %action.status, "no cached closure: {e}");
                return None;
            }
        };
        let pch = context.module_pch(module);
        context.record_flat(source, pch, &closure);
        let mut includes: Vec<FileHandle> = closure.into_iter().collect();
        includes.extend(pch);
        Some(includes)
    }
}

/// Re-reads headers for reflected-type markers.
pub(crate) struct MarkerProbe {
    extractor: DirectiveExtractor,
}

impl MarkerProbe {
    pub(crate) fn new(scan: &ScanConfig) -> Result<Self, ScanError> {
        Ok(Self {
            extractor: DirectiveExtractor::new(&scan.reflection_markers, scan.chunk_size)?,
        })
    }
}

impl ReflectionProbe for MarkerProbe {
    fn has_reflected_types(&mut self, path: &Path) -> Option<bool> {
        let bytes = std::fs::read(path).ok()?;
        let text = String::from_utf8_lossy(&bytes);
        self.extractor
            .extract(path, &text, SourceKind::from_path(path), BackslashPolicy::Allow)
            .ok()
            .map(|e| e.reflected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_reads_markers() {
        let dir = tempfile::tempdir().unwrap();
        let reflected = dir.path().join("Thing.h");
        let plain = dir.path().join("Plain.h");
        std::fs::write(&reflected, "UCLASS()\nclass UThing {};\n").unwrap();
        std::fs::write(&plain, "struct Plain {};\n").unwrap();

        let mut probe = MarkerProbe::new(&ScanConfig::default()).unwrap();
        assert_eq!(probe.has_reflected_types(&reflected), Some(true));
        assert_eq!(probe.has_reflected_types(&plain), Some(false));
        assert_eq!(probe.has_reflected_types(&dir.path().join("Gone.h")), None);
    }
}
