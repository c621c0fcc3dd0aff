//! Incremental include-dependency discovery.
//!
//! The pieces, leaves first:
//! - [`HeaderSearch`] resolves a raw include token against an ordered list of
//!   directories, memoized per module.
//! - [`DirectiveExtractor`] scans file text for `#include`/`#import`
//!   directives and reflected-type markers.
//! - [`ClosureCache`] computes transitive include sets and tolerates cycles.
//! - [`TargetScanContext`] owns all of the above for one target, together
//!   with the target's persisted include caches.

#![warn(missing_docs)]

pub mod closure;
pub mod context;
pub mod error;
pub mod extract;
pub mod search;

pub use closure::{Closure, ClosureCache, ClosureState, Completeness, DirectiveSource, IncludeSet};
pub use context::{ScanPolicy, ScanReport, TargetScanContext};
pub use error::ScanError;
pub use extract::{DirectiveExtractor, Extraction, SourceKind};
pub use search::{HeaderSearch, SearchContext, SearchStats};
