//! Persisted include caches and the framed store format they share.
//!
//! Two caches live here, one pair per target:
//! - [`DirectIncludeCache`]: each file's raw include directives with their
//!   resolutions, valid while the file's modification time is unchanged.
//! - [`FlatClosureCache`]: each translation unit's flattened transitive
//!   include set, consulted by assemble-only runs.
//!
//! Both are written through [`store`], which frames a bincode payload behind
//! a header carrying magic bytes, store kind, schema version and checksum.
//! Every read is fail-safe: a missing, corrupt or outdated store loads as an
//! empty cache.

#![warn(missing_docs)]

pub mod direct_includes;
pub mod error;
pub mod flat_closure;
pub mod store;

pub use direct_includes::{DirectIncludeCache, DirectIncludeEntry, DirectiveRecord};
pub use error::CacheError;
pub use flat_closure::{FlatClosureCache, FlatClosureEntry};
pub use store::{read_header, read_store, write_store, StoreHeader, StoreKind};
