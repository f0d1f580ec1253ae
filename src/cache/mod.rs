//! Derived artifact cache
//!
//! Per-file entries computed from a source file, keyed by the flattened form
//! of its relative path, plus the bundle archive assembled from them.
//!
//! # Layout
//!
//! | Path | Content |
//! |------|---------|
//! | `<options_dir>/<key>` | JSON metadata record |
//! | `<transpile_dir>/<key>` | transformed copy |
//! | `<transpile_dir>/<key><map suffix>` | its source map |
//! | `<bootlist>` | manifest of bundle members |
//! | `<bundle_name>` | archive of members + their derived entries |
//!
//! Every invalidation decision is a modification-time comparison.

pub mod archive;
pub mod bundle;
pub mod freshness;
pub mod key;
pub mod options;

pub use archive::{Archiver, ZipArchiver};
pub use bundle::{BundleBuilder, Manifest};
pub use key::{flatten, CacheKey};
pub use options::{require_valid, DerivedCache, OptionsEntry, PruneReport};
