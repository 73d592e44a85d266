//! Directory manifests.
//!
//! A manifest is the canonical snapshot of one sync root: a sorted map from
//! relative path to (mtime, size, kind). Manifests are produced by scans,
//! compared by the differ, and the last successfully synced one is persisted
//! per profile by the store.

mod scan;
mod store;
mod types;

pub use scan::{ScanError, scan_local};
pub use store::{ManifestStore, ProfileState, StoreError, merge};
pub use types::{EntryKind, Manifest, ManifestEntry, ManifestError};
