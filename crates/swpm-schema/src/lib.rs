//! Shared wire types for the package lifecycle core.
//!
//! This crate defines the canonical data structures persisted and exchanged
//! by the lifecycle engine: install state, package manifests, version
//! strings, lock file payloads, trace records, and inventory cache entries.
//! It has no filesystem or network dependencies of its own -- everything
//! here is pure data plus parsing/ordering logic.

/// Install-state enumeration and the per-package install-state record.
pub mod install_state;
/// Cross-process lock file payload (`{ownerId, expiresAt}`).
pub mod lock;
/// Inventory cache entry and thin/full item shapes for the uploader.
pub mod inventory;
/// Package manifest (`manifest.json`) shape and validation rules.
pub mod manifest;
/// Linear per-action trace record.
pub mod trace;
/// Version string parsing, ordering, and the `latest` sentinel.
pub mod version;

pub use install_state::{InstallState, PackageInstallState};
pub use inventory::{ApplicationData, InventoryCacheEntry, InventoryItem, InventoryItemOutcome};
pub use lock::LockPayload;
pub use manifest::PackageManifest;
pub use trace::{Trace, Tracer};
pub use version::Version;
