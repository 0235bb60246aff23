//! Inventory item shapes and the content-hash dedup cache entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One inventory item as produced by a data-gathering plugin, before
/// dedup-optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Inventory type name (e.g. `"AWS:Application"`).
    pub name: String,
    /// Schema version for `content`.
    pub schema_version: String,
    /// When this item was captured. Excluded from the content hash since it
    /// drifts on every collection even when nothing else changed.
    pub capture_time: DateTime<Utc>,
    /// The actual inventory payload.
    pub content: serde_json::Value,
}

/// An emitted inventory item: either the full content, or a thin stub
/// referencing a previously-uploaded identical payload by hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InventoryItemOutcome {
    /// Content changed (or was never seen before): emit it in full.
    Full(InventoryItem),
    /// Content unchanged since the last upload: emit only identity + hash.
    Thin {
        /// Inventory type name.
        name: String,
        /// Schema version for the (omitted) content.
        schema_version: String,
        /// When this item was captured.
        capture_time: DateTime<Utc>,
        /// Base64 MD5 of the unchanged content.
        content_hash: String,
    },
}

/// Persistent cache entry: `name -> contentHash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InventoryCacheEntry {
    /// Base64-encoded MD5 digest of the last-seen `content` for this name.
    pub content_hash: String,
}

/// Richer inventory record surfaced by `GetInventoryData`, carrying the
/// fuller field set that distinguishes it from the slim
/// [`InventoryCacheEntry`] used for change detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationData {
    /// Package name.
    pub name: String,
    /// Installed version.
    pub version: String,
    /// Publisher, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    /// Reference URL, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Application type/category, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_type: Option<String>,
}
