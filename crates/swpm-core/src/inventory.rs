//! Content-hash dedup cache that elides unchanged inventory items on
//! upload (component G).
//!
//! For each item in caller order, compute MD5 of the JSON-serialized
//! `content` only (never `captureTime`, which drifts every collection) and
//! compare against a persisted `name -> hash` map. Unchanged items emit a
//! thin stub; changed items emit in full and the map is updated. Both the
//! thin and full emission lists are returned, in the original order, so the
//! uploader can choose based on the upstream service's response.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use md5::{Digest, Md5};
use swpm_schema::{InventoryCacheEntry, InventoryItem, InventoryItemOutcome};
use thiserror::Error;
use tokio::sync::Mutex;

/// Failures from the inventory optimizer's persistent store.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The cache file failed to (de)serialize.
    #[error("inventory cache malformed at {path:?}: {source}")]
    Malformed { path: PathBuf, source: serde_json::Error },
    /// Underlying filesystem failure.
    #[error("inventory cache I/O error at {path:?}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

/// Persistent, serialized-access content-hash cache.
pub struct InventoryOptimizer {
    cache_path: PathBuf,
    cache: Mutex<HashMap<String, InventoryCacheEntry>>,
}

impl InventoryOptimizer {
    /// Load (or start empty) the cache file at `cache_path`.
    pub async fn load(cache_path: PathBuf) -> Result<Self, InventoryError> {
        let cache = match tokio::fs::read(&cache_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|source| InventoryError::Malformed { path: cache_path.clone(), source })?,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => return Err(InventoryError::Io { path: cache_path.clone(), source }),
        };
        Ok(Self { cache_path, cache: Mutex::new(cache) })
    }

    /// Process `items` strictly in order, returning `(thin, full)` emission
    /// lists in the original order. `full` always carries every item in its
    /// full form, a fallback the uploader can fall back to unconditionally;
    /// `thin` applies the cache-optimized stubbing, so the two lists diverge
    /// whenever any item is unchanged. Hash updates are committed to disk
    /// only after the whole batch is processed successfully.
    pub async fn optimize(
        &self,
        items: Vec<InventoryItem>,
    ) -> Result<(Vec<InventoryItemOutcome>, Vec<InventoryItemOutcome>), InventoryError> {
        let mut cache = self.cache.lock().await;

        let mut thin = Vec::with_capacity(items.len());
        let mut full = Vec::with_capacity(items.len());

        for item in items {
            let hash = content_hash(&item.content);
            let unchanged = cache.get(&item.name).is_some_and(|entry| entry.content_hash == hash);

            if unchanged {
                thin.push(InventoryItemOutcome::Thin {
                    name: item.name.clone(),
                    schema_version: item.schema_version.clone(),
                    capture_time: item.capture_time,
                    content_hash: hash,
                });
            } else {
                cache.insert(item.name.clone(), InventoryCacheEntry { content_hash: hash });
                thin.push(InventoryItemOutcome::Full(item.clone()));
            }
            full.push(InventoryItemOutcome::Full(item));
        }

        write_cache(&self.cache_path, &cache).await?;
        Ok((thin, full))
    }

    /// Current persisted hash for `name`, if any (test/inspection helper).
    pub async fn cached_hash(&self, name: &str) -> Option<String> {
        self.cache.lock().await.get(name).map(|entry| entry.content_hash.clone())
    }
}

/// Base64 MD5 of the JSON-serialized `content`, excluding capture time.
fn content_hash(content: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(content).expect("serde_json::Value serialization is infallible");
    let digest = Md5::digest(&bytes);
    base64::engine::general_purpose::STANDARD.encode(digest)
}

async fn write_cache(path: &Path, cache: &HashMap<String, InventoryCacheEntry>) -> Result<(), InventoryError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|source| InventoryError::Io { path: path.to_path_buf(), source })?;
    }
    let content = serde_json::to_vec_pretty(cache)
        .map_err(|source| InventoryError::Malformed { path: path.to_path_buf(), source })?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &content).await.map_err(|source| InventoryError::Io { path: path.to_path_buf(), source })?;
    tokio::fs::rename(&tmp, path).await.map_err(|source| InventoryError::Io { path: path.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn item(name: &str, content: serde_json::Value) -> InventoryItem {
        InventoryItem { name: name.to_string(), schema_version: "1.0".to_string(), capture_time: Utc::now(), content }
    }

    #[tokio::test]
    async fn second_emission_of_unchanged_content_is_thin() {
        let dir = tempfile::tempdir().unwrap();
        let optimizer = InventoryOptimizer::load(dir.path().join("cache.json")).await.unwrap();

        let (thin1, _) = optimizer.optimize(vec![item("AWS:Application", json!({"a": 1}))]).await.unwrap();
        assert!(matches!(thin1[0], InventoryItemOutcome::Full(_)));

        let (thin2, _) = optimizer.optimize(vec![item("AWS:Application", json!({"a": 1}))]).await.unwrap();
        assert!(matches!(thin2[0], InventoryItemOutcome::Thin { .. }));
    }

    #[tokio::test]
    async fn full_is_always_full_even_when_thin_stubs() {
        let dir = tempfile::tempdir().unwrap();
        let optimizer = InventoryOptimizer::load(dir.path().join("cache.json")).await.unwrap();

        optimizer.optimize(vec![item("AWS:Application", json!({"a": 1}))]).await.unwrap();

        let (thin, full) = optimizer.optimize(vec![item("AWS:Application", json!({"a": 1}))]).await.unwrap();
        assert!(matches!(thin[0], InventoryItemOutcome::Thin { .. }));
        assert!(matches!(full[0], InventoryItemOutcome::Full(_)));
    }

    #[tokio::test]
    async fn capture_time_alone_never_changes_the_hash() {
        let dir = tempfile::tempdir().unwrap();
        let optimizer = InventoryOptimizer::load(dir.path().join("cache.json")).await.unwrap();

        let mut first = item("AWS:Application", json!({"a": 1}));
        first.capture_time = Utc::now();
        optimizer.optimize(vec![first.clone()]).await.unwrap();
        let hash_before = optimizer.cached_hash("AWS:Application").await.unwrap();

        let mut second = first;
        second.capture_time = second.capture_time + chrono::Duration::hours(3);
        optimizer.optimize(vec![second]).await.unwrap();
        let hash_after = optimizer.cached_hash("AWS:Application").await.unwrap();

        assert_eq!(hash_before, hash_after);
    }

    #[tokio::test]
    async fn cache_persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        {
            let optimizer = InventoryOptimizer::load(path.clone()).await.unwrap();
            optimizer.optimize(vec![item("AWS:Application", json!({"a": 1}))]).await.unwrap();
        }

        let reloaded = InventoryOptimizer::load(path).await.unwrap();
        let (thin, _) = reloaded.optimize(vec![item("AWS:Application", json!({"a": 1}))]).await.unwrap();
        assert!(matches!(thin[0], InventoryItemOutcome::Thin { .. }));
    }

    #[tokio::test]
    async fn items_are_emitted_in_caller_order() {
        let dir = tempfile::tempdir().unwrap();
        let optimizer = InventoryOptimizer::load(dir.path().join("cache.json")).await.unwrap();
        let items = vec![item("B", json!({})), item("A", json!({}))];
        let (thin, _) = optimizer.optimize(items).await.unwrap();
        let names: Vec<&str> = thin
            .iter()
            .map(|outcome| match outcome {
                InventoryItemOutcome::Full(i) => i.name.as_str(),
                InventoryItemOutcome::Thin { name, .. } => name.as_str(),
            })
            .collect();
        assert_eq!(names, vec!["B", "A"]);
    }
}
