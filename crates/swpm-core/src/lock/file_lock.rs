//! Cross-process advisory lock backed by a lock file (component B).

use std::path::{Path, PathBuf};

use chrono::Utc;
use swpm_schema::LockPayload;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Failures from the file locker that are not simply "lock held".
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock file exists but its contents are not a valid [`LockPayload`].
    #[error("lock file at {path:?} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// Underlying filesystem failure.
    #[error("lock I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Cross-process advisory lock over a single lock file path.
///
/// Holds no state itself -- every call is parameterized by the lock file
/// path, owner id, and timeout.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileLocker;

impl FileLocker {
    /// Acquire the lock at `path` on behalf of `owner_id`, timing out after
    /// `timeout_secs`.
    ///
    /// Returns `Ok(true)` on success, `Ok(false)` if a live lock is held by
    /// a different owner. Concurrent callers race on atomic file creation;
    /// the loser observes `Ok(false)` and does not spin -- retry policy is
    /// the caller's decision.
    pub async fn lock(
        &self,
        path: &Path,
        owner_id: &str,
        timeout_secs: u64,
    ) -> Result<bool, LockError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| LockError::Io { path: path.to_path_buf(), source })?;
        }

        let now = Utc::now();
        let payload = LockPayload::new(owner_id, now, timeout_secs);
        let encoded = serde_json::to_vec(&payload)
            .expect("LockPayload serialization is infallible");

        match open_exclusive(path).await {
            Ok(mut file) => {
                file.write_all(&encoded)
                    .await
                    .map_err(|source| LockError::Io { path: path.to_path_buf(), source })?;
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                self.try_reclaim_stale(path, &payload, &encoded, now).await
            }
            Err(source) => Err(LockError::Io { path: path.to_path_buf(), source }),
        }
    }

    /// Release the lock at `path` if it is currently held by `owner_id` and
    /// has not expired.
    ///
    /// Returns `Ok(true)` if the lock was held and is now released,
    /// `Ok(false)` otherwise (absent, expired, or owned by someone else).
    pub async fn unlock(&self, path: &Path, owner_id: &str) -> Result<bool, LockError> {
        let existing = match read_payload(path).await? {
            Some(payload) => payload,
            None => return Ok(false),
        };

        let now = Utc::now();
        if existing.owner_id != owner_id || existing.is_expired(now) {
            return Ok(false);
        }

        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(LockError::Io { path: path.to_path_buf(), source }),
        }
    }

    /// A lock file exists at `path` and is not expired as of now.
    pub async fn is_locked(&self, path: &Path) -> Result<bool, LockError> {
        let now = Utc::now();
        Ok(read_payload(path).await?.map(|p| !p.is_expired(now)).unwrap_or(false))
    }

    async fn try_reclaim_stale(
        &self,
        path: &Path,
        new_payload: &LockPayload,
        encoded: &[u8],
        now: chrono::DateTime<Utc>,
    ) -> Result<bool, LockError> {
        let existing = match read_payload(path).await? {
            Some(payload) => payload,
            // The file vanished between our failed create and this read
            // (another owner unlocked concurrently); nothing is held, so
            // report we lost the race rather than retry unboundedly.
            None => return Ok(false),
        };

        if !existing.is_expired(now) {
            return Ok(false);
        }
        let _ = new_payload;

        // Stale lock: anyone may reclaim it. Race other reclaimers by
        // writing to a temp file and renaming over the stale one, which is
        // atomic on the same filesystem.
        let tmp_path = path.with_extension("lock.tmp");
        tokio::fs::write(&tmp_path, encoded)
            .await
            .map_err(|source| LockError::Io { path: path.to_path_buf(), source })?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|source| LockError::Io { path: path.to_path_buf(), source })?;
        Ok(true)
    }
}

async fn open_exclusive(path: &Path) -> std::io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
}

async fn read_payload(path: &Path) -> Result<Option<LockPayload>, LockError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let payload = serde_json::from_slice(&bytes)
                .map_err(|source| LockError::Corrupt { path: path.to_path_buf(), source })?;
            Ok(Some(payload))
        }
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(LockError::Io { path: path.to_path_buf(), source }),
    }
}
