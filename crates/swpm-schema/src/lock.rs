//! Cross-process lock file payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// JSON content of a `<arn>.lockfile`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockPayload {
    /// Identity of whoever holds the lock (process/thread/request id).
    pub owner_id: String,
    /// RFC3339 UTC instant after which the lock is considered stale.
    pub expires_at: DateTime<Utc>,
}

impl LockPayload {
    /// Build a payload expiring `timeout` seconds after `now`.
    pub fn new(owner_id: impl Into<String>, now: DateTime<Utc>, timeout_secs: u64) -> Self {
        Self {
            owner_id: owner_id.into(),
            expires_at: now + chrono::Duration::seconds(timeout_secs as i64),
        }
    }

    /// A lock with `expires_at <= now` is expired and may be reclaimed by
    /// any owner -- boundary case: `expires_at == now` counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
