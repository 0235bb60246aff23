//! Install-state enumeration and the persisted per-package state record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle position of a single package, persisted as a small integer.
///
/// Ordering is stable -- these discriminants must never be renumbered, since
/// `installstate` files on disk encode them directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum InstallState {
    /// No record exists; implicit starting state.
    None = 0,
    /// A state file exists but could not be parsed or trusted.
    Unknown = 1,
    /// The package ended in a terminal failure.
    Failed = 2,
    /// An uninstall is in progress (may resume after reboot).
    Uninstalling = 3,
    /// The package was cleanly uninstalled.
    Uninstalled = 4,
    /// The version directory was just added/refreshed, not yet acted on.
    New = 5,
    /// An upgrade (uninstall of old + install of new) is in progress.
    Upgrading = 6,
    /// An install is in progress (may resume after reboot).
    Installing = 7,
    /// The package is installed and validated.
    Installed = 8,
    /// Rolling back a failed uninstall by reinstalling the prior version.
    RollbackUninstall = 9,
    /// Rolling back a failed install by reinstalling the prior version.
    RollbackInstall = 10,
}

impl InstallState {
    /// All discriminants in ascending, stable order.
    pub const ALL: [InstallState; 11] = [
        InstallState::None,
        InstallState::Unknown,
        InstallState::Failed,
        InstallState::Uninstalling,
        InstallState::Uninstalled,
        InstallState::New,
        InstallState::Upgrading,
        InstallState::Installing,
        InstallState::Installed,
        InstallState::RollbackUninstall,
        InstallState::RollbackInstall,
    ];

    /// True for the two rollback states, which resume with swapped roles.
    pub fn is_rollback(self) -> bool {
        matches!(self, InstallState::RollbackInstall | InstallState::RollbackUninstall)
    }

    /// True for states that persist across a reboot and must be resumed.
    pub fn is_resumable(self) -> bool {
        matches!(
            self,
            InstallState::Installing
                | InstallState::Uninstalling
                | InstallState::Upgrading
                | InstallState::RollbackInstall
                | InstallState::RollbackUninstall
        )
    }
}

// Serialized by hand as its raw discriminant rather than pulling in
// `serde_repr`, to keep the dependency surface plain-serde only.
use serde::de::{self, Deserializer};
use serde::ser::Serializer;

impl Serialize for InstallState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for InstallState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let n = u8::deserialize(deserializer)?;
        InstallState::ALL
            .into_iter()
            .find(|s| *s as u8 == n)
            .ok_or_else(|| de::Error::custom(format!("invalid InstallState discriminant: {n}")))
    }
}

/// Persisted per-package install-state record (`installstate` file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageInstallState {
    /// Package identity (arn).
    pub name: String,
    /// Version this record currently pertains to.
    pub version: crate::version::Version,
    /// Current lifecycle state.
    pub state: InstallState,
    /// Timestamp of the last transition.
    pub time: DateTime<Utc>,
    /// Last version that reached `Installed`; empty after a clean uninstall.
    pub last_installed_version: crate::version::Version,
    /// Number of times `state` was re-entered without changing; advisory
    /// only, never read back to drive control flow.
    pub retry_count: u32,
}

impl PackageInstallState {
    /// Build a fresh record transitioning into `state` for the first time.
    pub fn new(name: impl Into<String>, version: crate::version::Version, state: InstallState, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            version,
            state,
            time: now,
            last_installed_version: crate::version::Version::new(""),
            retry_count: 0,
        }
    }
}
