//! Aggregated error type surfaced by the lifecycle engine.

use thiserror::Error;

use crate::installer::InstallerError;
use crate::lock::LockError;
use crate::repo::RepositoryError;
use crate::service::{ExecutorError, ServiceError};

/// The failure taxonomy the lifecycle engine surfaces to its caller. Every
/// variant except `Locked` implies a terminal `Failed` state was persisted
/// for the affected version.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Request input failed validation (bad `action`, non-empty `source`,
    /// empty `name`, ...).
    #[error("validation error: {0}")]
    Validation(String),

    /// The in-process or cross-process lock is held by another owner.
    #[error("package is locked by another operation")]
    Locked,

    /// Artifacts could not be obtained/validated after a refresh attempt.
    #[error("package artifacts are unobtainable: {0}")]
    Unobtainable(String),

    /// The requested repository endpoint or action is not supported.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// More than one action script/document exists for a single action.
    #[error("ambiguous action: {0}")]
    AmbiguousAction(String),

    /// The install action failed and no rollback was possible (or rollback
    /// itself is the operation in progress).
    #[error("install failed: {0}")]
    InstallFailed(String),

    /// The uninstall action failed outside of an upgrade context.
    #[error("uninstall failed: {0}")]
    UninstallFailed(String),

    /// A rollback attempt itself failed.
    #[error("rollback failed: {0}")]
    RollbackFailed(String),

    /// A manifest was missing, malformed, or did not match the expected
    /// identity.
    #[error("manifest invalid: {0}")]
    ManifestInvalid(String),

    /// An uninstall was requested for a specific version that does not
    /// match the currently installed one.
    #[error("version mismatch: requested {requested}, installed {installed}")]
    VersionMismatch { requested: String, installed: String },

    /// The operation was cancelled via the shutdown signal.
    #[error("cancelled")]
    Cancelled,

    /// A lower-level repository failure.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// A lower-level lock failure (IO, not lock-held).
    #[error(transparent)]
    Lock(#[from] LockError),

    /// A lower-level installer-action-reader failure.
    #[error(transparent)]
    Installer(#[from] InstallerError),

    /// A failure from the external package service collaborator.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// A failure from the external sub-document executor collaborator.
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

impl EngineError {
    /// True if this error implies a terminal `Failed` state was (or should
    /// be) persisted for the affected version -- every kind except
    /// `Locked`.
    pub fn persists_failed_state(&self) -> bool {
        !matches!(self, EngineError::Locked)
    }
}
