//! Trait boundaries for the out-of-scope external collaborators.
//!
//! The remote manifest/artifact fetch service and the sub-document executor
//! are explicitly out of scope for this core; the engine only depends on
//! these two traits, so the embedding agent runtime supplies real
//! implementations while tests substitute fakes -- trait-typed
//! collaborators swapped per environment rather than a mocking framework.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result of resolving a manifest for `(arn, version)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestResolution {
    /// The arn as resolved by the service (may differ in case/form from the
    /// request).
    pub resolved_arn: String,
    /// The concrete version resolved from a `latest` request, or echoed back
    /// for an explicit request.
    pub resolved_version: String,
    /// True if the previously cached manifest is still current and no
    /// re-download is necessary.
    pub was_cached: bool,
}

/// Final disposition reported to the service for telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    /// The request completed successfully with no further action needed.
    Success,
    /// The request completed successfully but a reboot is required before
    /// the change takes full effect.
    SuccessAndReboot,
    /// The request failed.
    Failed,
    /// The request was cancelled via the shutdown signal.
    Cancelled,
}

/// Failures from the remote manifest/artifact fetch service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The named endpoint (`""`, `beta`, `gamma`) has no backing
    /// implementation.
    #[error("unsupported repository endpoint: {0}")]
    UnsupportedEndpoint(String),
    /// The manifest could not be resolved (network failure, unknown
    /// package/version, etc).
    #[error("manifest resolution failed: {0}")]
    ManifestUnavailable(String),
    /// The artifact archive could not be downloaded.
    #[error("artifact download failed: {0}")]
    ArtifactUnavailable(String),
}

/// Remote manifest/artifact fetch service (out of scope; modeled as a
/// trait boundary).
#[async_trait]
pub trait PackageService: Send + Sync {
    /// Resolve `version` (or `latest`) to a concrete manifest for `arn`.
    async fn download_manifest(&self, arn: &str, version: &str) -> Result<ManifestResolution, ServiceError>;

    /// Download the artifact for `(arn, version)`, returning a local staging
    /// directory whose contents (manifest plus action scripts) the engine
    /// copies into the repository's version directory.
    async fn download_artifact(&self, arn: &str, version: &str) -> Result<PathBuf, ServiceError>;

    /// Best-effort telemetry; failures here are never surfaced to the
    /// caller of the engine.
    async fn report_result(&self, status: ResultStatus);
}

/// One plugin's input, as composed by the installer action reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginState {
    /// Plugin name (`aws:runShellScript`, `aws:runPowerShellScript`, or a
    /// name carried over from a legacy JSON document).
    pub plugin_name: String,
    /// Orchestration subdirectory this plugin's output is grouped under.
    pub orchestration_dir: String,
    /// The working directory the commands run in.
    pub working_dir: PathBuf,
    /// The literal command sequence to execute.
    pub commands: Vec<String>,
}

/// The result of running one plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginResult {
    /// Process exit code.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// True if the executor determined a reboot is required before this
    /// plugin's effect is complete.
    pub reboot_required: bool,
}

/// Failures from the sub-document executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A legacy JSON action document had zero plugins.
    #[error("document has no plugins")]
    EmptyDocument,
    /// The document failed to parse.
    #[error("document parse error: {0}")]
    ParseError(String),
    /// The executor itself failed to run the plugins (sub-process spawn
    /// failure, orchestration directory unwritable, etc).
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

/// Sub-document executor (out of scope; modeled as a trait boundary).
/// Parses an embedded JSON document or shell/PowerShell script into
/// plugin states and runs them, returning per-plugin results.
#[async_trait]
pub trait SubDocumentExecutor: Send + Sync {
    /// Parse a legacy JSON action document into plugin states.
    fn parse_document(&self, raw: &str, orchestration_dir: &str) -> Result<Vec<PluginState>, ExecutorError>;

    /// Run `plugins`, keyed by a synthesized plugin id in the returned map.
    async fn execute_document(
        &self,
        plugins: Vec<PluginState>,
        doc_id: &str,
        created_at: DateTime<Utc>,
        orchestration_dir: &str,
    ) -> Result<HashMap<String, PluginResult>, ExecutorError>;
}

/// Platform/instance metadata otherwise supplied by the surrounding agent
/// runtime's environment-detection collaborator (out of scope). The
/// installer action reader composes this into the env vars passed to
/// action scripts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
    /// Operating system name (`linux`, `windows`, `darwin`, ...).
    pub platform_name: String,
    /// Operating system version string.
    pub platform_version: String,
    /// Distribution family (`debian`, `redhat`, ...), empty where not applicable.
    pub platform_family: String,
    /// CPU architecture (`x86_64`, `aarch64`, ...).
    pub architecture: String,
    /// Init system in use (`systemd`, `launchd`, ...), empty where not applicable.
    pub init_system: String,
    /// Native package manager name (`apt`, `yum`, ...), empty where not applicable.
    pub package_manager: String,
    /// Host instance identifier.
    pub instance_id: String,
    /// Host instance type/size.
    pub instance_type: String,
    /// Cloud region, empty outside a cloud environment.
    pub region: String,
    /// Cloud account identifier, empty outside a cloud environment.
    pub account_id: String,
    /// Cloud availability zone, empty outside a cloud environment.
    pub availability_zone: String,
}

/// Source of the platform/instance metadata in [`EnvironmentSnapshot`].
pub trait EnvironmentInfo: Send + Sync {
    /// Take a snapshot of the current platform/instance metadata.
    fn snapshot(&self) -> EnvironmentSnapshot;
}
