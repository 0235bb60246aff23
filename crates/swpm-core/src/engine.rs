//! The install/uninstall/rollback state machine (component F).
//!
//! Orchestrates components A-E and the external collaborators behind a
//! single entry point, [`Engine::handle`]. Control flow for one request:
//! parse input -> acquire locks (B, C) -> load current install state (D) ->
//! resolve target version -> validate/refresh local artifacts (D, E) ->
//! enter the state machine (F), which calls the external executor on
//! composed plugin inputs (E) -> persist final state (D) -> release locks.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use swpm_schema::{InstallState, Trace, Tracer, Version};
use tracing::{info, warn};

use crate::config::{self, Config};
use crate::error::EngineError;
use crate::installer::{Installer, ResolvedAction};
use crate::repo::Repository;
pub use crate::service::ResultStatus;
use crate::service::{EnvironmentInfo, PackageService, SubDocumentExecutor};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The requested lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAction {
    /// Bring the package to the requested (or latest) version.
    Install,
    /// Remove the package.
    Uninstall,
}

/// One engine request: `{name, version, action, source, repository}`.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    /// Package identity (arn).
    pub name: String,
    /// Target version; empty or `"latest"` (case-insensitive) triggers
    /// manifest-driven resolution. For `Uninstall`, names the version to
    /// remove (must match the installed one if non-empty).
    pub version: String,
    /// `Install` or `Uninstall`.
    pub action: RequestAction,
    /// Reserved; must be empty.
    pub source: String,
    /// Repository endpoint hint: `""`, `"beta"`, or `"gamma"`; any other
    /// value is silently coerced to `""`.
    pub repository: String,
}

/// Response returned by [`Engine::handle`].
#[derive(Debug, Clone)]
pub struct EngineResponse {
    /// `0` on success (including `SuccessAndReboot`), `1` otherwise.
    pub exit_code: i32,
    /// Enumerated terminal status.
    pub status: ResultStatus,
    /// Prefix-truncated info log of operations.
    pub stdout: String,
    /// Prefix-truncated error log.
    pub stderr: String,
}

/// Cooperative cancellation signal, observed between steps (never
/// mid-action).
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A fresh, unset flag.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once [`CancelFlag::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum StepOutcome {
    Success,
    Reboot,
    Failed(String),
}

enum Outcome {
    Success,
    Reboot,
}

/// The lifecycle engine: owns the repository and the capability bundle
/// standing in for the out-of-scope external collaborators.
pub struct Engine {
    config: Config,
    repository: Arc<Repository>,
    services: HashMap<String, Arc<dyn PackageService>>,
    executor: Arc<dyn SubDocumentExecutor>,
    environment: Arc<dyn EnvironmentInfo>,
}

impl Engine {
    /// Build an engine. `services` is keyed by endpoint hint (`""`,
    /// `"beta"`, `"gamma"`) -- any request naming an unregistered endpoint
    /// fails `Unsupported`.
    pub fn new(
        config: Config,
        repository: Arc<Repository>,
        services: HashMap<String, Arc<dyn PackageService>>,
        executor: Arc<dyn SubDocumentExecutor>,
        environment: Arc<dyn EnvironmentInfo>,
    ) -> Self {
        Self { config, repository, services, executor, environment }
    }

    /// Handle one request to completion (or suspension pending reboot).
    /// Always returns a response; internal failures are reflected in
    /// `status`/`stderr`, never as a Rust `Err`.
    pub async fn handle(&self, request: EngineRequest, owner_id: &str, cancel: &CancelFlag) -> EngineResponse {
        let mut tracer = Tracer::new();

        let validated = match self.validate(&request) {
            Ok(v) => v,
            Err(err) => return self.respond(Err(err), tracer),
        };

        let action_name = match validated.action {
            RequestAction::Install => "Install",
            RequestAction::Uninstall => "Uninstall",
        };

        let locked = match self.repository.lock_package(&validated.name, owner_id, action_name).await {
            Ok(true) => true,
            Ok(false) => return self.respond(Err(EngineError::Locked), tracer),
            Err(err) => return self.respond(Err(err.into()), tracer),
        };

        let prior = self.repository.load_traces(&validated.name).await.unwrap_or_default();
        tracer = Tracer::from_traces(prior);

        let result = self.run(&validated, cancel, &mut tracer).await;

        if locked {
            if let Err(err) = self.repository.unlock_package(&validated.name, owner_id).await {
                warn!(arn = %validated.name, error = %err, "failed to release lock");
            }
        }

        let status = match &result {
            Ok(Outcome::Success) => ResultStatus::Success,
            Ok(Outcome::Reboot) => ResultStatus::SuccessAndReboot,
            Err(EngineError::Cancelled) => ResultStatus::Cancelled,
            Err(_) => ResultStatus::Failed,
        };
        if let Some(service) = self.services.get(&validated.repository) {
            service.report_result(status).await;
        }

        self.respond(result, tracer)
    }

    fn validate(&self, request: &EngineRequest) -> Result<ValidatedRequest, EngineError> {
        if !request.source.is_empty() {
            return Err(EngineError::Validation("source is reserved and must be empty".to_string()));
        }
        if request.name.is_empty() {
            return Err(EngineError::Validation("name must not be empty".to_string()));
        }
        let repository = match request.repository.as_str() {
            "" | "beta" | "gamma" => request.repository.clone(),
            _ => String::new(),
        };
        Ok(ValidatedRequest {
            name: request.name.clone(),
            version: Version::new(request.version.clone()),
            action: request.action,
            repository,
        })
    }

    fn respond(&self, result: Result<Outcome, EngineError>, tracer: Tracer) -> EngineResponse {
        let stdout = tracer.render_stdout(self.config.stdout_truncate_len);
        let stderr = tracer.render_stderr(self.config.stderr_truncate_len);
        match result {
            Ok(Outcome::Success) => EngineResponse { exit_code: 0, status: ResultStatus::Success, stdout, stderr },
            Ok(Outcome::Reboot) => {
                EngineResponse { exit_code: 0, status: ResultStatus::SuccessAndReboot, stdout, stderr }
            }
            Err(EngineError::Cancelled) => {
                EngineResponse { exit_code: 1, status: ResultStatus::Cancelled, stdout, stderr }
            }
            Err(err) => {
                let mut stderr = stderr;
                if stderr.is_empty() {
                    stderr = err.to_string();
                }
                EngineResponse { exit_code: 1, status: ResultStatus::Failed, stdout, stderr }
            }
        }
    }

    async fn run(
        &self,
        request: &ValidatedRequest,
        cancel: &CancelFlag,
        tracer: &mut Tracer,
    ) -> Result<Outcome, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        match request.action {
            RequestAction::Install => self.run_install(request, cancel, tracer).await,
            RequestAction::Uninstall => self.run_uninstall(request, cancel, tracer).await,
        }
    }

    fn service_for(&self, endpoint: &str) -> Result<Arc<dyn PackageService>, EngineError> {
        self.services
            .get(endpoint)
            .cloned()
            .ok_or_else(|| EngineError::Unsupported(format!("no package service registered for endpoint '{endpoint}'")))
    }

    fn version_dir(&self, arn: &str, version: &Version) -> std::path::PathBuf {
        config::version_dir(
            &config::package_dir(&self.config, &crate::normalize::normalize(arn)),
            &crate::normalize::normalize(version.as_str()),
        )
    }

    fn installer_for(&self, arn: &str, version: &Version) -> Installer {
        Installer::new(arn.to_string(), self.version_dir(arn, version), self.config.orchestration_dir.clone())
    }

    async fn ensure_artifacts(
        &self,
        service: &dyn PackageService,
        arn: &str,
        target_version: &Version,
        persisted_state: InstallState,
        persisted_version: &Version,
    ) -> Result<(), EngineError> {
        let needs_refresh = self.repository.validate_package(arn, target_version).await.is_err()
            || (persisted_version == target_version && persisted_state == InstallState::Failed);

        if needs_refresh {
            self.repository
                .refresh_package(arn, target_version, |dir| async move {
                    let staging = service
                        .download_artifact(arn, target_version.as_str())
                        .await
                        .map_err(|err| Box::new(err) as Box<dyn std::error::Error + Send + Sync>)?;
                    copy_dir_contents(&staging, &dir)
                        .await
                        .map_err(|err| Box::new(err) as Box<dyn std::error::Error + Send + Sync>)
                })
                .await?;

            if self.repository.validate_package(arn, target_version).await.is_err() {
                return Err(EngineError::Unobtainable(format!(
                    "artifacts for {arn} @ {target_version} remain invalid after refresh"
                )));
            }
        }
        Ok(())
    }

    async fn run_install(
        &self,
        request: &ValidatedRequest,
        cancel: &CancelFlag,
        tracer: &mut Tracer,
    ) -> Result<Outcome, EngineError> {
        let arn = request.name.as_str();
        let service = self.service_for(&request.repository)?;

        let resolution = service
            .download_manifest(arn, request.version.as_str())
            .await
            .map_err(EngineError::from)?;
        let target_version = Version::new(resolution.resolved_version);

        let (persisted_state, persisted_version) = self.repository.get_install_state(arn).await?;
        let last_installed_version = self.repository.get_installed_version(arn).await?;

        if let Err(err) = self.ensure_artifacts(service.as_ref(), arn, &target_version, persisted_state, &persisted_version).await {
            if err.persists_failed_state() {
                self.repository.set_install_state(arn, &target_version, InstallState::Failed).await?;
            }
            return Err(err);
        }

        let new_installer = self.installer_for(arn, &target_version);
        let is_upgrade = !last_installed_version.is_empty() && last_installed_version != target_version;
        let old_installer = is_upgrade.then(|| self.installer_for(arn, &last_installed_version));

        let already_installed = target_version == last_installed_version
            && !last_installed_version.is_empty()
            && matches!(persisted_state, InstallState::Installed | InstallState::Unknown);
        let resuming_install = persisted_state == InstallState::Installing;

        if already_installed || resuming_install {
            let validate_outcome = self.run_action(&new_installer, "validate", tracer, cancel).await?;
            return match validate_outcome {
                StepOutcome::Reboot => {
                    self.persist_reboot(arn, tracer).await?;
                    Ok(Outcome::Reboot)
                }
                StepOutcome::Failed(msg) => {
                    self.repository.set_install_state(arn, &target_version, InstallState::Failed).await?;
                    Err(EngineError::InstallFailed(msg))
                }
                StepOutcome::Success => {
                    if resuming_install && is_upgrade {
                        self.repository.remove_package(arn, &last_installed_version).await?;
                    }
                    self.repository.set_install_state(arn, &target_version, InstallState::Installed).await?;
                    Ok(Outcome::Success)
                }
            };
        }

        match persisted_state {
            InstallState::RollbackInstall if old_installer.is_some() => {
                self.execute_install(
                    arn,
                    old_installer.as_ref().unwrap(),
                    last_installed_version.clone(),
                    Some((&new_installer, target_version.clone())),
                    true,
                    cancel,
                    tracer,
                )
                .await
            }
            InstallState::RollbackUninstall if old_installer.is_some() => {
                // Resuming mid-rollback: the failed new version is cleaning
                // itself up via Uninstall before the old version is
                // reinstalled, matching the chain execute_install's own
                // failure branch below sets up.
                self.execute_uninstall(
                    arn,
                    &new_installer,
                    target_version.clone(),
                    Some((old_installer.as_ref().unwrap(), last_installed_version.clone())),
                    true,
                    cancel,
                    tracer,
                )
                .await
            }
            _ if is_upgrade => {
                self.execute_uninstall(
                    arn,
                    old_installer.as_ref().unwrap(),
                    last_installed_version.clone(),
                    Some((&new_installer, target_version.clone())),
                    false,
                    cancel,
                    tracer,
                )
                .await
            }
            _ => self.execute_install(arn, &new_installer, target_version.clone(), None, false, cancel, tracer).await,
        }
    }

    async fn run_uninstall(
        &self,
        request: &ValidatedRequest,
        cancel: &CancelFlag,
        tracer: &mut Tracer,
    ) -> Result<Outcome, EngineError> {
        let arn = request.name.as_str();
        let installed_version = self.repository.get_installed_version(arn).await?;
        if installed_version.is_empty() {
            return Ok(Outcome::Success);
        }
        if !request.version.is_empty() && !request.version.is_latest() && request.version != installed_version {
            return Err(EngineError::VersionMismatch {
                requested: request.version.to_string(),
                installed: installed_version.to_string(),
            });
        }

        let (persisted_state, _) = self.repository.get_install_state(arn).await?;
        let installer = self.installer_for(arn, &installed_version);
        let is_rollback = persisted_state == InstallState::RollbackUninstall;

        self.execute_uninstall(arn, &installer, installed_version, None, is_rollback, cancel, tracer).await
    }

    /// Install `target`, rolling back to `partner` on failure if present.
    fn execute_install<'a>(
        &'a self,
        arn: &'a str,
        target: &'a Installer,
        target_version: Version,
        partner: Option<(&'a Installer, Version)>,
        is_rollback: bool,
        cancel: &'a CancelFlag,
        tracer: &'a mut Tracer,
    ) -> BoxFuture<'a, Result<Outcome, EngineError>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                self.repository.set_install_state(arn, &target_version, InstallState::Failed).await?;
                return Err(EngineError::Cancelled);
            }

            let state = if is_rollback { InstallState::RollbackInstall } else { InstallState::Installing };
            self.repository.set_install_state(arn, &target_version, state).await?;
            info!(arn, version = %target_version, ?state, "entering install step");

            let install_step = self.run_action(target, "install", tracer, cancel).await?;
            let result = match install_step {
                StepOutcome::Success => self.run_action(target, "validate", tracer, cancel).await?,
                other => other,
            };

            match result {
                StepOutcome::Reboot => {
                    self.persist_reboot(arn, tracer).await?;
                    Ok(Outcome::Reboot)
                }
                StepOutcome::Failed(msg) => {
                    if is_rollback || partner.is_none() {
                        self.repository.set_install_state(arn, &target_version, InstallState::Failed).await?;
                        Err(if is_rollback {
                            EngineError::RollbackFailed(msg)
                        } else {
                            EngineError::InstallFailed(msg)
                        })
                    } else {
                        let (partner_installer, partner_version) = partner.unwrap();
                        let rollback = self
                            .execute_uninstall(
                                arn,
                                target,
                                target_version.clone(),
                                Some((partner_installer, partner_version)),
                                true,
                                cancel,
                                tracer,
                            )
                            .await;
                        match rollback {
                            Ok(_) => Err(EngineError::InstallFailed(msg)),
                            Err(err) => Err(err),
                        }
                    }
                }
                StepOutcome::Success => {
                    if let Some((_, partner_version)) = &partner {
                        self.repository.remove_package(arn, partner_version).await?;
                    }
                    self.repository.set_install_state(arn, &target_version, InstallState::Installed).await?;
                    if is_rollback {
                        Err(EngineError::InstallFailed("rollback completed; original install failed".to_string()))
                    } else {
                        Ok(Outcome::Success)
                    }
                }
            }
        })
    }

    /// Uninstall `target`; if `partner` is present this is one half of an
    /// upgrade (or its rollback), and success chains into installing
    /// `partner`.
    fn execute_uninstall<'a>(
        &'a self,
        arn: &'a str,
        target: &'a Installer,
        target_version: Version,
        partner: Option<(&'a Installer, Version)>,
        is_rollback: bool,
        cancel: &'a CancelFlag,
        tracer: &'a mut Tracer,
    ) -> BoxFuture<'a, Result<Outcome, EngineError>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                self.repository.set_install_state(arn, &target_version, InstallState::Failed).await?;
                return Err(EngineError::Cancelled);
            }

            let state = if is_rollback {
                InstallState::RollbackUninstall
            } else if partner.is_some() {
                InstallState::Upgrading
            } else {
                InstallState::Uninstalling
            };
            self.repository.set_install_state(arn, &target_version, state).await?;
            info!(arn, version = %target_version, ?state, "entering uninstall step");

            let result = self.run_action(target, "uninstall", tracer, cancel).await?;

            match result {
                StepOutcome::Reboot => {
                    self.persist_reboot(arn, tracer).await?;
                    Ok(Outcome::Reboot)
                }
                StepOutcome::Failed(msg) => {
                    if let Some((partner_installer, partner_version)) = partner {
                        // An uninstall failure mid-upgrade is not fatal; the
                        // new (or, on rollback, the old) version may still
                        // come up, with this failed uninstall target kept as
                        // its own rollback partner.
                        self.execute_install(
                            arn,
                            partner_installer,
                            partner_version,
                            Some((target, target_version)),
                            is_rollback,
                            cancel,
                            tracer,
                        )
                        .await
                    } else {
                        self.repository.set_install_state(arn, &target_version, InstallState::Failed).await?;
                        Err(EngineError::UninstallFailed(msg))
                    }
                }
                StepOutcome::Success => {
                    if let Some((partner_installer, partner_version)) = partner {
                        self.execute_install(
                            arn,
                            partner_installer,
                            partner_version,
                            Some((target, target_version)),
                            is_rollback,
                            cancel,
                            tracer,
                        )
                        .await
                    } else {
                        self.repository.remove_package(arn, &target_version).await?;
                        self.repository.set_install_state(arn, &target_version, InstallState::None).await?;
                        Ok(Outcome::Success)
                    }
                }
            }
        })
    }

    async fn run_action(
        &self,
        installer: &Installer,
        action: &str,
        tracer: &mut Tracer,
        cancel: &CancelFlag,
    ) -> Result<StepOutcome, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let start = Utc::now();
        let mut trace = Trace::start(action, start);

        let env = self.environment.snapshot();
        let resolved = installer.resolve(action, &env).await?;

        let plugins = match resolved {
            None => {
                trace.finish(Utc::now(), 0);
                tracer.push(trace);
                return Ok(StepOutcome::Success);
            }
            Some(ResolvedAction::Script(plugin)) => vec![plugin],
            Some(ResolvedAction::Document(raw)) => {
                let orchestration_dir = format!("{}/{action}", self.config.orchestration_dir);
                self.executor.parse_document(&raw, &orchestration_dir)?
            }
        };

        if plugins.is_empty() {
            let msg = format!("action document for '{action}' has no plugins");
            trace.finish_error(Utc::now(), msg.clone());
            tracer.push(trace);
            return Err(EngineError::Unsupported(msg));
        }

        let doc_id = format!("{action}-{}", installer.version_dir().display());
        let results = self
            .executor
            .execute_document(plugins, &doc_id, start, &self.config.orchestration_dir)
            .await?;

        let mut reboot_required = false;
        let mut failure = None;
        for result in results.values() {
            if !result.stdout.is_empty() {
                trace.log(result.stdout.clone());
            }
            if result.reboot_required {
                reboot_required = true;
            }
            if result.exit_code != 0 && failure.is_none() {
                failure = Some(result.stderr.clone());
            }
        }

        if let Some(msg) = failure {
            trace.finish_error(Utc::now(), msg.clone());
            tracer.push(trace);
            return Ok(StepOutcome::Failed(msg));
        }
        if reboot_required {
            trace.finish(Utc::now(), 0);
            tracer.push(trace);
            return Ok(StepOutcome::Reboot);
        }
        trace.finish(Utc::now(), 0);
        tracer.push(trace);
        Ok(StepOutcome::Success)
    }

    async fn persist_reboot(&self, arn: &str, tracer: &Tracer) -> Result<(), EngineError> {
        self.repository.persist_traces(arn, tracer).await?;
        Ok(())
    }
}

struct ValidatedRequest {
    name: String,
    version: Version,
    action: RequestAction,
    repository: String,
}

/// Recursively copy a staging directory's contents into a destination
/// directory, preserving relative structure.
async fn copy_dir_contents(src: &Path, dest: &Path) -> std::io::Result<()> {
    for entry in walkdir::WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry.path().strip_prefix(src).expect("walkdir yields paths under src");
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            tokio::fs::create_dir_all(&target).await?;
        } else {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(entry.path(), &target).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use swpm_schema::PackageManifest;

    use super::*;
    use crate::repo::Repository;
    use crate::service::{EnvironmentSnapshot, ExecutorError, ManifestResolution, PluginResult, PluginState, ServiceError};

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Success,
        Failure,
        Reboot,
    }

    struct FakeService {
        manifest_version: String,
        staging_dirs: HashMap<String, PathBuf>,
    }

    #[async_trait]
    impl PackageService for FakeService {
        async fn download_manifest(&self, arn: &str, version: &str) -> Result<ManifestResolution, ServiceError> {
            let resolved = if version.is_empty() || version.eq_ignore_ascii_case("latest") {
                self.manifest_version.clone()
            } else {
                version.to_string()
            };
            Ok(ManifestResolution { resolved_arn: arn.to_string(), resolved_version: resolved, was_cached: false })
        }

        async fn download_artifact(&self, _arn: &str, version: &str) -> Result<PathBuf, ServiceError> {
            self.staging_dirs
                .get(version)
                .cloned()
                .ok_or_else(|| ServiceError::ArtifactUnavailable(version.to_string()))
        }

        async fn report_result(&self, _status: ResultStatus) {}
    }

    /// Scripted executor: `program(action, version, steps)` queues outcomes
    /// popped one per invocation; an unprogrammed (action, version) pair, or
    /// one whose queue has run dry, always succeeds.
    #[derive(Default)]
    struct FakeExecutor {
        steps: StdMutex<HashMap<(String, String), VecDeque<Step>>>,
    }

    impl FakeExecutor {
        fn program(&self, action: &str, version: &str, steps: Vec<Step>) {
            self.steps.lock().unwrap().insert((action.to_string(), version.to_string()), steps.into_iter().collect());
        }
    }

    #[async_trait]
    impl SubDocumentExecutor for FakeExecutor {
        fn parse_document(&self, _raw: &str, _orchestration_dir: &str) -> Result<Vec<PluginState>, ExecutorError> {
            Ok(Vec::new())
        }

        async fn execute_document(
            &self,
            _plugins: Vec<PluginState>,
            doc_id: &str,
            _created_at: chrono::DateTime<Utc>,
            _orchestration_dir: &str,
        ) -> Result<HashMap<String, PluginResult>, ExecutorError> {
            let action = doc_id.split('-').next().unwrap_or("").to_string();
            let mut steps = self.steps.lock().unwrap();
            let key = steps.keys().find(|(a, v)| *a == action && doc_id.contains(v.as_str())).cloned();
            let step = match key {
                Some(key) => steps.get_mut(&key).unwrap().pop_front().unwrap_or(Step::Success),
                None => Step::Success,
            };
            drop(steps);

            let result = match step {
                Step::Success => PluginResult { exit_code: 0, stdout: "ok".to_string(), stderr: String::new(), reboot_required: false },
                Step::Failure => PluginResult { exit_code: 1, stdout: String::new(), stderr: "boom".to_string(), reboot_required: false },
                Step::Reboot => PluginResult { exit_code: 0, stdout: "ok".to_string(), stderr: String::new(), reboot_required: true },
            };
            let mut out = HashMap::new();
            out.insert("plugin-0".to_string(), result);
            Ok(out)
        }
    }

    struct FakeEnvironment;

    impl EnvironmentInfo for FakeEnvironment {
        fn snapshot(&self) -> EnvironmentSnapshot {
            EnvironmentSnapshot::default()
        }
    }

    async fn stage(dir: PathBuf, arn: &str, version: &str) -> PathBuf {
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let manifest = PackageManifest {
            name: arn.to_string(),
            platform: "linux".to_string(),
            architecture: "x86_64".to_string(),
            version: Version::new(version),
            app_name: None,
            app_publisher: None,
            app_reference_url: None,
            app_type: None,
        };
        tokio::fs::write(dir.join("manifest.json"), serde_json::to_vec(&manifest).unwrap()).await.unwrap();
        for action in ["install", "uninstall", "validate"] {
            tokio::fs::write(dir.join(format!("{action}.sh")), b"").await.unwrap();
        }
        dir
    }

    struct Harness {
        engine: Engine,
        repo: Arc<Repository>,
        executor: Arc<FakeExecutor>,
        _tmp: tempfile::TempDir,
    }

    fn build_harness(manifest_version: &str, staging_dirs: HashMap<String, PathBuf>) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::builder(tmp.path()).build();
        let repo = Arc::new(Repository::new(config.clone()));
        let executor = Arc::new(FakeExecutor::default());
        let service: Arc<dyn PackageService> =
            Arc::new(FakeService { manifest_version: manifest_version.to_string(), staging_dirs });
        let mut services = HashMap::new();
        services.insert(String::new(), service);
        let engine = Engine::new(config, repo.clone(), services, executor.clone(), Arc::new(FakeEnvironment));
        Harness { engine, repo, executor, _tmp: tmp }
    }

    fn install_request(arn: &str, version: &str) -> EngineRequest {
        EngineRequest {
            name: arn.to_string(),
            version: version.to_string(),
            action: RequestAction::Install,
            source: String::new(),
            repository: String::new(),
        }
    }

    fn uninstall_request(arn: &str, version: &str) -> EngineRequest {
        EngineRequest {
            name: arn.to_string(),
            version: version.to_string(),
            action: RequestAction::Uninstall,
            source: String::new(),
            repository: String::new(),
        }
    }

    #[tokio::test]
    async fn fresh_install_runs_install_then_validate() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = stage(tmp.path().join("staging/0.0.1"), "SsmTest", "0.0.1").await;
        let mut staging_dirs = HashMap::new();
        staging_dirs.insert("0.0.1".to_string(), staging);
        let harness = build_harness("0.0.1", staging_dirs);

        let cancel = CancelFlag::new();
        let response = harness.engine.handle(install_request("SsmTest", "0.0.1"), "owner", &cancel).await;

        assert_eq!(response.exit_code, 0);
        assert!(matches!(response.status, ResultStatus::Success));
        let (state, version) = harness.repo.get_install_state("SsmTest").await.unwrap();
        assert_eq!(state, InstallState::Installed);
        assert_eq!(version.as_str(), "0.0.1");
    }

    #[tokio::test]
    async fn install_failure_persists_failed_state() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = stage(tmp.path().join("staging/0.0.1"), "SsmTest", "0.0.1").await;
        let mut staging_dirs = HashMap::new();
        staging_dirs.insert("0.0.1".to_string(), staging);
        let harness = build_harness("0.0.1", staging_dirs);
        harness.executor.program("install", "0.0.1", vec![Step::Failure]);

        let cancel = CancelFlag::new();
        let response = harness.engine.handle(install_request("SsmTest", "0.0.1"), "owner", &cancel).await;

        assert_eq!(response.exit_code, 1);
        assert!(matches!(response.status, ResultStatus::Failed));
        let (state, _) = harness.repo.get_install_state("SsmTest").await.unwrap();
        assert_eq!(state, InstallState::Failed);
    }

    #[tokio::test]
    async fn unobtainable_artifacts_persist_failed_state() {
        // No staging dir registered for "0.0.1", so download_artifact fails
        // and the artifact refresh never completes.
        let harness = build_harness("0.0.1", HashMap::new());

        let cancel = CancelFlag::new();
        let response = harness.engine.handle(install_request("SsmTest", "0.0.1"), "owner", &cancel).await;

        assert_eq!(response.exit_code, 1);
        assert!(matches!(response.status, ResultStatus::Failed));
        let (state, version) = harness.repo.get_install_state("SsmTest").await.unwrap();
        assert_eq!(state, InstallState::Failed);
        assert_eq!(version.as_str(), "0.0.1");
    }

    #[tokio::test]
    async fn install_requiring_reboot_resumes_with_validate_only() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = stage(tmp.path().join("staging/0.0.1"), "SsmTest", "0.0.1").await;
        let mut staging_dirs = HashMap::new();
        staging_dirs.insert("0.0.1".to_string(), staging);
        let harness = build_harness("0.0.1", staging_dirs);
        harness.executor.program("install", "0.0.1", vec![Step::Reboot]);

        let cancel = CancelFlag::new();
        let first = harness.engine.handle(install_request("SsmTest", "0.0.1"), "owner", &cancel).await;
        assert!(matches!(first.status, ResultStatus::SuccessAndReboot));
        let (state, _) = harness.repo.get_install_state("SsmTest").await.unwrap();
        assert_eq!(state, InstallState::Installing);

        // Resume: only `validate` should run this time, never a second `install`.
        let second = harness.engine.handle(install_request("SsmTest", "0.0.1"), "owner", &cancel).await;
        assert_eq!(second.exit_code, 0);
        assert!(matches!(second.status, ResultStatus::Success));
        let (state, _) = harness.repo.get_install_state("SsmTest").await.unwrap();
        assert_eq!(state, InstallState::Installed);
    }

    #[tokio::test]
    async fn already_installed_request_only_runs_validate() {
        let harness = build_harness("0.0.1", HashMap::new());

        // Place the version directly in the repository, bypassing download.
        let version_dir = harness.engine.version_dir("SsmTest", &Version::new("0.0.1"));
        stage(version_dir, "SsmTest", "0.0.1").await;
        harness.repo.set_install_state("SsmTest", &Version::new("0.0.1"), InstallState::Installed).await.unwrap();

        // If `install` were re-run it would fail, betraying the fast path.
        harness.executor.program("install", "0.0.1", vec![Step::Failure]);

        let cancel = CancelFlag::new();
        let response = harness.engine.handle(install_request("SsmTest", "0.0.1"), "owner", &cancel).await;
        assert_eq!(response.exit_code, 0);
        assert!(matches!(response.status, ResultStatus::Success));
    }

    #[tokio::test]
    async fn upgrade_success_removes_old_version() {
        let tmp = tempfile::tempdir().unwrap();
        let harness = {
            let staging_new = stage(tmp.path().join("staging/0.0.2"), "SsmTest", "0.0.2").await;
            let mut staging_dirs = HashMap::new();
            staging_dirs.insert("0.0.2".to_string(), staging_new);
            build_harness("0.0.2", staging_dirs)
        };

        let old_version_dir = harness.engine.version_dir("SsmTest", &Version::new("0.0.1"));
        stage(old_version_dir.clone(), "SsmTest", "0.0.1").await;
        harness.repo.set_install_state("SsmTest", &Version::new("0.0.1"), InstallState::Installed).await.unwrap();

        let cancel = CancelFlag::new();
        let response = harness.engine.handle(install_request("SsmTest", "0.0.2"), "owner", &cancel).await;

        assert_eq!(response.exit_code, 0);
        assert!(matches!(response.status, ResultStatus::Success));
        let (state, version) = harness.repo.get_install_state("SsmTest").await.unwrap();
        assert_eq!(state, InstallState::Installed);
        assert_eq!(version.as_str(), "0.0.2");
        assert!(!old_version_dir.exists());
    }

    #[tokio::test]
    async fn upgrade_with_failed_install_rolls_back_to_old_version() {
        let tmp = tempfile::tempdir().unwrap();
        let harness = {
            let staging_new = stage(tmp.path().join("staging/0.0.2"), "SsmTest", "0.0.2").await;
            let mut staging_dirs = HashMap::new();
            staging_dirs.insert("0.0.2".to_string(), staging_new);
            build_harness("0.0.2", staging_dirs)
        };

        let old_version_dir = harness.engine.version_dir("SsmTest", &Version::new("0.0.1"));
        stage(old_version_dir.clone(), "SsmTest", "0.0.1").await;
        harness.repo.set_install_state("SsmTest", &Version::new("0.0.1"), InstallState::Installed).await.unwrap();
        harness.executor.program("install", "0.0.2", vec![Step::Failure]);

        let cancel = CancelFlag::new();
        let response = harness.engine.handle(install_request("SsmTest", "0.0.2"), "owner", &cancel).await;

        assert_eq!(response.exit_code, 1);
        assert!(matches!(response.status, ResultStatus::Failed));
        let (state, version) = harness.repo.get_install_state("SsmTest").await.unwrap();
        assert_eq!(state, InstallState::Installed);
        assert_eq!(version.as_str(), "0.0.1");
        assert!(old_version_dir.exists());
        let new_version_dir = harness.engine.version_dir("SsmTest", &Version::new("0.0.2"));
        assert!(!new_version_dir.exists());
    }

    #[tokio::test]
    async fn uninstall_removes_version_and_clears_state() {
        let harness = build_harness("0.0.1", HashMap::new());
        let version_dir = harness.engine.version_dir("SsmTest", &Version::new("0.0.1"));
        stage(version_dir.clone(), "SsmTest", "0.0.1").await;
        harness.repo.set_install_state("SsmTest", &Version::new("0.0.1"), InstallState::Installed).await.unwrap();

        let cancel = CancelFlag::new();
        let response = harness.engine.handle(uninstall_request("SsmTest", ""), "owner", &cancel).await;

        assert_eq!(response.exit_code, 0);
        assert!(matches!(response.status, ResultStatus::Success));
        let (state, _) = harness.repo.get_install_state("SsmTest").await.unwrap();
        assert_eq!(state, InstallState::None);
        assert!(!version_dir.exists());
    }

    #[tokio::test]
    async fn uninstall_version_mismatch_is_rejected() {
        let harness = build_harness("0.0.1", HashMap::new());
        let version_dir = harness.engine.version_dir("SsmTest", &Version::new("0.0.1"));
        stage(version_dir, "SsmTest", "0.0.1").await;
        harness.repo.set_install_state("SsmTest", &Version::new("0.0.1"), InstallState::Installed).await.unwrap();

        let cancel = CancelFlag::new();
        let response = harness.engine.handle(uninstall_request("SsmTest", "9.9.9"), "owner", &cancel).await;

        assert_eq!(response.exit_code, 1);
        assert!(matches!(response.status, ResultStatus::Failed));
        assert!(response.stderr.contains("version mismatch"));
    }

    #[tokio::test]
    async fn locked_package_is_rejected_without_running() {
        let harness = build_harness("0.0.1", HashMap::new());
        assert!(harness.repo.lock_package("SsmTest", "other-owner", "Install").await.unwrap());

        let cancel = CancelFlag::new();
        let response = harness.engine.handle(install_request("SsmTest", "0.0.1"), "owner", &cancel).await;

        assert_eq!(response.exit_code, 1);
        assert!(matches!(response.status, ResultStatus::Failed));
        assert!(response.stderr.contains("locked"));
    }
}
