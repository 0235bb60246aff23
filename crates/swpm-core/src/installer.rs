//! Resolves an action name to a runnable sub-document (component E).
//!
//! Given a version directory and an action name (`install`/`uninstall`/
//! `validate`), resolves at most one of `<action>.sh`, `<action>.ps1`, or
//! the legacy `<action>.json`. Zero hits is a no-op success; two or more is
//! a hard *AmbiguousAction* error. Script actions are packaged into a
//! single [`PluginState`] for the external executor; JSON actions are
//! handed to [`crate::service::SubDocumentExecutor::parse_document`].

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::service::{EnvironmentSnapshot, PluginState};

/// Failures from resolving or composing an action.
#[derive(Debug, Error)]
pub enum InstallerError {
    /// More than one of `<action>.sh`, `<action>.ps1`, `<action>.json`
    /// exists for a single action.
    #[error("ambiguous action '{action}' in {dir:?}: found {found:?}")]
    AmbiguousAction { action: String, dir: PathBuf, found: Vec<&'static str> },
    /// Filesystem failure while probing for action files.
    #[error("I/O error resolving action '{action}' in {dir:?}: {source}")]
    Io { action: String, dir: PathBuf, source: std::io::Error },
}

/// A resolved action, ready to be run by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedAction {
    /// A composed plugin input for `aws:runShellScript` or
    /// `aws:runPowerShellScript`.
    Script(PluginState),
    /// The raw contents of a legacy `<action>.json` document, to be handed
    /// to `SubDocumentExecutor::parse_document`.
    Document(String),
}

/// Bound `(arn, version, packagePath, configuration)`, capable of resolving
/// and composing actions for that version.
#[derive(Debug, Clone)]
pub struct Installer {
    arn: String,
    version_dir: PathBuf,
    orchestration_dir: String,
}

impl Installer {
    /// Bind an installer to a version directory already on disk.
    pub fn new(arn: impl Into<String>, version_dir: PathBuf, orchestration_dir: impl Into<String>) -> Self {
        Self { arn: arn.into(), version_dir, orchestration_dir: orchestration_dir.into() }
    }

    /// The version directory this installer is bound to.
    pub fn version_dir(&self) -> &Path {
        &self.version_dir
    }

    /// Resolve `action` (`install`/`uninstall`/`validate`) to at most one
    /// runnable form. `Ok(None)` means the action is a no-op success.
    pub async fn resolve(
        &self,
        action: &str,
        env: &EnvironmentSnapshot,
    ) -> Result<Option<ResolvedAction>, InstallerError> {
        let sh = self.version_dir.join(format!("{action}.sh"));
        let ps1 = self.version_dir.join(format!("{action}.ps1"));
        let json = self.version_dir.join(format!("{action}.json"));

        let mut found = Vec::new();
        if self.exists(&sh).await? {
            found.push("sh");
        }
        if self.exists(&ps1).await? {
            found.push("ps1");
        }
        if self.exists(&json).await? {
            found.push("json");
        }

        if found.len() > 1 {
            return Err(InstallerError::AmbiguousAction {
                action: action.to_string(),
                dir: self.version_dir.clone(),
                found,
            });
        }

        match found.first() {
            None => Ok(None),
            Some(&"sh") => Ok(Some(ResolvedAction::Script(self.shell_plugin_state(action, env)))),
            Some(&"ps1") => Ok(Some(ResolvedAction::Script(self.powershell_plugin_state(action, env)))),
            Some(&"json") => {
                let raw = tokio::fs::read_to_string(&json)
                    .await
                    .map_err(|source| InstallerError::Io { action: action.to_string(), dir: self.version_dir.clone(), source })?;
                Ok(Some(ResolvedAction::Document(raw)))
            }
            Some(_) => unreachable!(),
        }
    }

    async fn exists(&self, path: &Path) -> Result<bool, InstallerError> {
        match tokio::fs::metadata(path).await {
            Ok(_) => Ok(true),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(InstallerError::Io {
                action: path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default(),
                dir: self.version_dir.clone(),
                source,
            }),
        }
    }

    fn shell_plugin_state(&self, action: &str, env: &EnvironmentSnapshot) -> PluginState {
        let mut commands = vec![format!("echo Running {action}.sh")];
        for (key, value) in self.env_pairs(action, env) {
            commands.push(format!("export {key}={}", shell_quote(&value)));
        }
        commands.push(format!("sh {action}.sh"));

        PluginState {
            plugin_name: "aws:runShellScript".to_string(),
            orchestration_dir: format!("{}/{action}", self.orchestration_dir),
            working_dir: self.version_dir.clone(),
            commands,
        }
    }

    fn powershell_plugin_state(&self, action: &str, env: &EnvironmentSnapshot) -> PluginState {
        let mut commands = vec![format!("echo Running {action}.ps1")];
        for (key, value) in self.env_pairs(action, env) {
            commands.push(format!("$env:{key}={}", powershell_quote(&value)));
        }
        commands.push(format!(".\\{action}.ps1; exit $LASTEXITCODE"));

        PluginState {
            plugin_name: "aws:runPowerShellScript".to_string(),
            orchestration_dir: format!("{}/{action}", self.orchestration_dir),
            working_dir: self.version_dir.clone(),
            commands,
        }
    }

    fn env_pairs(&self, action: &str, env: &EnvironmentSnapshot) -> Vec<(String, String)> {
        let proxy = |name: &str| std::env::var(name).unwrap_or_default();
        vec![
            ("BWS_ACTION_NAME".to_string(), action.to_string()),
            ("https_proxy".to_string(), proxy("https_proxy")),
            ("http_proxy".to_string(), proxy("http_proxy")),
            ("no_proxy".to_string(), proxy("no_proxy")),
            ("BWS_PLATFORM_NAME".to_string(), env.platform_name.clone()),
            ("BWS_PLATFORM_VERSION".to_string(), env.platform_version.clone()),
            ("BWS_PLATFORM_FAMILY".to_string(), env.platform_family.clone()),
            ("BWS_ARCHITECTURE".to_string(), env.architecture.clone()),
            ("BWS_INIT_SYSTEM".to_string(), env.init_system.clone()),
            ("BWS_PACKAGE_MANAGER".to_string(), env.package_manager.clone()),
            ("BWS_INSTANCE_ID".to_string(), env.instance_id.clone()),
            ("BWS_INSTANCE_TYPE".to_string(), env.instance_type.clone()),
            ("BWS_REGION".to_string(), env.region.clone()),
            ("BWS_ACCOUNT_ID".to_string(), env.account_id.clone()),
            ("BWS_AVAILABILITY_ZONE".to_string(), env.availability_zone.clone()),
        ]
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn powershell_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "`\""))
}
