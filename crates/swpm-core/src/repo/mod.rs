//! On-disk package artifact and state repository (component D).
//!
//! Layout rooted at [`Config::repo_root`]:
//!
//! ```text
//! <repoRoot>/<norm(arn)>/
//!     installstate
//!     traces
//!     <norm(version)>/
//!         manifest.json
//!         install.sh | install.ps1
//!         uninstall.sh | uninstall.ps1
//!         validate.sh | validate.ps1
//! <lockRoot>/<norm(arn)>.lockfile
//! <manifestCacheRoot>/<norm(arn)>_<norm(version)>.json
//! <manifestCacheRoot>/<norm(arn)>_<docVersion>.txt
//! ```

mod inventory_scan;

use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::Utc;
use swpm_schema::{InstallState, PackageInstallState, PackageManifest, Trace, Tracer, Version};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{self, Config};
use crate::lock::{ActionLock, FileLocker, LockError};
use crate::normalize::normalize;

pub use inventory_scan::scan_inventory;

/// Failures surfaced by the local repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The on-disk manifest did not parse, or did not match the expected
    /// package/version identity.
    #[error("manifest invalid for {arn} @ {version}: {reason}")]
    ManifestInvalid { arn: String, version: String, reason: String },

    /// A version directory exists but lacks the files a valid artifact set
    /// requires (a manifest plus at least one other file, and at least one
    /// install action script).
    #[error("package artifacts incomplete for {arn} @ {version}")]
    Incomplete { arn: String, version: String },

    /// The downloader callback supplied to `add_package`/`refresh_package`
    /// failed; the partially-created version directory was removed.
    #[error("download failed for {arn} @ {version}: {source}")]
    DownloadFailed { arn: String, version: String, source: Box<dyn std::error::Error + Send + Sync> },

    /// A lower-level file lock failure.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Generic filesystem failure.
    #[error("repository I/O error at {path:?}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    /// A persisted JSON record failed to (de)serialize.
    #[error("malformed record at {path:?}: {source}")]
    Malformed { path: PathBuf, source: serde_json::Error },
}

/// The local package repository: artifacts, install-state records,
/// manifests, and trace logs, plus the two locks (B, C) that gate mutation.
pub struct Repository {
    config: Config,
    file_locker: FileLocker,
    action_lock: ActionLock,
}

impl Repository {
    /// Build a repository rooted at `config`.
    pub fn new(config: Config) -> Self {
        Self { config, file_locker: FileLocker, action_lock: ActionLock::new() }
    }

    /// The injected directory layout.
    pub fn config(&self) -> &Config {
        &self.config
    }

    // -- locking -----------------------------------------------------

    /// Acquire the in-process action lock, then the cross-process file
    /// lock, for `arn`. On any failure to acquire the file lock the
    /// in-process lock is released before returning.
    pub async fn lock_package(&self, arn: &str, owner_id: &str, action: &str) -> Result<bool, RepositoryError> {
        if !self.action_lock.lock_package(arn, action) {
            return Ok(false);
        }
        let path = config::lock_file_path(&self.config, &normalize(arn));
        match self.file_locker.lock(&path, owner_id, self.config.lock_timeout_secs).await {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.action_lock.unlock_package(arn);
                Ok(false)
            }
            Err(err) => {
                self.action_lock.unlock_package(arn);
                Err(err.into())
            }
        }
    }

    /// Release both locks for `arn`, in the reverse order they were
    /// acquired. Always releases the in-process lock even if the file
    /// unlock fails.
    pub async fn unlock_package(&self, arn: &str, owner_id: &str) -> Result<(), RepositoryError> {
        let path = config::lock_file_path(&self.config, &normalize(arn));
        let result = self.file_locker.unlock(&path, owner_id).await;
        self.action_lock.unlock_package(arn);
        result.map(|_| ()).map_err(Into::into)
    }

    // -- install state -------------------------------------------------

    fn install_state_path(&self, arn: &str) -> PathBuf {
        config::package_dir(&self.config, &normalize(arn)).join("installstate")
    }

    /// `lastInstalledVersion` unless state is `Installed` (then `version`)
    /// or `Unknown` with no recorded history (then empty).
    pub async fn get_installed_version(&self, arn: &str) -> Result<Version, RepositoryError> {
        let (state, record) = self.read_install_state(arn).await?;
        match record {
            Some(record) if state == InstallState::Installed => Ok(record.version),
            Some(record) => Ok(record.last_installed_version),
            None => Ok(Version::new("")),
        }
    }

    /// Absent file and no version dirs => `(None, "")`. Absent file with
    /// version dirs => `(Unknown, lastDir)`. Unreadable/unparseable file =>
    /// `(Unknown, "")`.
    pub async fn get_install_state(&self, arn: &str) -> Result<(InstallState, Version), RepositoryError> {
        let (state, record) = self.read_install_state(arn).await?;
        let version = match record {
            Some(record) => record.version,
            None => Version::new(""),
        };
        Ok((state, version))
    }

    async fn read_install_state(
        &self,
        arn: &str,
    ) -> Result<(InstallState, Option<PackageInstallState>), RepositoryError> {
        let path = self.install_state_path(arn);
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<PackageInstallState>(&bytes) {
                Ok(record) => Ok((record.state, Some(record))),
                Err(_) => Ok((InstallState::Unknown, None)),
            },
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                match self.latest_version_dir(arn).await? {
                    Some(last_dir) => Ok((
                        InstallState::Unknown,
                        Some(PackageInstallState::new(
                            arn.to_string(),
                            Version::new(last_dir),
                            InstallState::Unknown,
                            Utc::now(),
                        )),
                    )),
                    None => Ok((InstallState::None, None)),
                }
            }
            Err(source) => Err(RepositoryError::Io { path, source }),
        }
    }

    async fn latest_version_dir(&self, arn: &str) -> Result<Option<String>, RepositoryError> {
        let dir = config::package_dir(&self.config, &normalize(arn));
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(RepositoryError::Io { path: dir, source }),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| RepositoryError::Io { path: dir.clone(), source })?
        {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names.pop())
    }

    /// Read-modify-write the install-state record. `New` is ignored unless
    /// the current state is `None`. `retryCount` increments iff
    /// `new_state` equals the current state, otherwise resets to zero.
    /// `lastInstalledVersion` is set on `Installed`, cleared on
    /// `Uninstalled`.
    pub async fn set_install_state(
        &self,
        arn: &str,
        version: &Version,
        new_state: InstallState,
    ) -> Result<(), RepositoryError> {
        let (current_state, existing) = self.read_install_state(arn).await?;

        if new_state == InstallState::New && current_state != InstallState::None {
            return Ok(());
        }

        let now = Utc::now();
        let mut record = existing.unwrap_or_else(|| {
            PackageInstallState::new(arn.to_string(), version.clone(), new_state, now)
        });

        record.retry_count = if current_state == new_state { record.retry_count + 1 } else { 0 };
        record.name = arn.to_string();
        record.version = version.clone();
        record.state = new_state;
        record.time = now;
        match new_state {
            InstallState::Installed => record.last_installed_version = version.clone(),
            InstallState::Uninstalled => record.last_installed_version = Version::new(""),
            _ => {}
        }

        let path = self.install_state_path(arn);
        write_json_atomic(&path, &record).await?;
        info!(arn, version = %version, state = ?new_state, "install state transition");
        Ok(())
    }

    // -- artifacts -------------------------------------------------------

    /// Parse `manifest.json` (fails with `ManifestInvalid` if malformed or
    /// name/version mismatch), then confirm the version directory contains
    /// at least one other file and at least one install action script.
    pub async fn validate_package(&self, arn: &str, version: &Version) -> Result<(), RepositoryError> {
        let version_dir = self.version_dir(arn, version);
        let manifest = self.read_manifest(arn, version).await.map_err(|err| match err {
            RepositoryError::Io { .. } => RepositoryError::ManifestInvalid {
                arn: arn.to_string(),
                version: version.to_string(),
                reason: "manifest.json missing or unreadable".to_string(),
            },
            other => other,
        })?;
        manifest.validate(arn, version.as_str()).map_err(|reason| RepositoryError::ManifestInvalid {
            arn: arn.to_string(),
            version: version.to_string(),
            reason: reason.to_string(),
        })?;

        let mut has_other_file = false;
        let mut has_install_action = false;
        let mut entries = tokio::fs::read_dir(&version_dir)
            .await
            .map_err(|source| RepositoryError::Io { path: version_dir.clone(), source })?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| RepositoryError::Io { path: version_dir.clone(), source })?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name != "manifest.json" {
                has_other_file = true;
            }
            if name == "install.sh" || name == "install.ps1" || name == "install.json" {
                has_install_action = true;
            }
        }

        if !has_other_file || !has_install_action {
            return Err(RepositoryError::Incomplete { arn: arn.to_string(), version: version.to_string() });
        }
        Ok(())
    }

    /// Create the version directory, invoke `downloader(target_dir)`; on
    /// failure remove the directory and surface the error. On success set
    /// state to `New` only if current state is `None`.
    pub async fn add_package<F, Fut>(
        &self,
        arn: &str,
        version: &Version,
        downloader: F,
    ) -> Result<(), RepositoryError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>>,
    {
        let version_dir = self.version_dir(arn, version);
        tokio::fs::create_dir_all(&version_dir)
            .await
            .map_err(|source| RepositoryError::Io { path: version_dir.clone(), source })?;

        if let Err(source) = downloader(version_dir.clone()).await {
            tokio::fs::remove_dir_all(&version_dir).await.ok();
            return Err(RepositoryError::DownloadFailed { arn: arn.to_string(), version: version.to_string(), source });
        }

        self.set_install_state(arn, version, InstallState::New).await?;
        Ok(())
    }

    /// Identical contract to [`Repository::add_package`]; kept as a
    /// separate name since the distinction matters to callers (a fresh
    /// install vs. re-fetching artifacts for a version already known to
    /// the repository), not to this implementation.
    pub async fn refresh_package<F, Fut>(
        &self,
        arn: &str,
        version: &Version,
        downloader: F,
    ) -> Result<(), RepositoryError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>>,
    {
        self.add_package(arn, version, downloader).await
    }

    /// Delete the version directory. The install-state record is left
    /// untouched.
    pub async fn remove_package(&self, arn: &str, version: &Version) -> Result<(), RepositoryError> {
        let version_dir = self.version_dir(arn, version);
        match tokio::fs::remove_dir_all(&version_dir).await {
            Ok(()) => {
                warn!(arn, version = %version, "package version removed");
                Ok(())
            }
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(RepositoryError::Io { path: version_dir, source }),
        }
    }

    fn version_dir(&self, arn: &str, version: &Version) -> PathBuf {
        config::version_dir(&config::package_dir(&self.config, &normalize(arn)), &normalize(version.as_str()))
    }

    // -- manifest cache --------------------------------------------------

    /// Read `manifest.json` for `(arn, version)`.
    pub async fn read_manifest(&self, arn: &str, version: &Version) -> Result<PackageManifest, RepositoryError> {
        let path = self.version_dir(arn, version).join("manifest.json");
        let bytes = tokio::fs::read(&path).await.map_err(|source| RepositoryError::Io { path: path.clone(), source })?;
        serde_json::from_slice(&bytes).map_err(|source| RepositoryError::Malformed { path, source })
    }

    /// Write `manifest.json` for `(arn, version)`.
    pub async fn write_manifest(
        &self,
        arn: &str,
        version: &Version,
        manifest: &PackageManifest,
    ) -> Result<(), RepositoryError> {
        let path = self.version_dir(arn, version).join("manifest.json");
        write_json_atomic(&path, manifest).await
    }

    /// Read a cached manifest by `(arn, version)`, used by the external
    /// service to decide whether a re-download is necessary.
    pub async fn read_manifest_cache(
        &self,
        arn: &str,
        version: &Version,
    ) -> Result<Option<PackageManifest>, RepositoryError> {
        let path = self
            .config
            .manifest_cache_root
            .join(format!("{}_{}.json", normalize(arn), normalize(version.as_str())));
        read_json_optional(&path).await
    }

    /// Write a cached manifest by `(arn, version)`.
    pub async fn write_manifest_cache(
        &self,
        arn: &str,
        version: &Version,
        manifest: &PackageManifest,
    ) -> Result<(), RepositoryError> {
        let path = self
            .config
            .manifest_cache_root
            .join(format!("{}_{}.json", normalize(arn), normalize(version.as_str())));
        write_json_atomic(&path, manifest).await
    }

    /// Read a cached manifest hash keyed by `(arn, docVersion)`. `docVersion`
    /// is intentionally NOT normalized here, reproducing a noted quirk of
    /// the source system (see DESIGN.md).
    pub async fn read_manifest_hash(&self, arn: &str, doc_version: &str) -> Result<Option<String>, RepositoryError> {
        let path = self.config.manifest_cache_root.join(format!("{}_{}.txt", normalize(arn), doc_version));
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(RepositoryError::Io { path, source }),
        }
    }

    /// Write a cached manifest hash keyed by `(arn, docVersion)`.
    pub async fn write_manifest_hash(&self, arn: &str, doc_version: &str, hash: &str) -> Result<(), RepositoryError> {
        let path = self.config.manifest_cache_root.join(format!("{}_{}.txt", normalize(arn), doc_version));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|source| RepositoryError::Io { path: path.clone(), source })?;
        }
        let tmp = path.with_extension("txt.tmp");
        tokio::fs::write(&tmp, hash).await.map_err(|source| RepositoryError::Io { path: path.clone(), source })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|source| RepositoryError::Io { path, source })
    }

    // -- traces ------------------------------------------------------------

    fn traces_path(&self, arn: &str) -> PathBuf {
        config::package_dir(&self.config, &normalize(arn)).join("traces")
    }

    /// Load any persisted traces for `arn`. The file is always deleted
    /// after this call, whether or not it parsed successfully -- a resumed
    /// tracer starts from this list plus whatever the current action
    /// produces.
    pub async fn load_traces(&self, arn: &str) -> Result<Vec<Trace>, RepositoryError> {
        let path = self.traces_path(arn);
        let traces = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(RepositoryError::Io { path, source }),
        };
        tokio::fs::remove_file(&path).await.ok();
        Ok(traces)
    }

    /// Persist `tracer`'s traces ahead of a reboot-bearing exit.
    pub async fn persist_traces(&self, arn: &str, tracer: &Tracer) -> Result<(), RepositoryError> {
        let path = self.traces_path(arn);
        write_json_atomic(&path, tracer.traces()).await
    }

    // -- inventory -----------------------------------------------------

    /// Enumerate package directories, require `Installed` state, load the
    /// manifest, and emit an `ApplicationData` record for each package that
    /// carries inventory-relevant manifest fields.
    pub async fn get_inventory_data(&self) -> Result<Vec<swpm_schema::ApplicationData>, RepositoryError> {
        scan_inventory(self).await
    }

    pub(crate) fn repo_root(&self) -> &Path {
        &self.config.repo_root
    }
}

async fn read_json_optional<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, RepositoryError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let value = serde_json::from_slice(&bytes)
                .map_err(|source| RepositoryError::Malformed { path: path.to_path_buf(), source })?;
            Ok(Some(value))
        }
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(RepositoryError::Io { path: path.to_path_buf(), source }),
    }
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), RepositoryError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| RepositoryError::Io { path: path.to_path_buf(), source })?;
    }
    let content = serde_json::to_vec_pretty(value)
        .map_err(|source| RepositoryError::Malformed { path: path.to_path_buf(), source })?;
    let tmp = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("json")
    ));
    tokio::fs::write(&tmp, &content).await.map_err(|source| RepositoryError::Io { path: path.to_path_buf(), source })?;
    tokio::fs::rename(&tmp, path).await.map_err(|source| RepositoryError::Io { path: path.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use swpm_schema::PackageManifest;

    fn config_in(dir: &tempfile::TempDir) -> Config {
        Config::builder(dir.path()).build()
    }

    #[tokio::test]
    async fn fresh_package_has_none_state() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(config_in(&dir));
        let (state, version) = repo.get_install_state("SsmTest").await.unwrap();
        assert_eq!(state, InstallState::None);
        assert_eq!(version.as_str(), "");
    }

    #[tokio::test]
    async fn set_install_state_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(config_in(&dir));
        let version = Version::new("0.0.1");
        repo.set_install_state("SsmTest", &version, InstallState::Installed).await.unwrap();
        let (state, got_version) = repo.get_install_state("SsmTest").await.unwrap();
        assert_eq!(state, InstallState::Installed);
        assert_eq!(got_version, version);
        assert_eq!(repo.get_installed_version("SsmTest").await.unwrap(), version);
    }

    #[tokio::test]
    async fn retry_count_increments_only_on_repeat_state() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(config_in(&dir));
        let version = Version::new("0.0.1");
        repo.set_install_state("SsmTest", &version, InstallState::Installing).await.unwrap();
        repo.set_install_state("SsmTest", &version, InstallState::Installing).await.unwrap();
        repo.set_install_state("SsmTest", &version, InstallState::Installed).await.unwrap();

        let path = repo.install_state_path("SsmTest");
        let bytes = tokio::fs::read(&path).await.unwrap();
        let record: PackageInstallState = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(record.retry_count, 0);
    }

    #[tokio::test]
    async fn add_package_failure_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(config_in(&dir));
        let version = Version::new("0.0.1");
        let result = repo
            .add_package("SsmTest", &version, |_dir| async move { Err("boom".into()) })
            .await;
        assert!(result.is_err());
        assert!(!repo.version_dir("SsmTest", &version).exists());
    }

    #[tokio::test]
    async fn validate_package_requires_manifest_and_install_action() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(config_in(&dir));
        let version = Version::new("0.0.1");
        let version_dir = repo.version_dir("SsmTest", &version);
        tokio::fs::create_dir_all(&version_dir).await.unwrap();

        assert!(repo.validate_package("SsmTest", &version).await.is_err());

        let manifest = PackageManifest {
            name: "SsmTest".to_string(),
            platform: "linux".to_string(),
            architecture: "x86_64".to_string(),
            version: version.clone(),
            app_name: None,
            app_publisher: None,
            app_reference_url: None,
            app_type: None,
        };
        repo.write_manifest("SsmTest", &version, &manifest).await.unwrap();
        assert!(repo.validate_package("SsmTest", &version).await.is_err());

        tokio::fs::write(version_dir.join("install.sh"), b"#!/bin/sh\n").await.unwrap();
        repo.validate_package("SsmTest", &version).await.unwrap();
    }

    #[tokio::test]
    async fn traces_round_trip_and_clear_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(config_in(&dir));
        let mut tracer = Tracer::new();
        tracer.push(Trace::start("Install", Utc::now()));

        repo.persist_traces("SsmTest", &tracer).await.unwrap();
        let loaded = repo.load_traces("SsmTest").await.unwrap();
        assert_eq!(loaded.len(), 1);

        // Loading always clears the file.
        let loaded_again = repo.load_traces("SsmTest").await.unwrap();
        assert!(loaded_again.is_empty());
    }

    #[tokio::test]
    async fn lock_then_unlock_through_repository() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(config_in(&dir));
        assert!(repo.lock_package("SsmTest", "owner-a", "Install").await.unwrap());
        assert!(!repo.lock_package("SsmTest", "owner-b", "Install").await.unwrap());
        repo.unlock_package("SsmTest", "owner-a").await.unwrap();
        assert!(repo.lock_package("SsmTest", "owner-b", "Install").await.unwrap());
    }
}
