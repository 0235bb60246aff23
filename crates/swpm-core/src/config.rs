//! Injectable directory layout and tuning knobs.
//!
//! This core is embedded in an agent runtime that already owns its own
//! working directory convention, so the layout is an explicit,
//! constructible `Config` rather than free functions over a hardcoded
//! root -- every path is owned at the call site instead of living behind
//! module-level globals.

use std::path::{Path, PathBuf};

/// Directory layout and tuning knobs for one lifecycle engine instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the local package repository (`<repoRoot>/<norm(arn)>/...`).
    pub repo_root: PathBuf,
    /// Root holding cross-process lock files (`<lockRoot>/<norm(arn)>.lockfile`).
    pub lock_root: PathBuf,
    /// Root holding the manifest/manifest-hash cache.
    pub manifest_cache_root: PathBuf,
    /// Root holding the inventory content-hash cache.
    pub inventory_cache_root: PathBuf,
    /// Orchestration subdirectory prefix passed to the sub-document executor.
    pub orchestration_dir: String,
    /// Cross-process lock acquisition timeout, in seconds.
    pub lock_timeout_secs: u64,
    /// Max bytes kept from the front of the response stdout log.
    pub stdout_truncate_len: usize,
    /// Max bytes kept from the front of the response stderr log.
    pub stderr_truncate_len: usize,
}

/// Default stdout/stderr truncation length, matching typical agent-response
/// payload caps.
pub const DEFAULT_TRUNCATE_LEN: usize = 24_000;

/// Default cross-process lock timeout.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 60;

impl Config {
    /// Start building a `Config` rooted at `root` (e.g. an agent's working
    /// directory), with every sub-path defaulted beneath it.
    pub fn builder(root: impl Into<PathBuf>) -> ConfigBuilder {
        ConfigBuilder::new(root)
    }

    /// Resolve a root directory from the `SWPM_HOME` environment variable,
    /// falling back to the platform data directory.
    pub fn from_env_or_default() -> Self {
        let root = std::env::var("SWPM_HOME")
            .map(PathBuf::from)
            .ok()
            .or_else(|| dirs::data_local_dir().map(|d| d.join("swpm")))
            .unwrap_or_else(|| PathBuf::from(".swpm"));
        Self::builder(root).build()
    }
}

/// Builder for [`Config`], defaulting every path under one root.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    root: PathBuf,
    repo_root: Option<PathBuf>,
    lock_root: Option<PathBuf>,
    manifest_cache_root: Option<PathBuf>,
    inventory_cache_root: Option<PathBuf>,
    orchestration_dir: Option<String>,
    lock_timeout_secs: u64,
    stdout_truncate_len: usize,
    stderr_truncate_len: usize,
}

impl ConfigBuilder {
    fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            repo_root: None,
            lock_root: None,
            manifest_cache_root: None,
            inventory_cache_root: None,
            orchestration_dir: None,
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
            stdout_truncate_len: DEFAULT_TRUNCATE_LEN,
            stderr_truncate_len: DEFAULT_TRUNCATE_LEN,
        }
    }

    /// Override the repository root (defaults to `<root>/repository`).
    pub fn repo_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.repo_root = Some(path.into());
        self
    }

    /// Override the lock root (defaults to `<root>/locks`).
    pub fn lock_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_root = Some(path.into());
        self
    }

    /// Override the manifest cache root (defaults to `<root>/manifest-cache`).
    pub fn manifest_cache_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest_cache_root = Some(path.into());
        self
    }

    /// Override the inventory cache root (defaults to `<root>/inventory-cache`).
    pub fn inventory_cache_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.inventory_cache_root = Some(path.into());
        self
    }

    /// Override the orchestration directory prefix (defaults to `orchestration`).
    pub fn orchestration_dir(mut self, dir: impl Into<String>) -> Self {
        self.orchestration_dir = Some(dir.into());
        self
    }

    /// Override the cross-process lock timeout.
    pub fn lock_timeout_secs(mut self, secs: u64) -> Self {
        self.lock_timeout_secs = secs;
        self
    }

    /// Override the stdout/stderr truncation length (applies to both).
    pub fn truncate_len(mut self, len: usize) -> Self {
        self.stdout_truncate_len = len;
        self.stderr_truncate_len = len;
        self
    }

    /// Finish building.
    pub fn build(self) -> Config {
        let join = |sub: &str| self.root.join(sub);
        Config {
            repo_root: self.repo_root.unwrap_or_else(|| join("repository")),
            lock_root: self.lock_root.unwrap_or_else(|| join("locks")),
            manifest_cache_root: self
                .manifest_cache_root
                .unwrap_or_else(|| join("manifest-cache")),
            inventory_cache_root: self
                .inventory_cache_root
                .unwrap_or_else(|| join("inventory-cache")),
            orchestration_dir: self.orchestration_dir.unwrap_or_else(|| "orchestration".to_string()),
            lock_timeout_secs: self.lock_timeout_secs,
            stdout_truncate_len: self.stdout_truncate_len,
            stderr_truncate_len: self.stderr_truncate_len,
        }
    }
}

/// Path to the lock file for a normalized arn directory name.
pub fn lock_file_path(config: &Config, norm_arn: &str) -> PathBuf {
    config.lock_root.join(format!("{norm_arn}.lockfile"))
}

/// Path to the package directory under the repository root.
pub fn package_dir(config: &Config, norm_arn: &str) -> PathBuf {
    config.repo_root.join(norm_arn)
}

/// Path to a version directory under a package directory.
pub fn version_dir(package_dir: &Path, norm_version: &str) -> PathBuf {
    package_dir.join(norm_version)
}
