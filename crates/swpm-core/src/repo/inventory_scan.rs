//! `GetInventoryData`: enumerate installed packages and surface the
//! inventory-relevant subset of their manifests.

use swpm_schema::{ApplicationData, InstallState, PackageInstallState};

use super::{Repository, RepositoryError};
use crate::normalize::normalize;

pub(super) async fn scan_inventory(repo: &Repository) -> Result<Vec<ApplicationData>, RepositoryError> {
    let root = repo.repo_root();
    let mut package_dirs = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(RepositoryError::Io { path: root.to_path_buf(), source }),
    };

    let mut out = Vec::new();
    while let Some(entry) = package_dirs
        .next_entry()
        .await
        .map_err(|source| RepositoryError::Io { path: root.to_path_buf(), source })?
    {
        if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }

        let package_dir = entry.path();
        let state_path = package_dir.join("installstate");
        let record = match tokio::fs::read(&state_path).await {
            Ok(bytes) => match serde_json::from_slice::<PackageInstallState>(&bytes) {
                Ok(record) => record,
                Err(_) => continue,
            },
            Err(_) => continue,
        };

        if record.state != InstallState::Installed {
            continue;
        }

        let manifest_path = package_dir.join(normalize(record.version.as_str())).join("manifest.json");
        let manifest = match tokio::fs::read(&manifest_path).await {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };
        let manifest: swpm_schema::PackageManifest = match serde_json::from_slice(&manifest) {
            Ok(manifest) => manifest,
            Err(_) => continue,
        };

        if !manifest.has_inventory_data() {
            continue;
        }

        out.push(ApplicationData {
            name: record.name,
            version: record.version.as_str().to_string(),
            publisher: manifest.app_publisher,
            url: manifest.app_reference_url,
            application_type: manifest.app_type,
        });
    }

    Ok(out)
}
