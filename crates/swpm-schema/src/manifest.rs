//! Package manifest (`manifest.json`) shape and validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::version::Version;

/// One `manifest.json`, describing a single package version on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Package identity (arn or short name).
    pub name: String,
    /// Target platform (e.g. `linux`, `windows`).
    pub platform: String,
    /// Target architecture (e.g. `x86_64`, `arm64`).
    pub architecture: String,
    /// Version this manifest describes.
    pub version: Version,
    /// Inventory-relevant application name, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    /// Inventory-relevant publisher name, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_publisher: Option<String>,
    /// Inventory-relevant reference URL, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_reference_url: Option<String>,
    /// Inventory-relevant application type, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_type: Option<String>,
}

/// Failure modes for manifest validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    /// The manifest's `name` is empty, or does not match the expected arn
    /// (exact case-insensitive match, or the expected arn suffixes it).
    #[error("manifest name '{found}' does not match expected '{expected}'")]
    NameMismatch { expected: String, found: String },
    /// The manifest's `version` is empty or does not case-insensitively
    /// match the expected version.
    #[error("manifest version '{found}' does not match expected '{expected}'")]
    VersionMismatch { expected: String, found: String },
}

impl PackageManifest {
    /// Validate this manifest against the arn/version the caller expected to
    /// find, per the name/version matching rules in the local repository
    /// contract (exact case-insensitive match, or expected-arn-suffixes-
    /// manifest-name to support arn-vs-short-name equivalence).
    pub fn validate(&self, expected_arn: &str, expected_version: &str) -> Result<(), ManifestError> {
        let name_ok = !self.name.is_empty()
            && (self.name.eq_ignore_ascii_case(expected_arn)
                || expected_arn
                    .to_lowercase()
                    .ends_with(&self.name.to_lowercase()));
        if !name_ok {
            return Err(ManifestError::NameMismatch {
                expected: expected_arn.to_string(),
                found: self.name.clone(),
            });
        }

        let version_ok = !self.version.is_empty()
            && self.version.as_str().eq_ignore_ascii_case(expected_version);
        if !version_ok {
            return Err(ManifestError::VersionMismatch {
                expected: expected_version.to_string(),
                found: self.version.as_str().to_string(),
            });
        }

        Ok(())
    }

    /// True if any inventory-relevant field is populated.
    pub fn has_inventory_data(&self) -> bool {
        self.app_name.is_some()
            || self.app_publisher.is_some()
            || self.app_reference_url.is_some()
            || self.app_type.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(name: &str, version: &str) -> PackageManifest {
        PackageManifest {
            name: name.to_string(),
            platform: "linux".to_string(),
            architecture: "x86_64".to_string(),
            version: Version::new(version),
            app_name: None,
            app_publisher: None,
            app_reference_url: None,
            app_type: None,
        }
    }

    #[test]
    fn exact_case_insensitive_name_matches() {
        let m = manifest("MyPackage", "1.0.0");
        assert!(m.validate("mypackage", "1.0.0").is_ok());
    }

    #[test]
    fn expected_arn_suffixing_manifest_name_matches() {
        // e.g. manifest name is the short name, arn carries a namespace prefix.
        let m = manifest("widget", "1.0.0");
        assert!(m.validate("arn:aws:ssm:widget", "1.0.0").is_ok());
    }

    #[test]
    fn unrelated_name_is_rejected() {
        let m = manifest("widget", "1.0.0");
        assert!(m.validate("other", "1.0.0").is_err());
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let m = manifest("widget", "1.0.0");
        assert!(m.validate("widget", "2.0.0").is_err());
    }

    #[test]
    fn empty_name_always_rejected() {
        let m = manifest("", "1.0.0");
        assert!(m.validate("", "1.0.0").is_err());
    }
}
