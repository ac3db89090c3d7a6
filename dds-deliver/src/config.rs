//! Delivery configuration and user credentials.

use crate::error::{DeliveryError, DeliveryResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for a delivery session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Base URL of the metadata API (e.g., "https://delivery.example.org").
    pub api_base_url: String,

    /// Optional bearer token sent with every metadata API request.
    pub api_token: Option<String>,

    /// Object store bucket holding delivered containers.
    pub s3_bucket: String,

    pub s3_region: String,

    /// Optional S3 endpoint override (for MinIO in testing).
    pub s3_endpoint_override: Option<String>,

    /// Upper bound on files processed concurrently.
    pub max_workers: usize,

    /// Directory in which the session's temporary workspace is created.
    pub workspace_root: PathBuf,

    /// Cancel not-yet-uploaded siblings when a file in a directory fails.
    pub break_on_fail: bool,

    /// Replace files that are already registered or delivered.
    pub overwrite: bool,

    /// Check downloaded files against their registered SHA-256.
    pub verify_checksum: bool,

    pub request_timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000".to_string(),
            api_token: None,
            s3_bucket: "dds-delivery".to_string(),
            s3_region: "us-east-1".to_string(),
            s3_endpoint_override: None,
            max_workers: 4,
            workspace_root: PathBuf::from("."),
            break_on_fail: true,
            overwrite: false,
            verify_checksum: false,
            request_timeout_secs: 30,
        }
    }
}

impl DeliveryConfig {
    /// Loads a configuration file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> DeliveryResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DeliveryError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| DeliveryError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DeliveryResult<()> {
        if self.max_workers == 0 {
            return Err(DeliveryError::Config(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.s3_bucket.trim().is_empty() {
            return Err(DeliveryError::Config("s3_bucket must not be empty".to_string()));
        }
        Ok(())
    }
}

/// User credentials, from a JSON file and/or the command line.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub project: Option<String>,
    /// Project owner the delivery is addressed to (uploads only).
    pub owner: Option<String>,
}

impl Credentials {
    pub fn from_file(path: &Path) -> DeliveryResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DeliveryError::Validation(format!(
                "cannot read credentials file {}: {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            DeliveryError::Validation(format!(
                "malformed credentials file {}: {e}",
                path.display()
            ))
        })
    }

    /// Fills unset fields from `fallback`; values already set win.
    pub fn or(self, fallback: Credentials) -> Credentials {
        Credentials {
            username: self.username.or(fallback.username),
            password: self.password.or(fallback.password),
            project: self.project.or(fallback.project),
            owner: self.owner.or(fallback.owner),
        }
    }

    /// Checks that everything needed to log in is present.
    pub fn require_login(&self) -> DeliveryResult<(&str, &str, &str)> {
        let username = non_empty(&self.username)
            .ok_or_else(|| DeliveryError::Validation("username not specified".to_string()))?;
        let password = non_empty(&self.password)
            .ok_or_else(|| DeliveryError::Validation("password not specified".to_string()))?;
        let project = non_empty(&self.project)
            .ok_or_else(|| DeliveryError::Validation("project not specified".to_string()))?;
        Ok((username, password, project))
    }

    pub fn require_owner(&self) -> DeliveryResult<&str> {
        non_empty(&self.owner).ok_or_else(|| {
            DeliveryError::Validation("project owner not specified".to_string())
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
