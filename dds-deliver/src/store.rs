//! Collaborator interfaces: the object store and the metadata store.
//!
//! The pipeline only talks to these traits. `S3ObjectStore` and
//! `HttpMetadataStore` are the production implementations, the in-memory
//! ones in [`crate::memory`] back the tests.

use crate::error::DeliveryResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Blob storage addressed by bucket and key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn exists(&self, bucket: &str, key: &str) -> DeliveryResult<bool>;

    /// Uploads the file at `source`. Returns the number of bytes stored.
    async fn put(&self, bucket: &str, key: &str, source: &Path) -> DeliveryResult<u64>;

    /// Downloads `key` into a new file at `destination`.
    async fn get(&self, bucket: &str, key: &str, destination: &Path) -> DeliveryResult<u64>;

    async fn delete(&self, bucket: &str, key: &str) -> DeliveryResult<()>;

    /// Keys under `prefix`, sorted.
    async fn list(&self, bucket: &str, prefix: &str) -> DeliveryResult<Vec<String>>;
}

/// Registry of users, projects and delivered files.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn user_by_username(&self, username: &str) -> DeliveryResult<Option<User>>;

    async fn project(&self, project_id: &str) -> DeliveryResult<Option<Project>>;

    async fn put_file(&self, project_id: &str, key: &str, entry: &FileEntry) -> DeliveryResult<()>;

    async fn delete_file(&self, project_id: &str, key: &str) -> DeliveryResult<()>;

    /// Looks up one registered file.
    async fn file(&self, project_id: &str, key: &str) -> DeliveryResult<Option<FileEntry>> {
        Ok(self
            .project(project_id)
            .await?
            .and_then(|mut p| p.files.remove(key)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Delivers data into projects.
    Facility,
    /// Receives data from projects.
    Researcher,
}

/// Argon2 parameters stored alongside a password hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordSettings {
    /// Hex-encoded salt.
    pub salt: String,
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub role: Role,
    /// Hex-encoded Argon2id output.
    pub password_hash: String,
    pub password_settings: PasswordSettings,
    /// Projects the user has access to.
    #[serde(default)]
    pub projects: Vec<String>,
}

/// Project key material, hex-encoded X25519 keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectKeys {
    pub public: Option<String>,
    pub private: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub owner: Option<String>,
    pub delivery_option: String,
    #[serde(default)]
    pub keys: ProjectKeys,
    #[serde(default)]
    pub files: BTreeMap<String, FileEntry>,
}

/// Metadata registered for one delivered file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Size of the original file.
    pub size: u64,
    pub encrypted_size: u64,
    /// The original was already compressed and stored as-is.
    pub compressed: bool,
    /// SHA-256 of the original file, hex.
    pub sha256: String,
    /// Writer key of the container header, hex.
    pub public_key: String,
    pub owner: String,
    pub uploaded_by: String,
    pub registered_at: DateTime<Utc>,
}
