//! Shared fixtures: in-memory stores seeded with one project, a facility
//! user who delivers into it and a researcher who owns it.

#![allow(dead_code)]

use chrono::Utc;
use dds_crypto::KeyPair;
use dds_deliver::auth::{hash_password, Direction};
use dds_deliver::memory::{MemoryMetadataStore, MemoryObjectStore};
use dds_deliver::store::{PasswordSettings, Project, ProjectKeys, Role, User};
use dds_deliver::{Credentials, DeliveryConfig, DeliverySession, FileEntry};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const PROJECT: &str = "proj";
pub const BUCKET: &str = "test-bucket";
pub const FACILITY: &str = "facility";
pub const FACILITY_PASSWORD: &str = "facility-pass";
pub const RESEARCHER: &str = "researcher";
pub const RESEARCHER_PASSWORD: &str = "researcher-pass";

/// Cheap Argon2 settings so tests stay fast.
pub fn password_settings() -> PasswordSettings {
    PasswordSettings {
        salt: hex::encode(b"test-salt-16byte"),
        m_cost: 1024,
        t_cost: 1,
        p_cost: 1,
    }
}

pub fn user(username: &str, password: &str, role: Role) -> User {
    let settings = password_settings();
    User {
        id: username.to_string(),
        username: username.to_string(),
        role,
        password_hash: hash_password(password, &settings).unwrap(),
        password_settings: settings,
        projects: vec![PROJECT.to_string()],
    }
}

pub struct Harness {
    pub objects: Arc<MemoryObjectStore>,
    pub metadata: Arc<MemoryMetadataStore>,
    pub project_keys: KeyPair,
    /// Holds the input data, the session workspaces and download targets.
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let objects = Arc::new(MemoryObjectStore::new());
        let metadata = Arc::new(MemoryMetadataStore::new());
        let project_keys = KeyPair::generate();

        metadata.add_user(user(FACILITY, FACILITY_PASSWORD, Role::Facility));
        metadata.add_user(user(RESEARCHER, RESEARCHER_PASSWORD, Role::Researcher));
        metadata.add_project(Project {
            id: PROJECT.to_string(),
            owner: Some(RESEARCHER.to_string()),
            delivery_option: "S3".to_string(),
            keys: ProjectKeys {
                public: Some(project_keys.public_hex()),
                private: Some(project_keys.secret_hex()),
            },
            files: BTreeMap::new(),
        });

        Self {
            objects,
            metadata,
            project_keys,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn config(&self) -> DeliveryConfig {
        DeliveryConfig {
            s3_bucket: BUCKET.to_string(),
            max_workers: 2,
            workspace_root: self.dir.path().join("sessions"),
            ..DeliveryConfig::default()
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    /// Writes `contents` to `data/<relative>` and returns the path.
    pub fn write_input(&self, relative: &str, contents: &[u8]) -> PathBuf {
        let path = self.data_dir().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    pub async fn open(&self, config: DeliveryConfig, direction: Direction) -> DeliverySession {
        self.try_open(config, &credentials_for(direction), direction)
            .await
            .unwrap()
    }

    pub async fn try_open(
        &self,
        config: DeliveryConfig,
        credentials: &Credentials,
        direction: Direction,
    ) -> dds_deliver::DeliveryResult<DeliverySession> {
        fs::create_dir_all(&config.workspace_root).unwrap();
        DeliverySession::open(
            config,
            credentials,
            direction,
            self.objects.clone(),
            self.metadata.clone(),
        )
        .await
    }

    /// Pre-registers `key` as if an earlier delivery had stored it.
    pub fn register(&self, key: &str) {
        self.metadata.insert_file(PROJECT, key, entry());
    }

    pub fn store_object(&self, key: &str, data: &[u8]) {
        self.objects.insert(BUCKET, key, data.to_vec());
    }
}

pub fn credentials_for(direction: Direction) -> Credentials {
    match direction {
        Direction::Put | Direction::Remove => Credentials {
            username: Some(FACILITY.to_string()),
            password: Some(FACILITY_PASSWORD.to_string()),
            project: Some(PROJECT.to_string()),
            owner: Some(RESEARCHER.to_string()),
        },
        Direction::Get | Direction::List => Credentials {
            username: Some(RESEARCHER.to_string()),
            password: Some(RESEARCHER_PASSWORD.to_string()),
            project: Some(PROJECT.to_string()),
            owner: None,
        },
    }
}

pub fn entry() -> FileEntry {
    FileEntry {
        size: 1,
        encrypted_size: 1,
        compressed: false,
        sha256: String::new(),
        public_key: String::new(),
        owner: RESEARCHER.to_string(),
        uploaded_by: FACILITY.to_string(),
        registered_at: Utc::now(),
    }
}

/// Deterministic non-repeating bytes, long enough to span several blocks.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Bytes starting with the gzip magic number.
pub fn gzip_like() -> Vec<u8> {
    let mut data = vec![0x1F, 0x8B, 0x08, 0x00];
    data.extend_from_slice(&payload(1000));
    data
}

/// Entries left in a workspace's `files/` directory.
pub fn leftover_artifacts(files_dir: &Path) -> usize {
    fs::read_dir(files_dir).map(|d| d.count()).unwrap_or(0)
}
