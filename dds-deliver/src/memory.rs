//! In-memory collaborators.
//!
//! Used by the test suites and for dry runs. Both stores can be told to fail
//! specific operations so partial-failure paths can be exercised.

use crate::error::{DeliveryError, DeliveryResult};
use crate::store::{FileEntry, MetadataStore, ObjectStore, Project, User};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    fail_put: Mutex<HashSet<String>>,
    fail_delete: Mutex<HashSet<String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an object directly, bypassing the pipeline.
    pub fn insert(&self, bucket: &str, key: &str, data: Vec<u8>) {
        lock(&self.objects).insert((bucket.to_string(), key.to_string()), data);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        lock(&self.objects)
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        lock(&self.objects)
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Makes every `put` of `key` fail.
    pub fn fail_put(&self, key: &str) {
        lock(&self.fail_put).insert(key.to_string());
    }

    pub fn fail_delete(&self, key: &str) {
        lock(&self.fail_delete).insert(key.to_string());
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn exists(&self, bucket: &str, key: &str) -> DeliveryResult<bool> {
        Ok(lock(&self.objects).contains_key(&(bucket.to_string(), key.to_string())))
    }

    async fn put(&self, bucket: &str, key: &str, source: &Path) -> DeliveryResult<u64> {
        if lock(&self.fail_put).contains(key) {
            return Err(DeliveryError::Store(format!("upload failed for {key}: injected failure")));
        }
        let data = tokio::fs::read(source).await?;
        let size = data.len() as u64;
        self.insert(bucket, key, data);
        Ok(size)
    }

    async fn get(&self, bucket: &str, key: &str, destination: &Path) -> DeliveryResult<u64> {
        let data = self
            .object(bucket, key)
            .ok_or_else(|| DeliveryError::Store(format!("download failed for {key}: no such key")))?;
        tokio::fs::write(destination, &data).await?;
        Ok(data.len() as u64)
    }

    async fn delete(&self, bucket: &str, key: &str) -> DeliveryResult<()> {
        if lock(&self.fail_delete).contains(key) {
            return Err(DeliveryError::Store(format!("delete failed for {key}: injected failure")));
        }
        lock(&self.objects).remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> DeliveryResult<Vec<String>> {
        Ok(self
            .keys(bucket)
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    users: Mutex<HashMap<String, User>>,
    projects: Mutex<HashMap<String, Project>>,
    fail_put: Mutex<HashSet<String>>,
    fail_delete: Mutex<HashSet<String>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: User) {
        lock(&self.users).insert(user.username.clone(), user);
    }

    pub fn add_project(&self, project: Project) {
        lock(&self.projects).insert(project.id.clone(), project);
    }

    /// Registers a file entry directly, bypassing the pipeline.
    pub fn insert_file(&self, project_id: &str, key: &str, entry: FileEntry) {
        if let Some(project) = lock(&self.projects).get_mut(project_id) {
            project.files.insert(key.to_string(), entry);
        }
    }

    pub fn file_keys(&self, project_id: &str) -> Vec<String> {
        lock(&self.projects)
            .get(project_id)
            .map(|p| p.files.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Makes every `put_file` of `key` fail.
    pub fn fail_put(&self, key: &str) {
        lock(&self.fail_put).insert(key.to_string());
    }

    pub fn fail_delete(&self, key: &str) {
        lock(&self.fail_delete).insert(key.to_string());
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn user_by_username(&self, username: &str) -> DeliveryResult<Option<User>> {
        Ok(lock(&self.users).get(username).cloned())
    }

    async fn project(&self, project_id: &str) -> DeliveryResult<Option<Project>> {
        Ok(lock(&self.projects).get(project_id).cloned())
    }

    async fn put_file(&self, project_id: &str, key: &str, entry: &FileEntry) -> DeliveryResult<()> {
        if lock(&self.fail_put).contains(key) {
            return Err(DeliveryError::Store(format!(
                "registration failed for {key}: injected failure"
            )));
        }
        let mut projects = lock(&self.projects);
        let project = projects
            .get_mut(project_id)
            .ok_or_else(|| DeliveryError::Store(format!("unknown project {project_id}")))?;
        project.files.insert(key.to_string(), entry.clone());
        Ok(())
    }

    async fn delete_file(&self, project_id: &str, key: &str) -> DeliveryResult<()> {
        if lock(&self.fail_delete).contains(key) {
            return Err(DeliveryError::Store(format!(
                "metadata delete failed for {key}: injected failure"
            )));
        }
        if let Some(project) = lock(&self.projects).get_mut(project_id) {
            project.files.remove(key);
        }
        Ok(())
    }

    async fn file(&self, project_id: &str, key: &str) -> DeliveryResult<Option<FileEntry>> {
        Ok(lock(&self.projects)
            .get(project_id)
            .and_then(|p| p.files.get(key).cloned()))
    }
}
