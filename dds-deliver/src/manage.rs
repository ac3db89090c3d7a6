//! Listing and removal of delivered files.

use crate::error::DeliveryResult;
use crate::store::{MetadataStore, ObjectStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// One registered file, keyed relative to the project.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ListedFile {
    pub key: String,
    pub size: u64,
    pub encrypted_size: u64,
    pub registered_at: DateTime<Utc>,
}

/// Registered files under `folder` (the whole project when `None`), sorted by key.
pub async fn list_files(
    metadata: &dyn MetadataStore,
    project_id: &str,
    folder: Option<&str>,
) -> DeliveryResult<Vec<ListedFile>> {
    let Some(project) = metadata.project(project_id).await? else {
        return Ok(Vec::new());
    };
    let project_prefix = format!("{project_id}/");

    // `files` is a BTreeMap, so the output is already sorted.
    Ok(project
        .files
        .iter()
        .filter_map(|(key, entry)| {
            let relative = key.strip_prefix(&project_prefix).unwrap_or(key);
            under_folder(relative, folder).then(|| ListedFile {
                key: relative.to_string(),
                size: entry.size,
                encrypted_size: entry.encrypted_size,
                registered_at: entry.registered_at,
            })
        })
        .collect())
}

fn under_folder(relative: &str, folder: Option<&str>) -> bool {
    match folder.map(|f| f.trim_matches('/')) {
        None | Some("") => true,
        Some(folder) => relative
            .strip_prefix(folder)
            .is_some_and(|rest| rest.starts_with('/')),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    pub removed: Vec<String>,
    /// Requested paths with no registered file.
    pub not_exists: Vec<String>,
    pub not_removed: BTreeMap<String, String>,
}

impl RemovalReport {
    pub fn is_success(&self) -> bool {
        self.not_exists.is_empty() && self.not_removed.is_empty()
    }
}

/// Removes each requested file (or every file under a requested folder)
/// from both stores.
///
/// The object goes first. If the entry removal then fails, the entry is
/// reported and can be retried; the opposite order would leave an
/// unregistered object that existence checks treat as diverged forever.
pub async fn remove_files(
    objects: &dyn ObjectStore,
    metadata: &dyn MetadataStore,
    bucket: &str,
    project_id: &str,
    paths: &[String],
) -> DeliveryResult<RemovalReport> {
    let registered = registered_keys(metadata, project_id).await?;
    let project_prefix = format!("{project_id}/");

    let mut report = RemovalReport::default();
    let mut targets = BTreeSet::new();
    for path in paths {
        let path = path.trim_matches('/');
        let matched: Vec<&String> = registered
            .iter()
            .filter(|key| {
                let relative = key.strip_prefix(&project_prefix).unwrap_or(key);
                crate::download::strip_suffixes(relative) == path
                    || relative == path
                    || under_folder(relative, Some(path))
            })
            .collect();
        if matched.is_empty() {
            report.not_exists.push(path.to_string());
        }
        targets.extend(matched.into_iter().cloned());
    }

    remove_keys(objects, metadata, bucket, project_id, targets, &mut report).await;
    Ok(report)
}

/// Removes every registered file in the project.
pub async fn remove_all_files(
    objects: &dyn ObjectStore,
    metadata: &dyn MetadataStore,
    bucket: &str,
    project_id: &str,
) -> DeliveryResult<RemovalReport> {
    let registered = registered_keys(metadata, project_id).await?;
    let mut report = RemovalReport::default();
    if registered.is_empty() {
        warn!("project {project_id} has no files to remove");
    }
    remove_keys(objects, metadata, bucket, project_id, registered, &mut report).await;
    Ok(report)
}

async fn registered_keys(
    metadata: &dyn MetadataStore,
    project_id: &str,
) -> DeliveryResult<BTreeSet<String>> {
    Ok(metadata
        .project(project_id)
        .await?
        .map(|p| p.files.into_keys().collect())
        .unwrap_or_default())
}

async fn remove_keys(
    objects: &dyn ObjectStore,
    metadata: &dyn MetadataStore,
    bucket: &str,
    project_id: &str,
    keys: BTreeSet<String>,
    report: &mut RemovalReport,
) {
    for key in keys {
        if let Err(e) = objects.delete(bucket, &key).await {
            warn!("could not remove object {key}: {e}");
            report.not_removed.insert(key, e.to_string());
            continue;
        }
        match metadata.delete_file(project_id, &key).await {
            Ok(()) => report.removed.push(key),
            Err(e) => {
                warn!("removed object {key} but not its entry: {e}");
                report.not_removed.insert(key, e.to_string());
            }
        }
    }

    info!(
        "removed {} file(s) from project {project_id}; {} not found, {} failed",
        report.removed.len(),
        report.not_exists.len(),
        report.not_removed.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_matching_is_component_wise() {
        assert!(under_folder("dir/a.c4gh", Some("dir")));
        assert!(under_folder("dir/sub/a.c4gh", Some("/dir/")));
        assert!(!under_folder("dirt/a.c4gh", Some("dir")));
        assert!(!under_folder("dir", Some("dir")));
        assert!(under_folder("anything", None));
    }
}
