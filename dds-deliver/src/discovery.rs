//! Turns user-supplied paths into delivery records.

use crate::compression::sniff;
use crate::error::{DeliveryError, DeliveryResult};
use crate::record::{target_suffixes, DeliveryRecord};
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Gathers input paths from the command line and an optional path-list file.
///
/// Every path must exist, and no path may be given twice, either literally
/// or after resolving it. Nothing is read besides the list file itself.
pub fn collect_inputs(paths: &[PathBuf], path_list: Option<&Path>) -> DeliveryResult<Vec<PathBuf>> {
    let mut all: Vec<PathBuf> = paths.to_vec();

    if let Some(list) = path_list {
        let contents = fs::read_to_string(list).map_err(|e| {
            DeliveryError::Validation(format!("cannot read path list {}: {e}", list.display()))
        })?;
        all.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(PathBuf::from),
        );
    }

    if all.is_empty() {
        return Err(DeliveryError::Validation("no data specified".to_string()));
    }

    let mut seen_raw = HashSet::new();
    let mut seen_resolved = HashSet::new();
    let mut resolved = Vec::with_capacity(all.len());

    for path in all {
        if !seen_raw.insert(path.clone()) {
            return Err(DeliveryError::Validation(format!(
                "path {} listed multiple times",
                path.display()
            )));
        }
        let canonical = fs::canonicalize(&path).map_err(|_| {
            DeliveryError::Validation(format!("path {} does not exist", path.display()))
        })?;
        if !seen_resolved.insert(canonical.clone()) {
            return Err(DeliveryError::Validation(format!(
                "path {} resolves to {}, which is already listed",
                path.display(),
                canonical.display()
            )));
        }
        resolved.push(canonical);
    }

    Ok(resolved)
}

/// Builds one record per file. Directories are walked recursively and their
/// files form a group identified by the directory path. Keys use only the
/// directory's name.
pub fn discover(inputs: &[PathBuf], project_id: &str) -> DeliveryResult<Vec<DeliveryRecord>> {
    let mut records = Vec::new();
    let mut keys = HashSet::new();

    for input in inputs {
        if input.is_dir() {
            let name = file_name(input)?;
            for entry in WalkDir::new(input).sort_by_file_name() {
                let entry = entry.map_err(|e| {
                    DeliveryError::Validation(format!("cannot walk {}: {e}", input.display()))
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel_dir = entry
                    .path()
                    .parent()
                    .and_then(|p| p.strip_prefix(input).ok())
                    .map(key_path)
                    .unwrap_or_default();
                let mut subpath = name.clone();
                if !rel_dir.is_empty() {
                    subpath = format!("{subpath}/{rel_dir}");
                }
                let record =
                    build_record(entry.path(), project_id, Some(&subpath))?.in_group(input.as_path());
                push_unique(&mut records, &mut keys, record)?;
            }
        } else {
            let record = build_record(input, project_id, None)?;
            push_unique(&mut records, &mut keys, record)?;
        }
    }

    debug!("discovered {} file(s) from {} input(s)", records.len(), inputs.len());
    Ok(records)
}

/// Object key for a file: `<project>/<subpath>/<name><suffixes>`.
pub fn target_key(project_id: &str, subpath: Option<&str>, name: &str, suffixes: &str) -> String {
    match subpath {
        Some(sub) if !sub.is_empty() => format!("{project_id}/{sub}/{name}{suffixes}"),
        _ => format!("{project_id}/{name}{suffixes}"),
    }
}

fn build_record(path: &Path, project_id: &str, subpath: Option<&str>) -> DeliveryResult<DeliveryRecord> {
    let name = file_name(path)?;

    let (compressed, failure) = match sniff(path) {
        Ok(s) => {
            if s.extension_mismatch() {
                warn!(
                    "{} has a compression extension but is not compressed; it will be compressed",
                    path.display()
                );
            }
            (s.compressed(), None)
        }
        Err(e) => (false, Some(format!("cannot read {}: {e}", path.display()))),
    };

    let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let key = target_key(project_id, subpath, &name, &target_suffixes(compressed));
    let mut record = DeliveryRecord::new(path.to_path_buf(), key, size, compressed);
    if let Some(error) = failure {
        record.cancel(error);
    }
    Ok(record)
}

fn push_unique(
    records: &mut Vec<DeliveryRecord>,
    keys: &mut HashSet<String>,
    record: DeliveryRecord,
) -> DeliveryResult<()> {
    if !keys.insert(record.target_key.clone()) {
        return Err(DeliveryError::Validation(format!(
            "{} would be stored under {}, which another input already uses",
            record.source.display(),
            record.target_key
        )));
    }
    records.push(record);
    Ok(())
}

fn file_name(path: &Path) -> DeliveryResult<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| DeliveryError::Validation(format!("{} has no file name", path.display())))
}

/// Relative path joined with `/` regardless of platform.
fn key_path(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
