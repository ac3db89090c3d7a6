//! Per-session temporary workspace.
//!
//! Layout: `<root>/DataDelivery_<YYYYmmdd-HHMMSS>_<id>/{files,logs}`. The
//! `files` directory holds intermediate containers and is purged on
//! teardown; `logs` survives so the session's log and failure report stay
//! available to the user.

use crate::error::DeliveryResult;
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

pub struct TempWorkspace {
    root: PathBuf,
    files: PathBuf,
    logs: PathBuf,
    torn_down: bool,
}

impl TempWorkspace {
    /// Creates a fresh session directory under `parent`.
    pub fn create(parent: &Path) -> DeliveryResult<Self> {
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        let id = Uuid::new_v4().simple().to_string();
        let root = parent.join(format!("DataDelivery_{stamp}_{}", &id[..8]));
        let files = root.join("files");
        let logs = root.join("logs");

        fs::create_dir_all(&files)?;
        fs::create_dir_all(&logs)?;
        debug!("created temporary workspace {}", root.display());

        Ok(Self {
            root,
            files,
            logs,
            torn_down: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files_dir(&self) -> &Path {
        &self.files
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs
    }

    /// Unique path for a new intermediate artifact.
    pub fn artifact_path(&self, suffix: &str) -> PathBuf {
        artifact_in(&self.files, suffix)
    }

    /// Removes every artifact under `files/`, then the directory itself.
    ///
    /// Returns the number of entries that could not be removed. Individual
    /// failures are logged and do not stop the purge.
    pub fn teardown(&mut self) -> usize {
        if self.torn_down {
            return 0;
        }
        self.torn_down = true;

        let failures = purge_dir(&self.files);
        if failures == 0 {
            if let Err(e) = fs::remove_dir(&self.files) {
                warn!("could not remove {}: {e}", self.files.display());
                return 1;
            }
        }
        debug!("temporary workspace {} purged", self.root.display());
        failures
    }
}

/// Fresh, collision-free file name for an intermediate artifact in `dir`.
pub fn artifact_in(dir: &Path, suffix: &str) -> PathBuf {
    dir.join(format!("{}{suffix}", Uuid::new_v4().simple()))
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn purge_dir(dir: &Path) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!("could not read {}: {e}", dir.display());
            return 1;
        }
    };

    let mut failures = 0;
    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                warn!("could not read entry in {}: {e}", dir.display());
                failures += 1;
                continue;
            }
        };

        let result = if path.is_dir() {
            let nested = purge_dir(&path);
            failures += nested;
            if nested > 0 {
                continue;
            }
            fs::remove_dir(&path)
        } else {
            fs::remove_file(&path)
        };

        if let Err(e) = result {
            warn!("could not remove temporary artifact {}: {e}", path.display());
            failures += 1;
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_has_files_and_logs() {
        let parent = tempfile::tempdir().unwrap();
        let ws = TempWorkspace::create(parent.path()).unwrap();

        assert!(ws.files_dir().is_dir());
        assert!(ws.logs_dir().is_dir());
        let name = ws.root().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("DataDelivery_"), "{name}");
    }

    #[test]
    fn teardown_purges_files_and_keeps_logs() {
        let parent = tempfile::tempdir().unwrap();
        let mut ws = TempWorkspace::create(parent.path()).unwrap();

        fs::write(ws.artifact_path(".c4gh"), b"container").unwrap();
        fs::create_dir(ws.files_dir().join("nested")).unwrap();
        fs::write(ws.files_dir().join("nested").join("x"), b"x").unwrap();
        fs::write(ws.logs_dir().join("dds-cli.log"), b"log").unwrap();

        assert_eq!(ws.teardown(), 0);
        assert!(!ws.files_dir().exists());
        assert!(ws.logs_dir().join("dds-cli.log").exists());
    }

    #[test]
    fn drop_tears_down() {
        let parent = tempfile::tempdir().unwrap();
        let files = {
            let ws = TempWorkspace::create(parent.path()).unwrap();
            fs::write(ws.artifact_path(""), b"data").unwrap();
            ws.files_dir().to_path_buf()
        };
        assert!(!files.exists());
    }

    #[test]
    fn artifact_paths_are_unique() {
        let parent = tempfile::tempdir().unwrap();
        let ws = TempWorkspace::create(parent.path()).unwrap();
        assert_ne!(ws.artifact_path(".c4gh"), ws.artifact_path(".c4gh"));
    }
}
