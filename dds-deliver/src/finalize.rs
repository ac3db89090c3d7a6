//! Compensation after partial failures.
//!
//! The object upload and the metadata registration of one file are separate
//! calls against separate stores. When only one of them completed, the
//! completed half is undone so neither store refers to something the other
//! does not have. Failures here are logged and never escalated: the record
//! is already terminal.

use crate::cascade::RecordMap;
use crate::record::{Stage, StageStatus};
use crate::store::{MetadataStore, ObjectStore};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compensation {
    /// Uploaded but never registered.
    DeleteObject,
    /// Registered without a finished upload.
    DeleteEntry,
}

/// What, if anything, must be undone for a record in this state.
pub fn compensation_for(upload: StageStatus, database: StageStatus) -> Option<Compensation> {
    match (upload, database) {
        (StageStatus::Finished, StageStatus::Finished) => None,
        (StageStatus::Finished, _) => Some(Compensation::DeleteObject),
        (_, StageStatus::Finished) => Some(Compensation::DeleteEntry),
        _ => None,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalizeReport {
    pub objects_removed: Vec<String>,
    pub entries_removed: Vec<String>,
    /// Keys whose compensation failed, with the error.
    pub failed: Vec<(String, String)>,
}

pub struct Finalizer<'a> {
    pub objects: &'a dyn ObjectStore,
    pub metadata: &'a dyn MetadataStore,
    pub bucket: &'a str,
    pub project_id: &'a str,
}

impl Finalizer<'_> {
    /// Compensates every record whose upload and registration disagree.
    pub async fn run(&self, records: &RecordMap) -> FinalizeReport {
        let mut report = FinalizeReport::default();

        for (key, record) in records {
            let Some(action) =
                compensation_for(record.status(Stage::Upload), record.status(Stage::Database))
            else {
                continue;
            };
            self.apply(key, action, &mut report).await;
        }

        if !report.objects_removed.is_empty() || !report.entries_removed.is_empty() {
            info!(
                "finalize: removed {} unregistered object(s) and {} orphaned metadata entries",
                report.objects_removed.len(),
                report.entries_removed.len()
            );
        }
        report
    }

    pub async fn apply(&self, key: &str, action: Compensation, report: &mut FinalizeReport) {
        match action {
            Compensation::DeleteObject => match self.objects.delete(self.bucket, key).await {
                Ok(()) => report.objects_removed.push(key.to_string()),
                Err(e) => {
                    warn!("finalize: could not remove unregistered object {key}: {e}");
                    report.failed.push((key.to_string(), e.to_string()));
                }
            },
            Compensation::DeleteEntry => {
                match self.metadata.delete_file(self.project_id, key).await {
                    Ok(()) => report.entries_removed.push(key.to_string()),
                    Err(e) => {
                        warn!("finalize: could not remove orphaned metadata entry {key}: {e}");
                        report.failed.push((key.to_string(), e.to_string()));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use StageStatus::*;

    #[test]
    fn compensation_table() {
        assert_eq!(compensation_for(Finished, Finished), None);
        assert_eq!(compensation_for(Finished, NotStarted), Some(Compensation::DeleteObject));
        assert_eq!(compensation_for(Finished, InProgress), Some(Compensation::DeleteObject));
        assert_eq!(compensation_for(NotStarted, Finished), Some(Compensation::DeleteEntry));
        assert_eq!(compensation_for(InProgress, Finished), Some(Compensation::DeleteEntry));
        assert_eq!(compensation_for(InProgress, NotStarted), None);
        assert_eq!(compensation_for(NotStarted, NotStarted), None);
    }
}
