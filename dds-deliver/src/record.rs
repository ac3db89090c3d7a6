//! Per-file delivery records and their state machine.
//!
//! A record moves through three stages in order: processing (compress and
//! encrypt), upload, and database registration. Each stage goes
//! `NotStarted -> InProgress -> Finished` and never moves backwards.
//! Cancelling a record (`proceed = false`) is terminal and blocks any
//! further stage from starting; a stage already in progress may still
//! finish so that compensation knows what actually reached the stores.

use crate::error::{DeliveryError, DeliveryResult};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Suffix marking an encrypted container.
pub const ENCRYPTION_SUFFIX: &str = ".c4gh";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Processing,
    Upload,
    Database,
}

impl Stage {
    /// Stage that must be finished before this one may start.
    pub fn previous(self) -> Option<Stage> {
        match self {
            Stage::Processing => None,
            Stage::Upload => Some(Stage::Processing),
            Stage::Database => Some(Stage::Upload),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Processing => "processing",
            Stage::Upload => "upload",
            Stage::Database => "database registration",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    NotStarted,
    InProgress,
    Finished,
}

impl StageStatus {
    pub fn started(self) -> bool {
        self != StageStatus::NotStarted
    }
}

/// Coarse lifecycle state derived from the stage flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Discovered,
    Accepted,
    Processing,
    Uploading,
    Registering,
    Delivered,
    Cancelled,
}

/// One file under delivery.
#[derive(Clone, Debug, Serialize)]
pub struct DeliveryRecord {
    pub source: PathBuf,
    pub target_key: String,
    pub in_directory: bool,
    /// Input directory the file was found under.
    pub directory_group: Option<PathBuf>,
    pub size: u64,
    pub suffixes: String,
    pub compressed: bool,
    pub encrypted_path: Option<PathBuf>,
    pub encrypted_size: Option<u64>,
    pub sha256: Option<String>,
    pub writer_public_key: Option<String>,
    checked: bool,
    processing: StageStatus,
    upload: StageStatus,
    database: StageStatus,
    proceed: bool,
    error: String,
    failed_stage: Option<Stage>,
    /// Source of the sibling whose failure cancelled this record.
    cancelled_by: Option<PathBuf>,
}

impl DeliveryRecord {
    pub fn new(source: PathBuf, target_key: String, size: u64, compressed: bool) -> Self {
        let suffixes = target_suffixes(compressed);
        Self {
            source,
            target_key,
            in_directory: false,
            directory_group: None,
            size,
            suffixes,
            compressed,
            encrypted_path: None,
            encrypted_size: None,
            sha256: None,
            writer_public_key: None,
            checked: false,
            processing: StageStatus::NotStarted,
            upload: StageStatus::NotStarted,
            database: StageStatus::NotStarted,
            proceed: true,
            error: String::new(),
            failed_stage: None,
            cancelled_by: None,
        }
    }

    pub fn in_group(mut self, group: impl Into<PathBuf>) -> Self {
        self.in_directory = true;
        self.directory_group = Some(group.into());
        self
    }

    pub fn proceed(&self) -> bool {
        self.proceed
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        self.failed_stage
    }

    pub fn cancelled_by(&self) -> Option<&Path> {
        self.cancelled_by.as_deref()
    }

    pub fn checked(&self) -> bool {
        self.checked
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::Processing => self.processing,
            Stage::Upload => self.upload,
            Stage::Database => self.database,
        }
    }

    fn status_mut(&mut self, stage: Stage) -> &mut StageStatus {
        match stage {
            Stage::Processing => &mut self.processing,
            Stage::Upload => &mut self.upload,
            Stage::Database => &mut self.database,
        }
    }

    /// Records a passed existence check.
    pub fn accept(&mut self) -> DeliveryResult<()> {
        if !self.proceed {
            return Err(self.transition_error("accept a cancelled record"));
        }
        self.checked = true;
        Ok(())
    }

    /// Moves `stage` to `InProgress`.
    pub fn begin(&mut self, stage: Stage) -> DeliveryResult<()> {
        if !self.proceed {
            return Err(self.transition_error(&format!("start {stage} on a cancelled record")));
        }
        let ready = match stage.previous() {
            None => self.checked,
            Some(prev) => self.status(prev) == StageStatus::Finished,
        };
        if !ready {
            return Err(self.transition_error(&format!(
                "start {stage} before the previous stage finished"
            )));
        }
        if self.status(stage) != StageStatus::NotStarted {
            return Err(self.transition_error(&format!("start {stage} twice")));
        }
        *self.status_mut(stage) = StageStatus::InProgress;
        Ok(())
    }

    /// Moves `stage` from `InProgress` to `Finished`.
    pub fn finish(&mut self, stage: Stage) -> DeliveryResult<()> {
        if self.status(stage) != StageStatus::InProgress {
            return Err(self.transition_error(&format!(
                "finish {stage} while it is {:?}",
                self.status(stage)
            )));
        }
        *self.status_mut(stage) = StageStatus::Finished;
        Ok(())
    }

    /// Cancels the record. The first error is kept; later ones are ignored.
    pub fn cancel(&mut self, error: impl Into<String>) {
        if !self.proceed {
            return;
        }
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "cancelled".to_string();
        }
        self.failed_stage = [Stage::Database, Stage::Upload, Stage::Processing]
            .into_iter()
            .find(|s| self.status(*s) == StageStatus::InProgress);
        self.proceed = false;
        self.error = error;
    }

    /// Cancels the record because the sibling at `origin` failed.
    pub fn cancel_cascaded(&mut self, error: impl Into<String>, origin: &Path) {
        if !self.proceed {
            return;
        }
        self.cancel(error);
        self.cancelled_by = Some(origin.to_path_buf());
    }

    /// Upload has neither started nor finished.
    pub fn upload_pending(&self) -> bool {
        !self.upload.started()
    }

    pub fn is_delivered(&self) -> bool {
        self.proceed
            && self.processing == StageStatus::Finished
            && self.upload == StageStatus::Finished
            && self.database == StageStatus::Finished
    }

    pub fn state(&self) -> RecordState {
        if !self.proceed {
            return RecordState::Cancelled;
        }
        if self.is_delivered() {
            return RecordState::Delivered;
        }
        if self.database.started() {
            RecordState::Registering
        } else if self.upload.started() {
            RecordState::Uploading
        } else if self.processing.started() {
            RecordState::Processing
        } else if self.checked {
            RecordState::Accepted
        } else {
            RecordState::Discovered
        }
    }

    fn transition_error(&self, what: &str) -> DeliveryError {
        DeliveryError::InvalidTransition(format!("{}: cannot {what}", self.source.display()))
    }
}

/// Suffixes appended to the object key: compression marker for files the
/// pipeline compresses, then the encryption marker.
pub fn target_suffixes(already_compressed: bool) -> String {
    if already_compressed {
        ENCRYPTION_SUFFIX.to_string()
    } else {
        format!("{}{ENCRYPTION_SUFFIX}", crate::compression::COMPRESSION_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DeliveryRecord {
        DeliveryRecord::new(PathBuf::from("/data/a.txt"), "proj/a.txt.zst.c4gh".into(), 10, false)
    }

    fn delivered() -> DeliveryRecord {
        let mut r = record();
        r.accept().unwrap();
        for stage in [Stage::Processing, Stage::Upload, Stage::Database] {
            r.begin(stage).unwrap();
            r.finish(stage).unwrap();
        }
        r
    }

    #[test]
    fn happy_path_reaches_delivered() {
        let r = delivered();
        assert!(r.is_delivered());
        assert_eq!(r.state(), RecordState::Delivered);
        assert!(r.error().is_empty());
    }

    #[test]
    fn processing_requires_check() {
        let mut r = record();
        assert!(matches!(
            r.begin(Stage::Processing),
            Err(DeliveryError::InvalidTransition(_))
        ));
    }

    #[test]
    fn stages_must_run_in_order() {
        let mut r = record();
        r.accept().unwrap();
        assert!(r.begin(Stage::Upload).is_err());
        r.begin(Stage::Processing).unwrap();
        assert!(r.begin(Stage::Upload).is_err());
        assert!(r.finish(Stage::Upload).is_err());
        r.finish(Stage::Processing).unwrap();
        r.begin(Stage::Upload).unwrap();
        assert_eq!(r.state(), RecordState::Uploading);
    }

    #[test]
    fn finished_stage_is_never_reset() {
        let mut r = record();
        r.accept().unwrap();
        r.begin(Stage::Processing).unwrap();
        r.finish(Stage::Processing).unwrap();
        assert!(r.begin(Stage::Processing).is_err());
        assert!(r.finish(Stage::Processing).is_err());
        assert_eq!(r.status(Stage::Processing), StageStatus::Finished);
    }

    #[test]
    fn cancel_is_terminal_and_keeps_first_error() {
        let mut r = record();
        r.accept().unwrap();
        r.begin(Stage::Processing).unwrap();
        r.cancel("disk full");
        r.cancel("second failure");

        assert!(!r.proceed());
        assert_eq!(r.error(), "disk full");
        assert_eq!(r.failed_stage(), Some(Stage::Processing));
        assert_eq!(r.state(), RecordState::Cancelled);
        assert!(r.begin(Stage::Upload).is_err());
    }

    #[test]
    fn in_progress_stage_may_finish_after_cancel() {
        let mut r = record();
        r.accept().unwrap();
        r.begin(Stage::Processing).unwrap();
        r.finish(Stage::Processing).unwrap();
        r.begin(Stage::Upload).unwrap();
        r.cancel("interrupted");
        r.finish(Stage::Upload).unwrap();

        assert_eq!(r.status(Stage::Upload), StageStatus::Finished);
        assert!(!r.is_delivered());
    }

    #[test]
    fn empty_error_is_replaced() {
        let mut r = record();
        r.cancel("  ");
        assert!(!r.error().is_empty());
    }

    #[test]
    fn suffix_policy() {
        assert_eq!(target_suffixes(false), ".zst.c4gh");
        assert_eq!(target_suffixes(true), ".c4gh");
    }
}
