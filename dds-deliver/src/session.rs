//! One delivery invocation.
//!
//! A session authenticates once, owns the temporary workspace and the
//! cancellation token, and hands both to whichever direction runs. Dropping
//! the session (or calling [`DeliverySession::close`]) purges the
//! workspace's temporary files.

use crate::auth::{authenticate, Direction, Grant};
use crate::cascade::RecordMap;
use crate::config::{Credentials, DeliveryConfig};
use crate::coordinator::{UploadCoordinator, UploadSettings};
use crate::discovery::{collect_inputs, discover};
use crate::download::{DownloadItem, Downloader};
use crate::error::{DeliveryError, DeliveryResult};
use crate::finalize::FinalizeReport;
use crate::manage::{list_files, remove_all_files, remove_files, ListedFile, RemovalReport};
use crate::store::{MetadataStore, ObjectStore};
use crate::summary::DeliverySummary;
use crate::workspace::TempWorkspace;
use dds_crypto::{public_key_from_hex, secret_key_from_hex, KeyPair};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Result of a `put`.
#[derive(Debug)]
pub struct UploadReport {
    pub records: RecordMap,
    pub finalize: FinalizeReport,
    pub summary: DeliverySummary,
}

/// Result of a `get`.
pub struct DownloadReport {
    pub items: Vec<DownloadItem>,
    pub summary: DeliverySummary,
}

pub struct DeliverySession {
    config: DeliveryConfig,
    grant: Grant,
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    workspace: TempWorkspace,
    cancel: CancellationToken,
}

impl DeliverySession {
    /// Authenticates and creates the session workspace.
    pub async fn open(
        config: DeliveryConfig,
        credentials: &Credentials,
        direction: Direction,
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> DeliveryResult<Self> {
        config.validate()?;
        let grant = authenticate(metadata.as_ref(), credentials, direction).await?;
        let workspace = TempWorkspace::create(&config.workspace_root)?;
        info!("session workspace: {}", workspace.root().display());

        Ok(Self {
            config,
            grant,
            objects,
            metadata,
            workspace,
            cancel: CancellationToken::new(),
        })
    }

    pub fn grant(&self) -> &Grant {
        &self.grant
    }

    pub fn workspace(&self) -> &TempWorkspace {
        &self.workspace
    }

    /// Token that interrupts the running direction when cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn require(&self, direction: Direction) -> DeliveryResult<()> {
        if self.grant.direction != direction {
            return Err(DeliveryError::Access(format!(
                "session was opened for {}, not {direction}",
                self.grant.direction
            )));
        }
        Ok(())
    }

    /// Delivers the given files and directories into the project.
    ///
    /// Missing and duplicate inputs are rejected before any file is read.
    pub async fn put(&self, inputs: &[PathBuf]) -> DeliveryResult<UploadReport> {
        self.require(Direction::Put)?;
        let inputs = collect_inputs(inputs, None)?;
        let project_id = self.grant.project_id().to_string();

        let records: RecordMap = discover(&inputs, &project_id)?
            .into_iter()
            .map(|r| (r.target_key.clone(), r))
            .collect();

        let public = self.grant.project.keys.public.as_deref().ok_or_else(|| {
            DeliveryError::Access(format!("project {project_id} has no public key"))
        })?;
        let recipient = public_key_from_hex(public)?;
        // A fresh writer key per session; its public half is registered with every file.
        let sender = Arc::new(KeyPair::generate());

        let settings = UploadSettings {
            bucket: self.config.s3_bucket.clone(),
            project_id: project_id.clone(),
            owner: self.grant.owner().to_string(),
            uploader: self.grant.user.username.clone(),
            break_on_fail: self.config.break_on_fail,
            overwrite: self.config.overwrite,
            max_workers: self.config.max_workers,
            files_dir: self.workspace.files_dir().to_path_buf(),
        };

        let outcome = UploadCoordinator::new(
            records,
            settings,
            Arc::clone(&self.objects),
            Arc::clone(&self.metadata),
            recipient,
            sender,
            self.cancel.clone(),
        )
        .run()
        .await;

        let summary =
            DeliverySummary::from_records(&outcome.records, &self.config.s3_bucket, &project_id);
        summary.write_failed_report(self.workspace.logs_dir())?;
        summary.log();

        Ok(UploadReport {
            records: outcome.records,
            finalize: outcome.finalize,
            summary,
        })
    }

    /// Downloads and decrypts project files into `destination`.
    pub async fn get(&self, paths: &[String], destination: &Path) -> DeliveryResult<DownloadReport> {
        self.require(Direction::Get)?;
        if paths.is_empty() {
            return Err(DeliveryError::Validation("no data specified".to_string()));
        }
        let items = self.downloader(destination)?.download(paths).await?;
        self.download_report(items)
    }

    /// Downloads and decrypts every file in the project.
    pub async fn get_all(&self, destination: &Path) -> DeliveryResult<DownloadReport> {
        self.require(Direction::Get)?;
        let items = self.downloader(destination)?.download_all().await?;
        self.download_report(items)
    }

    fn downloader(&self, destination: &Path) -> DeliveryResult<Arc<Downloader>> {
        let project_id = self.grant.project_id().to_string();
        let private = self.grant.project.keys.private.as_deref().ok_or_else(|| {
            DeliveryError::Access(format!("project {project_id} has no private key"))
        })?;
        let recipient = secret_key_from_hex(private)?;

        std::fs::create_dir_all(destination)?;
        Ok(Arc::new(Downloader {
            objects: Arc::clone(&self.objects),
            metadata: Arc::clone(&self.metadata),
            bucket: self.config.s3_bucket.clone(),
            project_id,
            recipient,
            files_dir: self.workspace.files_dir().to_path_buf(),
            destination: destination.to_path_buf(),
            max_workers: self.config.max_workers,
            verify_checksum: self.config.verify_checksum,
            cancel: self.cancel.clone(),
        }))
    }

    fn download_report(&self, items: Vec<DownloadItem>) -> DeliveryResult<DownloadReport> {
        let summary = DeliverySummary::from_downloads(&items);
        summary.write_failed_report(self.workspace.logs_dir())?;
        summary.log();
        Ok(DownloadReport { items, summary })
    }

    pub async fn list(&self, folder: Option<&str>) -> DeliveryResult<Vec<ListedFile>> {
        self.require(Direction::List)?;
        list_files(self.metadata.as_ref(), self.grant.project_id(), folder).await
    }

    pub async fn remove(&self, paths: &[String]) -> DeliveryResult<RemovalReport> {
        self.require(Direction::Remove)?;
        if paths.is_empty() {
            return Err(DeliveryError::Validation("no data specified".to_string()));
        }
        remove_files(
            self.objects.as_ref(),
            self.metadata.as_ref(),
            &self.config.s3_bucket,
            self.grant.project_id(),
            paths,
        )
        .await
    }

    /// Removes every file delivered to the project.
    pub async fn remove_all(&self) -> DeliveryResult<RemovalReport> {
        self.require(Direction::Remove)?;
        remove_all_files(
            self.objects.as_ref(),
            self.metadata.as_ref(),
            &self.config.s3_bucket,
            self.grant.project_id(),
        )
        .await
    }

    /// Purges temporary files. Returns how many could not be removed.
    pub fn close(mut self) -> usize {
        self.workspace.teardown()
    }
}
