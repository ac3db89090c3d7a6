//! Upload coordinator.
//!
//! Owns the record map for one `put` and is the only code that mutates it.
//! Workers (one task per file, bounded by a semaphore) report what they are
//! about to do and what they did over a channel; the coordinator applies the
//! transition, runs the break-on-fail cascade and answers "may I start this
//! stage?" requests. This keeps cascade decisions serialized without locks.
//!
//! The run has three phases:
//! 1. existence checks for every record, applied in source-path order so
//!    the cascade outcome does not depend on network timing;
//! 2. processing, upload and registration by the worker pool;
//! 3. compensation for records whose upload and registration disagree.

use crate::cascade::{cascade, RecordMap};
use crate::error::DeliveryError;
use crate::existence::ExistenceChecker;
use crate::finalize::{FinalizeReport, Finalizer};
use crate::process::{process_file, Processed};
use crate::record::{DeliveryRecord, Stage, ENCRYPTION_SUFFIX};
use crate::store::{FileEntry, MetadataStore, ObjectStore};
use crate::workspace::artifact_in;
use chrono::Utc;
use dds_crypto::{KeyPair, PublicKey};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Per-run settings for the coordinator.
#[derive(Clone, Debug)]
pub struct UploadSettings {
    pub bucket: String,
    pub project_id: String,
    /// Project owner recorded on each file entry.
    pub owner: String,
    pub uploader: String,
    pub break_on_fail: bool,
    pub overwrite: bool,
    pub max_workers: usize,
    /// Where intermediate containers are written.
    pub files_dir: PathBuf,
}

/// Messages from workers to the coordinator.
enum Progress {
    /// Request to start `stage`; the reply says whether the worker may.
    Begin {
        key: String,
        stage: Stage,
        reply: oneshot::Sender<bool>,
    },
    Processed {
        key: String,
        outcome: Processed,
    },
    Finished {
        key: String,
        stage: Stage,
    },
    Failed {
        key: String,
        error: DeliveryError,
    },
}

/// Outcome of a coordinator run.
pub struct UploadOutcome {
    pub records: RecordMap,
    pub finalize: FinalizeReport,
}

pub struct UploadCoordinator {
    records: RecordMap,
    settings: UploadSettings,
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    recipient: PublicKey,
    sender: Arc<KeyPair>,
    cancel: CancellationToken,
}

impl UploadCoordinator {
    pub fn new(
        records: RecordMap,
        settings: UploadSettings,
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        recipient: PublicKey,
        sender: Arc<KeyPair>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            records,
            settings,
            objects,
            metadata,
            recipient,
            sender,
            cancel,
        }
    }

    /// Drives every record to a terminal state.
    pub async fn run(mut self) -> UploadOutcome {
        info!(
            "delivering {} file(s) to project {}",
            self.records.len(),
            self.settings.project_id
        );

        self.check_existence().await;
        self.deliver().await;
        self.sweep_unfinished();

        let finalize = Finalizer {
            objects: self.objects.as_ref(),
            metadata: self.metadata.as_ref(),
            bucket: &self.settings.bucket,
            project_id: &self.settings.project_id,
        }
        .run(&self.records)
        .await;

        let delivered = self.records.values().filter(|r| r.is_delivered()).count();
        info!(
            "delivery finished: {delivered} delivered, {} failed",
            self.records.len() - delivered
        );

        UploadOutcome {
            records: self.records,
            finalize,
        }
    }

    /// Phase 1: classify every record against both stores.
    async fn check_existence(&mut self) {
        // Records that already failed during discovery cascade first.
        for key in self.keys_in_source_order(|r| !r.proceed()) {
            cascade(&mut self.records, &key, self.settings.break_on_fail);
        }

        let pending = self.keys_in_source_order(|r| r.proceed());
        let limiter = Arc::new(Semaphore::new(self.settings.max_workers.max(1)));
        let mut checks = JoinSet::new();
        for key in &pending {
            let key = key.clone();
            let objects = Arc::clone(&self.objects);
            let metadata = Arc::clone(&self.metadata);
            let limiter = Arc::clone(&limiter);
            let project_id = self.settings.project_id.clone();
            let bucket = self.settings.bucket.clone();
            let overwrite = self.settings.overwrite;
            checks.spawn(async move {
                let _permit = limiter.acquire_owned().await;
                let checker = ExistenceChecker {
                    metadata: metadata.as_ref(),
                    objects: objects.as_ref(),
                    project_id: &project_id,
                    bucket: &bucket,
                };
                let result = checker.check(&key, overwrite).await;
                (key, result)
            });
        }

        let mut results = std::collections::HashMap::new();
        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok((key, result)) => {
                    results.insert(key, result);
                }
                Err(e) => error!("existence check task failed: {e}"),
            }
        }

        for key in pending {
            let outcome = if self.cancel.is_cancelled() {
                Err(DeliveryError::Interrupted)
            } else {
                results.remove(&key).unwrap_or_else(|| {
                    Err(DeliveryError::Store("existence check did not complete".to_string()))
                })
            };
            let Some(record) = self.records.get_mut(&key) else {
                continue;
            };
            // An earlier sibling may already have cancelled this one.
            if !record.proceed() {
                continue;
            }
            match outcome {
                Ok(()) => {
                    if let Err(e) = record.accept() {
                        error!("{e}");
                    }
                }
                Err(e) => {
                    warn!("{key}: {e}");
                    record.cancel(e.to_string());
                    cascade(&mut self.records, &key, self.settings.break_on_fail);
                }
            }
        }
    }

    /// Phase 2: run the worker pool until every accepted record is done.
    async fn deliver(&mut self) {
        let (tx, mut rx) = mpsc::channel(64);
        let ctx = Arc::new(WorkerContext {
            objects: Arc::clone(&self.objects),
            metadata: Arc::clone(&self.metadata),
            settings: self.settings.clone(),
            recipient: self.recipient.clone(),
            sender: Arc::clone(&self.sender),
            cancel: self.cancel.clone(),
            limiter: Arc::new(Semaphore::new(self.settings.max_workers.max(1))),
            tx,
        });

        let mut workers = JoinSet::new();
        for key in self.keys_in_source_order(|r| r.proceed() && r.checked()) {
            let Some(record) = self.records.get(&key) else {
                continue;
            };
            let job = Job {
                key,
                source: record.source.clone(),
                compress: !record.compressed,
                compressed: record.compressed,
            };
            workers.spawn(deliver_one(Arc::clone(&ctx), job));
        }
        // Workers hold the only remaining senders.
        drop(ctx);

        let cancel = self.cancel.clone();
        let mut interrupted = false;
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle(msg),
                    None => break,
                },
                _ = cancel.cancelled(), if !interrupted => {
                    interrupted = true;
                    warn!("interrupt received; letting in-flight files reach a safe point");
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("delivery worker failed: {e}");
            }
        }
    }

    fn handle(&mut self, msg: Progress) {
        match msg {
            Progress::Begin { key, stage, reply } => {
                let allowed = match self.records.get_mut(&key) {
                    Some(record) => match record.begin(stage) {
                        Ok(()) => true,
                        Err(e) => {
                            debug!("{e}");
                            false
                        }
                    },
                    None => false,
                };
                let _ = reply.send(allowed);
            }
            Progress::Processed { key, outcome } => {
                if let Some(record) = self.records.get_mut(&key) {
                    record.encrypted_path = Some(outcome.encrypted_path);
                    record.encrypted_size = Some(outcome.encrypted_size);
                    record.sha256 = Some(outcome.sha256);
                    record.writer_public_key = Some(outcome.writer_public_key);
                    if let Err(e) = record.finish(Stage::Processing) {
                        error!("{e}");
                    }
                }
            }
            Progress::Finished { key, stage } => {
                if let Some(record) = self.records.get_mut(&key) {
                    if let Err(e) = record.finish(stage) {
                        error!("{e}");
                    } else {
                        debug!("{key}: {stage} finished");
                    }
                }
            }
            Progress::Failed { key, error } => {
                if let Some(record) = self.records.get_mut(&key) {
                    warn!("{key}: {error}");
                    record.cancel(error.to_string());
                    cascade(&mut self.records, &key, self.settings.break_on_fail);
                }
            }
        }
    }

    /// Accepted records that never reached a terminal state (a worker died).
    fn sweep_unfinished(&mut self) {
        for (key, record) in self.records.iter_mut() {
            if record.proceed() && record.checked() && !record.is_delivered() {
                error!("{key}: delivery did not complete");
                record.cancel("delivery did not complete");
            }
        }
    }

    fn keys_in_source_order(&self, filter: impl Fn(&DeliveryRecord) -> bool) -> Vec<String> {
        let mut keys: Vec<(PathBuf, String)> = self
            .records
            .iter()
            .filter(|(_, r)| filter(r))
            .map(|(k, r)| (r.source.clone(), k.clone()))
            .collect();
        keys.sort();
        keys.into_iter().map(|(_, k)| k).collect()
    }
}

struct WorkerContext {
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    settings: UploadSettings,
    recipient: PublicKey,
    sender: Arc<KeyPair>,
    cancel: CancellationToken,
    limiter: Arc<Semaphore>,
    tx: mpsc::Sender<Progress>,
}

impl WorkerContext {
    async fn begin(&self, key: &str, stage: Stage) -> bool {
        let (reply, answer) = oneshot::channel();
        let msg = Progress::Begin {
            key: key.to_string(),
            stage,
            reply,
        };
        if self.tx.send(msg).await.is_err() {
            return false;
        }
        answer.await.unwrap_or(false)
    }

    async fn report(&self, msg: Progress) {
        if self.tx.send(msg).await.is_err() {
            warn!("coordinator stopped before a progress report was delivered");
        }
    }

    async fn fail(&self, key: &str, error: DeliveryError) {
        self.report(Progress::Failed {
            key: key.to_string(),
            error,
        })
        .await;
    }
}

struct Job {
    key: String,
    source: PathBuf,
    compress: bool,
    compressed: bool,
}

async fn deliver_one(ctx: Arc<WorkerContext>, job: Job) {
    let Ok(_permit) = Arc::clone(&ctx.limiter).acquire_owned().await else {
        ctx.fail(&job.key, DeliveryError::Interrupted).await;
        return;
    };
    if ctx.cancel.is_cancelled() {
        ctx.fail(&job.key, DeliveryError::Interrupted).await;
        return;
    }

    // Processing
    if !ctx.begin(&job.key, Stage::Processing).await {
        return;
    }
    let artifact = artifact_in(&ctx.settings.files_dir, ENCRYPTION_SUFFIX);
    let processed = {
        let source = job.source.clone();
        let artifact = artifact.clone();
        let compress = job.compress;
        let recipient = ctx.recipient.clone();
        let sender = Arc::clone(&ctx.sender);
        let cancel = ctx.cancel.clone();
        tokio::task::spawn_blocking(move || {
            process_file(&source, &artifact, compress, &recipient, &sender, &cancel)
        })
        .await
    };
    let processed = match processed {
        Ok(Ok(processed)) => processed,
        Ok(Err(e)) => {
            ctx.fail(&job.key, e).await;
            return;
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&artifact).await;
            ctx.fail(&job.key, DeliveryError::Io(std::io::Error::other(e.to_string())))
                .await;
            return;
        }
    };
    let entry = FileEntry {
        size: processed.plaintext_bytes,
        encrypted_size: processed.encrypted_size,
        compressed: job.compressed,
        sha256: processed.sha256.clone(),
        public_key: processed.writer_public_key.clone(),
        owner: ctx.settings.owner.clone(),
        uploaded_by: ctx.settings.uploader.clone(),
        registered_at: Utc::now(),
    };
    ctx.report(Progress::Processed {
        key: job.key.clone(),
        outcome: processed,
    })
    .await;

    // Upload
    if ctx.cancel.is_cancelled() {
        let _ = tokio::fs::remove_file(&artifact).await;
        ctx.fail(&job.key, DeliveryError::Interrupted).await;
        return;
    }
    if !ctx.begin(&job.key, Stage::Upload).await {
        let _ = tokio::fs::remove_file(&artifact).await;
        return;
    }
    let uploaded = ctx
        .objects
        .put(&ctx.settings.bucket, &job.key, &artifact)
        .await;
    if let Err(e) = tokio::fs::remove_file(&artifact).await {
        debug!("could not remove {}: {e}", artifact.display());
    }
    if let Err(e) = uploaded {
        ctx.fail(&job.key, e).await;
        return;
    }
    ctx.report(Progress::Finished {
        key: job.key.clone(),
        stage: Stage::Upload,
    })
    .await;

    // Registration
    if ctx.cancel.is_cancelled() {
        ctx.fail(&job.key, DeliveryError::Interrupted).await;
        return;
    }
    if !ctx.begin(&job.key, Stage::Database).await {
        return;
    }
    if let Err(e) = ctx
        .metadata
        .put_file(&ctx.settings.project_id, &job.key, &entry)
        .await
    {
        ctx.fail(&job.key, e).await;
        return;
    }
    ctx.report(Progress::Finished {
        key: job.key,
        stage: Stage::Database,
    })
    .await;
}
