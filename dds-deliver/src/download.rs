//! Download direction: fetch containers, verify, decrypt, decompress.
//!
//! Each key is independent: a failure is recorded on that item and the
//! rest continue. Output only appears under its final name once every
//! block verified; existing local files are never overwritten, and two
//! keys that restore to the same file are never both written.

use crate::compression::COMPRESSION_SUFFIX;
use crate::error::{DeliveryError, DeliveryResult};
use crate::process::HashingWriter;
use crate::record::ENCRYPTION_SUFFIX;
use crate::store::{MetadataStore, ObjectStore};
use crate::workspace::artifact_in;
use dds_crypto::{public_key_from_hex, PublicKey, SecretKey};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Suffix of in-progress output inside the destination directory.
pub const PART_SUFFIX: &str = ".part";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadStatus {
    Delivered { path: PathBuf, bytes: u64 },
    /// A local file with the output name already exists.
    Skipped { path: PathBuf },
    Failed { error: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadItem {
    /// Requested path, or object key once resolved.
    pub item: String,
    pub status: DownloadStatus,
}

pub struct Downloader {
    pub objects: Arc<dyn ObjectStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub bucket: String,
    pub project_id: String,
    pub recipient: SecretKey,
    /// Where containers are staged before decryption.
    pub files_dir: PathBuf,
    pub destination: PathBuf,
    pub max_workers: usize,
    /// Compare the restored file against the registered SHA-256.
    pub verify_checksum: bool,
    pub cancel: CancellationToken,
}

impl Downloader {
    /// Downloads every object under each requested project path. An empty
    /// path (or `/`) requests the whole project.
    pub async fn download(self: Arc<Self>, paths: &[String]) -> DeliveryResult<Vec<DownloadItem>> {
        let mut items = Vec::new();
        let mut keys = BTreeSet::new();

        for requested in paths {
            let requested = requested.trim_matches('/');
            let matched = self.resolve(requested).await?;
            if matched.is_empty() {
                let item = if requested.is_empty() { "/" } else { requested };
                warn!("{item}: not found in project {}", self.project_id);
                items.push(DownloadItem {
                    item: item.to_string(),
                    status: DownloadStatus::Failed {
                        error: format!("not found in project {}", self.project_id),
                    },
                });
            }
            keys.extend(matched);
        }
        self.fetch_keys(keys, items).await
    }

    /// Downloads every object in the project.
    pub async fn download_all(self: Arc<Self>) -> DeliveryResult<Vec<DownloadItem>> {
        let keys: BTreeSet<String> = self.resolve("").await?.into_iter().collect();
        if keys.is_empty() {
            warn!("project {} has no files", self.project_id);
        }
        self.fetch_keys(keys, Vec::new()).await
    }

    async fn fetch_keys(
        self: Arc<Self>,
        keys: BTreeSet<String>,
        mut items: Vec<DownloadItem>,
    ) -> DeliveryResult<Vec<DownloadItem>> {
        // Keys that restore to the same file: the first in key order wins.
        let mut claimed: HashMap<PathBuf, String> = HashMap::new();
        let mut jobs = Vec::with_capacity(keys.len());
        for key in keys {
            let output = self.output_for(&key);
            if let Some(first) = claimed.get(&output) {
                warn!("{key} and {first} both restore to {}; skipping {key}", output.display());
                items.push(DownloadItem {
                    status: DownloadStatus::Failed {
                        error: format!("{} is already restored from {first}", output.display()),
                    },
                    item: key,
                });
                continue;
            }
            claimed.insert(output.clone(), key.clone());
            jobs.push((key, output));
        }
        info!("downloading {} file(s) from project {}", jobs.len(), self.project_id);

        let limiter = Arc::new(Semaphore::new(self.max_workers.max(1)));
        let mut tasks = JoinSet::new();
        for (key, output) in jobs {
            let this = Arc::clone(&self);
            let limiter = Arc::clone(&limiter);
            tasks.spawn(async move {
                let _permit = limiter.acquire_owned().await;
                let status = if this.cancel.is_cancelled() {
                    DownloadStatus::Failed {
                        error: DeliveryError::Interrupted.to_string(),
                    }
                } else {
                    match this.fetch(&key, output).await {
                        Ok(status) => status,
                        Err(e) => {
                            warn!("{key}: {e}");
                            DownloadStatus::Failed { error: e.to_string() }
                        }
                    }
                };
                DownloadItem { item: key, status }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(item) => items.push(item),
                Err(e) => error!("download task failed: {e}"),
            }
        }
        items.sort_by(|a, b| a.item.cmp(&b.item));
        Ok(items)
    }

    /// Object keys belonging to `requested` (a file, a folder, or the
    /// whole project when empty).
    async fn resolve(&self, requested: &str) -> DeliveryResult<Vec<String>> {
        if requested.is_empty() {
            let prefix = format!("{}/", self.project_id);
            return self.objects.list(&self.bucket, &prefix).await;
        }
        let base = format!("{}/{requested}", self.project_id);
        let listed = self.objects.list(&self.bucket, &base).await?;
        Ok(listed
            .into_iter()
            .filter(|key| match key.strip_prefix(&base) {
                Some(rest) => rest.starts_with('/') || strip_suffixes(key) == base,
                None => false,
            })
            .collect())
    }

    fn output_for(&self, key: &str) -> PathBuf {
        let relative = key
            .strip_prefix(&format!("{}/", self.project_id))
            .unwrap_or(key);
        self.destination.join(strip_suffixes(relative))
    }

    async fn fetch(&self, key: &str, output: PathBuf) -> DeliveryResult<DownloadStatus> {
        if output.exists() {
            warn!("{} already exists; skipping {key}", output.display());
            return Ok(DownloadStatus::Skipped { path: output });
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let entry = self
            .metadata
            .file(&self.project_id, key)
            .await?
            .ok_or_else(|| {
                DeliveryError::Consistency(format!(
                    "{key} exists in storage but is not registered; contact support"
                ))
            })?;
        let sender = public_key_from_hex(&entry.public_key)?;
        let expected = if self.verify_checksum {
            if entry.sha256.is_empty() {
                return Err(DeliveryError::Consistency(format!(
                    "{key} has no registered checksum to verify against"
                )));
            }
            Some(entry.sha256)
        } else {
            None
        };

        let staged = artifact_in(&self.files_dir, ENCRYPTION_SUFFIX);
        self.objects.get(&self.bucket, key, &staged).await?;

        let decompress = key.ends_with(&format!("{COMPRESSION_SUFFIX}{ENCRYPTION_SUFFIX}"));
        let bytes = {
            let staged = staged.clone();
            let output = output.clone();
            let recipient = self.recipient.clone();
            tokio::task::spawn_blocking(move || {
                decrypt_to(&staged, &output, &recipient, &sender, decompress, expected.as_deref())
            })
            .await
            .map_err(|e| DeliveryError::Io(std::io::Error::other(e.to_string())))??
        };

        if let Err(e) = tokio::fs::remove_file(&staged).await {
            debug!("could not remove {}: {e}", staged.display());
        }
        debug!("{key} -> {}", output.display());
        Ok(DownloadStatus::Delivered {
            path: output,
            bytes,
        })
    }
}

/// Object key without the pipeline's suffixes.
pub fn strip_suffixes(key: &str) -> &str {
    let key = key.strip_suffix(ENCRYPTION_SUFFIX).unwrap_or(key);
    key.strip_suffix(COMPRESSION_SUFFIX).unwrap_or(key)
}

/// Decrypts `src` into `dst`, decompressing when the pipeline compressed it.
///
/// Output goes to a uniquely named `.part` file beside `dst` and is renamed
/// once every block verified and, when `expected_sha256` is given, the
/// restored file's digest matches. Returns the size of the restored file.
/// On failure nothing is left at `dst`.
pub fn decrypt_to(
    src: &Path,
    dst: &Path,
    recipient: &SecretKey,
    sender: &PublicKey,
    decompress: bool,
    expected_sha256: Option<&str>,
) -> DeliveryResult<u64> {
    let dir = dst.parent().unwrap_or_else(|| Path::new("."));
    let part = artifact_in(dir, PART_SUFFIX);

    let result = restore(src, &part, recipient, sender, decompress).and_then(|(sha256, bytes)| {
        if let Some(expected) = expected_sha256 {
            if !sha256.eq_ignore_ascii_case(expected) {
                return Err(DeliveryError::Consistency(format!(
                    "checksum mismatch for {}: registered {expected}, restored {sha256}",
                    dst.display()
                )));
            }
        }
        fs::rename(&part, dst)?;
        Ok(bytes)
    });
    if result.is_err() {
        let _ = fs::remove_file(&part);
    }
    result
}

/// Writes the plaintext to `part`, returning its SHA-256 and size.
fn restore(
    src: &Path,
    part: &Path,
    recipient: &SecretKey,
    sender: &PublicKey,
    decompress: bool,
) -> DeliveryResult<(String, u64)> {
    let mut reader = BufReader::new(File::open(src)?);
    let mut sink = HashingWriter::new(BufWriter::new(File::create(part)?));
    if decompress {
        let mut decoder = zstd::stream::write::Decoder::new(&mut sink)?;
        dds_crypto::decrypt(&mut reader, &mut decoder, recipient, Some(sender))?;
        decoder.flush()?;
    } else {
        dds_crypto::decrypt(&mut reader, &mut sink, recipient, Some(sender))?;
    }
    let (writer, sha256, bytes) = sink.finish();
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok((sha256, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    use dds_crypto::KeyPair;
    use sha2::{Digest, Sha256};

    struct Sealed {
        dir: tempfile::TempDir,
        container: PathBuf,
        recipient: KeyPair,
        sender: KeyPair,
    }

    fn seal(plaintext: &[u8]) -> Sealed {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("object.c4gh");
        let recipient = KeyPair::generate();
        let sender = KeyPair::generate();
        let mut out = File::create(&container).unwrap();
        dds_crypto::encrypt(&mut &plaintext[..], &mut out, &recipient.public, Some(&sender.secret))
            .unwrap();
        Sealed {
            dir,
            container,
            recipient,
            sender,
        }
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn verified_checksum_restores_the_file() {
        let data = b"ACGT".repeat(40_000);
        let sealed = seal(&data);
        let dst = sealed.dir.path().join("reads.txt");
        let digest = hex::encode(Sha256::digest(&data));

        let bytes = decrypt_to(
            &sealed.container,
            &dst,
            &sealed.recipient.secret,
            &sealed.sender.public,
            false,
            Some(&digest),
        )
        .unwrap();

        assert_eq!(bytes, data.len() as u64);
        assert_eq!(fs::read(&dst).unwrap(), data);
        assert_eq!(entries(sealed.dir.path()), vec!["object.c4gh", "reads.txt"]);
    }

    #[test]
    fn checksum_mismatch_leaves_nothing_behind() {
        let sealed = seal(b"sample");
        let dst = sealed.dir.path().join("sample.txt");
        let wrong = hex::encode(Sha256::digest(b"something else"));

        let err = decrypt_to(
            &sealed.container,
            &dst,
            &sealed.recipient.secret,
            &sealed.sender.public,
            false,
            Some(&wrong),
        )
        .unwrap_err();

        assert!(matches!(err, DeliveryError::Consistency(ref msg) if msg.contains("checksum mismatch")));
        assert!(!dst.exists());
        assert_eq!(entries(sealed.dir.path()), vec!["object.c4gh"]);
    }

    #[test]
    fn compressed_payload_is_hashed_after_decoding() {
        let data = b"GATTACA\n".repeat(10_000);
        let sealed = seal(&zstd::encode_all(&data[..], 3).unwrap());
        let dst = sealed.dir.path().join("reads.txt");

        decrypt_to(
            &sealed.container,
            &dst,
            &sealed.recipient.secret,
            &sealed.sender.public,
            true,
            Some(&hex::encode(Sha256::digest(&data))),
        )
        .unwrap();
        assert_eq!(fs::read(&dst).unwrap(), data);
    }

    #[test]
    fn suffixes_are_stripped_in_order() {
        assert_eq!(strip_suffixes("p/a.txt.zst.c4gh"), "p/a.txt");
        assert_eq!(strip_suffixes("p/a.fastq.gz.c4gh"), "p/a.fastq.gz");
        assert_eq!(strip_suffixes("p/plain"), "p/plain");
    }
}
