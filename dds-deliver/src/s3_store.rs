//! S3-backed object store.
//!
//! Credentials come from the standard AWS provider chain unless static keys
//! are supplied. Objects are streamed from and to disk.

use crate::config::DeliveryConfig;
use crate::error::{DeliveryError, DeliveryResult};
use crate::store::ObjectStore;
use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Static access keys, for endpoints outside the AWS provider chain.
#[derive(Clone, Debug)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    /// Builds a client for the configured region and endpoint.
    pub async fn connect(
        config: &DeliveryConfig,
        credentials: Option<StaticCredentials>,
    ) -> DeliveryResult<Self> {
        let region = aws_types::region::Region::new(config.s3_region.clone());

        let mut config_builder = match credentials {
            Some(creds) => {
                let credentials = aws_credential_types::Credentials::new(
                    creds.access_key_id,
                    creds.secret_access_key,
                    creds.session_token,
                    None,
                    "dds-static",
                );
                aws_sdk_s3::Config::builder()
                    .region(region)
                    .credentials_provider(credentials)
                    .behavior_version_latest()
            }
            None => {
                let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        if let Some(ref endpoint) = config.s3_endpoint_override {
            config_builder = config_builder
                .endpoint_url(endpoint)
                .force_path_style(true);
        }

        Ok(Self {
            client: S3Client::from_conf(config_builder.build()),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn exists(&self, bucket: &str, key: &str) -> DeliveryResult<bool> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(DeliveryError::Store(format!(
                        "head object failed for {key}: {service_err}"
                    )))
                }
            }
        }
    }

    async fn put(&self, bucket: &str, key: &str, source: &Path) -> DeliveryResult<u64> {
        let size = tokio::fs::metadata(source).await?.len();
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| DeliveryError::Store(format!("cannot stream {}: {e}", source.display())))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| DeliveryError::Store(format!("upload failed for {key}: {e}")))?;

        debug!("uploaded {size} bytes to s3://{bucket}/{key}");
        Ok(size)
    }

    async fn get(&self, bucket: &str, key: &str, destination: &Path) -> DeliveryResult<u64> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| DeliveryError::Store(format!("download failed for {key}: {e}")))?;

        let mut file = tokio::fs::File::create(destination).await?;
        let mut body = resp.body;
        let mut written = 0u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| DeliveryError::Store(format!("failed to read body for {key}: {e}")))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!("downloaded {written} bytes from s3://{bucket}/{key}");
        Ok(written)
    }

    async fn delete(&self, bucket: &str, key: &str) -> DeliveryResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| DeliveryError::Store(format!("delete failed for {key}: {e}")))?;
        debug!("deleted s3://{bucket}/{key}");
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> DeliveryResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| DeliveryError::Store(format!("list failed for prefix {prefix}: {e}")))?;

            keys.extend(
                resp.contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(|k| k.to_string())),
            );

            match resp.next_continuation_token() {
                Some(token) if resp.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        keys.sort();
        Ok(keys)
    }
}
