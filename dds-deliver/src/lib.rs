//! Encrypted data delivery.
//!
//! Files are compressed (unless already compressed), encrypted into
//! crypt4gh-style containers for the project's key, uploaded to an object
//! store and registered in a metadata store. Each file is tracked by a
//! [`DeliveryRecord`]; a failure inside a directory can cancel its
//! not-yet-uploaded siblings, and partial failures are compensated so the
//! two stores never disagree.
//!
//! [`DeliverySession`] is the entry point for all four directions.

pub mod api_store;
pub mod auth;
pub mod cascade;
pub mod compression;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod download;
mod error;
pub mod existence;
pub mod finalize;
pub mod manage;
pub mod memory;
pub mod process;
pub mod record;
pub mod s3_store;
pub mod session;
pub mod store;
pub mod summary;
pub mod workspace;

pub use api_store::HttpMetadataStore;
pub use auth::{Direction, Grant};
pub use config::{Credentials, DeliveryConfig};
pub use error::{DeliveryError, DeliveryResult};
pub use record::{DeliveryRecord, RecordState, Stage, StageStatus};
pub use s3_store::{S3ObjectStore, StaticCredentials};
pub use session::{DeliverySession, DownloadReport, UploadReport};
pub use store::{FileEntry, MetadataStore, ObjectStore};
pub use summary::DeliverySummary;
