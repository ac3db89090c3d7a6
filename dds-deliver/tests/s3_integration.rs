//! S3ObjectStore against a local MinIO.
//!
//! Requires a MinIO on localhost:9000 with a `dds-delivery` bucket:
//! `cargo test -p dds-deliver --test s3_integration -- --ignored`

use dds_deliver::{DeliveryConfig, ObjectStore, S3ObjectStore, StaticCredentials};
use pretty_assertions::assert_eq;

async fn store() -> S3ObjectStore {
    let config = DeliveryConfig {
        s3_endpoint_override: Some("http://localhost:9000".into()),
        ..DeliveryConfig::default()
    };
    let credentials = StaticCredentials {
        access_key_id: "minioadmin".into(),
        secret_access_key: "minioadmin".into(),
        session_token: None,
    };
    S3ObjectStore::connect(&config, Some(credentials)).await.unwrap()
}

fn unique_prefix() -> String {
    format!("test-runs/{}", uuid::Uuid::new_v4())
}

#[tokio::test]
#[ignore]
async fn put_get_list_delete_roundtrip() {
    let store = store().await;
    let bucket = DeliveryConfig::default().s3_bucket;
    let prefix = unique_prefix();
    let key = format!("{prefix}/a.txt.zst.c4gh");

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("upload");
    std::fs::write(&source, b"container bytes").unwrap();

    assert!(!store.exists(&bucket, &key).await.unwrap());
    assert_eq!(store.put(&bucket, &key, &source).await.unwrap(), 15);
    assert!(store.exists(&bucket, &key).await.unwrap());
    assert_eq!(store.list(&bucket, &prefix).await.unwrap(), vec![key.clone()]);

    let target = dir.path().join("download");
    assert_eq!(store.get(&bucket, &key, &target).await.unwrap(), 15);
    assert_eq!(std::fs::read(&target).unwrap(), b"container bytes");

    store.delete(&bucket, &key).await.unwrap();
    assert!(!store.exists(&bucket, &key).await.unwrap());
}
