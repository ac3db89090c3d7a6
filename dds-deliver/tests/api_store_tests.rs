mod support;

use dds_deliver::store::Role;
use dds_deliver::{DeliveryConfig, DeliveryError, HttpMetadataStore, MetadataStore};
use pretty_assertions::assert_eq;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn setup(server: &MockServer, token: Option<&str>) -> HttpMetadataStore {
    let config = DeliveryConfig {
        api_base_url: format!("{}/", server.uri()),
        api_token: token.map(str::to_string),
        request_timeout_secs: 5,
        ..DeliveryConfig::default()
    };
    HttpMetadataStore::new(&config).unwrap()
}

fn project_json() -> serde_json::Value {
    serde_json::json!({
        "id": "proj",
        "owner": "researcher",
        "delivery_option": "S3",
        "keys": { "public": "00", "private": null },
        "files": {
            "proj/a.txt.zst.c4gh": {
                "size": 10,
                "encrypted_size": 70,
                "compressed": false,
                "sha256": "ab",
                "public_key": "cd",
                "owner": "researcher",
                "uploaded_by": "facility",
                "registered_at": "2024-01-01T00:00:00Z"
            }
        }
    })
}

// --- Lookups ---

#[tokio::test]
async fn user_lookup_parses_and_sends_token() {
    let server = MockServer::start().await;
    let user = support::user("facility", "pw", Role::Facility);
    Mock::given(method("GET"))
        .and(path("/api/users/facility"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&user))
        .expect(1)
        .mount(&server)
        .await;

    let store = setup(&server, Some("secret-token"));
    let fetched = store.user_by_username("facility").await.unwrap();
    assert_eq!(fetched, Some(user));
}

#[tokio::test]
async fn missing_user_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users/ghost"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = setup(&server, None);
    assert_eq!(store.user_by_username("ghost").await.unwrap(), None);
}

#[tokio::test]
async fn project_and_file_lookup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/projects/proj"))
        .respond_with(ResponseTemplate::new(200).set_body_json(project_json()))
        .mount(&server)
        .await;

    let store = setup(&server, None);
    let project = store.project("proj").await.unwrap().unwrap();
    assert_eq!(project.owner.as_deref(), Some("researcher"));
    assert_eq!(project.keys.private, None);

    let entry = store.file("proj", "proj/a.txt.zst.c4gh").await.unwrap().unwrap();
    assert_eq!(entry.encrypted_size, 70);
    assert!(store.file("proj", "proj/other").await.unwrap().is_none());
}

#[tokio::test]
async fn server_error_becomes_store_error_with_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/projects/proj"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database unavailable"))
        .mount(&server)
        .await;

    let store = setup(&server, None);
    let err = store.project("proj").await.unwrap_err();
    assert!(matches!(err, DeliveryError::Store(_)));
    assert!(err.to_string().contains("database unavailable"));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn malformed_body_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/projects/proj"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let store = setup(&server, None);
    assert!(store.project("proj").await.is_err());
}

// --- Writes ---

#[tokio::test]
async fn put_file_sends_entry_as_json() {
    let server = MockServer::start().await;
    let entry = support::entry();
    Mock::given(method("PUT"))
        .and(path("/api/projects/proj/files"))
        .and(query_param("key", "proj/a b.txt.zst.c4gh"))
        .and(body_json(&entry))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let store = setup(&server, None);
    store
        .put_file("proj", "proj/a b.txt.zst.c4gh", &entry)
        .await
        .unwrap();
}

#[tokio::test]
async fn put_file_rejection_is_store_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/projects/proj/files"))
        .respond_with(ResponseTemplate::new(409).set_body_string("conflict"))
        .mount(&server)
        .await;

    let store = setup(&server, None);
    let err = store
        .put_file("proj", "proj/a.txt.zst.c4gh", &support::entry())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("409"));
}

#[tokio::test]
async fn delete_of_missing_entry_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/projects/proj/files"))
        .and(query_param("key", "proj/a.txt.zst.c4gh"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let store = setup(&server, None);
    store.delete_file("proj", "proj/a.txt.zst.c4gh").await.unwrap();
}
