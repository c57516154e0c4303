//! REST file-store provider against a mock server.

mod support;

use huddle_storage::StateStore;
use huddle_sync::backend::{HttpBackend, HttpBackendConfig, parse_backend_config};
use huddle_sync::{
    BackendAdapter, BackendConfig, BackendFactory, DeviceRecord, EngineConfig, ErrorKind,
    Provider, ProviderRegistry, Snapshot, SyncError, SyncOrchestrator, SyncUpOutcome,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use support::{at, meeting, meetings, minutes_ago};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY: &str = "huddle-sync-data";
const FILES: &str = "/folders/f1/files";

fn config_json(server: &MockServer) -> serde_json::Value {
    serde_json::json!({
        "baseUrl": server.uri(),
        "folderId": "f1",
        "accessToken": "at-1",
        "refreshToken": "rt-1",
        "tokenUrl": format!("{}/oauth/token", server.uri()),
        "clientId": "huddle-desktop",
    })
}

fn backend_from(json: serde_json::Value) -> HttpBackend {
    let config: HttpBackendConfig = serde_json::from_value(json).unwrap();
    HttpBackend::from_config(config, &EngineConfig::default())
        .unwrap()
        .with_retry_backoff(Duration::from_millis(10))
}

fn setup(server: &MockServer) -> HttpBackend {
    backend_from(config_json(server))
}

fn snapshot() -> Snapshot {
    let device = DeviceRecord {
        id: "device-a".into(),
        name: "Mac".into(),
        last_seen: at(0),
    };
    Snapshot::build(meetings(vec![meeting("m1", at(1))]), &device, at(2)).unwrap()
}

fn empty_listing() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({ "files": [] }))
}

// ── Upload ──

#[tokio::test]
async fn upload_creates_file_when_none_exists() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FILES))
        .and(query_param("name", KEY))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(empty_listing())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(FILES))
        .and(query_param("name", KEY))
        .and(body_string_contains("\"checksum\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "id": "file-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let receipt = setup(&server).upload(KEY, &snapshot(), None).await.unwrap();

    assert_eq!(receipt.remote_ref.as_deref(), Some("file-1"));
}

#[tokio::test]
async fn upload_with_ref_updates_in_place() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(format!("{FILES}/file-1")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let receipt = setup(&server)
        .upload(KEY, &snapshot(), Some("file-1"))
        .await
        .unwrap();

    assert_eq!(receipt.remote_ref.as_deref(), Some("file-1"));
}

#[tokio::test]
async fn upload_without_ref_reuses_file_found_by_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FILES))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [{ "id": "file-9", "name": KEY }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("{FILES}/file-9")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let receipt = setup(&server).upload(KEY, &snapshot(), None).await.unwrap();

    assert_eq!(receipt.remote_ref.as_deref(), Some("file-9"));
}

#[tokio::test]
async fn stale_ref_falls_back_to_create() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(format!("{FILES}/file-gone")))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(FILES))
        .respond_with(empty_listing())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(FILES))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "id": "file-2" })))
        .expect(1)
        .mount(&server)
        .await;

    let receipt = setup(&server)
        .upload(KEY, &snapshot(), Some("file-gone"))
        .await
        .unwrap();

    assert_eq!(receipt.remote_ref.as_deref(), Some("file-2"));
}

#[tokio::test]
async fn server_error_on_upload_is_backend_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
        .mount(&server)
        .await;

    let err = setup(&server)
        .upload(KEY, &snapshot(), Some("file-1"))
        .await
        .unwrap_err();

    let SyncError::Backend(ref message) = err else {
        panic!("expected backend error, got {err:?}");
    };
    assert!(message.contains("updating file"));
    assert!(message.contains("500"));
    assert!(message.contains("disk full"));
    assert_eq!(err.kind(), ErrorKind::Backend);
}

#[tokio::test]
async fn forbidden_listing_is_backend_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FILES))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = setup(&server).download(KEY, None).await.unwrap_err();

    assert!(matches!(err, SyncError::Backend(_)));
    assert!(!err.is_rate_limited());
}

// ── Download ──

#[tokio::test]
async fn download_returns_none_when_nothing_uploaded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FILES))
        .and(query_param("name", KEY))
        .respond_with(empty_listing())
        .mount(&server)
        .await;

    let result = setup(&server).download(KEY, None).await.unwrap();

    assert_eq!(result, None);
}

#[tokio::test]
async fn download_by_ref_reads_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{FILES}/file-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshot()))
        .mount(&server)
        .await;

    let result = setup(&server).download(KEY, Some("file-1")).await.unwrap();

    assert_eq!(result, Some(snapshot()));
}

#[tokio::test]
async fn download_with_stale_ref_looks_up_by_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{FILES}/file-gone")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(FILES))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [{ "id": "file-3" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{FILES}/file-3")))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshot()))
        .mount(&server)
        .await;

    let result = setup(&server).download(KEY, Some("file-gone")).await.unwrap();

    assert_eq!(result, Some(snapshot()));
}

// ── Auth ──

#[tokio::test]
async fn unauthorized_triggers_one_refresh_and_retry() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-1"))
        .and(body_string_contains("client_id=huddle-desktop"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-2",
            "refresh_token": "rt-2",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(header("authorization", "Bearer at-2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let backend = setup(&server);
    backend.upload(KEY, &snapshot(), Some("file-1")).await.unwrap();

    assert_eq!(backend.access_token().await, "at-2");
}

#[tokio::test]
async fn expiring_token_is_refreshed_before_the_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-2",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer at-2"))
        .respond_with(empty_listing())
        .expect(1)
        .mount(&server)
        .await;

    let mut json = config_json(&server);
    json["expiresAt"] = serde_json::json!(chrono::Utc::now() + chrono::Duration::seconds(30));
    let backend = backend_from(json);

    assert_eq!(backend.download(KEY, None).await.unwrap(), None);
}

#[tokio::test]
async fn rejected_refresh_is_auth_expired() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = setup(&server)
        .upload(KEY, &snapshot(), Some("file-1"))
        .await
        .unwrap_err();

    assert!(err.is_auth_expired());
}

#[tokio::test]
async fn missing_refresh_token_is_auth_expired() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_from(serde_json::json!({
        "baseUrl": server.uri(),
        "folderId": "f1",
        "accessToken": "at-1",
    }));

    let err = backend.download(KEY, None).await.unwrap_err();
    assert!(matches!(err, SyncError::AuthExpired));
}

#[tokio::test]
async fn still_unauthorized_after_refresh_is_auth_expired() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-2"
        })))
        .mount(&server)
        .await;

    let err = setup(&server).download(KEY, Some("file-1")).await.unwrap_err();
    assert!(err.is_auth_expired());
}

#[tokio::test]
async fn credentials_report_rotated_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-2",
            "refresh_token": "rt-2",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer at-2"))
        .respond_with(empty_listing())
        .mount(&server)
        .await;

    let mut json = config_json(&server);
    json["expiresAt"] = serde_json::json!(chrono::Utc::now() - chrono::Duration::seconds(5));
    let backend = backend_from(json);

    let before = backend.credentials().await.unwrap();
    assert_eq!(before["refreshToken"], "rt-1");

    backend.download(KEY, None).await.unwrap();

    let after = backend.credentials().await.unwrap();
    assert_eq!(after["accessToken"], "at-2");
    assert_eq!(after["refreshToken"], "rt-2");
    let expires_at: chrono::DateTime<chrono::Utc> =
        serde_json::from_value(after["expiresAt"].clone()).unwrap();
    assert!(expires_at > chrono::Utc::now());
}

#[tokio::test]
async fn rotated_tokens_survive_a_restart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("refresh_token=rt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-2",
            "refresh_token": "rt-2",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(FILES))
        .and(header("authorization", "Bearer at-2"))
        .respond_with(empty_listing())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(FILES))
        .and(header("authorization", "Bearer at-2"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "id": "file-9" })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("state.duckdb");
    let mut json = config_json(&server);
    json["expiresAt"] = serde_json::json!(chrono::Utc::now() - chrono::Duration::seconds(5));
    let serde_json::Value::Object(backend_config) = json else {
        unreachable!()
    };

    {
        let device = SyncOrchestrator::open(
            StateStore::open(&db).unwrap(),
            Arc::new(ProviderRegistry),
            EngineConfig::default(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_1)",
        )
        .await
        .unwrap();
        let result = device.configure(Provider::Http, backend_config).await.unwrap();
        assert!(result.success, "{:?}", result.error);
        device.set_auto_sync(false, None).await.unwrap();
    }

    let device = SyncOrchestrator::open(
        StateStore::open(&db).unwrap(),
        Arc::new(ProviderRegistry),
        EngineConfig::default(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_1)",
    )
    .await
    .unwrap();

    let saved = device.config().await.unwrap().backend_config;
    assert_eq!(saved["accessToken"], "at-2");
    assert_eq!(saved["refreshToken"], "rt-2");

    let outcome = device
        .sync_up(meetings(vec![meeting("m1", minutes_ago(1))]))
        .await
        .unwrap();
    assert!(matches!(outcome, SyncUpOutcome::Uploaded { .. }));
}

// ── Rate limiting ──

#[tokio::test]
async fn rate_limited_requests_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{FILES}/file-1")))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{FILES}/file-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshot()))
        .expect(1)
        .mount(&server)
        .await;

    let result = setup(&server).download(KEY, Some("file-1")).await.unwrap();

    assert_eq!(result, Some(snapshot()));
}

#[tokio::test]
async fn persistent_rate_limit_gives_up_after_two_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let err = setup(&server).download(KEY, Some("file-1")).await.unwrap_err();

    assert!(err.is_rate_limited());
}

// ── Factory ──

#[test]
fn registry_rejects_incomplete_config() {
    let mut config = BackendConfig::new();
    config.insert("baseUrl".into(), "https://files.example.com".into());

    let err = ProviderRegistry
        .create(Provider::Http, &config, &EngineConfig::default())
        .err()
        .unwrap();

    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("http backend config"));
}

#[test]
fn typed_config_parses_from_camel_case_map() {
    let map = serde_json::json!({
        "baseUrl": "https://files.example.com",
        "folderId": "root",
        "accessToken": "at",
    });
    let serde_json::Value::Object(map) = map else {
        unreachable!()
    };

    let config: HttpBackendConfig = parse_backend_config(Provider::Http, &map).unwrap();

    assert_eq!(config.folder_id, "root");
    assert_eq!(config.refresh_token, None);
    assert_eq!(config.expires_at, None);
}
