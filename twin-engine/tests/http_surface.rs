use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use twin_auth::{AuthMode, AuthOptions};
use twin_blob::{BlobStore, MemoryBlobStore};
use twin_component::{AssetsManager, ComponentConfig, ComponentHandle};
use twin_engine::{Engine, EngineOptions, RunningEngine};
use twin_store::{MemoryRecordStore, RecordStore, UploadStatus, UserStore};

struct TestService {
    running: RunningEngine,
    records: Arc<MemoryRecordStore>,
    blobs: Arc<MemoryBlobStore>,
    client: reqwest::Client,
}

impl TestService {
    async fn start(component: ComponentHandle) -> Self {
        let records = Arc::new(MemoryRecordStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());

        let engine = Engine::builder()
            .options(
                EngineOptions::default()
                    .with_host("127.0.0.1")
                    .with_base_path("/api"),
            )
            .auth(AuthOptions::default().with_mode(AuthMode::Gateway))
            .record_store(records.clone(), records.clone())
            .blob_store(blobs.clone())
            .register(component)
            .unwrap()
            .build();

        Self {
            running: engine.start().await.unwrap(),
            records,
            blobs,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.running.port(), path)
    }
}

fn gltf_assets() -> ComponentHandle {
    ComponentHandle::Assets(Arc::new(AssetsManager::new(ComponentConfig::new(
        "gltf",
        "model/gltf-binary",
    ))))
}

#[tokio::test(flavor = "multi_thread")]
async fn health_endpoints_respond() {
    let service = TestService::start(gltf_assets()).await;

    let response = service
        .client
        .get(service.url("/healthz"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = service
        .client
        .get(service.url("/readyz"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    service.running.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn unmatched_routes_return_the_error_envelope() {
    let service = TestService::start(gltf_assets()).await;

    let response = service
        .client
        .get(service.url("/api/nope"))
        .header("x-request-id", "req-42")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    assert_eq!(body["error"]["requestId"], "req-42");
    assert!(body["error"]["timestamp"].is_string());

    service.running.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn asset_ownership_gate_over_http() {
    let service = TestService::start(gltf_assets()).await;

    // u1 uploads a private asset through the gateway identity headers.
    let response = service
        .client
        .post(service.url("/api/gltf?filename=scene.glb"))
        .header("x-user-id", "u1")
        .body("glb-bytes")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let asset: serde_json::Value = response.json().await.unwrap();
    let id = asset["id"].as_i64().unwrap();

    // A different non-admin user cannot delete it.
    let response = service
        .client
        .delete(service.url(&format!("/api/gltf/{id}")))
        .header("x-user-id", "u2")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "AUTHORIZATION_ERROR");

    // An admin-role user can.
    let response = service
        .client
        .delete(service.url(&format!("/api/gltf/{id}")))
        .header("x-user-id", "boss")
        .header("x-user-roles", "admin")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    service.running.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn authenticated_requests_reconcile_users() {
    let service = TestService::start(gltf_assets()).await;

    service
        .client
        .get(service.url("/api/gltf"))
        .header("x-user-id", "kc-9")
        .header("x-user-roles", "editor,viewer")
        .send()
        .await
        .unwrap();

    let user = service
        .records
        .find_by_external_id("kc-9")
        .await
        .unwrap()
        .expect("user created lazily");
    assert_eq!(user.roles.len(), 2);

    // Roles presented on the next request replace the stored set.
    service
        .client
        .get(service.url("/api/gltf"))
        .header("x-user-id", "kc-9")
        .header("x-user-roles", "viewer")
        .send()
        .await
        .unwrap();

    let user = service
        .records
        .find_by_external_id("kc-9")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.roles, vec!["viewer".to_string()]);

    service.running.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn tileset_upload_completes_asynchronously() {
    use std::io::Write;

    let service = TestService::start(ComponentHandle::Assets(Arc::new(
        AssetsManager::tilesets(ComponentConfig::new("tiles", "application/zip")),
    )))
    .await;

    // A minimal valid archive with a root manifest and one tile.
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("tileset.json", options).unwrap();
        writer
            .write_all(br#"{"asset":{"version":"1.1"}}"#)
            .unwrap();
        writer.start_file("tiles/0/0/0.b3dm", options).unwrap();
        writer.write_all(b"tile-bytes").unwrap();
        writer.finish().unwrap();
    }
    let archive = cursor.into_inner();

    let response = service
        .client
        .post(service.url("/api/tiles?filename=city.zip"))
        .header("x-user-id", "u1")
        .body(archive)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
    let record: serde_json::Value = response.json().await.unwrap();
    let id = record["id"].as_i64().unwrap();
    assert_eq!(record["upload_status"], "pending");

    // The upload worker settles the record.
    let mut completed = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let record = service.records.get("tiles", id).await.unwrap().unwrap();
        if record.upload_status() == Some(UploadStatus::Completed) {
            assert!(!record.url.is_empty());
            assert!(service
                .blobs
                .retrieve(&format!("{}/tileset.json", record.url))
                .await
                .is_ok());
            completed = true;
            break;
        }
    }
    assert!(completed, "upload never completed");

    service.running.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn record_endpoints_serve_raw_artifacts() {
    use async_trait::async_trait;
    use twin_component::Collector;
    use twin_core::TwinResult;

    struct StaticCollector(ComponentConfig);

    #[async_trait]
    impl Collector for StaticCollector {
        fn configuration(&self) -> &ComponentConfig {
            &self.0
        }
        fn cron_pattern(&self) -> &str {
            "0 0 0 1 1 *"
        }
        async fn collect(&self) -> TwinResult<Bytes> {
            Ok(Bytes::from_static(b"{\"t\":22}"))
        }
    }

    let service = TestService::start(ComponentHandle::Collector(Arc::new(StaticCollector(
        ComponentConfig::new("weather", "application/json"),
    ))))
    .await;

    // Seed a record directly.
    let handle = service
        .blobs
        .save(Bytes::from_static(b"{\"t\":22}"), "weather", Some("json"))
        .await
        .unwrap();
    service
        .records
        .insert(
            "weather",
            twin_store::NewRecord::new("weather", "application/json", handle, chrono::Utc::now()),
        )
        .await
        .unwrap();

    let response = service
        .client
        .get(service.url("/api/weather/latest"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let latest: serde_json::Value = response.json().await.unwrap();
    let id = latest["id"].as_i64().unwrap();

    let response = service
        .client
        .get(service.url(&format!("/api/weather/{id}/data")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    assert_eq!(response.bytes().await.unwrap(), Bytes::from_static(b"{\"t\":22}"));

    service.running.stop().await.unwrap();
}
