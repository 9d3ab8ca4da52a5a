//! API Regression Tests
//!
//! In-process tests that build the Axum app via `create_app()` and exercise
//! the /api/v1/* endpoints using `tower::ServiceExt::oneshot()`.
//! No binary spawn, no network port. The holder is a `ReplayHolder`;
//! sessions go to in-memory storage, or to session files in a temp dir for
//! the file endpoints.

use icodaq::acquisition::{Holder, ReplayEnd, ReplayHolder};
use icodaq::api::create_app;
use icodaq::pipeline::{AppContext, SessionSettings, WindowedRmsMetric};
use icodaq::sensors::SensorResolver;
use icodaq::storage::{ColumnarStorageFactory, InMemoryStorageFactory, StorageFactory};

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct TestApp {
    ctx: AppContext,
    holder: Arc<ReplayHolder>,
    _dir: tempfile::TempDir,
}

impl TestApp {
    /// App whose sessions stream until stopped.
    fn new() -> Self {
        Self::with_holder(ReplayHolder::new(ReplayHolder::ramp(50, 1_000.0, 1)).ending(ReplayEnd::Stall))
    }

    fn with_holder(holder: ReplayHolder) -> Self {
        Self::build(holder, |_| Arc::new(InMemoryStorageFactory::new()))
    }

    /// App whose sessions are written as session files into its data dir.
    fn with_session_files(holder: ReplayHolder) -> Self {
        Self::build(holder, |dir| {
            Arc::new(ColumnarStorageFactory::new(dir.to_path_buf(), 16))
        })
    }

    fn build(
        holder: ReplayHolder,
        storage: impl FnOnce(&std::path::Path) -> Arc<dyn StorageFactory>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let holder = Arc::new(holder);
        let ctx = AppContext::new(
            Arc::clone(&holder) as Arc<dyn Holder>,
            Arc::new(SensorResolver::new(dir.path().join("config/sensors.toml"))),
            storage(dir.path()),
            Arc::new(WindowedRmsMetric),
            SessionSettings {
                post_meta_poll: Duration::from_millis(10),
                ..SessionSettings::default()
            },
            dir.path().to_path_buf(),
        );
        Self {
            ctx,
            holder,
            _dir: dir,
        }
    }

    fn app(&self) -> Router {
        create_app(self.ctx.clone())
    }

    async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = self.app().oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Status, content-disposition header and raw body.
    async fn get_raw(&self, uri: &str) -> (StatusCode, Option<String>, Vec<u8>) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = self.app().oneshot(request).await.unwrap();
        let status = resp.status();
        let disposition = resp
            .headers()
            .get(axum::http::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, disposition, bytes.to_vec())
    }

    async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        self.request(Method::GET, uri, None).await
    }

    async fn post(&self, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    async fn wait_idle(&self) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while self.ctx.registry.is_running().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("session did not finish in time");
    }
}

fn start_body() -> serde_json::Value {
    serde_json::json!({
        "name": "spindle test",
        "first": { "channel_number": 1 },
        "ift_requested": false
    })
}

/// All plain GET endpoints should return 200.
#[tokio::test]
async fn test_v1_get_endpoints_return_200() {
    let app = TestApp::new();
    for endpoint in [
        "/api/v1/health",
        "/api/v1/measurement",
        "/api/v1/state",
        "/api/v1/sensor",
        "/api/v1/files",
    ] {
        let (status, _) = app.get(endpoint).await;
        assert_eq!(status, StatusCode::OK, "GET {endpoint} should return 200");
    }
}

#[tokio::test]
async fn test_health_reports_holder() {
    let app = TestApp::new();
    let (status, json) = app.get("/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "ok");
    assert_eq!(json["data"]["holder"], "replay");
    assert_eq!(json["data"]["measurement_running"], false);
    assert_eq!(json["meta"]["version"], "1");
}

#[tokio::test]
async fn test_idle_status_is_all_null() {
    let app = TestApp::new();
    let (_, json) = app.get("/api/v1/measurement").await;
    assert_eq!(json["running"], false);
    assert!(json["name"].is_null());
    assert!(json["start_time"].is_null());
    assert!(json["tool_name"].is_null());
    assert!(json["instructions"].is_null());
}

#[tokio::test]
async fn test_start_then_already_running() {
    let app = TestApp::new();

    let (status, first) = app.post("/api/v1/measurement/start", start_body()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["message"], "Measurement started successfully.");
    assert_eq!(first["data"]["running"], true);
    assert_eq!(first["data"]["tool_name"], "replay-node");
    let name = first["data"]["name"].as_str().unwrap().to_string();
    assert!(name.starts_with("spindle test__"), "got {name}");

    let (status, second) = app.post("/api/v1/measurement/start", start_body()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["message"], "Measurement is already running.");
    assert_eq!(second["data"]["name"], first["data"]["name"]);
    assert_eq!(second["data"]["start_time"], first["data"]["start_time"]);

    let (_, state) = app.get("/api/v1/state").await;
    assert_eq!(state["measurement_status"]["running"], true);
    assert_eq!(state["can_ready"], true);

    app.ctx.registry.cancel_active().await;
    assert_eq!(app.holder.stats().streams_opened, 1);
}

#[tokio::test]
async fn test_stop_returns_null_and_ends_session() {
    let app = TestApp::with_holder(
        ReplayHolder::new(ReplayHolder::ramp(10, 1_000.0, 1))
            .ending(ReplayEnd::Cycle)
            .with_delay(Duration::from_millis(1)),
    );
    app.post("/api/v1/measurement/start", start_body()).await;

    let (status, json) = app.post("/api/v1/measurement/stop", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.is_null());

    app.wait_idle().await;
    let (_, json) = app.get("/api/v1/measurement").await;
    assert_eq!(json["running"], false);
}

#[tokio::test]
async fn test_invalid_adc_rejected_with_422() {
    let app = TestApp::new();
    let body = serde_json::json!({
        "first": { "channel_number": 1 },
        "adc": { "acquisition_time": 5, "oversampling_rate": 3 }
    });

    let (status, json) = app.post("/api/v1/measurement/start", body).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"]["code"], "INVALID_PARAMETERS");
    let message = json["error"]["message"].as_str().unwrap();
    assert!(message.contains("acquisition_time"));
    assert!(message.contains("oversampling_rate"));
    assert!(!app.ctx.registry.is_running().await);
}

#[tokio::test]
async fn test_post_meta_accepted() {
    let app = TestApp::new();
    let body = serde_json::json!({ "version": "1", "profile": "post", "parameters": {} });
    let (status, json) = app.post("/api/v1/measurement/post_meta", body).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.is_null());
}

#[tokio::test]
async fn test_sensor_list_and_reset() {
    let app = TestApp::new();

    let (status, sensors) = app.get("/api/v1/sensor").await;
    assert_eq!(status, StatusCode::OK);
    let sensors = sensors.as_array().unwrap();
    assert_eq!(sensors.len(), 10);
    assert_eq!(sensors[0]["sensor_id"], "acc100g_01");

    let (status, json) = app.post("/api/v1/sensor/reset", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"].as_array().unwrap().len(), 10);
}

#[tokio::test]
async fn test_stu_reset_cancels_running_session() {
    let app = TestApp::new();
    app.post("/api/v1/measurement/start", start_body()).await;
    assert!(app.ctx.registry.is_running().await);

    let (status, json) = app.request(Method::PUT, "/api/v1/stu/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.is_null());
    assert!(!app.ctx.registry.is_running().await);
    assert_eq!(app.holder.stats().resets, 1);
}

// ============================================================================
// Session files
// ============================================================================

/// Start body whose session name is usable in a URI as-is.
fn file_session_body() -> serde_json::Value {
    serde_json::json!({ "name": "spindle_run", "first": { "channel_number": 1 } })
}

/// Run one short session to completion and return its file name.
async fn recorded_session(app: &TestApp) -> String {
    let (_, started) = app.post("/api/v1/measurement/start", file_session_body()).await;
    let name = started["data"]["name"].as_str().unwrap().to_string();
    app.wait_idle().await;
    format!("{name}.icod")
}

#[tokio::test]
async fn test_files_list_includes_finished_session() {
    let app = TestApp::with_session_files(ReplayHolder::new(ReplayHolder::ramp(50, 1_000.0, 1)));
    let (_, empty) = app.get("/api/v1/files").await;
    assert_eq!(empty["files"].as_array().unwrap().len(), 0);

    let file = recorded_session(&app).await;
    let (status, json) = app.get("/api/v1/files").await;
    assert_eq!(status, StatusCode::OK);
    let files = json["files"].as_array().unwrap();
    assert_eq!(files.len(), 1, "catalogue config dir is not listed");
    assert_eq!(files[0]["name"], file.as_str());
    assert!(files[0]["size"].as_u64().unwrap() > 0);
    assert!(json["capacity"].get("total").is_some());
    assert!(json["directory"].is_string());
}

#[tokio::test]
async fn test_file_download_meta_and_analyze() {
    let app = TestApp::with_session_files(ReplayHolder::new(ReplayHolder::ramp(50, 1_000.0, 1)));
    let file = recorded_session(&app).await;

    let (status, disposition, bytes) = app.get_raw(&format!("/api/v1/files/{file}")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(bytes.starts_with(b"ICOD"));
    assert!(disposition.unwrap().contains(&file));

    let (status, meta) = app.get(&format!("/api/v1/files/meta/{file}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(meta["channel_count"], 1);
    assert_eq!(meta["sample_count"], 50);
    assert_eq!(meta["metadata"]["sample_count"], 50);
    assert_eq!(meta["metadata"]["data_loss"], 0.0);
    assert_eq!(meta["metadata"]["sensors"][0]["sensor_id"], "acc100g_01");

    let (status, parsed) = app.get(&format!("/api/v1/files/analyze/{file}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parsed["name"], file.as_str());
    assert_eq!(parsed["timestamp"].as_array().unwrap().len(), 50);
    assert_eq!(parsed["timestamp"][0], 0.0);
    assert_eq!(parsed["counter"].as_array().unwrap().len(), 50);
    assert_eq!(parsed["datasets"][0]["name"], "acc100g_01");
    assert_eq!(parsed["datasets"][0]["data"].as_array().unwrap().len(), 50);
}

#[tokio::test]
async fn test_file_delete_then_404() {
    let app = TestApp::with_session_files(ReplayHolder::new(ReplayHolder::ramp(50, 1_000.0, 1)));
    let file = recorded_session(&app).await;
    let uri = format!("/api/v1/files/{file}");

    let (status, json) = app.request(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["detail"], format!("File '{file}' deleted successfully"));

    let (status, json) = app.request(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "NOT_FOUND");
    let (status, _) = app.get(&format!("/api/v1/files/meta/{file}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_running_session_file_cannot_be_deleted() {
    let app = TestApp::with_session_files(
        ReplayHolder::new(ReplayHolder::ramp(50, 1_000.0, 1)).ending(ReplayEnd::Stall),
    );
    let (_, started) = app.post("/api/v1/measurement/start", file_session_body()).await;
    let file = format!("{}.icod", started["data"]["name"].as_str().unwrap());

    let (status, json) = app
        .request(Method::DELETE, &format!("/api/v1/files/{file}"), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "CONFLICT");

    app.ctx.registry.cancel_active().await;
}

#[tokio::test]
async fn test_file_names_outside_session_files_are_refused() {
    let app = TestApp::new();
    for uri in [
        "/api/v1/files/..%2Fconfig%2Fsensors.toml",
        "/api/v1/files/..%5Csecret.icod",
        "/api/v1/files/sensors.toml",
        "/api/v1/files/meta/notes.txt",
    ] {
        let (status, json) = app.get(uri).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED, "GET {uri}");
        assert_eq!(json["error"]["code"], "METHOD_NOT_ALLOWED");
    }
    let (status, _) = app
        .request(Method::DELETE, "/api/v1/files/..%2F..%2Fetc%2Fpasswd", None)
        .await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let app = TestApp::new();
    let (status, _) = app.get("/api/v1/nonexistent").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
