#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use oncosweep::OncosweepClient;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use url::Url;

pub const API_KEY: &str = "test-key";
pub const CONTACT: &str = "Please contact the lab.";

/// One multipart request received on `/api/upload`.
#[derive(Debug, Clone, Default)]
pub struct RecordedChunk {
    pub fields: HashMap<String, String>,
    pub file_name: Option<String>,
    pub data: Vec<u8>,
    pub authorization: Option<String>,
}

impl RecordedChunk {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct RecordedJson {
    pub route: String,
    pub body: Value,
    pub authorization: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct Behavior {
    /// Respond 500 to this part number.
    pub fail_on_part: Option<u64>,
    /// Never hand out an upload id.
    pub omit_upload_id: bool,
    /// Empty this local file once the first part has been received.
    pub truncate_after_first_part: Option<PathBuf>,
}

#[derive(Default)]
pub struct FakePlatform {
    behavior: Behavior,
    chunks: Mutex<Vec<RecordedChunk>>,
    json_requests: Mutex<Vec<RecordedJson>>,
}

impl FakePlatform {
    pub fn chunks(&self) -> Vec<RecordedChunk> {
        self.chunks.lock().unwrap().clone()
    }

    pub fn json_requests(&self) -> Vec<RecordedJson> {
        self.json_requests.lock().unwrap().clone()
    }

    fn record_json(&self, route: &str, headers: &HeaderMap, body: Value) {
        self.json_requests.lock().unwrap().push(RecordedJson {
            route: route.to_string(),
            body,
            authorization: authorization(headers),
        });
    }
}

fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn upload(
    State(platform): State<Arc<FakePlatform>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let mut chunk = RecordedChunk {
        authorization: authorization(&headers),
        ..RecordedChunk::default()
    };

    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            chunk.file_name = field.file_name().map(str::to_string);
            chunk.data = field.bytes().await.unwrap().to_vec();
        } else {
            let value = field.text().await.unwrap();
            chunk.fields.insert(name, value);
        }
    }

    let part_number: u64 = chunk.field("part_number").unwrap().parse().unwrap();
    let has_upload_id = chunk.fields.contains_key("upload_id");
    let upload_id = format!("upload-{}", chunk.field("filename").unwrap());
    platform.chunks.lock().unwrap().push(chunk);

    if part_number == 1 {
        if let Some(path) = &platform.behavior.truncate_after_first_part {
            std::fs::write(path, b"").unwrap();
        }
    }

    if platform.behavior.fail_on_part == Some(part_number) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "disk full").into_response();
    }

    if has_upload_id || platform.behavior.omit_upload_id {
        Json(json!({"message": "part stored"})).into_response()
    } else {
        Json(json!({"upload_id": upload_id})).into_response()
    }
}

async fn quant(
    State(platform): State<Arc<FakePlatform>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let message = format!("quantification queued for {}", body["name"].as_str().unwrap_or_default());
    platform.record_json("quant", &headers, body);
    Json(json!({"message": message}))
}

async fn qc(
    State(platform): State<Arc<FakePlatform>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    platform.record_json("qc", &headers, body);
    Json(json!({"status": "pending"}))
}

async fn predict(
    State(platform): State<Arc<FakePlatform>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    platform.record_json("predict", &headers, body);
    (StatusCode::SERVICE_UNAVAILABLE, "maintenance window").into_response()
}

async fn report(
    State(platform): State<Arc<FakePlatform>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    platform.record_json("report", &headers, body);
    Json(json!({"report": {"samples": 2, "status": "done"}}))
}

async fn list(
    State(platform): State<Arc<FakePlatform>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    platform.record_json("list", &headers, body);
    Json(json!({"summary": "2 experiments"}))
}

pub struct TestPlatform {
    pub platform: Arc<FakePlatform>,
    pub addr: SocketAddr,
}

impl TestPlatform {
    pub async fn start() -> Self {
        Self::with_behavior(Behavior::default()).await
    }

    pub async fn with_behavior(behavior: Behavior) -> Self {
        let platform = Arc::new(FakePlatform {
            behavior,
            ..FakePlatform::default()
        });

        let app = Router::new()
            .route("/api/upload", post(upload))
            .route("/api/quant", post(quant))
            .route("/api/qc", post(qc))
            .route("/api/predict", post(predict))
            .route("/api/report", post(report))
            .route("/api/list", post(list))
            .layer(DefaultBodyLimit::max(64 * 1024 * 1024))
            .with_state(platform.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { platform, addr }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).unwrap()
    }

    pub fn client(&self) -> OncosweepClient {
        OncosweepClient::new(self.url(), API_KEY.to_string(), CONTACT.to_string())
    }
}

/// Writes `size` bytes of a repeating pattern to `dir/name`.
pub fn write_file(dir: &Path, name: &str, size: usize) -> PathBuf {
    let path = dir.join(name);
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, data).unwrap();
    path
}
