#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Form, Router};
use seqdrop_types::UploadParameters;
use seqdrop_upload::{ObjectStore, StorageError, StoreConnector, UploadedPart};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub const TOKEN: &str = "k3y";
pub const CSRF: &str = "csrf-9f8e7d";
pub const PASSWORD: &str = "secret";

pub fn init_body() -> String {
    serde_json::json!({
        "upload_aws_access_key_id": "AKIA-test",
        "upload_aws_secret_access_key": "shh",
        "s3_bucket": "test-bucket",
        "file_id": "file-123",
        "callback_url": "/api/v0/confirm_upload/file-123",
    })
    .to_string()
}

#[derive(Clone, Debug)]
pub struct MockConfig {
    pub init_status: StatusCode,
    pub init_body: String,
    pub confirm_status: StatusCode,
    pub version_body: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            init_status: StatusCode::OK,
            init_body: init_body(),
            confirm_status: StatusCode::OK,
            version_body: r#"{"latest_version": "1.2.0", "min_supported_version": "1.0.0"}"#
                .to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Confirmation {
    pub authorization: Option<String>,
    pub body: serde_json::Value,
}

#[derive(Default)]
struct Recorded {
    init_auth: Vec<Option<String>>,
    confirmations: Vec<Confirmation>,
    version_forms: Vec<HashMap<String, String>>,
}

struct Shared {
    config: MockConfig,
    recorded: Mutex<Recorded>,
}

/// In-process stand-in for the ingestion service.
pub struct MockServer {
    pub url: String,
    shared: Arc<Shared>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::start_with(MockConfig::default()).await
    }

    pub async fn start_with(config: MockConfig) -> Self {
        let shared = Arc::new(Shared {
            config,
            recorded: Mutex::new(Recorded::default()),
        });

        let app = Router::new()
            .route("/api/v0/init_multipart_upload", get(init_upload))
            .route("/api/v0/confirm_upload/:file_id", post(confirm_upload))
            .route("/api/v0/check_for_cli_update", post(check_version))
            .route("/login", get(login_page).post(login_submit))
            .with_state(shared.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            shared,
        }
    }

    pub fn init_requests(&self) -> Vec<Option<String>> {
        self.shared.recorded.lock().unwrap().init_auth.clone()
    }

    pub fn confirmations(&self) -> Vec<Confirmation> {
        self.shared.recorded.lock().unwrap().confirmations.clone()
    }

    pub fn version_forms(&self) -> Vec<HashMap<String, String>> {
        self.shared.recorded.lock().unwrap().version_forms.clone()
    }
}

fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn init_upload(State(shared): State<Arc<Shared>>, headers: HeaderMap) -> impl IntoResponse {
    shared
        .recorded
        .lock()
        .unwrap()
        .init_auth
        .push(authorization(&headers));
    (shared.config.init_status, shared.config.init_body.clone())
}

async fn confirm_upload(
    State(shared): State<Arc<Shared>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let body = serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
    shared
        .recorded
        .lock()
        .unwrap()
        .confirmations
        .push(Confirmation {
            authorization: authorization(&headers),
            body,
        });
    shared.config.confirm_status
}

async fn check_version(
    State(shared): State<Arc<Shared>>,
    Form(form): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    shared.recorded.lock().unwrap().version_forms.push(form);
    shared.config.version_body.clone()
}

async fn login_page() -> impl IntoResponse {
    (
        [(header::SET_COOKIE, "session=abc; Path=/")],
        Html(format!(
            r#"<form method="post"><input id="csrf_token" name="csrf_token" type="hidden" value="{}"></form>"#,
            CSRF
        )),
    )
}

async fn login_submit(Form(form): Form<HashMap<String, String>>) -> impl IntoResponse {
    let authorized = form.get("csrf_token").map(String::as_str) == Some(CSRF)
        && form.get("password").map(String::as_str) == Some(PASSWORD)
        && form.contains_key("email");
    if authorized {
        format!(r#"{{"key": "{}"}}"#, TOKEN)
    } else {
        r#"{"key": null}"#.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Put { key: String, len: usize },
    Create { bucket: String, key: String },
    Part { number: i32, len: usize },
    Complete { parts: Vec<i32> },
    Abort,
}

/// Object store that keeps everything in memory and logs each call.
#[derive(Default)]
pub struct RecordingStore {
    calls: Mutex<Vec<StoreCall>>,
    parts: Mutex<Vec<(i32, Vec<u8>)>>,
    stored: Mutex<Option<Vec<u8>>>,
    fail_part: Option<i32>,
    /// Part that never finishes; `reached` is notified when it starts.
    stall_part: Option<i32>,
    /// Part whose upload cancels this token before it succeeds.
    cancel_at: Option<(i32, CancellationToken)>,
    fail_complete: bool,
    pub reached: Notify,
}

impl RecordingStore {
    pub fn failing_at(part_number: i32) -> Self {
        Self {
            fail_part: Some(part_number),
            ..Self::default()
        }
    }

    pub fn stalling_at(part_number: i32) -> Self {
        Self {
            stall_part: Some(part_number),
            ..Self::default()
        }
    }

    pub fn cancelling_at(part_number: i32, cancel: CancellationToken) -> Self {
        Self {
            cancel_at: Some((part_number, cancel)),
            ..Self::default()
        }
    }

    pub fn failing_complete() -> Self {
        Self {
            fail_complete: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn stored(&self) -> Option<Vec<u8>> {
        self.stored.lock().unwrap().clone()
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn put_object(&self, _bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        self.record(StoreCall::Put {
            key: key.to_string(),
            len: body.len(),
        });
        *self.stored.lock().unwrap() = Some(body);
        Ok(())
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String, StorageError> {
        self.record(StoreCall::Create {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        Ok("upload-1".to_string())
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        _upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<UploadedPart, StorageError> {
        if self.stall_part == Some(part_number) {
            self.reached.notify_one();
            std::future::pending::<()>().await;
        }
        self.record(StoreCall::Part {
            number: part_number,
            len: body.len(),
        });
        if self.fail_part == Some(part_number) {
            return Err(StorageError::Request("connection reset".to_string()));
        }
        self.parts.lock().unwrap().push((part_number, body));
        if let Some((number, cancel)) = &self.cancel_at {
            if *number == part_number {
                cancel.cancel();
            }
        }
        Ok(UploadedPart {
            part_number,
            etag: format!("etag-{}", part_number),
        })
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        _upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<(), StorageError> {
        self.record(StoreCall::Complete {
            parts: parts.iter().map(|p| p.part_number).collect(),
        });
        if self.fail_complete {
            return Err(StorageError::Request("service unavailable".to_string()));
        }
        let mut uploaded = self.parts.lock().unwrap().clone();
        uploaded.sort_by_key(|(number, _)| *number);
        *self.stored.lock().unwrap() = Some(uploaded.into_iter().flat_map(|(_, body)| body).collect());
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        _upload_id: &str,
    ) -> Result<(), StorageError> {
        self.record(StoreCall::Abort);
        Ok(())
    }
}

pub struct RecordingConnector {
    pub store: Arc<RecordingStore>,
    connects: AtomicUsize,
    params: Mutex<Option<UploadParameters>>,
}

impl RecordingConnector {
    pub fn new(store: RecordingStore) -> Arc<Self> {
        Arc::new(Self {
            store: Arc::new(store),
            connects: AtomicUsize::new(0),
            params: Mutex::new(None),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn params(&self) -> Option<UploadParameters> {
        self.params.lock().unwrap().clone()
    }
}

impl StoreConnector for RecordingConnector {
    fn connect(&self, params: &UploadParameters) -> Result<Arc<dyn ObjectStore>, StorageError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.params.lock().unwrap() = Some(params.clone());
        let store: Arc<dyn ObjectStore> = self.store.clone();
        Ok(store)
    }
}
