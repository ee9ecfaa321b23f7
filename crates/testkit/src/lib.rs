//! Scripted in-process ComfyUI stand-in for integration tests.
//!
//! [`MockComfyUI::start`] binds an `axum` server on `127.0.0.1:0` that
//! serves `/upload/image`, `/prompt`, `/history/{prompt_id}`, `/queue` and
//! `/interrupt` according to a [`MockScript`], and records every call it
//! receives.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

/// Prompt ID handed out for every accepted submission.
pub const PROMPT_ID: &str = "prompt-0001";

/// Filename reported for the finished portrait.
pub const ARTIFACT_FILENAME: &str = "band_portrait_00001_.png";

/// How upload responses name the stored file.
#[derive(Debug, Clone)]
pub enum UploadNaming {
    /// Echo the multipart filename.
    Echo,
    /// Report a different name, as ComfyUI does on collisions.
    Rename(String),
    /// Leave `name` out of the response.
    Omit,
}

/// Behaviour of the mock server.
#[derive(Debug, Clone)]
pub struct MockScript {
    /// The first N upload requests get HTTP 500, whatever the file.
    pub upload_failures: usize,
    /// Uploads of these filenames always get HTTP 500.
    pub failing_files: Vec<String>,
    pub upload_naming: UploadNaming,
    /// Status returned by `POST /prompt`.
    pub prompt_status: u16,
    /// History queries answered with `{}` before the record appears.
    pub pending_ticks: usize,
    /// Status returned by `GET /history`.
    pub history_status: u16,
    /// Record returned once pending ticks are used up. Defaults to
    /// [`completed_history`] for the requested prompt.
    pub history_record: Option<Value>,
    pub output_node: String,
    /// `GET /queue` lists [`PROMPT_ID`] as the executing prompt.
    pub running: bool,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            upload_failures: 0,
            failing_files: Vec::new(),
            upload_naming: UploadNaming::Echo,
            prompt_status: 200,
            pending_ticks: 0,
            history_status: 200,
            history_record: None,
            output_node: "20".to_string(),
            running: false,
        }
    }
}

/// History body for a prompt whose output node produced one image.
pub fn completed_history(prompt_id: &str, output_node: &str) -> Value {
    json!({
        prompt_id: {
            "prompt": [],
            "outputs": {
                output_node: {
                    "images": [
                        { "filename": ARTIFACT_FILENAME, "subfolder": "", "type": "output" }
                    ]
                }
            },
            "status": { "status_str": "success", "completed": true, "messages": [] }
        }
    })
}

#[derive(Default)]
struct Calls {
    uploaded: Vec<String>,
    submissions: Vec<Value>,
    deleted: Vec<String>,
    interrupted: Vec<String>,
}

struct MockState {
    script: MockScript,
    upload_attempts: AtomicUsize,
    history_queries: AtomicUsize,
    calls: Mutex<Calls>,
}

/// A running mock server. Stops when dropped.
pub struct MockComfyUI {
    base_url: String,
    state: Arc<MockState>,
    task: tokio::task::JoinHandle<()>,
}

impl MockComfyUI {
    pub async fn start(script: MockScript) -> Self {
        let state = Arc::new(MockState {
            script,
            upload_attempts: AtomicUsize::new(0),
            history_queries: AtomicUsize::new(0),
            calls: Mutex::new(Calls::default()),
        });

        let app = Router::new()
            .route("/upload/image", post(upload_image))
            .route("/prompt", post(submit_prompt))
            .route("/history/{prompt_id}", get(history))
            .route("/queue", get(queue_status).post(queue))
            .route("/interrupt", post(interrupt))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock ComfyUI listener");
        let addr = listener.local_addr().expect("mock listener address");

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Mock ComfyUI server stopped");
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            task,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Every upload request received, successful or not.
    pub fn upload_attempts(&self) -> usize {
        self.state.upload_attempts.load(Ordering::SeqCst)
    }

    /// Multipart filenames of accepted uploads, in order.
    pub fn uploaded_files(&self) -> Vec<String> {
        self.calls().uploaded.clone()
    }

    /// Bodies posted to `/prompt`, including rejected ones.
    pub fn submissions(&self) -> Vec<Value> {
        self.calls().submissions.clone()
    }

    pub fn history_queries(&self) -> usize {
        self.state.history_queries.load(Ordering::SeqCst)
    }

    /// Prompt IDs removed through `POST /queue`.
    pub fn deleted_prompts(&self) -> Vec<String> {
        self.calls().deleted.clone()
    }

    /// Prompt IDs sent to `POST /interrupt`.
    pub fn interrupted_prompts(&self) -> Vec<String> {
        self.calls().interrupted.clone()
    }

    fn calls(&self) -> std::sync::MutexGuard<'_, Calls> {
        self.state.calls.lock().expect("mock state lock")
    }
}

impl Drop for MockComfyUI {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---- handlers ----

async fn upload_image(State(state): State<Arc<MockState>>, mut multipart: Multipart) -> Response {
    let attempt = state.upload_attempts.fetch_add(1, Ordering::SeqCst) + 1;

    let mut file_name = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("image") {
            file_name = field.file_name().map(str::to_string);
        }
        if field.bytes().await.is_err() {
            return (StatusCode::BAD_REQUEST, "truncated multipart body").into_response();
        }
    }

    let Some(file_name) = file_name else {
        return (StatusCode::BAD_REQUEST, "missing image field").into_response();
    };

    let script = &state.script;
    if attempt <= script.upload_failures || script.failing_files.contains(&file_name) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upload exploded").into_response();
    }

    state
        .calls
        .lock()
        .expect("mock state lock")
        .uploaded
        .push(file_name.clone());

    let body = match &script.upload_naming {
        UploadNaming::Echo => json!({ "name": file_name, "subfolder": "", "type": "input" }),
        UploadNaming::Rename(name) => json!({ "name": name, "subfolder": "", "type": "input" }),
        UploadNaming::Omit => json!({ "subfolder": "", "type": "input" }),
    };
    Json(body).into_response()
}

async fn submit_prompt(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    let number = {
        let mut calls = state.calls.lock().expect("mock state lock");
        calls.submissions.push(body);
        calls.submissions.len()
    };

    let status = StatusCode::from_u16(state.script.prompt_status).unwrap_or(StatusCode::OK);
    if !status.is_success() {
        let error = json!({
            "error": { "type": "prompt_outputs_failed_validation", "message": "Prompt outputs failed validation" },
            "node_errors": {}
        });
        return (status, Json(error)).into_response();
    }

    Json(json!({ "prompt_id": PROMPT_ID, "number": number, "node_errors": {} })).into_response()
}

async fn history(State(state): State<Arc<MockState>>, Path(prompt_id): Path<String>) -> Response {
    let query = state.history_queries.fetch_add(1, Ordering::SeqCst) + 1;

    let status = StatusCode::from_u16(state.script.history_status).unwrap_or(StatusCode::OK);
    if !status.is_success() {
        return (status, "history unavailable").into_response();
    }

    if query <= state.script.pending_ticks {
        return Json(json!({})).into_response();
    }

    let record = state
        .script
        .history_record
        .clone()
        .unwrap_or_else(|| completed_history(&prompt_id, &state.script.output_node));
    Json(record).into_response()
}

async fn queue(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    let ids: Vec<String> = body
        .get("delete")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    state
        .calls
        .lock()
        .expect("mock state lock")
        .deleted
        .extend(ids);
    StatusCode::OK.into_response()
}

async fn queue_status(State(state): State<Arc<MockState>>) -> Response {
    let running: Vec<Value> = if state.script.running {
        vec![json!([1, PROMPT_ID, {}, {}, [state.script.output_node]])]
    } else {
        Vec::new()
    };
    Json(json!({ "queue_running": running, "queue_pending": [] })).into_response()
}

async fn interrupt(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    if let Some(id) = body.get("prompt_id").and_then(Value::as_str) {
        state
            .calls
            .lock()
            .expect("mock state lock")
            .interrupted
            .push(id.to_string());
    }
    StatusCode::OK.into_response()
}
