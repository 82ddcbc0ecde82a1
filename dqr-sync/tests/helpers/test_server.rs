//! In-process review backend for HTTP client tests
//!
//! Speaks the same wire format as the production backend: folder listings
//! under `/files`, query-string approve/reject, multipart upload and an SSE
//! push channel that announces every change and sends keep-alive comments.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Multipart, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use dqr_common::config::ClientConfig;
use futures::stream::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

type Params = Query<HashMap<String, String>>;
type Reply = Result<Json<Value>, (StatusCode, String)>;

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub path: String,
    pub params: HashMap<String, String>,
    pub authorization: Option<String>,
}

struct BackendState {
    folders: Mutex<HashMap<String, Vec<Value>>>,
    calls: Mutex<Vec<RecordedCall>>,
    /// Folder names and endpoint names answering 500
    failing: Mutex<HashSet<String>>,
    /// Answer `/files` as `{"files": [...]}` instead of a bare list
    wrapped: Mutex<bool>,
    changes: broadcast::Sender<String>,
}

impl BackendState {
    fn record(&self, path: &str, params: &HashMap<String, String>, headers: &HeaderMap) {
        let authorization = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.calls.lock().unwrap().push(RecordedCall {
            path: path.to_string(),
            params: params.clone(),
            authorization,
        });
    }

    fn check_failing(&self, name: &str) -> Result<(), (StatusCode, String)> {
        if self.failing.lock().unwrap().contains(name) {
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{} unavailable", name),
            ));
        }
        Ok(())
    }

    /// Move `object_name` out of pending into `folder`, applying `fields`
    fn transition(&self, object_name: &str, folder: &str, fields: Value) -> Reply {
        let mut folders = self.folders.lock().unwrap();
        let pending = folders.entry("pending".to_string()).or_default();
        let pos = pending
            .iter()
            .position(|r| r["object_name"] == object_name)
            .ok_or_else(|| (StatusCode::NOT_FOUND, format!("{} is not pending", object_name)))?;

        let mut record = pending.remove(pos);
        if let (Some(target), Some(fields)) = (record.as_object_mut(), fields.as_object()) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }
        folders.entry(folder.to_string()).or_default().push(record);
        drop(folders);

        let _ = self.changes.send("files_changed".to_string());
        Ok(Json(json!({ "status": "ok" })))
    }
}

pub struct ReviewBackend {
    addr: SocketAddr,
    state: Arc<BackendState>,
    server: JoinHandle<()>,
}

impl ReviewBackend {
    /// Bind to an ephemeral local port and serve until dropped
    pub async fn start() -> Self {
        let (changes, _) = broadcast::channel(64);
        let state = Arc::new(BackendState {
            folders: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            wrapped: Mutex::new(false),
            changes,
        });

        let router = Router::new()
            .route("/files", get(list_files))
            .route("/approve", post(approve))
            .route("/reject", post(reject))
            .route("/upload", post(upload))
            .route("/events", get(events))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test backend");
        let addr = listener.local_addr().expect("test backend address");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            addr,
            state,
            server,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client configuration pointing at this backend
    pub fn config(&self, identity: &str, token: Option<&str>) -> ClientConfig {
        ClientConfig {
            api_url: self.url(),
            events_url: format!("{}/events", self.url()),
            identity: identity.to_string(),
            token: token.map(str::to_string),
            request_timeout: Duration::from_secs(5),
            reconnect_initial: Duration::from_millis(20),
            reconnect_max: Duration::from_millis(200),
        }
    }

    pub fn set_folder(&self, folder: &str, records: Vec<Value>) {
        self.state
            .folders
            .lock()
            .unwrap()
            .insert(folder.to_string(), records);
    }

    pub fn folder_ids(&self, folder: &str) -> Vec<String> {
        self.state
            .folders
            .lock()
            .unwrap()
            .get(folder)
            .map(|records| {
                records
                    .iter()
                    .filter_map(|r| r["object_name"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn folder(&self, folder: &str) -> Vec<Value> {
        self.state
            .folders
            .lock()
            .unwrap()
            .get(folder)
            .cloned()
            .unwrap_or_default()
    }

    /// Make a folder listing or an endpoint (`approve`, `reject`, `upload`) answer 500
    pub fn fail(&self, name: &str) {
        self.state.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn wrap_listings(&self, wrapped: bool) {
        *self.state.wrapped.lock().unwrap() = wrapped;
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.calls().into_iter().filter(|c| c.path == path).collect()
    }

    /// Push a change notification to every connected client
    pub fn announce(&self, event: &str) -> usize {
        self.state.changes.send(event.to_string()).unwrap_or(0)
    }

    pub fn event_subscribers(&self) -> usize {
        self.state.changes.receiver_count()
    }
}

impl Drop for ReviewBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Wire representation of one uploaded file
pub fn wire_record(object_name: &str, project: &str, uploader: &str, size: u64) -> Value {
    json!({
        "object_name": object_name,
        "name": object_name.rsplit('/').next().unwrap_or(object_name),
        "size": size,
        "updated": "2024-03-01T12:30:00Z",
        "proj_id": project,
        "uploader": uploader,
    })
}

async fn list_files(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Query(params): Params,
) -> Reply {
    state.record("/files", &params, &headers);
    let folder = params
        .get("status_folder")
        .cloned()
        .ok_or((StatusCode::BAD_REQUEST, "status_folder is required".to_string()))?;
    state.check_failing(&folder)?;

    let records = state
        .folders
        .lock()
        .unwrap()
        .get(&folder)
        .cloned()
        .unwrap_or_default();

    if *state.wrapped.lock().unwrap() {
        Ok(Json(json!({ "files": records })))
    } else {
        Ok(Json(Value::Array(records)))
    }
}

async fn approve(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Query(params): Params,
) -> Reply {
    state.record("/approve", &params, &headers);
    state.check_failing("approve")?;

    let object_name = params.get("object_name").cloned().unwrap_or_default();
    let approver = params.get("approver").cloned().unwrap_or_default();
    state.transition(&object_name, "approved", json!({ "approver": approver }))
}

async fn reject(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Query(params): Params,
) -> Reply {
    state.record("/reject", &params, &headers);
    state.check_failing("reject")?;

    let object_name = params.get("object_name").cloned().unwrap_or_default();
    let feedback = params.get("feedback").cloned().unwrap_or_default();
    if feedback.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "feedback is required".to_string()));
    }
    state.transition(&object_name, "rejected", json!({ "feedback": feedback }))
}

async fn upload(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Reply {
    let bad_request = |e: axum::extract::multipart::MultipartError| {
        (StatusCode::BAD_REQUEST, e.to_string())
    };

    let mut fields = HashMap::new();
    let mut file: Option<(String, usize)> = None;
    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let file_name = field.file_name().unwrap_or("upload.csv").to_string();
            let bytes = field.bytes().await.map_err(bad_request)?;
            file = Some((file_name, bytes.len()));
        } else {
            let value = field.text().await.map_err(bad_request)?;
            fields.insert(name, value);
        }
    }

    state.record("/upload", &fields, &headers);
    state.check_failing("upload")?;

    let (file_name, size) = file.ok_or((StatusCode::BAD_REQUEST, "file is required".to_string()))?;
    let project = fields.get("proj_id").cloned().unwrap_or_default();
    let uploader = fields.get("uploader").cloned().unwrap_or_default();
    let object_name = format!("{}/{}", project, file_name);

    state
        .folders
        .lock()
        .unwrap()
        .entry("pending".to_string())
        .or_default()
        .push(wire_record(&object_name, &project, &uploader, size as u64));
    let _ = state.changes.send("file_uploaded".to_string());

    Ok(Json(json!({ "object_name": object_name })))
}

async fn events(
    State(state): State<Arc<BackendState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.changes.subscribe()).filter_map(|result| async move {
        result
            .ok()
            .map(|name| Ok(Event::default().event(name).data("{}")))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_millis(50))
            .text("keep-alive"),
    )
}
