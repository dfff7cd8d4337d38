//! Fake GreyNoise Psychic and Cribl.Cloud APIs for integration tests.
//!
//! Spins up a minimal `axum` HTTP server on a random TCP port bound to
//! 127.0.0.1 that serves every endpoint a publication run touches:
//! - `GET /v1/psychic/generate/{from}/{to}/{version}/mmdb` returns the
//!   configured MMDB bytes
//! - `POST /oauth/token` issues a bearer token
//! - the Cribl lookup, commit, and deploy endpoints under
//!   `/organizations/{org}/workspaces/{ws}/app/api/v1`
//!
//! Every request is recorded so tests can assert on what was (or was not)
//! called. Point `GREYNOISE_PSYCHIC_URL`, `CRIBL_LOGIN_URL`, and
//! `CRIBL_API_URL` at [`FakeServices::base_url`].

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

pub const API_KEY: &str = "gn-test-key";
pub const CLIENT_ID: &str = "cribl-client";
pub const CLIENT_SECRET: &str = "cribl-secret";
pub const ORGANIZATION_ID: &str = "org-test";
pub const WORKER_GROUP: &str = "default";
pub const TOKEN: &str = "test-bearer-token";
pub const COMMIT_ID: &str = "c0ffee1234";

/// One request received by the fake.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub path: String,
}

#[derive(Default)]
struct ServiceState {
    mmdb: Vec<u8>,
    psychic_status: Option<StatusCode>,
    psychic_content_type: Option<&'static str>,
    upload_status: Option<StatusCode>,
    existing_lookups: HashSet<String>,
    uploads: HashMap<String, Vec<u8>>,
    created: Vec<String>,
    updated: Vec<String>,
    deployed: Vec<String>,
    requests: Vec<RecordedRequest>,
}

/// Handle to the running fake services.
pub struct FakeServices {
    addr: SocketAddr,
    state: Arc<Mutex<ServiceState>>,
}

impl FakeServices {
    /// Start the fake server on a random port serving `mmdb` from Psychic.
    pub async fn start(mmdb: Vec<u8>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(ServiceState {
            mmdb,
            ..ServiceState::default()
        }));

        let group = "/organizations/:org/workspaces/:ws/app/api/v1/m/:group";
        let app = Router::new()
            .route(
                "/v1/psychic/generate/:from/:to/:version/mmdb",
                get(psychic_download),
            )
            .route("/oauth/token", post(issue_token))
            .route(
                &format!("{}/system/lookups", group),
                put(upload_lookup).post(create_lookup),
            )
            .route(
                &format!("{}/system/lookups/:id", group),
                get(get_lookup).patch(update_lookup),
            )
            .route(&format!("{}/version/commit", group), post(commit))
            .route(
                "/organizations/:org/workspaces/:ws/app/api/v1/master/groups/:group/deploy",
                patch(deploy),
            )
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the task a moment to register.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        Ok(Self { addr, state })
    }

    /// Base URL for all fake APIs (e.g. `http://127.0.0.1:PORT`).
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Environment for a run against this fake, with files under `dir`.
    pub fn env(&self, dir: &std::path::Path) -> Vec<(String, String)> {
        let base = self.base_url();
        [
            ("GREYNOISE_API_KEY", API_KEY.to_string()),
            ("CRIBL_CLIENT_ID", CLIENT_ID.to_string()),
            ("CRIBL_CLIENT_SECRET", CLIENT_SECRET.to_string()),
            ("CRIBL_ORGANIZATION_ID", ORGANIZATION_ID.to_string()),
            ("CRIBL_WORKER_GROUP", WORKER_GROUP.to_string()),
            ("GREYNOISE_PSYCHIC_URL", base.clone()),
            ("CRIBL_LOGIN_URL", base.clone()),
            ("CRIBL_API_URL", base),
            (
                "MMDB_OUTPUT_PATH",
                dir.join("ti_greynoise_indicators-simple.mmdb")
                    .display()
                    .to_string(),
            ),
            ("LOG_FILE", dir.join("run.log").display().to_string()),
            ("HTTP_TIMEOUT_SECONDS", "10".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    /// Replace the database served by Psychic.
    pub async fn set_mmdb(&self, mmdb: Vec<u8>) {
        self.state.lock().await.mmdb = mmdb;
    }

    /// Make Psychic answer with `status`.
    pub async fn fail_psychic(&self, status: StatusCode) {
        self.state.lock().await.psychic_status = Some(status);
    }

    /// Serve the Psychic download with `content_type`.
    pub async fn set_psychic_content_type(&self, content_type: &'static str) {
        self.state.lock().await.psychic_content_type = Some(content_type);
    }

    /// Make lookup uploads answer with `status`.
    pub async fn fail_uploads(&self, status: StatusCode) {
        self.state.lock().await.upload_status = Some(status);
    }

    /// Register a lookup as already present on the worker group.
    pub async fn add_existing_lookup(&self, id: &str) {
        self.state.lock().await.existing_lookups.insert(id.to_string());
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().await.requests.clone()
    }

    pub async fn uploaded(&self, id: &str) -> Option<Vec<u8>> {
        self.state.lock().await.uploads.get(id).cloned()
    }

    pub async fn created(&self) -> Vec<String> {
        self.state.lock().await.created.clone()
    }

    pub async fn updated(&self) -> Vec<String> {
        self.state.lock().await.updated.clone()
    }

    pub async fn deployed(&self) -> Vec<String> {
        self.state.lock().await.deployed.clone()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

type SharedState = State<Arc<Mutex<ServiceState>>>;

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(format!("Bearer {}", TOKEN).as_str())
}

async fn psychic_download(
    Path((from, to, version)): Path<(String, String, String)>,
    headers: HeaderMap,
    State(state): SharedState,
) -> Response {
    let mut state = state.lock().await;
    state.requests.push(RecordedRequest {
        method: "GET",
        path: format!("/v1/psychic/generate/{}/{}/{}/mmdb", from, to, version),
    });

    if headers.get("key").and_then(|v| v.to_str().ok()) != Some(API_KEY) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if let Some(status) = state.psychic_status {
        return (status, "psychic unavailable").into_response();
    }

    let content_type = state
        .psychic_content_type
        .unwrap_or("application/octet-stream");
    (
        [(header::CONTENT_TYPE, content_type)],
        state.mmdb.clone(),
    )
        .into_response()
}

async fn issue_token(State(state): SharedState, Json(body): Json<Value>) -> Response {
    let mut state = state.lock().await;
    state.requests.push(RecordedRequest {
        method: "POST",
        path: "/oauth/token".to_string(),
    });

    if body["grant_type"] != "client_credentials"
        || body["client_id"] != CLIENT_ID
        || body["client_secret"] != CLIENT_SECRET
    {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "access_denied"})))
            .into_response();
    }

    Json(json!({
        "access_token": TOKEN,
        "token_type": "Bearer",
        "expires_in": 86400,
    }))
    .into_response()
}

async fn upload_lookup(
    Path((_org, _ws, group)): Path<(String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): SharedState,
    body: Bytes,
) -> Response {
    let mut state = state.lock().await;
    state.requests.push(RecordedRequest {
        method: "PUT",
        path: format!("{}/system/lookups", group),
    });

    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if let Some(status) = state.upload_status {
        return (status, "upload rejected").into_response();
    }
    let Some(filename) = query.get("filename") else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    state.uploads.insert(filename.clone(), body.to_vec());
    Json(json!({
        "filename": format!("{}.tmp-5sD3k", filename),
        "rows": 0,
        "size": body.len(),
    }))
    .into_response()
}

async fn get_lookup(
    Path((_org, _ws, group, id)): Path<(String, String, String, String)>,
    headers: HeaderMap,
    State(state): SharedState,
) -> Response {
    let mut state = state.lock().await;
    state.requests.push(RecordedRequest {
        method: "GET",
        path: format!("{}/system/lookups/{}", group, id),
    });

    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if !state.existing_lookups.contains(&id) {
        return (StatusCode::NOT_FOUND, Json(json!({"message": "not found"}))).into_response();
    }

    Json(json!({"count": 1, "items": [{"id": id, "size": 1}]})).into_response()
}

async fn create_lookup(
    Path((_org, _ws, group)): Path<(String, String, String)>,
    headers: HeaderMap,
    State(state): SharedState,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().await;
    state.requests.push(RecordedRequest {
        method: "POST",
        path: format!("{}/system/lookups", group),
    });

    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let Some(id) = body["id"].as_str().map(str::to_string) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if body["fileInfo"]["filename"].as_str().is_none() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    state.existing_lookups.insert(id.clone());
    state.created.push(id.clone());
    Json(json!({"count": 1, "items": [{"id": id}]})).into_response()
}

async fn update_lookup(
    Path((_org, _ws, group, id)): Path<(String, String, String, String)>,
    headers: HeaderMap,
    State(state): SharedState,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().await;
    state.requests.push(RecordedRequest {
        method: "PATCH",
        path: format!("{}/system/lookups/{}", group, id),
    });

    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if body["id"] != id.as_str() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    state.updated.push(id.clone());
    Json(json!({"count": 1, "items": [{"id": id}]})).into_response()
}

async fn commit(
    Path((_org, _ws, group)): Path<(String, String, String)>,
    headers: HeaderMap,
    State(state): SharedState,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().await;
    state.requests.push(RecordedRequest {
        method: "POST",
        path: format!("{}/version/commit", group),
    });

    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if body["files"].as_array().map(Vec::len) != Some(2) {
        return StatusCode::BAD_REQUEST.into_response();
    }

    Json(json!({"count": 1, "items": [{"commit": COMMIT_ID, "branch": "master"}]}))
        .into_response()
}

async fn deploy(
    Path((_org, _ws, group)): Path<(String, String, String)>,
    headers: HeaderMap,
    State(state): SharedState,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().await;
    state.requests.push(RecordedRequest {
        method: "PATCH",
        path: format!("master/groups/{}/deploy", group),
    });

    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let Some(version) = body["version"].as_str().map(str::to_string) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    state.deployed.push(version);
    Json(json!({"count": 1, "items": [{"id": group}]})).into_response()
}
