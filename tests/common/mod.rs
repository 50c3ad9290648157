// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use emotion_console::services::{AuthApi, DetectionFeed, LoginModal, SessionManager, SessionSettings};
use emotion_console::storage::MemoryStore;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mint an HS256 token for `sub` expiring `secs` from now (negative for
/// already expired).
#[allow(dead_code)]
pub fn token_for(sub: &str, role: Value, secs: i64) -> String {
    let claims = json!({
        "sub": sub,
        "email": format!("{}@example.com", sub),
        "role": role,
        "exp": Utc::now().timestamp() + secs,
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"test-backend-secret"),
    )
    .expect("Failed to create JWT")
}

#[allow(dead_code)]
pub fn user_token(secs: i64) -> String {
    token_for("u1", json!("user"), secs)
}

/// Scripted reply for `POST /auth/refresh`.
#[derive(Debug, Clone)]
pub struct Reply {
    pub delay: Duration,
    pub status: StatusCode,
    pub body: Value,
}

impl Reply {
    #[allow(dead_code)]
    pub fn ok(body: Value) -> Self {
        Self {
            delay: Duration::ZERO,
            status: StatusCode::OK,
            body,
        }
    }

    #[allow(dead_code)]
    pub fn status(status: StatusCode) -> Self {
        Self {
            delay: Duration::ZERO,
            status,
            body: json!({ "message": "scripted failure" }),
        }
    }

    #[allow(dead_code)]
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// What the mock backend has seen and will answer.
#[derive(Default)]
pub struct Backend {
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub detection_gets: AtomicUsize,
    pub refresh_replies: Mutex<VecDeque<Reply>>,
    pub refresh_tokens_seen: Mutex<Vec<String>>,
    pub reject_detections: Mutex<bool>,
    pub detections: Mutex<Vec<Value>>,
    pub last_authorization: Mutex<Option<String>>,
    pub last_query: Mutex<Option<String>>,
    pub deleted: Mutex<Vec<String>>,
}

impl Backend {
    #[allow(dead_code)]
    pub fn script_refresh(&self, reply: Reply) {
        self.refresh_replies.lock().unwrap().push_back(reply);
    }

    #[allow(dead_code)]
    pub fn set_detections(&self, items: Vec<Value>) {
        *self.detections.lock().unwrap() = items;
    }

    #[allow(dead_code)]
    pub fn reject_detections(&self, reject: bool) {
        *self.reject_detections.lock().unwrap() = reject;
    }
}

/// A mock auth + detections backend listening on a random local port.
#[allow(dead_code)]
pub struct MockServer {
    pub base_url: String,
    pub backend: Arc<Backend>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockServer {
    #[allow(dead_code)]
    pub async fn start() -> Self {
        let backend = Arc::new(Backend::default());

        let app = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/refresh", post(refresh))
            .route("/detections", get(list_detections).post(create_detection))
            .route(
                "/detections/{id}",
                put(update_detection).delete(delete_detection),
            )
            .with_state(backend.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().expect("No local address");

        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Mock server failed");
        });

        Self {
            base_url: format!("http://{}", addr),
            backend,
            _task: task,
        }
    }

    #[allow(dead_code)]
    pub fn auth_url(&self) -> String {
        format!("{}/auth", self.base_url)
    }

    #[allow(dead_code)]
    pub fn detections_url(&self) -> String {
        format!("{}/detections", self.base_url)
    }
}

async fn login(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    backend.login_calls.fetch_add(1, Ordering::SeqCst);

    if body["password"] != "correct-horse" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "bad credentials" })),
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "accessToken": token_for("u42", json!(["user", "admin"]), 3600),
            "refreshToken": "r-login",
            "user": {
                "id": 42,
                "email": body["email"],
                "role": ["user", "admin"],
                "firstName": "Ada",
                "lastName": "Lovelace",
            },
        })),
    )
}

async fn refresh(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    backend.refresh_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(seen) = body["refreshToken"].as_str() {
        backend.refresh_tokens_seen.lock().unwrap().push(seen.to_string());
    }

    let reply = backend
        .refresh_replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Reply::status(StatusCode::INTERNAL_SERVER_ERROR));

    tokio::time::sleep(reply.delay).await;
    (reply.status, Json(reply.body))
}

async fn list_detections(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> (StatusCode, Json<Value>) {
    backend.detection_gets.fetch_add(1, Ordering::SeqCst);
    *backend.last_authorization.lock().unwrap() = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    *backend.last_query.lock().unwrap() = query;

    if *backend.reject_detections.lock().unwrap() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "token revoked" })),
        );
    }

    let items = backend.detections.lock().unwrap().clone();
    (StatusCode::OK, Json(json!({ "items": items, "total": items.len() })))
}

async fn create_detection(Json(mut body): Json<Value>) -> (StatusCode, Json<Value>) {
    body["id"] = json!("srv-1");
    (StatusCode::CREATED, Json(body))
}

async fn update_detection(Path(id): Path<String>, Json(mut body): Json<Value>) -> Json<Value> {
    body["id"] = json!(id);
    Json(body)
}

async fn delete_detection(State(backend): State<Arc<Backend>>, Path(id): Path<String>) -> StatusCode {
    backend.deleted.lock().unwrap().push(id);
    StatusCode::NO_CONTENT
}

/// Session manager with an in-memory store and no auth API.
#[allow(dead_code)]
pub fn offline_session() -> (SessionManager, MemoryStore) {
    let store = MemoryStore::new();
    let session = SessionManager::new(SessionSettings::default(), Arc::new(store.clone()), None);
    (session, store)
}

/// Session manager, login prompt and feed wired to a mock server.
#[allow(dead_code)]
pub fn connected_app(
    server: &MockServer,
    settings: SessionSettings,
) -> (SessionManager, MemoryStore, LoginModal, DetectionFeed) {
    let http = reqwest::Client::new();
    let store = MemoryStore::new();
    let session = SessionManager::new(
        settings,
        Arc::new(store.clone()),
        Some(AuthApi::new(http.clone(), server.auth_url())),
    );
    let modal = LoginModal::new(&session.unauthorized_bus());
    let feed = DetectionFeed::new(http, Some(server.detections_url()), &session);
    (session, store, modal, feed)
}
