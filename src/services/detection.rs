// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Detection feed: fetch, poll and edit detection records.
//!
//! Talks to the detections REST endpoint when one is configured and
//! otherwise works entirely on local demo data. A 401 from the backend is
//! forwarded to the unauthorized bus.

use crate::config::{trim_url, Config};
use crate::error::AppError;
use crate::events::UnauthorizedBus;
use crate::models::detection::generate_id;
use crate::models::{BoundingBox, DetectionFilters, DetectionRecord};
use crate::services::auth_api::check_response_json;
use crate::services::scheduler::ScheduledTask;
use crate::services::session::SessionManager;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Number of records in a demo batch.
pub const DEMO_BATCH_SIZE: usize = 12;

const DEMO_EMOTIONS: [&str; 3] = ["happy", "neutral", "sad"];

#[derive(Debug, Default)]
struct FeedState {
    detections: Vec<DetectionRecord>,
    selected: Option<DetectionRecord>,
    /// Fetches in flight
    loading: usize,
    error: Option<String>,
}

struct FeedInner {
    http: reqwest::Client,
    /// `None` means demo mode
    endpoint: Option<String>,
    session: SessionManager,
    bus: UnauthorizedBus,
    default_interval: Duration,
    state: Mutex<FeedState>,
    polling: Mutex<Option<ScheduledTask>>,
}

impl FeedInner {
    fn lock_state(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_polling(&self) -> MutexGuard<'_, Option<ScheduledTask>> {
        self.polling.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Releases one in-flight fetch however it ends, including cancellation.
struct LoadingGuard<'a> {
    feed: &'a FeedInner,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.feed.lock_state();
        state.loading = state.loading.saturating_sub(1);
    }
}

/// Detection feed manager. Clones share the same collection and poller.
#[derive(Clone)]
pub struct DetectionFeed {
    inner: Arc<FeedInner>,
}

impl DetectionFeed {
    /// Create a feed for `endpoint`, or a demo feed when it is `None`.
    pub fn new(http: reqwest::Client, endpoint: Option<String>, session: &SessionManager) -> Self {
        Self::build(http, endpoint, session, Config::default().poll_interval)
    }

    /// Create a feed from application config. `demo_mode` wins over a
    /// configured endpoint.
    pub fn from_config(config: &Config, http: reqwest::Client, session: &SessionManager) -> Self {
        let endpoint = if config.demo_mode {
            None
        } else {
            config.detections_url.clone()
        };
        Self::build(http, endpoint, session, config.poll_interval)
    }

    fn build(
        http: reqwest::Client,
        endpoint: Option<String>,
        session: &SessionManager,
        default_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                http,
                endpoint: endpoint.map(|e| trim_url(&e)),
                session: session.clone(),
                bus: session.unauthorized_bus(),
                default_interval,
                state: Mutex::new(FeedState::default()),
                polling: Mutex::new(None),
            }),
        }
    }

    pub fn is_demo(&self) -> bool {
        self.inner.endpoint.is_none()
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.default_interval
    }

    // ─── Fetching ────────────────────────────────────────────────────────────

    /// Load detections, replacing the collection and selecting the first
    /// record. On failure the error is recorded and prior data is kept.
    pub async fn fetch(&self, filters: &DetectionFilters) -> Result<Vec<DetectionRecord>, AppError> {
        let _loading = self.begin_loading();

        let result = match self.inner.endpoint.as_deref() {
            None => Ok(demo_detections(filters)),
            Some(url) => self.fetch_remote(url, filters).await,
        };

        let mut state = self.inner.lock_state();
        match result {
            Ok(list) => {
                tracing::debug!(count = list.len(), demo = self.is_demo(), "Detections loaded");
                state.selected = list.first().cloned();
                state.detections = list.clone();
                Ok(list)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch detections");
                state.error = Some(e.user_message());
                Err(e)
            }
        }
    }

    async fn fetch_remote(
        &self,
        url: &str,
        filters: &DetectionFilters,
    ) -> Result<Vec<DetectionRecord>, AppError> {
        let response = self
            .authorized(self.inner.http.get(url))
            .query(filters)
            .send()
            .await?;

        let body = self.check(response).await?;

        // Either a bare array or `{ "items": [...] }`
        let items = match &body {
            Value::Array(items) => items.as_slice(),
            other => other
                .get("items")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]),
        };

        Ok(items.iter().map(DetectionRecord::normalize).collect())
    }

    // ─── Polling ─────────────────────────────────────────────────────────────

    /// Re-fetch every `interval` until stopped. Replaces any running poller.
    pub fn start_polling(&self, interval: Duration, filters: DetectionFilters) {
        let session_id = filters.session_id.clone();
        let weak = Arc::downgrade(&self.inner);

        let task = ScheduledTask::every(interval, move || {
            let weak = weak.clone();
            let filters = filters.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let feed = DetectionFeed { inner };
                if let Err(e) = feed.fetch(&filters).await {
                    tracing::debug!(error = %e, "Polling fetch failed");
                }
            }
        });

        let previous = self.inner.lock_polling().replace(task);
        if let Some(previous) = previous {
            previous.cancel();
        }

        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            session_id = ?session_id,
            "Started detection polling"
        );
    }

    pub fn stop_polling(&self) {
        let task = self.inner.lock_polling().take();
        if let Some(task) = task {
            task.cancel();
            tracing::info!("Stopped detection polling");
        }
    }

    pub fn is_polling(&self) -> bool {
        self.inner.lock_polling().is_some()
    }

    // ─── CRUD ────────────────────────────────────────────────────────────────

    /// Create a record and prepend it to the collection.
    pub async fn add(&self, payload: Value) -> Result<DetectionRecord, AppError> {
        let created = match self.inner.endpoint.as_deref() {
            None => {
                let mut raw = payload;
                if let Value::Object(map) = &mut raw {
                    if map.get("id").map_or(true, Value::is_null) {
                        map.insert("id".to_string(), Value::String(generate_id("local")));
                    }
                }
                DetectionRecord::normalize(&raw)
            }
            Some(url) => {
                let response = self
                    .authorized(self.inner.http.post(url))
                    .json(&payload)
                    .send()
                    .await?;
                let body = self.check(response).await.inspect_err(|e| {
                    tracing::error!(error = %e, "Failed to add detection");
                })?;
                DetectionRecord::normalize(if body.is_object() { &body } else { &payload })
            }
        };

        self.inner.lock_state().detections.insert(0, created.clone());
        Ok(created)
    }

    /// Apply a partial update. Returns `None` when a demo-mode record does
    /// not exist.
    pub async fn update(&self, id: &str, patch: Value) -> Result<Option<DetectionRecord>, AppError> {
        let Some(url) = self.inner.endpoint.as_deref() else {
            let mut state = self.inner.lock_state();
            let updated = state
                .detections
                .iter_mut()
                .find(|d| d.id == id)
                .map(|d| {
                    d.apply_patch(&patch);
                    d.clone()
                });
            if let Some(updated) = &updated {
                replace_selected(&mut state, updated);
            }
            return Ok(updated);
        };

        let response = self
            .authorized(self.inner.http.put(item_url(url, id)))
            .json(&patch)
            .send()
            .await?;
        let body = self.check(response).await.inspect_err(|e| {
            tracing::error!(error = %e, id, "Failed to update detection");
        })?;

        let mut state = self.inner.lock_state();

        // Existing record, then the patch, then whatever the server echoed
        let mut merged = state
            .detections
            .iter()
            .find(|d| d.id == id)
            .and_then(|d| serde_json::to_value(d).ok())
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        merged.insert("id".to_string(), Value::String(id.to_string()));
        for source in [patch.as_object(), body.as_object()].into_iter().flatten() {
            for (key, value) in source {
                merged.insert(key.clone(), value.clone());
            }
        }
        let updated = DetectionRecord::normalize(&Value::Object(merged));

        for record in state.detections.iter_mut().filter(|d| d.id == id) {
            *record = updated.clone();
        }
        replace_selected(&mut state, &updated);

        Ok(Some(updated))
    }

    /// Delete a record, clearing the selection if it pointed at it.
    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        if let Some(url) = self.inner.endpoint.as_deref() {
            let response = self
                .authorized(self.inner.http.delete(item_url(url, id)))
                .send()
                .await?;
            self.check(response).await.inspect_err(|e| {
                tracing::error!(error = %e, id, "Failed to delete detection");
            })?;
        }

        let mut state = self.inner.lock_state();
        state.detections.retain(|d| d.id != id);
        if state.selected.as_ref().is_some_and(|s| s.id == id) {
            state.selected = None;
        }
        Ok(())
    }

    pub fn clear(&self) {
        let mut state = self.inner.lock_state();
        state.detections.clear();
        state.selected = None;
    }

    /// Pretty JSON export `{exportedAt, data}` of `items`, or of the whole
    /// collection. `None` when there is nothing to export.
    pub fn export_json(&self, items: Option<&[DetectionRecord]>) -> Option<String> {
        let data = match items {
            Some(items) => items.to_vec(),
            None => self.detections(),
        };

        if data.is_empty() {
            tracing::info!("No detections to export");
            return None;
        }

        let document = json!({
            "exportedAt": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "data": data,
        });

        match serde_json::to_string_pretty(&document) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize detection export");
                None
            }
        }
    }

    // ─── Reads ───────────────────────────────────────────────────────────────

    pub fn detections(&self) -> Vec<DetectionRecord> {
        self.inner.lock_state().detections.clone()
    }

    pub fn get(&self, id: &str) -> Option<DetectionRecord> {
        self.inner
            .lock_state()
            .detections
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    pub fn selected(&self) -> Option<DetectionRecord> {
        self.inner.lock_state().selected.clone()
    }

    pub fn set_selected(&self, record: Option<DetectionRecord>) {
        self.inner.lock_state().selected = record;
    }

    pub fn loading(&self) -> bool {
        self.inner.lock_state().loading > 0
    }

    pub fn error(&self) -> Option<String> {
        self.inner.lock_state().error.clone()
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    fn begin_loading(&self) -> LoadingGuard<'_> {
        let mut state = self.inner.lock_state();
        state.loading += 1;
        state.error = None;
        LoadingGuard { feed: &self.inner }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.inner.session.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Check the response, signalling the bus on 401.
    async fn check(&self, response: reqwest::Response) -> Result<Value, AppError> {
        match check_response_json(response).await {
            Err(AppError::Unauthorized) => {
                tracing::warn!("Detections API rejected credentials");
                self.inner.bus.emit_unauthorized();
                Err(AppError::Unauthorized)
            }
            other => other,
        }
    }
}

fn item_url(endpoint: &str, id: &str) -> String {
    format!("{}/{}", endpoint, urlencoding::encode(id))
}

fn replace_selected(state: &mut FeedState, updated: &DetectionRecord) {
    if state.selected.as_ref().is_some_and(|s| s.id == updated.id) {
        state.selected = Some(updated.clone());
    }
}

/// Synthesize a deterministic-shape batch of demo detections.
fn demo_detections(filters: &DetectionFilters) -> Vec<DetectionRecord> {
    let now = Utc::now();
    let stamp = now.timestamp_millis();
    let count = filters
        .limit
        .map_or(DEMO_BATCH_SIZE, |limit| (limit as usize).min(DEMO_BATCH_SIZE));

    (0..count)
        .map(|i| {
            let mut meta = Map::new();
            meta.insert("demo".to_string(), Value::Bool(true));
            meta.insert("idx".to_string(), json!(i));

            DetectionRecord {
                id: format!("demo-{}-{}", stamp, i),
                session_id: Some(
                    filters
                        .session_id
                        .clone()
                        .unwrap_or_else(|| format!("session-{}", i / 4 + 1)),
                ),
                captured_at: now - chrono::Duration::minutes(i as i64),
                emotion: DEMO_EMOTIONS[i % DEMO_EMOTIONS.len()].to_string(),
                confidence: (60 + (i * 7) % 36) as f64 / 100.0,
                image_url: None,
                bbox: Some(BoundingBox {
                    x: 0.15 + (i % 3) as f64 * 0.02,
                    y: 0.12 + (i % 4) as f64 * 0.02,
                    w: 0.22,
                    h: 0.22,
                }),
                source: Some(if i % 2 == 0 { "webcam" } else { "upload" }.to_string()),
                meta,
            }
        })
        .collect()
}
