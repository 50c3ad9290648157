// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Detection record model and normalization of raw backend payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// Label used when the backend sends no emotion.
pub const UNKNOWN_LABEL: &str = "unknown";

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Normalized face bounding box, all components in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    #[serde(alias = "width")]
    pub w: f64,
    #[serde(alias = "height")]
    pub h: f64,
}

impl BoundingBox {
    fn clamped(self) -> Self {
        Self {
            x: self.x.clamp(0.0, 1.0),
            y: self.y.clamp(0.0, 1.0),
            w: self.w.clamp(0.0, 1.0),
            h: self.h.clamp(0.0, 1.0),
        }
    }
}

/// One emotion detection captured by the recognition pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRecord {
    /// Unique record ID
    pub id: String,
    /// Capture session this detection belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// When the frame was captured
    pub captured_at: DateTime<Utc>,
    /// Emotion label (happy, neutral, sad, ...)
    pub emotion: String,
    /// Classifier confidence in [0, 1]
    pub confidence: f64,
    /// Face crop URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    /// Capture source: "webcam", "upload", ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl DetectionRecord {
    /// Normalize a raw backend item, tolerating the field aliases different
    /// backend versions use.
    pub fn normalize(raw: &Value) -> Self {
        let id = first_of(raw, &["id", "_id", "detId"])
            .and_then(scalar_string)
            .unwrap_or_else(|| generate_id("gen"));

        let session_id = first_of(raw, &["sessionId", "session_id", "session"]).and_then(scalar_string);

        let captured_at = first_of(raw, &["capturedAt", "timestamp", "createdAt", "created_at"])
            .and_then(parse_instant)
            .unwrap_or_else(Utc::now);

        let emotion = first_of(raw, &["emotion", "label"])
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string());

        let confidence = first_of(raw, &["confidence", "score"])
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);

        let image_url = first_of(raw, &["imageUrl", "cropUrl", "faceImage", "image"])
            .and_then(Value::as_str)
            .map(str::to_string);

        let bbox = first_of(raw, &["bbox", "box"])
            .and_then(|v| serde_json::from_value::<BoundingBox>(v.clone()).ok())
            .map(BoundingBox::clamped);

        let source = Some(
            first_of(raw, &["source", "type"])
                .and_then(Value::as_str)
                .unwrap_or(UNKNOWN_LABEL)
                .to_string(),
        );

        let meta = first_of(raw, &["meta", "metadata"])
            .and_then(Value::as_object)
            .or_else(|| raw.as_object())
            .cloned()
            .unwrap_or_default();

        Self {
            id,
            session_id,
            captured_at,
            emotion,
            confidence,
            image_url,
            bbox,
            source,
            meta,
        }
    }

    /// Merge a partial update into this record. The ID never changes.
    pub fn apply_patch(&mut self, patch: &Value) {
        let Some(patch) = patch.as_object() else {
            return;
        };

        let mut merged = match serde_json::to_value(&*self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (key, value) in patch {
            merged.insert(key.clone(), value.clone());
        }

        let id = std::mem::take(&mut self.id);
        *self = Self::normalize(&Value::Object(merged));
        self.id = id;
    }
}

/// Query filters for listing detections.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl DetectionFilters {
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Default::default()
        }
    }
}

/// Generate a process-unique ID of the form `{prefix}-{millis}-{n}`.
pub fn generate_id(prefix: &str) -> String {
    let n = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", prefix, Utc::now().timestamp_millis(), n)
}

fn first_of<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| raw.get(*k))
        .find(|v| !v.is_null())
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// RFC 3339 strings, or epoch numbers (milliseconds when large enough).
fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            let raw = n.as_i64()?;
            if raw > 100_000_000_000 {
                DateTime::from_timestamp_millis(raw)
            } else {
                DateTime::from_timestamp(raw, 0)
            }
        }
        _ => None,
    }
}
