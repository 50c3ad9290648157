// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Auth API client for the login and token refresh endpoints.

use crate::error::AppError;
use crate::models::AuthResponse;
use serde_json::{json, Value};

/// Auth API client.
#[derive(Clone)]
pub struct AuthApi {
    http: reqwest::Client,
    base_url: String,
}

impl AuthApi {
    /// Create a client for `{base_url}/login` and `{base_url}/refresh`.
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: crate::config::trim_url(&base_url.into()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange credentials for tokens.
    ///
    /// POST {base}/login  {"email": ..., "password": ...}
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, AppError> {
        let body = json!({
            "email": email.trim(),
            "password": password,
        });
        self.post("login", &body).await
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// POST {base}/refresh  {"refreshToken": ...}
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, AppError> {
        let body = json!({ "refreshToken": refresh_token });
        self.post("refresh", &body).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<AuthResponse, AppError> {
        let url = format!("{}/{}", self.base_url, path);

        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Http(format!("Auth request to {} failed: {}", path, e)))?;

        let body = check_response_json(response).await?;
        Ok(AuthResponse::from_value(&body))
    }
}

/// Check response status and parse the JSON body.
///
/// 401 maps to `AppError::Unauthorized`; other failures carry the server's
/// `message` field when there is one.
pub(crate) async fn check_response_json(response: reqwest::Response) -> Result<Value, AppError> {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    if status.as_u16() == 401 {
        return Err(AppError::Unauthorized);
    }

    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(text);
        return Err(AppError::Http(format!("HTTP {}: {}", status, message)));
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&text).map_err(|e| AppError::Http(format!("JSON parse error: {}", e)))
}
