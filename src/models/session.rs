// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session state and auth API response shapes.

use crate::models::UserProfile;
use serde_json::Value;

/// Coarse session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Anonymous,
    Authenticated,
}

/// Point-in-time view of the session, published to watchers on every change.
///
/// A user is never present without a token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<UserProfile>,
}

impl SessionSnapshot {
    pub fn status(&self) -> SessionStatus {
        if self.token.is_some() {
            SessionStatus::Authenticated
        } else {
            SessionStatus::Anonymous
        }
    }
}

/// Input to `SessionManager::login`.
///
/// When `user` is `None` the profile is decoded from the token payload.
#[derive(Debug, Clone, Default)]
pub struct SessionGrant {
    pub token: String,
    pub refresh_token: Option<String>,
    pub user: Option<UserProfile>,
}

impl SessionGrant {
    pub fn from_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Default::default()
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_user(mut self, user: UserProfile) -> Self {
        self.user = Some(user);
        self
    }
}

/// Login/refresh response, tolerant of the field names different backend
/// versions use.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthResponse {
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<UserProfile>,
}

impl AuthResponse {
    /// Pick the first non-null value for each field:
    /// token from `token|accessToken|access_token`, refresh token from
    /// `refreshToken|refresh`, user from `user|profile|data.user`.
    pub fn from_value(body: &Value) -> Self {
        let token = first_string(body, &["token", "accessToken", "access_token"]);
        let refresh_token = first_string(body, &["refreshToken", "refresh"]);

        let user = ["user", "profile"]
            .iter()
            .filter_map(|k| body.get(*k))
            .chain(body.get("data").and_then(|d| d.get("user")))
            .find(|v| v.is_object())
            .and_then(|v| serde_json::from_value::<UserProfile>(v.clone()).ok());

        Self {
            token,
            refresh_token,
            user,
        }
    }
}

fn first_string(body: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| body.get(*k))
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}
