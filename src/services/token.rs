// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Access token claim decoding.
//!
//! The client only reads the payload to learn when the token expires and
//! who it belongs to. Signature validation is the backend's job, so the
//! signature is deliberately not checked here.

use crate::models::{Role, UserProfile};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{Map, Value};

/// Key used to sign locally minted demo tokens. Never sent to a backend.
const DEMO_SIGNING_KEY: &[u8] = b"emotion-console-demo-signing-key";

/// Token decoding errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token has no usable exp claim")]
    MissingExp,
}

/// Validated token claims. Only `exp` is required.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims {
    /// Expiration time (Unix timestamp, seconds)
    pub exp: i64,
    pub sub: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    /// Nested profile object, when the issuer embeds one
    pub user: Option<Map<String, Value>>,
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp <= now.timestamp()
    }

    /// Best-effort profile: the nested `user` object if it parses, with
    /// gaps filled from `sub`, `email` and `role`.
    pub fn profile(&self) -> UserProfile {
        let mut profile = self
            .user
            .as_ref()
            .and_then(|u| serde_json::from_value::<UserProfile>(Value::Object(u.clone())).ok())
            .unwrap_or_default();

        if profile.id.is_empty() {
            profile.id = self.sub.clone().unwrap_or_default();
        }
        if profile.email.is_none() {
            profile.email.clone_from(&self.email);
        }
        if profile.role.is_none() {
            profile.role.clone_from(&self.role);
        }
        profile.ensure_display_name();
        profile
    }
}

/// Decode the payload of a JWT without verifying its signature.
pub fn decode_claims(token: &str) -> Result<Claims, TokenError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<Map<String, Value>>(token.trim(), &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| TokenError::Malformed(e.to_string()))?;

    claims_from_payload(data.claims)
}

/// Validate a decoded payload into `Claims`.
///
/// `exp` must be a number; every other field is taken only if it has the
/// expected shape and ignored otherwise.
pub fn claims_from_payload(payload: Map<String, Value>) -> Result<Claims, TokenError> {
    let exp = match payload.get("exp") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.floor() as i64))
            .ok_or(TokenError::MissingExp)?,
        _ => return Err(TokenError::MissingExp),
    };

    let sub = match payload.get("sub") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    let email = payload
        .get("email")
        .and_then(Value::as_str)
        .map(str::to_string);

    let role = payload
        .get("role")
        .and_then(|v| serde_json::from_value::<Role>(v.clone()).ok());

    let user = payload.get("user").and_then(Value::as_object).cloned();

    Ok(Claims {
        exp,
        sub,
        email,
        role,
        user,
    })
}

/// Mint a locally signed token for demo sessions.
pub fn issue_demo_token(claims: &Value) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(DEMO_SIGNING_KEY),
    )
}
