// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types shared by the session, auth and detection clients.

use crate::storage::StorageError;
use crate::services::token::TokenError;

/// Application error type returned by user-initiated operations.
///
/// Background mechanisms (scheduled refresh, expiry, polling) never surface
/// these; they log and recover locally.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Server did not return an access token")]
    MissingToken,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Backend API error: {0}")]
    Http(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the backend rejected our credentials.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AppError::Unauthorized | AppError::InvalidToken)
    }

    /// Message suitable for showing to the user after an explicit action.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Unauthorized | AppError::InvalidToken => {
                "Your session has expired, please sign in again".to_string()
            }
            AppError::MissingToken => {
                "The server did not return an access token, cannot sign in".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Http(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<TokenError> for AppError {
    fn from(_: TokenError) -> Self {
        AppError::InvalidToken
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, AppError>;
