// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Persisted session storage.
//!
//! Plays the role browser `localStorage` plays for the web dashboard: a flat
//! string key-value map that survives restarts. Only the session manager
//! writes to it.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::models::UserProfile;

/// Persisted key names as constants.
pub mod keys {
    pub const TOKEN: &str = "token";
    pub const REFRESH_TOKEN: &str = "refreshToken";
    /// JSON-serialized `UserProfile`
    pub const USER: &str = "user";

    pub const ALL: [&str; 3] = [TOKEN, REFRESH_TOKEN, USER];
}

/// A flat string key-value store.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Load the persisted profile; unreadable JSON is treated as absent.
    fn get_user(&self) -> Option<UserProfile> {
        let raw = self.get(keys::USER)?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable persisted user profile");
                None
            }
        }
    }

    fn set_user(&self, user: &UserProfile) -> Result<(), StorageError> {
        let json =
            serde_json::to_string(user).map_err(|e| StorageError::Serialize(e.to_string()))?;
        self.set(keys::USER, &json)
    }
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialize(String),
}
