// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Emotion-Console: client core for the emotion recognition dashboard
//!
//! This crate owns the authenticated session (login, persistence, expiry
//! and refresh), the unauthorized signal that ends it, the login prompt
//! state, and the detection feed that talks to the backend.

pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod services;
pub mod storage;

use config::{Config, ConfigError};
use services::{DetectionFeed, LoginModal, SessionManager};
use std::sync::Arc;
use storage::TokenStore;

/// Shared application state.
///
/// The session manager, login prompt and detection feed all share the
/// session's unauthorized bus.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub session: SessionManager,
    pub login_modal: LoginModal,
    pub detections: DetectionFeed,
}

impl AppState {
    /// Wire up all components. Nothing is restored or started yet.
    pub fn new(config: Config, store: Arc<dyn TokenStore>) -> Result<Self, ConfigError> {
        let http = config.http_client()?;

        let session = SessionManager::from_config(&config, http.clone(), store);
        let login_modal = LoginModal::new(&session.unauthorized_bus());
        let detections = DetectionFeed::from_config(&config, http, &session);

        Ok(Self {
            config,
            session,
            login_modal,
            detections,
        })
    }

    /// Restore the persisted session. Returns whether one is active.
    pub fn init(&self) -> bool {
        self.session.restore()
    }

    /// Stop polling, cancel timers and detach from the bus.
    pub fn dispose(&self) {
        self.detections.stop_polling();
        self.login_modal.detach();
        self.session.dispose();
    }
}
