// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Emotion-Console
//!
//! Headless client for the emotion recognition backend: restores or
//! establishes a session, then follows the detection feed until Ctrl-C.

use emotion_console::{
    config::Config,
    models::DetectionFilters,
    services::SessionNotice,
    storage::FileStore,
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured JSON logging
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(
        auth_api = ?config.auth_base_url,
        detections_api = ?config.detections_url,
        demo = config.demo_mode,
        "Starting Emotion-Console"
    );

    let store = FileStore::open(&config.session_store_path)?;
    tracing::info!(path = %store.path().display(), "Session store opened");

    let state = AppState::new(config.clone(), Arc::new(store))?;

    if !state.init() {
        if let (Ok(email), Ok(password)) = (
            std::env::var("LOGIN_EMAIL"),
            std::env::var("LOGIN_PASSWORD"),
        ) {
            if let Err(e) = state.session.login_with_credentials(&email, &password).await {
                tracing::error!(error = %e, "Login failed");
            }
        } else {
            tracing::info!("No session and no LOGIN_EMAIL/LOGIN_PASSWORD, running anonymous");
        }
    }

    // Log user-facing notices
    let mut notices = state.session.notices();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            match notice {
                SessionNotice::LoggedIn { user_id } => {
                    tracing::info!(user_id = %user_id, "Signed in")
                }
                SessionNotice::LoggedOut => tracing::info!("Signed out"),
            }
        }
    });

    // Log every session state change, including silent ones
    let mut session_state = state.session.subscribe();
    let modal = state.login_modal.clone();
    tokio::spawn(async move {
        while session_state.changed().await.is_ok() {
            let status = session_state.borrow_and_update().status();
            tracing::info!(?status, login_prompt_open = modal.is_open(), "Session state changed");
        }
    });

    let filters = DetectionFilters::default();
    match state.detections.fetch(&filters).await {
        Ok(list) => tracing::info!(count = list.len(), "Initial detections loaded"),
        Err(e) => tracing::warn!(error = %e, "Initial detection fetch failed"),
    }
    state
        .detections
        .start_polling(state.detections.poll_interval(), filters);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    state.dispose();
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() -> anyhow::Result<()> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("emotion_console=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
