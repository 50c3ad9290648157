// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Credential login and token refresh against a mock auth backend.

mod common;

use axum::http::StatusCode;
use common::{connected_app, token_for, user_token, MockServer, Reply};
use emotion_console::error::AppError;
use emotion_console::models::SessionGrant;
use emotion_console::services::SessionSettings;
use emotion_console::storage::{keys, TokenStore};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn test_credentials_login() {
    let server = MockServer::start().await;
    let (session, store, _, _) = connected_app(&server, SessionSettings::default());

    session
        .login_with_credentials("ada@example.com", "correct-horse")
        .await
        .unwrap();

    let user = session.user().unwrap();
    assert_eq!(user.id, "42");
    assert_eq!(user.display_name(), Some("Ada Lovelace"));
    assert!(session.is_admin());
    assert_eq!(session.refresh_token().as_deref(), Some("r-login"));
    assert_eq!(store.get(keys::REFRESH_TOKEN).as_deref(), Some("r-login"));
}

#[tokio::test]
async fn test_credentials_rejected() {
    let server = MockServer::start().await;
    let (session, store, modal, _) = connected_app(&server, SessionSettings::default());

    let err = session
        .login_with_credentials("ada@example.com", "wrong")
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::BadRequest(_)));
    assert!(!session.is_authenticated());
    assert!(store.is_empty());
    // A failed login is not a revoked session
    assert!(!modal.is_open());
    assert_eq!(server.backend.login_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_refresh_rotates_tokens() {
    let server = MockServer::start().await;
    let (session, store, _, _) = connected_app(&server, SessionSettings::default());
    session.login(SessionGrant::from_token(user_token(3600)).with_refresh_token("r1"));
    let before = session.user().unwrap();

    let fresh = user_token(7200);
    server
        .backend
        .script_refresh(Reply::ok(json!({ "token": fresh, "refreshToken": "r2" })));

    assert!(session.refresh_auth_token().await);

    assert_eq!(session.token(), Some(fresh.clone()));
    assert_eq!(session.refresh_token().as_deref(), Some("r2"));
    assert_eq!(session.user(), Some(before));
    assert_eq!(store.get(keys::TOKEN), Some(fresh));
    assert_eq!(store.get(keys::REFRESH_TOKEN).as_deref(), Some("r2"));
    assert_eq!(
        *server.backend.refresh_tokens_seen.lock().unwrap(),
        vec!["r1".to_string()]
    );
}

#[tokio::test]
async fn test_refresh_keeps_refresh_token_without_rotation() {
    let server = MockServer::start().await;
    let (session, _, _, _) = connected_app(&server, SessionSettings::default());
    session.login(SessionGrant::from_token(user_token(3600)).with_refresh_token("r1"));

    server
        .backend
        .script_refresh(Reply::ok(json!({ "accessToken": user_token(7200) })));

    assert!(session.refresh_auth_token().await);
    assert_eq!(session.refresh_token().as_deref(), Some("r1"));
}

#[tokio::test]
async fn test_refresh_failure_drops_refresh_token_only() {
    let server = MockServer::start().await;
    let (session, store, modal, _) = connected_app(&server, SessionSettings::default());
    let token = user_token(3600);
    session.login(SessionGrant::from_token(&token).with_refresh_token("r1"));

    server
        .backend
        .script_refresh(Reply::status(StatusCode::INTERNAL_SERVER_ERROR));

    assert!(!session.refresh_auth_token().await);

    assert_eq!(session.token(), Some(token));
    assert!(session.refresh_token().is_none());
    assert!(!store.contains(keys::REFRESH_TOKEN));
    assert!(session.pending_timers().logout);
    assert!(!modal.is_open());
    assert!(!session.can_refresh());
}

#[tokio::test]
async fn test_refresh_with_garbage_token_fails() {
    let server = MockServer::start().await;
    let (session, _, _, _) = connected_app(&server, SessionSettings::default());
    session.login(SessionGrant::from_token(user_token(3600)).with_refresh_token("r1"));

    server
        .backend
        .script_refresh(Reply::ok(json!({ "token": "definitely.not.jwt" })));

    assert!(!session.refresh_auth_token().await);
    assert!(session.is_authenticated());
    assert!(session.refresh_token().is_none());
}

#[tokio::test]
async fn test_overlapping_refreshes_last_write_wins() {
    let server = MockServer::start().await;
    let (session, _, _, _) = connected_app(&server, SessionSettings::default());
    session.login(SessionGrant::from_token(user_token(3600)).with_refresh_token("r1"));

    let first = token_for("u1", json!("user"), 7000);
    let second = token_for("u1", json!("user"), 7100);
    server.backend.script_refresh(
        Reply::ok(json!({ "token": first, "refreshToken": "r2" })).delayed(Duration::from_millis(50)),
    );
    server.backend.script_refresh(
        Reply::ok(json!({ "token": second, "refreshToken": "r3" }))
            .delayed(Duration::from_millis(300)),
    );

    let (a, b) = tokio::join!(session.refresh_auth_token(), session.refresh_auth_token());

    assert!(a && b);
    // Both calls captured the refresh token before either completed
    assert_eq!(
        *server.backend.refresh_tokens_seen.lock().unwrap(),
        vec!["r1".to_string(), "r1".to_string()]
    );
    assert_eq!(session.token(), Some(second));
    assert_eq!(session.refresh_token().as_deref(), Some("r3"));
}

#[tokio::test]
async fn test_logout_during_refresh_discards_result() {
    let server = MockServer::start().await;
    let (session, store, _, _) = connected_app(&server, SessionSettings::default());
    session.login(SessionGrant::from_token(user_token(3600)).with_refresh_token("r1"));

    server.backend.script_refresh(
        Reply::ok(json!({ "token": user_token(7200), "refreshToken": "r2" }))
            .delayed(Duration::from_millis(200)),
    );

    let refreshing = {
        let session = session.clone();
        tokio::spawn(async move { session.refresh_auth_token().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.unauthorized_bus().emit_unauthorized();

    assert!(!refreshing.await.unwrap());
    assert!(!session.is_authenticated());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_scheduled_refresh_fires_before_expiry() {
    let server = MockServer::start().await;
    let settings = SessionSettings {
        refresh_lead: Duration::from_secs(60),
        ..Default::default()
    };
    let (session, _, _, _) = connected_app(&server, settings);

    let fresh = user_token(7200);
    server
        .backend
        .script_refresh(Reply::ok(json!({ "token": fresh, "refreshToken": "r2" })));

    // Expires in ~61s, so the refresh is due within a second
    session.login(SessionGrant::from_token(user_token(61)).with_refresh_token("r1"));
    assert!(session.pending_timers().refresh);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(server.backend.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.token(), Some(fresh));
    assert_eq!(session.refresh_token().as_deref(), Some("r2"));
    // Rescheduled from the new token
    assert!(session.pending_timers().refresh);
}

#[tokio::test]
async fn test_stale_refresh_failure_keeps_rotated_token() {
    let server = MockServer::start().await;
    let (session, store, _, _) = connected_app(&server, SessionSettings::default());
    session.login(SessionGrant::from_token(user_token(3600)).with_refresh_token("r1"));

    let rotated = user_token(7200);
    server.backend.script_refresh(
        Reply::ok(json!({ "token": rotated, "refreshToken": "r2" })).delayed(Duration::from_millis(50)),
    );
    server
        .backend
        .script_refresh(Reply::status(StatusCode::UNAUTHORIZED).delayed(Duration::from_millis(300)));

    let (a, b) = tokio::join!(session.refresh_auth_token(), session.refresh_auth_token());

    assert!(a ^ b);
    assert_eq!(session.token(), Some(rotated));
    assert_eq!(session.refresh_token().as_deref(), Some("r2"));
    assert_eq!(store.get(keys::REFRESH_TOKEN).as_deref(), Some("r2"));
    assert!(session.can_refresh());
}

#[tokio::test]
async fn test_login_during_refresh_discards_result() {
    let server = MockServer::start().await;
    let (session, store, _, _) = connected_app(&server, SessionSettings::default());
    session.login(
        SessionGrant::from_token(token_for("alice", json!("admin"), 3600)).with_refresh_token("ra"),
    );

    server.backend.script_refresh(
        Reply::ok(json!({
            "token": token_for("alice", json!("admin"), 7200),
            "refreshToken": "ra2",
        }))
        .delayed(Duration::from_millis(200)),
    );

    let refreshing = {
        let session = session.clone();
        tokio::spawn(async move { session.refresh_auth_token().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let bob = token_for("bob", json!("user"), 3600);
    session.login(SessionGrant::from_token(&bob).with_refresh_token("rb"));

    assert!(!refreshing.await.unwrap());
    assert_eq!(session.user().unwrap().id, "bob");
    assert!(!session.is_admin());
    assert_eq!(session.token(), Some(bob.clone()));
    assert_eq!(session.refresh_token().as_deref(), Some("rb"));
    assert_eq!(store.get(keys::TOKEN), Some(bob));
    assert_eq!(store.get(keys::REFRESH_TOKEN).as_deref(), Some("rb"));
}

#[tokio::test]
async fn test_short_lived_token_is_not_refreshed_immediately() {
    let server = MockServer::start().await;
    let (session, _, _, _) = connected_app(&server, SessionSettings::default());
    server
        .backend
        .script_refresh(Reply::ok(json!({ "token": user_token(30), "refreshToken": "r2" })));

    // 30s token with the default 60s lead
    session.login(SessionGrant::from_token(user_token(30)).with_refresh_token("r1"));
    assert!(session.pending_timers().refresh);

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(server.backend.refresh_calls.load(Ordering::SeqCst), 0);
    assert_eq!(session.refresh_token().as_deref(), Some("r1"));
}
