// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session lifecycle manager.
//!
//! Single source of truth for "are we logged in, as whom, until when".
//! Handles:
//! - Login (explicit grant, credentials, or demo) and logout
//! - Persisting token, refresh token and profile to the token store
//! - Hard logout shortly after the access token's `exp`
//! - Proactive refresh before `exp` when a refresh token is present
//! - Silent logout when any component signals the unauthorized bus

use crate::config::Config;
use crate::error::AppError;
use crate::events::{SubscriptionId, UnauthorizedBus};
use crate::models::{Role, SessionGrant, SessionSnapshot, SessionStatus, UserProfile};
use crate::services::auth_api::AuthApi;
use crate::services::scheduler::ScheduledTask;
use crate::services::token::{self, Claims};
use crate::storage::{keys, TokenStore};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use validator::Validate;

/// Grace period after `exp` before the forced logout fires.
pub const DEFAULT_LOGOUT_GUARD: Duration = Duration::from_millis(1000);

/// How long before `exp` the proactive refresh fires.
pub const DEFAULT_REFRESH_LEAD: Duration = Duration::from_millis(60_000);

const NOTICE_CAPACITY: usize = 16;

/// Floor on the proactive refresh delay.
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(1);

/// Demo sessions last one hour.
const DEMO_SESSION_SECS: i64 = 60 * 60;
const DEMO_ADMIN_EMAIL: &str = "admin@demo";
const DEMO_USER_ID: &str = "demo-1";

/// Timer tuning for the session manager.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub logout_guard: Duration,
    pub refresh_lead: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            logout_guard: DEFAULT_LOGOUT_GUARD,
            refresh_lead: DEFAULT_REFRESH_LEAD,
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            logout_guard: config.logout_guard,
            refresh_lead: config.refresh_lead,
        }
    }
}

/// Options for `SessionManager::logout`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogoutOptions {
    /// Skip the user-facing `SessionNotice::LoggedOut`.
    pub silent: bool,
}

impl LogoutOptions {
    pub fn silent() -> Self {
        Self { silent: true }
    }
}

/// User-facing session notifications (the CLI logs them, a UI would toast).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    LoggedIn { user_id: String },
    LoggedOut,
}

/// Which session timers are currently pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingTimers {
    pub logout: bool,
    pub refresh: bool,
}

#[derive(Debug, Validate)]
struct Credentials {
    #[validate(email)]
    email: String,
    #[validate(length(min = 1))]
    password: String,
}

#[derive(Clone, Copy)]
enum TimerKind {
    Logout,
    Refresh,
}

/// At most one pending task per purpose. `generation` changes every time
/// timers are rescheduled or cancelled, so a callback can tell whether it is
/// still current.
#[derive(Default)]
struct Timers {
    generation: u64,
    logout: Option<ScheduledTask>,
    refresh: Option<ScheduledTask>,
}

struct Inner {
    settings: SessionSettings,
    store: Arc<dyn TokenStore>,
    auth_api: Option<AuthApi>,
    state: watch::Sender<SessionSnapshot>,
    notices: broadcast::Sender<SessionNotice>,
    timers: Mutex<Timers>,
    /// Bumped on every login and logout, not on refresh. An in-flight
    /// refresh only applies its result to the session it started in.
    epoch: AtomicU64,
    bus: UnauthorizedBus,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl Inner {
    fn lock_timers(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let subscription = match self.subscription.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(id) = subscription {
            self.bus.unsubscribe(id);
        }
    }
}

/// Session lifecycle manager. Clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create an anonymous session manager and subscribe it to its own
    /// unauthorized bus.
    ///
    /// `auth_api` of `None` means demo login and no refresh capability.
    pub fn new(
        settings: SessionSettings,
        store: Arc<dyn TokenStore>,
        auth_api: Option<AuthApi>,
    ) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let inner = Arc::new(Inner {
            settings,
            store,
            auth_api,
            state,
            notices,
            timers: Mutex::new(Timers::default()),
            epoch: AtomicU64::new(0),
            bus: UnauthorizedBus::new(),
            subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let id = inner.bus.subscribe(move || {
            if let Some(manager) = SessionManager::upgrade(&weak) {
                tracing::info!("Backend rejected credentials, ending session");
                manager.logout(LogoutOptions::silent());
            }
        });
        *inner
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(id);

        Self { inner }
    }

    /// Create a session manager from application config.
    pub fn from_config(config: &Config, http: reqwest::Client, store: Arc<dyn TokenStore>) -> Self {
        let auth_api = config
            .auth_base_url
            .as_ref()
            .map(|url| AuthApi::new(http, url.clone()));
        Self::new(SessionSettings::from(config), store, auth_api)
    }

    fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Restore the persisted session, if any. Returns whether a session is
    /// now active.
    pub fn restore(&self) -> bool {
        let store = &self.inner.store;

        let Some(token) = store
            .get(keys::TOKEN)
            .filter(|t| !t.trim().is_empty())
        else {
            tracing::debug!("No persisted session to restore");
            return false;
        };

        let grant = SessionGrant {
            token,
            refresh_token: store.get(keys::REFRESH_TOKEN),
            user: store.get_user(),
        };

        let restored = self.login(grant);
        if restored {
            tracing::info!("Restored persisted session");
        }
        restored
    }

    /// Cancel timers and stop listening for unauthorized signals.
    ///
    /// The session itself (and its persisted copy) is left alone so the
    /// next process can restore it.
    pub fn dispose(&self) {
        self.cancel_timers();
        let subscription = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(id) = subscription {
            self.inner.bus.unsubscribe(id);
        }
        tracing::debug!("Session manager disposed");
    }

    // ─── Transitions ─────────────────────────────────────────────────────────

    /// Establish a session from a token (and optional refresh token and
    /// profile).
    ///
    /// An empty token is ignored. A token whose payload cannot be decoded
    /// ends any current session. Returns whether a session is now active.
    pub fn login(&self, grant: SessionGrant) -> bool {
        let token = grant.token.trim().to_string();
        if token.is_empty() {
            tracing::debug!("Ignoring login without a token");
            return false;
        }

        let claims = match token::decode_claims(&token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!(error = %e, "Refusing malformed access token");
                self.logout(LogoutOptions::silent());
                return false;
            }
        };

        let mut user = grant.user.unwrap_or_else(|| claims.profile());
        user.ensure_display_name();
        let user_id = user.id.clone();
        let refresh_token = grant.refresh_token.filter(|r| !r.trim().is_empty());

        tracing::info!(
            user_id = %user_id,
            expires_at = ?claims.expires_at(),
            refreshable = refresh_token.is_some(),
            "Session established"
        );

        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.commit(token, refresh_token, user, &claims);
        let _ = self.inner.notices.send(SessionNotice::LoggedIn { user_id });
        true
    }

    /// Sign in with email and password.
    ///
    /// Without an auth API this starts a local demo session instead.
    pub async fn login_with_credentials(&self, email: &str, password: &str) -> Result<(), AppError> {
        let credentials = Credentials {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        credentials
            .validate()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        let grant = match &self.inner.auth_api {
            None => demo_grant(&credentials.email)?,
            Some(api) => {
                let response = api
                    .login(&credentials.email, &credentials.password)
                    .await
                    .map_err(|e| match e {
                        AppError::Unauthorized => {
                            AppError::BadRequest("Invalid email or password".to_string())
                        }
                        other => other,
                    })?;

                SessionGrant {
                    token: response.token.ok_or(AppError::MissingToken)?,
                    refresh_token: response.refresh_token,
                    user: response.user,
                }
            }
        };

        if self.login(grant) {
            Ok(())
        } else {
            Err(AppError::InvalidToken)
        }
    }

    /// End the session: cancel timers, clear state, remove persisted keys.
    ///
    /// Safe to call when already logged out.
    pub fn logout(&self, opts: LogoutOptions) {
        self.cancel_timers();
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);

        let previous = self.inner.state.send_replace(SessionSnapshot::default());

        for key in keys::ALL {
            if let Err(e) = self.inner.store.remove(key) {
                tracing::warn!(key, error = %e, "Failed to remove persisted session key");
            }
        }

        if previous.token.is_some() {
            tracing::info!(silent = opts.silent, "Session ended");
            if !opts.silent {
                let _ = self.inner.notices.send(SessionNotice::LoggedOut);
            }
        }
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Returns `false` without side effects when there is no refresh token
    /// or no auth API. On any other failure the refresh token is discarded
    /// and the access token is left to expire on schedule. When calls
    /// overlap, the last response applied wins.
    pub async fn refresh_auth_token(&self) -> bool {
        let Some(api) = self.inner.auth_api.as_ref() else {
            tracing::debug!("Token refresh unavailable: no auth API configured");
            return false;
        };
        let Some(refresh_token) = self.current_refresh_token() else {
            tracing::debug!("Token refresh unavailable: no refresh token");
            return false;
        };

        let epoch = self.inner.epoch.load(Ordering::SeqCst);

        let outcome = match api.refresh(&refresh_token).await {
            Ok(response) => match response.token {
                Some(token) => token::decode_claims(&token)
                    .map(|claims| (token, response.refresh_token, response.user, claims))
                    .map_err(AppError::from),
                None => Err(AppError::MissingToken),
            },
            Err(e) => Err(e),
        };

        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            tracing::debug!("Session replaced while refreshing, discarding refresh result");
            return false;
        }

        let (token, rotated, response_user, claims) = match outcome {
            Ok(parts) => parts,
            Err(e) => {
                if self.drop_refresh_token_if(&refresh_token) {
                    tracing::warn!(error = %e, "Token refresh failed, dropping refresh token");
                } else {
                    tracing::debug!(error = %e, "Stale refresh failed, keeping rotated refresh token");
                }
                return false;
            }
        };

        let user = match response_user {
            Some(mut user) => {
                user.ensure_display_name();
                user
            }
            None => {
                let mut derived = claims.profile();
                if let Some(previous) = self
                    .user()
                    .filter(|p| derived.id.is_empty() || p.id == derived.id)
                {
                    derived.fill_missing_from(&previous);
                }
                derived
            }
        };

        let refresh_token = rotated.unwrap_or(refresh_token);

        tracing::info!(
            user_id = %user.id,
            expires_at = ?claims.expires_at(),
            "Access token refreshed"
        );

        self.commit(token, Some(refresh_token), user, &claims);
        true
    }

    /// Patch the current profile (profile edit flow) and persist it.
    ///
    /// Returns `false` when nobody is logged in.
    pub fn update_user<F>(&self, patch: F) -> bool
    where
        F: FnOnce(&mut UserProfile),
    {
        let mut updated = None;
        self.inner.state.send_if_modified(|s| match s.user.as_mut() {
            Some(user) => {
                patch(user);
                user.ensure_display_name();
                updated = Some(user.clone());
                true
            }
            None => false,
        });

        let Some(user) = updated else {
            return false;
        };
        if let Err(e) = self.inner.store.set_user(&user) {
            tracing::warn!(error = %e, "Failed to persist updated profile");
        }
        true
    }

    // ─── Reads ───────────────────────────────────────────────────────────────

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().token.is_some()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.state.borrow().status()
    }

    pub fn token(&self) -> Option<String> {
        self.inner.state.borrow().token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.inner.state.borrow().refresh_token.clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.inner.state.borrow().user.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Case-insensitive role check over a single role or a role list.
    pub fn has_role(&self, role: &str) -> bool {
        self.inner
            .state
            .borrow()
            .user
            .as_ref()
            .is_some_and(|u| u.has_role(role))
    }

    pub fn is_admin(&self) -> bool {
        self.has_role("admin")
    }

    /// `Authorization` header value for backend requests.
    pub fn authorization_header(&self) -> Option<String> {
        self.token().map(|t| format!("Bearer {}", t))
    }

    /// Watch session state; the receiver sees every login, refresh, profile
    /// edit and logout.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.inner.notices.subscribe()
    }

    /// The bus this manager listens on. Hand it to anything that can
    /// observe a 401.
    pub fn unauthorized_bus(&self) -> UnauthorizedBus {
        self.inner.bus.clone()
    }

    pub fn can_refresh(&self) -> bool {
        self.inner.auth_api.is_some() && self.current_refresh_token().is_some()
    }

    pub fn pending_timers(&self) -> PendingTimers {
        let timers = self.inner.lock_timers();
        let pending = |slot: &Option<ScheduledTask>| slot.as_ref().is_some_and(|t| !t.is_finished());
        PendingTimers {
            logout: pending(&timers.logout),
            refresh: pending(&timers.refresh),
        }
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    fn current_refresh_token(&self) -> Option<String> {
        let in_memory = self.inner.state.borrow().refresh_token.clone();
        in_memory
            .or_else(|| self.inner.store.get(keys::REFRESH_TOKEN))
            .filter(|r| !r.trim().is_empty())
    }

    /// Drop the refresh token, but only if it is still the one `sent`.
    /// Returns whether anything was dropped.
    fn drop_refresh_token_if(&self, sent: &str) -> bool {
        let dropped = self.inner.state.send_if_modified(|s| {
            if s.refresh_token.as_deref() == Some(sent) {
                s.refresh_token = None;
                true
            } else {
                false
            }
        });

        let persisted = self.inner.store.get(keys::REFRESH_TOKEN);
        if persisted.as_deref() == Some(sent) {
            if let Err(e) = self.inner.store.remove(keys::REFRESH_TOKEN) {
                tracing::warn!(error = %e, "Failed to remove persisted refresh token");
            }
            return true;
        }
        dropped
    }

    /// Persist, publish and schedule a new token.
    fn commit(
        &self,
        token: String,
        refresh_token: Option<String>,
        user: UserProfile,
        claims: &Claims,
    ) {
        self.persist(&token, refresh_token.as_deref(), &user);

        let refreshable = refresh_token.is_some();
        self.inner.state.send_replace(SessionSnapshot {
            token: Some(token),
            refresh_token,
            user: Some(user),
        });

        self.schedule(claims, refreshable);
    }

    fn persist(&self, token: &str, refresh_token: Option<&str>, user: &UserProfile) {
        let store = &self.inner.store;
        let result = store
            .set(keys::TOKEN, token)
            .and_then(|_| match refresh_token {
                Some(r) => store.set(keys::REFRESH_TOKEN, r),
                None => store.remove(keys::REFRESH_TOKEN),
            })
            .and_then(|_| store.set_user(user));

        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to persist session, continuing in memory");
        }
    }

    /// Replace both timers from the token's `exp`.
    fn schedule(&self, claims: &Claims, refreshable: bool) {
        let settings = self.inner.settings;
        let remaining_ms = claims
            .exp
            .saturating_mul(1000)
            .saturating_sub(Utc::now().timestamp_millis());

        let logout_delay = Duration::from_millis(remaining_ms.max(0) as u64) + settings.logout_guard;
        let refresh_delay = if refreshable {
            refresh_delay_for(remaining_ms, settings.refresh_lead)
        } else {
            None
        };

        let mut timers = self.inner.lock_timers();
        timers.generation += 1;
        let generation = timers.generation;

        let weak = Arc::downgrade(&self.inner);
        timers.logout = Some(ScheduledTask::after(logout_delay, async move {
            if let Some(manager) = SessionManager::upgrade(&weak) {
                manager.on_logout_due(generation);
            }
        }));

        timers.refresh = refresh_delay.map(|delay| {
            let weak = Arc::downgrade(&self.inner);
            ScheduledTask::after(delay, async move {
                if let Some(manager) = SessionManager::upgrade(&weak) {
                    manager.on_refresh_due(generation).await;
                }
            })
        });

        tracing::debug!(
            logout_in_ms = logout_delay.as_millis() as u64,
            refresh_in_ms = ?refresh_delay.map(|d| d.as_millis() as u64),
            "Scheduled session timers"
        );
    }

    fn cancel_timers(&self) {
        let (logout, refresh) = {
            let mut timers = self.inner.lock_timers();
            timers.generation += 1;
            (timers.logout.take(), timers.refresh.take())
        };
        if let Some(task) = logout {
            task.cancel();
        }
        if let Some(task) = refresh {
            task.cancel();
        }
    }

    /// Called from a timer task. Returns `false` if the timer is stale;
    /// otherwise detaches the task from its slot so rescheduling from inside
    /// the callback does not abort it.
    fn claim_timer(&self, generation: u64, kind: TimerKind) -> bool {
        let mut timers = self.inner.lock_timers();
        if timers.generation != generation {
            return false;
        }
        let own = match kind {
            TimerKind::Logout => timers.logout.take(),
            TimerKind::Refresh => timers.refresh.take(),
        };
        if let Some(task) = own {
            task.detach();
        }
        true
    }

    fn on_logout_due(&self, generation: u64) {
        if !self.claim_timer(generation, TimerKind::Logout) {
            return;
        }
        tracing::info!("Access token expired, ending session");
        self.logout(LogoutOptions::silent());
    }

    async fn on_refresh_due(&self, generation: u64) {
        if !self.claim_timer(generation, TimerKind::Refresh) {
            return;
        }
        tracing::debug!("Refreshing access token ahead of expiry");
        if !self.refresh_auth_token().await {
            tracing::debug!("Background refresh failed, hard expiry still scheduled");
        }
    }
}

/// When to refresh a token with `remaining_ms` left.
///
/// Normally `lead` before expiry. A token that does not outlive the lead is
/// refreshed halfway through its remaining life instead, and one with less
/// than twice `MIN_REFRESH_DELAY` to go is left to expire.
fn refresh_delay_for(remaining_ms: i64, lead: Duration) -> Option<Duration> {
    let lead_ms = lead.as_millis() as i64;
    if remaining_ms > lead_ms {
        return Some(Duration::from_millis((remaining_ms - lead_ms) as u64));
    }

    let half = Duration::from_millis((remaining_ms / 2).max(0) as u64);
    (half >= MIN_REFRESH_DELAY).then_some(half)
}

/// Local demo session used when no auth API is configured.
fn demo_grant(email: &str) -> Result<SessionGrant, AppError> {
    let role = if email.eq_ignore_ascii_case(DEMO_ADMIN_EMAIL) {
        "admin"
    } else {
        "user"
    };

    let user = UserProfile {
        id: DEMO_USER_ID.to_string(),
        email: Some(email.to_string()),
        role: Some(Role::from(role)),
        first_name: Some("Demo".to_string()),
        last_name: Some("User".to_string()),
        ..Default::default()
    };

    let exp = Utc::now().timestamp() + DEMO_SESSION_SECS;
    let token = token::issue_demo_token(&json!({
        "sub": DEMO_USER_ID,
        "email": email,
        "role": role,
        "exp": exp,
    }))
    .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to mint demo token: {}", e)))?;

    let refresh_token = BASE64.encode(format!("refresh-{}", Utc::now().timestamp_millis()));

    tracing::info!(email, role, "No auth API configured, starting demo session");

    Ok(SessionGrant {
        token,
        refresh_token: Some(refresh_token),
        user: Some(user),
    })
}
