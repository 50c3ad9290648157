// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Login prompt visibility, independent of routing.

use crate::events::{SubscriptionId, UnauthorizedBus};
use crate::services::session::SessionManager;
use std::sync::{Arc, Mutex, MutexGuard};

/// Which form the prompt shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModalMode {
    #[default]
    Login,
    Register,
}

#[derive(Debug, Default)]
struct ModalState {
    visible: bool,
    mode: ModalMode,
}

/// Outcome of guarding a protected view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess {
    Granted,
    /// Not signed in: the login prompt was opened, send the user home.
    Redirect,
    /// Admin-only view requested by a non-admin; pretend it does not exist.
    NotFound,
}

/// Global login prompt state. Clones share the same prompt.
///
/// Opens itself in `Login` mode whenever the unauthorized bus fires. Not
/// persisted: a fresh process starts hidden.
#[derive(Clone)]
pub struct LoginModal {
    state: Arc<Mutex<ModalState>>,
    bus: UnauthorizedBus,
    subscription: Arc<Mutex<Option<SubscriptionId>>>,
}

impl LoginModal {
    pub fn new(bus: &UnauthorizedBus) -> Self {
        let state = Arc::new(Mutex::new(ModalState::default()));

        let weak = Arc::downgrade(&state);
        let id = bus.subscribe(move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                state.mode = ModalMode::Login;
                state.visible = true;
                tracing::debug!("Opening login prompt after unauthorized response");
            }
        });

        Self {
            state,
            bus: bus.clone(),
            subscription: Arc::new(Mutex::new(Some(id))),
        }
    }

    pub fn open(&self, mode: ModalMode) {
        let mut state = self.lock();
        state.mode = mode;
        state.visible = true;
    }

    /// Hide the prompt. The mode is kept.
    pub fn close(&self) {
        self.lock().visible = false;
    }

    pub fn is_open(&self) -> bool {
        self.lock().visible
    }

    pub fn mode(&self) -> ModalMode {
        self.lock().mode
    }

    /// Stop reacting to unauthorized signals.
    pub fn detach(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(id) = subscription {
            self.bus.unsubscribe(id);
        }
    }

    /// Guard a protected view.
    ///
    /// Admin-only views answer `NotFound` to anyone who is not an admin.
    /// Other protected views open the login prompt for anonymous users.
    pub fn require_login(&self, session: &SessionManager, admin_only: bool) -> RouteAccess {
        if admin_only {
            return if session.is_admin() {
                RouteAccess::Granted
            } else {
                RouteAccess::NotFound
            };
        }

        if session.user().is_none() {
            self.open(ModalMode::Login);
            return RouteAccess::Redirect;
        }

        RouteAccess::Granted
    }

    fn lock(&self) -> MutexGuard<'_, ModalState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
