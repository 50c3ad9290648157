// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Unauthorized event bus.
//!
//! Decouples "the backend rejected our credentials" from whoever needs to
//! react. Dispatch is synchronous and fire-and-forget: every handler
//! registered at emit time runs once, and a panicking handler does not stop
//! the others.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type Handler = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(SubscriptionId, Handler)>>,
}

/// Observer list for the "session invalidated by server" signal.
///
/// Clones share the same subscriber list.
#[derive(Clone, Default)]
pub struct UnauthorizedBus {
    inner: Arc<BusInner>,
}

impl UnauthorizedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a zero-argument handler.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers().push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers();
        let before = handlers.len();
        handlers.retain(|(sub, _)| *sub != id);
        handlers.len() != before
    }

    /// Notify every current subscriber.
    pub fn emit_unauthorized(&self) {
        // Snapshot so handlers can (un)subscribe without deadlocking.
        let handlers: Vec<Handler> = self.handlers().iter().map(|(_, h)| h.clone()).collect();

        tracing::debug!(subscribers = handlers.len(), "Emitting unauthorized signal");

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler())).is_err() {
                tracing::error!("Unauthorized handler panicked, continuing with the rest");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers().len()
    }

    fn handlers(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, Handler)>> {
        self.inner.handlers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
