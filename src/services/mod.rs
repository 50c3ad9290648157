// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - session, login prompt and detection feed logic.

pub mod auth_api;
pub mod detection;
pub mod login_modal;
pub mod scheduler;
pub mod session;
pub mod token;

pub use auth_api::AuthApi;
pub use detection::DetectionFeed;
pub use login_modal::{LoginModal, ModalMode, RouteAccess};
pub use scheduler::ScheduledTask;
pub use session::{LogoutOptions, PendingTimers, SessionManager, SessionNotice, SessionSettings};
pub use token::{Claims, TokenError};
