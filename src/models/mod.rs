// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod detection;
pub mod session;
pub mod user;

pub use detection::{BoundingBox, DetectionFilters, DetectionRecord};
pub use session::{AuthResponse, SessionGrant, SessionSnapshot, SessionStatus};
pub use user::{Role, UserProfile};
