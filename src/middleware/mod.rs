// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Middleware modules (authentication, security, etc.).

pub mod api_key;
pub mod security;
pub mod tasks_auth;

pub use api_key::require_api_key;
pub use tasks_auth::require_tasks_auth;
