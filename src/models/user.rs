// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Providers and the local users linked to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered activity provider (e.g. Strava).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Provider {
    pub id: i32,
    /// URL slug used in routes (`/providers/{slug}/...`)
    pub slug: String,
    pub name: String,
}

/// Local user linked to a provider account.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub provider_id: i32,
    /// The provider's athlete/owner id
    pub external_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Build a user record for a first-time authorization.
    pub fn new(provider_id: i32, external_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_id,
            external_id: external_id.into(),
            first_name: None,
            last_name: None,
            created_at: Utc::now(),
        }
    }
}
