// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Activity tags.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tag, unique by name. Linked to activities through `activity_tags`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}
