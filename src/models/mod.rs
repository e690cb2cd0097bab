// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod activity;
pub mod credential;
pub mod tag;
pub mod task;
pub mod user;
pub mod verification;
pub mod volume;

pub use activity::{CanonicalActivity, Enrichment, RawActivity, Sport};
pub use credential::{AccessToken, ProviderCredential};
pub use tag::Tag;
pub use task::{BackfillTask, PostProcessActivityTask, QueueMessage};
pub use user::{Provider, User};
pub use verification::WebhookVerification;
pub use volume::{Frequency, VolumePoint, VolumeQuery};
