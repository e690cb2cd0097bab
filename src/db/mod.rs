// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer.
//!
//! One trait per capability so components depend only on what they use.
//! [`PgStore`] implements all of them on PostgreSQL; [`MemoryStore`] is the
//! in-process equivalent used by tests and local runs.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::StoreError;
use crate::models::{
    CanonicalActivity, Enrichment, Provider, ProviderCredential, RawActivity, Sport, Tag, User,
    VolumePoint, VolumeQuery, WebhookVerification,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// OAuth credential persistence.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Unlocked read of the live credential.
    async fn get_credential(
        &self,
        provider_id: i32,
        user_id: Uuid,
    ) -> Result<Option<ProviderCredential>, StoreError>;

    /// Upsert on (provider, user). Clears any soft delete and never moves
    /// `expires_at` backwards.
    async fn save_credential(&self, credential: &ProviderCredential) -> Result<(), StoreError>;

    /// Read the live credential under an exclusive lock held until the
    /// returned guard is committed or dropped.
    async fn lock_credential(
        &self,
        provider_id: i32,
        user_id: Uuid,
    ) -> Result<Option<Box<dyn CredentialLock>>, StoreError>;
}

/// Exclusive hold on one credential row. Dropping without [`commit`] rolls
/// back.
///
/// [`commit`]: CredentialLock::commit
#[async_trait]
pub trait CredentialLock: Send {
    /// Credential as read under the lock.
    fn credential(&self) -> &ProviderCredential;

    /// Optionally write `updated`, then release the lock.
    async fn commit(
        self: Box<Self>,
        updated: Option<&ProviderCredential>,
    ) -> Result<(), StoreError>;
}

/// Raw provider payloads, keyed by (provider, user, provider activity id).
#[async_trait]
pub trait RawActivityStore: Send + Sync {
    /// Insert or update on the natural key and return the stored id. An
    /// existing `detail_uri` is kept when `raw` has none.
    async fn upsert_raw_activity(&self, raw: &RawActivity) -> Result<Uuid, StoreError>;

    async fn list_raw_activities(
        &self,
        provider_id: i32,
        user_id: Uuid,
    ) -> Result<Vec<RawActivity>, StoreError>;

    async fn get_raw_activity(&self, id: Uuid) -> Result<Option<RawActivity>, StoreError>;

    async fn attach_detail(&self, id: Uuid, detail_uri: &str) -> Result<(), StoreError>;

    async fn mark_processed(&self, id: Uuid) -> Result<(), StoreError>;

    /// Rows with detail attached whose pipeline never completed, oldest first.
    async fn list_unprocessed(&self, limit: i64) -> Result<Vec<RawActivity>, StoreError>;
}

/// Canonical activities, tags and read-side aggregates.
#[async_trait]
pub trait CanonicalActivityStore: Send + Sync {
    /// Upsert on (provider, user, raw activity). Enrichment columns are left
    /// untouched. Returns the stored row.
    async fn upsert_activity(
        &self,
        activity: &CanonicalActivity,
    ) -> Result<CanonicalActivity, StoreError>;

    async fn update_enrichment(
        &self,
        activity_id: Uuid,
        enrichment: &Enrichment,
    ) -> Result<(), StoreError>;

    async fn get_activity_by_raw(
        &self,
        raw_activity_id: Uuid,
    ) -> Result<Option<CanonicalActivity>, StoreError>;

    /// Upsert tags by name and link them; existing links are no-ops.
    async fn link_tags(&self, activity_id: Uuid, tags: &[String]) -> Result<(), StoreError>;

    async fn activity_tags(&self, activity_id: Uuid) -> Result<Vec<Tag>, StoreError>;

    /// Per-sport volume buckets, ordered by sport then period.
    async fn athlete_volume(
        &self,
        query: &VolumeQuery,
    ) -> Result<Vec<(Sport, VolumePoint)>, StoreError>;
}

/// Providers and local users.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn provider_by_slug(&self, slug: &str) -> Result<Option<Provider>, StoreError>;

    async fn provider_by_id(&self, id: i32) -> Result<Option<Provider>, StoreError>;

    /// Upsert on (provider, external id). Returns the stored user, whose id
    /// is the existing one on conflict.
    async fn upsert_user(&self, user: &User) -> Result<User, StoreError>;

    async fn find_user(
        &self,
        provider_id: i32,
        external_id: &str,
    ) -> Result<Option<User>, StoreError>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
}

/// Webhook handshake tokens.
#[async_trait]
pub trait VerificationTokenStore: Send + Sync {
    async fn insert_verification(
        &self,
        verification: &WebhookVerification,
    ) -> Result<(), StoreError>;

    /// Atomically delete and return the token if it has not expired.
    async fn take_unexpired(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookVerification>, StoreError>;

    async fn verification_exists(&self, token: &str) -> Result<bool, StoreError>;

    async fn delete_verification(&self, token: &str) -> Result<(), StoreError>;

    /// Remove expired tokens; returns how many were deleted.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Every store capability, for wiring a single backend into all components.
pub trait Store:
    CredentialStore + RawActivityStore + CanonicalActivityStore + UserStore + VerificationTokenStore
{
}

impl<T> Store for T where
    T: CredentialStore
        + RawActivityStore
        + CanonicalActivityStore
        + UserStore
        + VerificationTokenStore
{
}
