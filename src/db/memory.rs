// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-memory store for tests and local runs.
//!
//! Mirrors the PostgreSQL semantics that matter to callers: natural-key
//! upserts, insert-if-absent tag links, and an exclusive per-credential lock.

use super::{
    CanonicalActivityStore, CredentialLock, CredentialStore, RawActivityStore, UserStore,
    VerificationTokenStore,
};
use crate::error::StoreError;
use crate::models::{
    CanonicalActivity, Enrichment, Provider, ProviderCredential, RawActivity, Sport, Tag, User,
    VolumePoint, VolumeQuery, WebhookVerification,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

type CredentialKey = (i32, Uuid);

#[derive(Default)]
struct Tables {
    providers: Vec<Provider>,
    users: HashMap<Uuid, User>,
    credentials: HashMap<CredentialKey, ProviderCredential>,
    raw_activities: HashMap<Uuid, RawActivity>,
    /// Insertion order, for oldest-first listings
    raw_order: Vec<Uuid>,
    activities: HashMap<Uuid, CanonicalActivity>,
    tags: HashMap<String, Tag>,
    activity_tags: HashSet<(Uuid, Uuid)>,
    verifications: HashMap<String, WebhookVerification>,
}

/// In-memory implementation of every store trait.
#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    row_locks: Arc<DashMap<CredentialKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store with the Strava provider registered as id 1.
    pub fn new() -> Self {
        let tables = Tables {
            providers: vec![Provider {
                id: 1,
                slug: "strava".to_string(),
                name: "Strava".to_string(),
            }],
            ..Tables::default()
        };
        Self {
            tables: Arc::new(Mutex::new(tables)),
            row_locks: Arc::new(DashMap::new()),
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn raw_activity_count(&self) -> usize {
        self.tables().raw_activities.len()
    }

    pub fn activity_count(&self) -> usize {
        self.tables().activities.len()
    }

    pub fn tag_link_count(&self) -> usize {
        self.tables().activity_tags.len()
    }

    /// Drop a credential so lookups miss it, as they miss a soft-deleted
    /// row in PostgreSQL (test helper for revoked users).
    pub fn remove_credential(&self, provider_id: i32, user_id: Uuid) {
        self.tables().credentials.remove(&(provider_id, user_id));
    }
}

// ─── Credentials ────────────────────────────────────────────────────────────

struct MemoryCredentialLock {
    _guard: OwnedMutexGuard<()>,
    tables: Arc<Mutex<Tables>>,
    credential: ProviderCredential,
}

#[async_trait]
impl CredentialLock for MemoryCredentialLock {
    fn credential(&self) -> &ProviderCredential {
        &self.credential
    }

    async fn commit(
        self: Box<Self>,
        updated: Option<&ProviderCredential>,
    ) -> Result<(), StoreError> {
        if let Some(updated) = updated {
            let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
            let key = (self.credential.provider_id, self.credential.user_id);
            if let Some(stored) = tables.credentials.get_mut(&key) {
                stored.access_token = updated.access_token.clone();
                stored.refresh_token = updated.refresh_token.clone();
                stored.expires_at = stored.expires_at.max(updated.expires_at);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get_credential(
        &self,
        provider_id: i32,
        user_id: Uuid,
    ) -> Result<Option<ProviderCredential>, StoreError> {
        Ok(self
            .tables()
            .credentials
            .get(&(provider_id, user_id))
            .cloned())
    }

    async fn save_credential(&self, credential: &ProviderCredential) -> Result<(), StoreError> {
        let key = (credential.provider_id, credential.user_id);
        let mut tables = self.tables();
        let expires_at = tables
            .credentials
            .get(&key)
            .map(|existing| existing.expires_at.max(credential.expires_at))
            .unwrap_or(credential.expires_at);
        tables.credentials.insert(
            key,
            ProviderCredential {
                expires_at,
                ..credential.clone()
            },
        );
        Ok(())
    }

    async fn lock_credential(
        &self,
        provider_id: i32,
        user_id: Uuid,
    ) -> Result<Option<Box<dyn CredentialLock>>, StoreError> {
        let key = (provider_id, user_id);
        let lock = self
            .row_locks
            .entry(key)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();

        let guard = lock.lock_owned().await;

        let credential = self.tables().credentials.get(&key).cloned();
        let Some(credential) = credential else {
            return Ok(None);
        };

        Ok(Some(Box::new(MemoryCredentialLock {
            _guard: guard,
            tables: Arc::clone(&self.tables),
            credential,
        })))
    }
}

// ─── Raw activities ─────────────────────────────────────────────────────────

#[async_trait]
impl RawActivityStore for MemoryStore {
    async fn upsert_raw_activity(&self, raw: &RawActivity) -> Result<Uuid, StoreError> {
        let mut tables = self.tables();

        let existing = tables
            .raw_activities
            .values_mut()
            .find(|r| {
                r.provider_id == raw.provider_id
                    && r.user_id == raw.user_id
                    && r.provider_activity_id == raw.provider_activity_id
            });

        if let Some(existing) = existing {
            existing.start_time = raw.start_time;
            existing.elapsed_time = raw.elapsed_time;
            existing.iana_timezone = raw.iana_timezone.clone();
            existing.utc_offset = raw.utc_offset;
            existing.data = raw.data.clone();
            if raw.detail_uri.is_some() {
                existing.detail_uri = raw.detail_uri.clone();
            }
            return Ok(existing.id);
        }

        tables.raw_activities.insert(raw.id, raw.clone());
        tables.raw_order.push(raw.id);
        Ok(raw.id)
    }

    async fn list_raw_activities(
        &self,
        provider_id: i32,
        user_id: Uuid,
    ) -> Result<Vec<RawActivity>, StoreError> {
        Ok(self
            .tables()
            .raw_activities
            .values()
            .filter(|r| r.provider_id == provider_id && r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_raw_activity(&self, id: Uuid) -> Result<Option<RawActivity>, StoreError> {
        Ok(self.tables().raw_activities.get(&id).cloned())
    }

    async fn attach_detail(&self, id: Uuid, detail_uri: &str) -> Result<(), StoreError> {
        if let Some(raw) = self.tables().raw_activities.get_mut(&id) {
            raw.detail_uri = Some(detail_uri.to_string());
        }
        Ok(())
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), StoreError> {
        if let Some(raw) = self.tables().raw_activities.get_mut(&id) {
            raw.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_unprocessed(&self, limit: i64) -> Result<Vec<RawActivity>, StoreError> {
        let tables = self.tables();
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(tables
            .raw_order
            .iter()
            .filter_map(|id| tables.raw_activities.get(id))
            .filter(|r| r.processed_at.is_none() && r.detail_uri.is_some())
            .take(limit)
            .cloned()
            .collect())
    }
}

// ─── Canonical activities ───────────────────────────────────────────────────

#[async_trait]
impl CanonicalActivityStore for MemoryStore {
    async fn upsert_activity(
        &self,
        activity: &CanonicalActivity,
    ) -> Result<CanonicalActivity, StoreError> {
        let mut tables = self.tables();

        let existing = tables.activities.values_mut().find(|a| {
            a.provider_id == activity.provider_id
                && a.user_id == activity.user_id
                && a.raw_activity_id == activity.raw_activity_id
        });

        if let Some(existing) = existing {
            let stored = CanonicalActivity {
                id: existing.id,
                avg_hr: existing.avg_hr,
                max_hr: existing.max_hr,
                gpx_file_uri: existing.gpx_file_uri.clone(),
                ..activity.clone()
            };
            *existing = stored.clone();
            return Ok(stored);
        }

        let stored = CanonicalActivity {
            avg_hr: None,
            max_hr: None,
            gpx_file_uri: None,
            ..activity.clone()
        };
        tables.activities.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_enrichment(
        &self,
        activity_id: Uuid,
        enrichment: &Enrichment,
    ) -> Result<(), StoreError> {
        if let Some(activity) = self.tables().activities.get_mut(&activity_id) {
            activity.avg_hr = enrichment.avg_hr;
            activity.max_hr = enrichment.max_hr;
            activity.gpx_file_uri = enrichment.gpx_file_uri.clone();
        }
        Ok(())
    }

    async fn get_activity_by_raw(
        &self,
        raw_activity_id: Uuid,
    ) -> Result<Option<CanonicalActivity>, StoreError> {
        Ok(self
            .tables()
            .activities
            .values()
            .find(|a| a.raw_activity_id == raw_activity_id)
            .cloned())
    }

    async fn link_tags(&self, activity_id: Uuid, tags: &[String]) -> Result<(), StoreError> {
        let mut tables = self.tables();
        for name in tags {
            let tag_id = tables
                .tags
                .entry(name.clone())
                .or_insert_with(|| Tag {
                    id: Uuid::new_v4(),
                    name: name.clone(),
                    description: None,
                })
                .id;
            tables.activity_tags.insert((activity_id, tag_id));
        }
        Ok(())
    }

    async fn activity_tags(&self, activity_id: Uuid) -> Result<Vec<Tag>, StoreError> {
        let tables = self.tables();
        let mut tags: Vec<Tag> = tables
            .tags
            .values()
            .filter(|t| tables.activity_tags.contains(&(activity_id, t.id)))
            .cloned()
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    async fn athlete_volume(
        &self,
        query: &VolumeQuery,
    ) -> Result<Vec<(Sport, VolumePoint)>, StoreError> {
        let tables = self.tables();

        let slug_matches = |provider_id: i32| {
            tables
                .providers
                .iter()
                .any(|p| p.id == provider_id && p.slug == query.provider_slug)
        };

        let mut buckets: BTreeMap<(Sport, chrono::NaiveDate), VolumePoint> = BTreeMap::new();

        for activity in tables.activities.values() {
            let date = activity.start_time.date_naive();
            if activity.user_id != query.user_id
                || !slug_matches(activity.provider_id)
                || date < query.start_date
                || !query.sports.contains(&activity.sport)
            {
                continue;
            }

            let period = query.frequency.truncate(date);
            let point = buckets
                .entry((activity.sport, period))
                .or_insert_with(|| VolumePoint {
                    period,
                    activity_count: 0,
                    total_distance_meters: 0,
                    total_elapsed_time_seconds: 0,
                    total_moving_time_seconds: 0,
                    total_elevation_gain_meters: 0,
                });
            point.activity_count += 1;
            point.total_distance_meters += i64::from(activity.distance);
            point.total_elapsed_time_seconds += i64::from(activity.elapsed_time);
            point.total_moving_time_seconds += i64::from(activity.moving_time);
            point.total_elevation_gain_meters += i64::from(activity.elev_gain.unwrap_or(0));
        }

        Ok(buckets
            .into_iter()
            .map(|((sport, _), point)| (sport, point))
            .collect())
    }
}

// ─── Users ──────────────────────────────────────────────────────────────────

#[async_trait]
impl UserStore for MemoryStore {
    async fn provider_by_slug(&self, slug: &str) -> Result<Option<Provider>, StoreError> {
        Ok(self
            .tables()
            .providers
            .iter()
            .find(|p| p.slug == slug)
            .cloned())
    }

    async fn provider_by_id(&self, id: i32) -> Result<Option<Provider>, StoreError> {
        Ok(self.tables().providers.iter().find(|p| p.id == id).cloned())
    }

    async fn upsert_user(&self, user: &User) -> Result<User, StoreError> {
        let mut tables = self.tables();

        let existing = tables.users.values_mut().find(|u| {
            u.provider_id == user.provider_id && u.external_id == user.external_id
        });

        if let Some(existing) = existing {
            if user.first_name.is_some() {
                existing.first_name = user.first_name.clone();
            }
            if user.last_name.is_some() {
                existing.last_name = user.last_name.clone();
            }
            return Ok(existing.clone());
        }

        tables.users.insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn find_user(
        &self,
        provider_id: i32,
        external_id: &str,
    ) -> Result<Option<User>, StoreError> {
        Ok(self
            .tables()
            .users
            .values()
            .find(|u| u.provider_id == provider_id && u.external_id == external_id)
            .cloned())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables().users.get(&id).cloned())
    }
}

// ─── Webhook verification tokens ────────────────────────────────────────────

#[async_trait]
impl VerificationTokenStore for MemoryStore {
    async fn insert_verification(
        &self,
        verification: &WebhookVerification,
    ) -> Result<(), StoreError> {
        self.tables()
            .verifications
            .insert(verification.token.clone(), verification.clone());
        Ok(())
    }

    async fn take_unexpired(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookVerification>, StoreError> {
        let mut tables = self.tables();
        match tables.verifications.get(token) {
            Some(v) if !v.is_expired(now) => Ok(tables.verifications.remove(token)),
            _ => Ok(None),
        }
    }

    async fn verification_exists(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self.tables().verifications.contains_key(token))
    }

    async fn delete_verification(&self, token: &str) -> Result<(), StoreError> {
        self.tables().verifications.remove(token);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables();
        let before = tables.verifications.len();
        tables.verifications.retain(|_, v| !v.is_expired(now));
        Ok((before - tables.verifications.len()) as u64)
    }
}
