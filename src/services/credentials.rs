// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth token lifecycle.
//!
//! Refresh mutual exclusion comes from the store's row lock, not from
//! in-process coordination, so it holds across instances.

use crate::db::CredentialStore;
use crate::error::CredentialError;
use crate::models::{AccessToken, ProviderCredential};
use crate::services::provider::{ProviderApi, TokenGrant};
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Margin before token expiration when we proactively refresh (5 minutes).
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Hands out valid access tokens, refreshing at most once per expiry.
#[derive(Clone)]
pub struct CredentialManager {
    store: Arc<dyn CredentialStore>,
    provider: Arc<dyn ProviderApi>,
}

impl CredentialManager {
    pub fn new(store: Arc<dyn CredentialStore>, provider: Arc<dyn ProviderApi>) -> Self {
        Self { store, provider }
    }

    /// Persist the grant from an authorization callback.
    pub async fn store_grant(
        &self,
        provider_id: i32,
        user_id: Uuid,
        grant: &TokenGrant,
    ) -> Result<(), CredentialError> {
        let credential = ProviderCredential {
            provider_id,
            user_id,
            access_token: grant.access_token.clone(),
            refresh_token: grant.refresh_token.clone(),
            expires_at: grant.expires_at,
        };
        self.store.save_credential(&credential).await?;
        Ok(())
    }

    /// Get a valid (non-expiring) access token for the given user.
    ///
    /// 1. Unlocked read; return the stored token if it is not near expiry
    /// 2. Lock the credential row
    /// 3. Re-check under the lock (a concurrent caller may have refreshed)
    /// 4. Refresh with the provider and persist before releasing the lock
    ///
    /// Any failure after step 2 drops the lock without writing.
    pub async fn ensure_valid(
        &self,
        provider_id: i32,
        user_id: Uuid,
    ) -> Result<AccessToken, CredentialError> {
        let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
        let not_found = || CredentialError::NotFound {
            provider_id,
            user_id,
        };

        // ─────────────────────────────────────────────────────────────
        // STEP 1: Unlocked read (fast path - no write)
        // ─────────────────────────────────────────────────────────────
        let credential = self
            .store
            .get_credential(provider_id, user_id)
            .await?
            .ok_or_else(not_found)?;

        if !credential.expires_within(Utc::now(), margin) {
            return Ok(credential.access_token());
        }

        // ─────────────────────────────────────────────────────────────
        // STEP 2: Acquire the row lock
        // ─────────────────────────────────────────────────────────────
        let lock = self
            .store
            .lock_credential(provider_id, user_id)
            .await?
            .ok_or_else(not_found)?;

        // ─────────────────────────────────────────────────────────────
        // STEP 3: Re-check under the lock (double-check)
        // ─────────────────────────────────────────────────────────────
        let locked = lock.credential().clone();
        if !locked.expires_within(Utc::now(), margin) {
            tracing::debug!(provider_id, %user_id, "Token refreshed concurrently, reusing");
            lock.commit(None).await?;
            return Ok(locked.access_token());
        }

        // ─────────────────────────────────────────────────────────────
        // STEP 4: Refresh and persist
        // ─────────────────────────────────────────────────────────────
        tracing::info!(provider_id, %user_id, "Access token expiring, refreshing");

        let grant = self
            .provider
            .refresh_token(&locked.refresh_token)
            .await
            .map_err(|e| {
                tracing::error!(provider_id, %user_id, error = %e, "Token refresh failed");
                CredentialError::RefreshFailed(e)
            })?;

        let updated = ProviderCredential {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: grant.expires_at.max(locked.expires_at),
            ..locked
        };

        lock.commit(Some(&updated)).await?;

        tracing::info!(provider_id, %user_id, expires_at = %updated.expires_at, "Token refreshed");
        Ok(updated.access_token())
    }
}
