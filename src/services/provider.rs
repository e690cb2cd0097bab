// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Provider API abstraction.
//!
//! Everything the ingestion pipeline needs from an OAuth2 activity provider.
//! [`StravaClient`](super::strava::StravaClient) is the production
//! implementation; tests substitute a fake.

use crate::error::ProviderError;
use crate::models::AccessToken;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Tokens issued by a code exchange or refresh.
#[derive(Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    /// Present on code exchange only
    pub athlete: Option<AthleteProfile>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("expires_at", &self.expires_at)
            .field("athlete", &self.athlete)
            .finish_non_exhaustive()
    }
}

/// Athlete identity returned with a code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AthleteProfile {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// One entry of an activity listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivitySummary {
    pub id: String,
    pub start_time: DateTime<Utc>,
}

/// Full activity detail plus the fields needed for the raw record.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityDetail {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub elapsed_time: i32,
    pub iana_timezone: Option<String>,
    pub utc_offset: Option<i32>,
    /// Unmodified provider payload
    pub payload: serde_json::Value,
}

/// A registered push subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSubscription {
    pub id: i64,
    pub callback_url: String,
}

#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// Route slug (e.g. `strava`).
    fn slug(&self) -> &str;

    /// Browser URL that starts the OAuth authorization flow.
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String;

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError>;

    /// One page of activities started within `[after, before)`.
    async fn list_activities(
        &self,
        token: &AccessToken,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<ActivitySummary>, ProviderError>;

    async fn get_activity(
        &self,
        token: &AccessToken,
        activity_id: &str,
    ) -> Result<ActivityDetail, ProviderError>;

    /// Time-series streams, as returned by the provider.
    async fn get_activity_streams(
        &self,
        token: &AccessToken,
        activity_id: &str,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Live list of this application's push subscriptions.
    async fn list_subscriptions(&self) -> Result<Vec<WebhookSubscription>, ProviderError>;

    async fn create_subscription(
        &self,
        callback_url: &str,
        verify_token: &str,
    ) -> Result<WebhookSubscription, ProviderError>;
}
