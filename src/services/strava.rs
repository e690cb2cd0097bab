// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava API client.
//!
//! Handles:
//! - OAuth code exchange and token refresh
//! - Activity listing, detail and stream fetching
//! - Push subscription listing and registration
//! - Rate limit detection (surfaced as [`ProviderError::RateLimited`])

use crate::error::ProviderError;
use crate::models::AccessToken;
use crate::services::provider::{
    ActivityDetail, ActivitySummary, AthleteProfile, ProviderApi, TokenGrant, WebhookSubscription,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

pub const STRAVA_SLUG: &str = "strava";

const OAUTH_SCOPE: &str = "read,activity:read_all";
const STREAM_KEYS: &str = "time,latlng,altitude,heartrate";

/// Strava API client.
#[derive(Clone)]
pub struct StravaClient {
    http: reqwest::Client,
    base_url: String,
    oauth_url: String,
    client_id: String,
    client_secret: String,
}

impl StravaClient {
    /// Create a new Strava client with OAuth credentials.
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: "https://www.strava.com/api/v3".to_string(),
            oauth_url: "https://www.strava.com/oauth".to_string(),
            client_id,
            client_secret,
        }
    }

    /// Generic GET request with JSON response.
    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        access_token: &AccessToken,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token.secret())
            .query(query)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        check_response_json(response).await
    }

    async fn post_token_form(&self, form: &[(&str, &str)]) -> Result<TokenGrant, ProviderError> {
        let response = self
            .http
            .post(format!("{}/token", self.oauth_url))
            .form(form)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("Token request failed: {}", e)))?;

        let body: StravaTokenResponse = check_response_json(response).await?;
        let expires_at = DateTime::from_timestamp(body.expires_at, 0).ok_or_else(|| {
            ProviderError::Decode(format!("invalid expires_at: {}", body.expires_at))
        })?;

        Ok(TokenGrant {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            expires_at,
            athlete: body.athlete.map(|a| AthleteProfile {
                id: a.id.to_string(),
                first_name: a.firstname,
                last_name: a.lastname,
            }),
        })
    }
}

/// Check response status and parse the JSON body.
async fn check_response_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();

        return Err(match status.as_u16() {
            429 => {
                tracing::warn!("Strava rate limit hit (429)");
                ProviderError::RateLimited
            }
            401 => ProviderError::Unauthorized,
            404 => ProviderError::NotFound(body),
            code => ProviderError::Http { status: code, body },
        });
    }

    response
        .json()
        .await
        .map_err(|e| ProviderError::Decode(format!("JSON parse error: {}", e)))
}

#[async_trait]
impl ProviderApi for StravaClient {
    fn slug(&self) -> &str {
        STRAVA_SLUG
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}/authorize?client_id={}&redirect_uri={}&response_type=code&approval_prompt=auto&scope={}&state={}",
            self.oauth_url,
            self.client_id,
            urlencoding::encode(redirect_uri),
            OAUTH_SCOPE,
            urlencoding::encode(state)
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError> {
        self.post_token_form(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
        ])
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        self.post_token_form(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .await
    }

    async fn list_activities(
        &self,
        token: &AccessToken,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<ActivitySummary>, ProviderError> {
        let url = format!("{}/athlete/activities", self.base_url);
        let summaries: Vec<StravaActivitySummary> = self
            .get_json(
                &url,
                token,
                &[
                    ("after", after.timestamp().to_string()),
                    ("before", before.timestamp().to_string()),
                    ("page", page.to_string()),
                    ("per_page", per_page.to_string()),
                ],
            )
            .await?;

        Ok(summaries
            .into_iter()
            .map(|s| ActivitySummary {
                id: s.id.to_string(),
                start_time: s.start_date,
            })
            .collect())
    }

    async fn get_activity(
        &self,
        token: &AccessToken,
        activity_id: &str,
    ) -> Result<ActivityDetail, ProviderError> {
        let url = format!("{}/activities/{}", self.base_url, activity_id);
        let payload: serde_json::Value = self.get_json(&url, token, &[]).await?;
        activity_detail_from_payload(payload)
    }

    async fn get_activity_streams(
        &self,
        token: &AccessToken,
        activity_id: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        let url = format!("{}/activities/{}/streams", self.base_url, activity_id);
        self.get_json(
            &url,
            token,
            &[
                ("keys", STREAM_KEYS.to_string()),
                ("key_by_type", "true".to_string()),
            ],
        )
        .await
    }

    async fn list_subscriptions(&self) -> Result<Vec<WebhookSubscription>, ProviderError> {
        let response = self
            .http
            .get(format!("{}/push_subscriptions", self.base_url))
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let subscriptions: Vec<StravaSubscription> = check_response_json(response).await?;
        Ok(subscriptions.into_iter().map(Into::into).collect())
    }

    async fn create_subscription(
        &self,
        callback_url: &str,
        verify_token: &str,
    ) -> Result<WebhookSubscription, ProviderError> {
        let response = self
            .http
            .post(format!("{}/push_subscriptions", self.base_url))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("callback_url", callback_url),
                ("verify_token", verify_token),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let created: StravaSubscription = check_response_json(response).await?;
        let mut subscription = WebhookSubscription::from(created);
        if subscription.callback_url.is_empty() {
            subscription.callback_url = callback_url.to_string();
        }
        tracing::info!(subscription_id = subscription.id, "Strava push subscription created");
        Ok(subscription)
    }
}

/// Build an [`ActivityDetail`] from a raw `/activities/{id}` payload.
pub fn activity_detail_from_payload(
    payload: serde_json::Value,
) -> Result<ActivityDetail, ProviderError> {
    let activity: StravaActivity = serde_json::from_value(payload.clone())
        .map_err(|e| ProviderError::Decode(format!("activity detail: {}", e)))?;

    Ok(ActivityDetail {
        id: activity.id.to_string(),
        start_time: activity.start_date,
        elapsed_time: activity.elapsed_time,
        iana_timezone: activity.timezone.as_deref().map(iana_timezone),
        utc_offset: activity.utc_offset.map(|o| o.round() as i32),
        payload,
    })
}

/// Strava reports timezones as `"(GMT-08:00) America/Los_Angeles"`.
pub fn iana_timezone(raw: &str) -> String {
    match raw.split_once(") ") {
        Some((_, name)) => name.trim().to_string(),
        None => raw.trim().to_string(),
    }
}

/// Token response from Strava OAuth (athlete only on code exchange).
#[derive(Debug, Clone, Deserialize)]
struct StravaTokenResponse {
    access_token: String,
    refresh_token: String,
    expires_at: i64,
    #[serde(default)]
    athlete: Option<StravaAthlete>,
}

/// Athlete info from OAuth token exchange.
#[derive(Debug, Clone, Deserialize)]
struct StravaAthlete {
    id: u64,
    #[serde(default)]
    firstname: Option<String>,
    #[serde(default)]
    lastname: Option<String>,
}

/// Detailed Strava activity response.
#[derive(Debug, Clone, Deserialize)]
pub struct StravaActivity {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub sport_type: String,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub timezone: Option<String>,
    /// Seconds
    #[serde(default)]
    pub utc_offset: Option<f64>,
    pub elapsed_time: i32,
    pub moving_time: i32,
    pub distance: f64,
    #[serde(default)]
    pub total_elevation_gain: f64,
    #[serde(default)]
    pub average_speed: f64,
    #[serde(default)]
    pub map: Option<StravaMap>,
}

impl StravaActivity {
    /// Get the summary polyline, if the activity has a non-empty one.
    pub fn summary_polyline(&self) -> Option<&str> {
        self.map
            .as_ref()
            .and_then(|m| m.summary_polyline.as_deref())
            .filter(|p| !p.is_empty())
    }
}

/// Activity map data.
#[derive(Debug, Clone, Deserialize)]
pub struct StravaMap {
    #[serde(default)]
    pub summary_polyline: Option<String>,
}

/// Summary activity for list endpoints.
#[derive(Debug, Clone, Deserialize)]
struct StravaActivitySummary {
    id: u64,
    start_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
struct StravaSubscription {
    id: i64,
    #[serde(default)]
    callback_url: String,
}

impl From<StravaSubscription> for WebhookSubscription {
    fn from(s: StravaSubscription) -> Self {
        WebhookSubscription {
            id: s.id,
            callback_url: s.callback_url,
        }
    }
}
