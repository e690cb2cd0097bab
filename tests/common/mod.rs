// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use chrono::{DateTime, Duration, Utc};
use endurance_ingest::config::Config;
use endurance_ingest::db::{CredentialStore, MemoryStore, UserStore};
use endurance_ingest::error::ProviderError;
use endurance_ingest::models::{AccessToken, ProviderCredential, User};
use endurance_ingest::routes::create_router;
use endurance_ingest::services::provider::{
    ActivityDetail, ActivitySummary, AthleteProfile, TokenGrant, WebhookSubscription,
};
use endurance_ingest::services::queue::{sign_body, GROUP_HEADER, QUEUE_NAME_HEADER, SIGNATURE_HEADER};
use endurance_ingest::services::strava::activity_detail_from_payload;
use endurance_ingest::services::{MemoryObjectStore, MemoryQueue, ProviderApi};
use endurance_ingest::AppState;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Strava provider row seeded by `MemoryStore::new`.
pub const STRAVA_PROVIDER_ID: i32 = 1;

/// Athlete id returned by `FakeProvider::exchange_code`.
pub const FAKE_ATHLETE_ID: &str = "12345";

/// Subscription id `FakeProvider` reports as registered.
pub const FAKE_SUBSCRIPTION_ID: i64 = 4242;

/// Database URL for PostgreSQL-backed tests, if configured.
pub fn database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

/// Skip test with message if no database is configured.
#[macro_export]
macro_rules! require_database {
    () => {
        match crate::common::database_url() {
            Some(url) => url,
            None => {
                eprintln!("⚠️  Skipping: DATABASE_URL not set");
                return;
            }
        }
    };
}

/// Scriptable stand-in for a provider API.
pub struct FakeProvider {
    activities: Mutex<HashMap<String, Value>>,
    streams: Mutex<HashMap<String, Value>>,
    subscriptions: Mutex<Vec<WebhookSubscription>>,
    /// `list_activities` fails with a rate limit from this page on
    rate_limit_from_page: Mutex<Option<u32>>,
    refresh_delay: std::time::Duration,
    pub refresh_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
    pub stream_calls: AtomicUsize,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self {
            activities: Mutex::default(),
            streams: Mutex::default(),
            subscriptions: Mutex::new(vec![WebhookSubscription {
                id: FAKE_SUBSCRIPTION_ID,
                callback_url: "http://localhost:8080/providers/strava/webhook".to_string(),
            }]),
            rate_limit_from_page: Mutex::default(),
            refresh_delay: std::time::Duration::ZERO,
            refresh_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            detail_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make token refresh slow enough for callers to overlap.
    pub fn with_refresh_delay(mut self, delay: std::time::Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn add_activity(&self, payload: Value) {
        let id = payload["id"].to_string();
        self.activities.lock().unwrap().insert(id, payload);
    }

    pub fn add_streams(&self, activity_id: u64, streams: Value) {
        self.streams
            .lock()
            .unwrap()
            .insert(activity_id.to_string(), streams);
    }

    pub fn rate_limit_from_page(&self, page: u32) {
        *self.rate_limit_from_page.lock().unwrap() = Some(page);
    }

    pub fn clear_subscriptions(&self) {
        self.subscriptions.lock().unwrap().clear();
    }

    fn grant(&self, access_token: String, athlete: Option<AthleteProfile>) -> TokenGrant {
        TokenGrant {
            access_token,
            refresh_token: "fake-refresh".to_string(),
            expires_at: Utc::now() + Duration::hours(6),
            athlete,
        }
    }
}

#[async_trait]
impl ProviderApi for FakeProvider {
    fn slug(&self) -> &str {
        "strava"
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "https://provider.test/oauth/authorize?redirect_uri={}&state={}",
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state)
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError> {
        if code == "bad-code" {
            return Err(ProviderError::Http {
                status: 400,
                body: "invalid code".to_string(),
            });
        }
        Ok(self.grant(
            "fake-access".to_string(),
            Some(AthleteProfile {
                id: FAKE_ATHLETE_ID.to_string(),
                first_name: Some("Test".to_string()),
                last_name: Some("Athlete".to_string()),
            }),
        ))
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        Ok(self.grant(format!("refreshed-{}", n), None))
    }

    async fn list_activities(
        &self,
        _token: &AccessToken,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<ActivitySummary>, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limit_page) = *self.rate_limit_from_page.lock().unwrap() {
            if page >= limit_page {
                return Err(ProviderError::RateLimited);
            }
        }

        let mut summaries: Vec<ActivitySummary> = self
            .activities
            .lock()
            .unwrap()
            .values()
            .filter_map(|p| activity_detail_from_payload(p.clone()).ok())
            .filter(|d| d.start_time >= after && d.start_time < before)
            .map(|d| ActivitySummary {
                id: d.id,
                start_time: d.start_time,
            })
            .collect();
        summaries.sort_by_key(|s| s.start_time);

        let skip = (page.saturating_sub(1) * per_page) as usize;
        Ok(summaries
            .into_iter()
            .skip(skip)
            .take(per_page as usize)
            .collect())
    }

    async fn get_activity(
        &self,
        _token: &AccessToken,
        activity_id: &str,
    ) -> Result<ActivityDetail, ProviderError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        let payload = self
            .activities
            .lock()
            .unwrap()
            .get(activity_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(activity_id.to_string()))?;
        activity_detail_from_payload(payload)
    }

    async fn get_activity_streams(
        &self,
        _token: &AccessToken,
        activity_id: &str,
    ) -> Result<Value, ProviderError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.streams
            .lock()
            .unwrap()
            .get(activity_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(activity_id.to_string()))
    }

    async fn list_subscriptions(&self) -> Result<Vec<WebhookSubscription>, ProviderError> {
        Ok(self.subscriptions.lock().unwrap().clone())
    }

    async fn create_subscription(
        &self,
        callback_url: &str,
        _verify_token: &str,
    ) -> Result<WebhookSubscription, ProviderError> {
        let subscription = WebhookSubscription {
            id: FAKE_SUBSCRIPTION_ID,
            callback_url: callback_url.to_string(),
        };
        let mut subscriptions = self.subscriptions.lock().unwrap();
        subscriptions.retain(|s| s.id != subscription.id);
        subscriptions.push(subscription.clone());
        Ok(subscription)
    }
}

/// Strava `/activities/{id}` payload.
pub fn strava_activity(id: u64, sport_type: &str, start: DateTime<Utc>, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "description": "",
        "sport_type": sport_type,
        "start_date": start.to_rfc3339(),
        "timezone": "(GMT-08:00) America/Los_Angeles",
        "utc_offset": -28800.0,
        "elapsed_time": 3600,
        "moving_time": 3300,
        "distance": 10012.4,
        "total_elevation_gain": 120.0,
        "average_speed": 3.03,
        "map": { "summary_polyline": "_p~iF~ps|U_ulLnnqC_mqNvxq`@" }
    })
}

/// `payload` with its description replaced.
pub fn with_description(mut payload: Value, description: &str) -> Value {
    payload["description"] = Value::String(description.to_string());
    payload
}

/// Keyed streams payload with a short track and heart rate.
pub fn strava_streams() -> Value {
    json!({
        "time": { "data": [0, 10, 20] },
        "latlng": { "data": [[38.5, -120.2], [40.7, -120.95], [43.252, -126.453]] },
        "altitude": { "data": [100.0, 105.5, 110.0] },
        "heartrate": { "data": [120, 140, 160] }
    })
}

/// Everything a test needs to drive the app and inspect its side effects.
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub provider: Arc<FakeProvider>,
    pub objects: Arc<MemoryObjectStore>,
    pub queue: Arc<MemoryQueue>,
}

/// Create a test app with in-memory dependencies.
pub fn create_test_app() -> TestApp {
    create_test_app_with(FakeProvider::new())
}

pub fn create_test_app_with(provider: FakeProvider) -> TestApp {
    let config = Config::test_default();
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(provider);
    let objects = Arc::new(MemoryObjectStore::new(config.object_bucket.clone()));
    let queue = Arc::new(MemoryQueue::new());

    let state = Arc::new(AppState::new(
        config,
        store.clone(),
        provider.clone(),
        objects.clone(),
        queue.clone(),
    ));

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
        provider,
        objects,
        queue,
    }
}

/// Store a user with a credential expiring in `expires_in`.
pub async fn seed_user(store: &MemoryStore, external_id: &str, expires_in: Duration) -> User {
    let user = store
        .upsert_user(&User::new(STRAVA_PROVIDER_ID, external_id))
        .await
        .unwrap();
    store
        .save_credential(&ProviderCredential {
            provider_id: STRAVA_PROVIDER_ID,
            user_id: user.id,
            access_token: "stored-access".to_string(),
            refresh_token: "stored-refresh".to_string(),
            expires_at: Utc::now() + expires_in,
        })
        .await
        .unwrap();
    user
}

/// A queue push request signed the way `CloudTasksQueue` signs it.
pub fn signed_task_request(config: &Config, uri: &str, body: &Value) -> Request<Body> {
    let body = serde_json::to_vec(body).unwrap();
    let signature = sign_body(&config.task_signing_key, &body);
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header(QUEUE_NAME_HEADER, config.task_queue_name.as_str())
        .header(SIGNATURE_HEADER, signature)
        .header(GROUP_HEADER, "test")
        .body(Body::from(body))
        .unwrap()
}

/// Read a response body as JSON.
pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
