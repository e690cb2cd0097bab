// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Loaded once at startup. Deployments inject secrets as environment
//! variables; local development can use a `.env` file.

use crate::services::tags::TagStyle;
use std::env;

/// Default number of monthly backfill windows (four years).
pub const DEFAULT_BACKFILL_MONTHS: u32 = 48;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Maximum pooled database connections
    pub database_max_connections: u32,
    /// Strava OAuth client ID (public)
    pub strava_client_id: String,
    /// Public base URL of this service (OAuth redirect, webhook callback, task push target)
    pub api_url: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// GCP region for Cloud Tasks
    pub gcp_region: String,
    /// Cloud Tasks queue name
    pub task_queue_name: String,
    /// Object storage bucket for stream and GPX blobs
    pub object_bucket: String,
    /// Number of monthly windows scheduled after authorization
    pub backfill_months: u32,
    /// Which free-text tag syntax to extract
    pub tag_style: TagStyle,
    /// Server port
    pub port: u16,
    /// `host:port` of the function host's runtime API, when running serverless
    pub runtime_api: Option<String>,

    // --- Secrets ---
    /// Strava OAuth client secret
    pub strava_client_secret: String,
    /// Key required in `x-api-key` for metrics and admin routes
    pub api_key: String,
    /// HMAC key for the OAuth `state` parameter
    pub oauth_state_key: Vec<u8>,
    /// HMAC key for queue push bodies
    pub task_signing_key: Vec<u8>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS", 5)?,
            strava_client_id: required("STRAVA_CLIENT_ID")?,
            api_url: env::var("API_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            gcp_region: env::var("GCP_REGION").unwrap_or_else(|_| "us-west1".to_string()),
            task_queue_name: env::var("TASK_QUEUE_NAME")
                .unwrap_or_else(|_| "activity-ingest".to_string()),
            object_bucket: required("OBJECT_BUCKET")?,
            backfill_months: parsed("BACKFILL_MONTHS", DEFAULT_BACKFILL_MONTHS)?,
            tag_style: parsed("TAG_STYLE", TagStyle::Hashtag)?,
            port: parsed("PORT", 8080)?,
            runtime_api: env::var("AWS_LAMBDA_RUNTIME_API").ok(),

            strava_client_secret: required("STRAVA_CLIENT_SECRET")?,
            api_key: required("API_KEY")?,
            oauth_state_key: required("OAUTH_STATE_KEY")?.into_bytes(),
            task_signing_key: required("TASK_SIGNING_KEY")?.into_bytes(),
        })
    }

    /// Offline configuration for tests.
    pub fn test_default() -> Self {
        Self {
            database_url: "postgres://localhost/endurance_test".to_string(),
            database_max_connections: 2,
            strava_client_id: "test_client_id".to_string(),
            api_url: "http://localhost:8080".to_string(),
            gcp_project_id: "test-project".to_string(),
            gcp_region: "us-west1".to_string(),
            task_queue_name: "activity-ingest".to_string(),
            object_bucket: "test-bucket".to_string(),
            backfill_months: DEFAULT_BACKFILL_MONTHS,
            tag_style: TagStyle::Hashtag,
            port: 8080,
            runtime_api: None,
            strava_client_secret: "test_secret".to_string(),
            api_key: "test_api_key".to_string(),
            oauth_state_key: b"test_oauth_state_key_32_bytes!!!".to_vec(),
            task_signing_key: b"test_task_signing_key_32_bytes!!".to_vec(),
        }
    }

    /// Public URL the provider calls back after authorization.
    pub fn oauth_callback_url(&self, provider: &str) -> String {
        format!("{}/providers/{}/auth/callback", self.api_url, provider)
    }

    /// Public URL the provider posts webhook events to.
    pub fn webhook_callback_url(&self, provider: &str) -> String {
        format!("{}/providers/{}/webhook", self.api_url, provider)
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .map(|v| v.trim().to_string())
        .map_err(|_| ConfigError::Missing(name))
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, raw)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
