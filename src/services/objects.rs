// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Object storage for activity stream blobs and GPX files.

use crate::error::ObjectStoreError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const STORAGE_API_URL: &str = "https://storage.googleapis.com";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Refresh the metadata token this long before it expires.
const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(60);

/// Object key for the raw stream blob of a raw activity.
pub fn stream_key(provider: &str, raw_activity_id: uuid::Uuid) -> String {
    format!("activity_details/{}/raw/{}.json", provider, raw_activity_id)
}

/// Object key for the rendered GPX of a canonical activity.
pub fn gpx_key(provider: &str, activity_id: uuid::Uuid) -> String {
    format!("activity_details/{}/gpx/{}.gpx", provider, activity_id)
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` at `key`, replacing any existing object. Returns the
    /// object's location (e.g. `gs://bucket/key`).
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ObjectStoreError>;

    /// Read an object by location as returned from [`ObjectStore::put`].
    async fn get(&self, location: &str) -> Result<Vec<u8>, ObjectStoreError>;
}

/// Split `gs://bucket/key` (or a bare key, resolved against `default_bucket`).
fn parse_location<'a>(
    location: &'a str,
    default_bucket: &'a str,
) -> Result<(&'a str, &'a str), ObjectStoreError> {
    let (bucket, key) = match location.strip_prefix("gs://") {
        Some(rest) => rest
            .split_once('/')
            .ok_or_else(|| ObjectStoreError::InvalidLocation(location.to_string()))?,
        None => (default_bucket, location),
    };
    if bucket.is_empty() || key.is_empty() {
        return Err(ObjectStoreError::InvalidLocation(location.to_string()));
    }
    Ok((bucket, key))
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Google Cloud Storage over the JSON API, authenticated with the instance
/// service account.
pub struct GcsObjectStore {
    http: reqwest::Client,
    bucket: String,
    token_cache: RwLock<Option<CachedToken>>,
}

impl GcsObjectStore {
    pub fn new(bucket: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            bucket: bucket.into(),
            token_cache: RwLock::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, ObjectStoreError> {
        if let Some(cached) = self.token_cache.read().await.as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.token.clone());
            }
        }

        let mut cache = self.token_cache.write().await;
        if let Some(cached) = cache.as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.token.clone());
            }
        }

        let response = self
            .http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| ObjectStoreError::Transport(e.to_string()))?;
        let token: MetadataToken = check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| ObjectStoreError::Transport(e.to_string()))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_SLACK);
        *cache = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }
}

async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ObjectStoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ObjectStoreError::NotFound(body));
    }
    Err(ObjectStoreError::Http {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ObjectStoreError> {
        let token = self.access_token().await?;
        let url = format!("{}/upload/storage/v1/b/{}/o", STORAGE_API_URL, self.bucket);

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .query(&[("uploadType", "media"), ("name", key)])
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Transport(e.to_string()))?;
        check_response(response).await?;

        tracing::debug!(bucket = %self.bucket, key, "Stored object");
        Ok(format!("gs://{}/{}", self.bucket, key))
    }

    async fn get(&self, location: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let (bucket, key) = parse_location(location, &self.bucket)?;
        let token = self.access_token().await?;
        let url = format!(
            "{}/storage/v1/b/{}/o/{}",
            STORAGE_API_URL,
            bucket,
            urlencoding::encode(key)
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|e| ObjectStoreError::Transport(e.to_string()))?;
        let bytes = check_response(response)
            .await?
            .bytes()
            .await
            .map_err(|e| ObjectStoreError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// In-process object store for tests and local runs.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    bucket: String,
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Arc::default(),
        }
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = objects.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, ObjectStoreError> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), bytes);
        Ok(format!("gs://{}/{}", self.bucket, key))
    }

    async fn get(&self, location: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let (_, key) = parse_location(location, &self.bucket)?;
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(location.to_string()))
    }
}
