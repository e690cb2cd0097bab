// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Provider OAuth authorization routes.

use axum::{
    extract::{Path, Query, State},
    response::Redirect,
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::User;
use crate::routes::webhook::resolve_provider;
use crate::AppState;

// Type alias for HMAC-SHA256
type HmacSha256 = Hmac<Sha256>;

/// How long a signed `state` parameter stays acceptable.
const STATE_MAX_AGE_SECS: i64 = 10 * 60;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/providers/{provider}/auth", get(auth_start))
        .route("/providers/{provider}/auth/callback", get(auth_callback))
}

/// Sign `provider|timestamp_hex` and base64 the result for the URL.
fn encode_state(provider: &str, issued_at: DateTime<Utc>, secret: &[u8]) -> Result<String> {
    let payload = format!("{}|{:x}", provider, issued_at.timestamp_millis());

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    Ok(URL_SAFE_NO_PAD.encode(format!("{}|{}", payload, signature)))
}

/// Verify the signature and age of a `state` parameter and return the
/// provider it was issued for.
fn verify_state(state: &str, secret: &[u8], now: DateTime<Utc>) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(state).ok()?;
    let state_str = String::from_utf8(bytes).ok()?;

    // Format is "provider|timestamp_hex|signature_hex"
    let mut parts = state_str.splitn(3, '|');
    let provider = parts.next()?;
    let timestamp_hex = parts.next()?;
    let signature = hex::decode(parts.next()?).ok()?;

    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(format!("{}|{}", provider, timestamp_hex).as_bytes());
    if mac.verify_slice(&signature).is_err() {
        tracing::warn!("OAuth state signature mismatch");
        return None;
    }

    let issued_at = DateTime::from_timestamp_millis(i64::from_str_radix(timestamp_hex, 16).ok()?)?;
    let age = now - issued_at;
    if age < Duration::zero() || age > Duration::seconds(STATE_MAX_AGE_SECS) {
        tracing::warn!(issued_at = %issued_at, "OAuth state expired");
        return None;
    }

    Some(provider.to_string())
}

/// Start OAuth flow - redirect to the provider's authorization page.
async fn auth_start(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
) -> Result<Redirect> {
    let provider = resolve_provider(&state, &provider).await?;

    let oauth_state = encode_state(&provider.slug, Utc::now(), &state.config.oauth_state_key)?;
    let callback_url = state.config.oauth_callback_url(&provider.slug);
    let auth_url = state.provider.authorize_url(&callback_url, &oauth_state);

    tracing::info!(provider = %provider.slug, "Starting OAuth flow");
    Ok(Redirect::temporary(&auth_url))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResponse {
    success: bool,
    user_id: Uuid,
    backfill_windows_queued: u32,
}

/// OAuth callback - exchange code, store user and credential, schedule
/// historical backfill.
async fn auth_callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<CallbackResponse>> {
    let provider = resolve_provider(&state, &provider).await?;

    if let Some(error) = params.error {
        tracing::warn!(error = %error, provider = %provider.slug, "OAuth error from provider");
        return Err(AppError::BadRequest(format!("authorization failed: {}", error)));
    }

    let verified = params
        .state
        .as_deref()
        .and_then(|s| verify_state(s, &state.config.oauth_state_key, Utc::now()));
    if verified.as_deref() != Some(provider.slug.as_str()) {
        return Err(AppError::BadRequest("invalid state parameter".to_string()));
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing code".to_string()))?;

    tracing::info!(provider = %provider.slug, "Exchanging authorization code for tokens");
    let grant = state.provider.exchange_code(&code).await?;
    let athlete = grant
        .athlete
        .clone()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("token response without athlete")))?;

    let user = state
        .users
        .upsert_user(&User {
            first_name: athlete.first_name,
            last_name: athlete.last_name,
            ..User::new(provider.id, athlete.id)
        })
        .await?;

    state
        .credentials
        .store_grant(provider.id, user.id, &grant)
        .await?;

    tracing::info!(user_id = %user.id, provider = %provider.slug, "OAuth successful, credential stored");

    let scheduled = state.scheduler.schedule_backfill(user.id, provider.id).await;
    if !scheduled.is_complete_success() {
        tracing::warn!(
            user_id = %user.id,
            failed = scheduled.failed,
            "Some backfill windows failed to queue, continuing anyway"
        );
    }

    Ok(Json(CallbackResponse {
        success: true,
        user_id: user.id,
        backfill_windows_queued: scheduled.queued,
    }))
}
