// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Webhook routes for provider push events.

use crate::error::{AppError, Result};
use crate::middleware::require_api_key;
use crate::models::Provider;
use crate::services::{IngestOutcome, TokenCheck};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Json, Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Webhook routes.
pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let admin = Router::new()
        .route(
            "/providers/{provider}/webhook/subscription",
            post(register_subscription),
        )
        .route_layer(middleware::from_fn_with_state(state, require_api_key));

    Router::new()
        .route(
            "/providers/{provider}/webhook",
            get(verify).post(handle_event),
        )
        .merge(admin)
}

/// The configured provider, if `slug` names it and it is registered.
pub(crate) async fn resolve_provider(state: &AppState, slug: &str) -> Result<Provider> {
    if slug != state.provider.slug() {
        return Err(AppError::NotFound(format!("provider {}", slug)));
    }
    state
        .users
        .provider_by_slug(slug)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("provider {}", slug)))
}

/// Subscription handshake query params.
#[derive(Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
}

/// Verification response.
#[derive(Serialize)]
struct VerifyResponse {
    #[serde(rename = "hub.challenge")]
    challenge: String,
}

/// Verify webhook subscription (GET).
async fn verify(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<VerifyParams>,
) -> Result<Json<VerifyResponse>> {
    resolve_provider(&state, &provider).await?;

    if params.mode.as_deref() != Some("subscribe") {
        tracing::warn!(mode = ?params.mode, "Webhook verification failed: bad mode");
        return Err(AppError::BadRequest("hub.mode must be subscribe".to_string()));
    }
    let challenge = params
        .challenge
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing hub.challenge".to_string()))?;
    let token = params
        .verify_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing hub.verify_token".to_string()))?;

    match state.verification.consume(&token).await? {
        TokenCheck::Valid => {
            tracing::info!(provider = %provider, "Webhook subscription verified");
            Ok(Json(VerifyResponse { challenge }))
        }
        TokenCheck::Expired => {
            tracing::warn!(provider = %provider, "Webhook verification failed: token expired");
            Err(AppError::BadRequest(
                "verification token expired".to_string(),
            ))
        }
        TokenCheck::NotFound => {
            tracing::warn!(provider = %provider, "Webhook verification failed: unknown token");
            Err(AppError::BadRequest(
                "verification token not found".to_string(),
            ))
        }
    }
}

/// Provider webhook event payload.
#[derive(Deserialize, Debug)]
struct WebhookEvent {
    object_type: String, // "activity" or "athlete"
    object_id: u64,
    aspect_type: String, // "create", "update", "delete"
    owner_id: u64,
    subscription_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw_activity_id: Option<Uuid>,
}

impl EventResponse {
    fn ignored() -> Json<Self> {
        Json(Self {
            status: "ignored",
            raw_activity_id: None,
        })
    }
}

/// Handle incoming webhook events (POST).
async fn handle_event(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    body: Bytes,
) -> Result<Json<EventResponse>> {
    let event: WebhookEvent = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "Failed to parse webhook event");
        AppError::BadRequest(format!("invalid event: {}", e))
    })?;

    let provider = resolve_provider(&state, &provider).await?;

    let user = state
        .users
        .find_user(provider.id, &event.owner_id.to_string())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user for owner {}", event.owner_id)))?;

    let subscriptions = state.provider.list_subscriptions().await?;
    if !subscriptions.iter().any(|s| s.id == event.subscription_id) {
        tracing::warn!(
            subscription_id = event.subscription_id,
            owner_id = event.owner_id,
            "Security Alert: webhook event for unregistered subscription"
        );
        return Err(AppError::Forbidden("unknown subscription".to_string()));
    }

    tracing::info!(
        object_type = %event.object_type,
        object_id = event.object_id,
        aspect_type = %event.aspect_type,
        user_id = %user.id,
        "Webhook event accepted"
    );

    match (event.object_type.as_str(), event.aspect_type.as_str()) {
        ("activity", "create" | "update") => {}
        _ => {
            tracing::debug!(
                object_type = %event.object_type,
                aspect_type = %event.aspect_type,
                "Ignoring webhook event"
            );
            return Ok(EventResponse::ignored());
        }
    }

    let token = state.credentials.ensure_valid(provider.id, user.id).await?;

    let (raw_activity_id, outcome) = state
        .pipeline
        .ingest_remote(
            state.provider.as_ref(),
            &token,
            provider.id,
            user.id,
            &event.object_id.to_string(),
        )
        .await?;

    let status = match outcome {
        IngestOutcome::Ingested(_) => "ingested",
        IngestOutcome::Skipped { .. } => "skipped",
        IngestOutcome::Rejected { .. } => "rejected",
    };
    Ok(Json(EventResponse {
        status,
        raw_activity_id: Some(raw_activity_id),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionResponse {
    subscription_id: i64,
    callback_url: String,
}

/// Register this service's push subscription with the provider.
///
/// The provider performs the GET handshake before this call returns, which
/// consumes the freshly issued token.
async fn register_subscription(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
) -> Result<(StatusCode, Json<SubscriptionResponse>)> {
    let provider = resolve_provider(&state, &provider).await?;
    let callback_url = state.config.webhook_callback_url(&provider.slug);

    let verification = state.verification.issue().await?;

    let subscription = match state
        .provider
        .create_subscription(&callback_url, &verification.token)
        .await
    {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::error!(error = %e, "Push subscription registration failed");
            if let Err(revoke_err) = state.verification.revoke(&verification.token).await {
                tracing::warn!(error = %revoke_err, "Failed to revoke verification token");
            }
            return Err(e.into());
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(SubscriptionResponse {
            subscription_id: subscription.id,
            callback_url: subscription.callback_url,
        }),
    ))
}
