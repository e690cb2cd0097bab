// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Task handler routes for Cloud Tasks callbacks.
//!
//! These endpoints are called by Cloud Tasks (and Cloud Scheduler for
//! reconciliation), not directly by users. They are protected by the queue
//! header and body signature check.

use crate::middleware::require_tasks_auth;
use crate::models::{PostProcessActivityTask, QueueMessage};
use crate::services::QueueRecord;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Raw rows re-queued per reconciliation run.
pub const RECONCILE_BATCH_SIZE: i64 = 100;

const TASK_NAME_HEADER: &str = "x-cloudtasks-taskname";

/// Task handler routes (called by Cloud Tasks).
pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks/queue", post(handle_queue_message))
        .route("/tasks/reconcile", post(reconcile))
        .route_layer(middleware::from_fn_with_state(state, require_tasks_auth))
}

/// Dispatch one pushed queue message.
///
/// Malformed messages are acknowledged so they are not redelivered; handler
/// failures return 500 to trigger a Cloud Tasks retry.
async fn handle_queue_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let message_id = headers
        .get(TASK_NAME_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("unnamed")
        .to_string();

    let body = match String::from_utf8(body.to_vec()) {
        Ok(body) => body,
        Err(_) => {
            tracing::error!(message_id = %message_id, "Discarding non-UTF-8 task body");
            return StatusCode::OK;
        }
    };

    let record = QueueRecord { message_id, body };
    match state.dispatcher.dispatch_batch(&[record]).await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::error!(message_id = %e.message_id, error = %e.source, "Task failed, will retry");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReconcileResponse {
    purged_tokens: u64,
    queued: usize,
    failed: usize,
}

/// Purge expired verification tokens and re-queue raw activities whose
/// pipeline never completed.
async fn reconcile(
    State(state): State<Arc<AppState>>,
) -> crate::error::Result<Json<ReconcileResponse>> {
    let purged_tokens = state.verification.purge_expired().await?;

    let pending = state
        .raw_activities
        .list_unprocessed(RECONCILE_BATCH_SIZE)
        .await?;

    let mut queued = 0;
    let mut failed = 0;
    for raw in &pending {
        let message = QueueMessage::PostProcessActivity(PostProcessActivityTask {
            user_id: raw.user_id,
            provider_id: raw.provider_id,
            raw_activity_id: raw.id,
        });
        match state.queue.send(&message).await {
            Ok(()) => queued += 1,
            Err(e) => {
                tracing::warn!(raw_activity_id = %raw.id, error = %e, "Failed to queue post-processing");
                failed += 1;
            }
        }
    }

    tracing::info!(purged_tokens, queued, failed, "Reconciliation complete");
    Ok(Json(ReconcileResponse {
        purged_tokens,
        queued,
        failed,
    }))
}
