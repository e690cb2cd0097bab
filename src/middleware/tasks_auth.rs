// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cloud Tasks push authentication middleware.

use crate::services::queue::{verify_signature, QUEUE_NAME_HEADER, SIGNATURE_HEADER};
use crate::AppState;
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Largest task body accepted (queue messages are small JSON documents).
const MAX_TASK_BODY_BYTES: usize = 256 * 1024;

/// Require the queue header and a valid body signature for `/tasks/*` routes.
pub async fn require_tasks_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let queue_name_header = request.headers().get(QUEUE_NAME_HEADER);
    let is_valid_queue = queue_name_header
        .and_then(|h| h.to_str().ok())
        .map(|name| name == state.config.task_queue_name)
        .unwrap_or(false);

    if !is_valid_queue {
        tracing::warn!(
            header = ?queue_name_header,
            "Blocked tasks request with invalid queue header"
        );
        return Err(StatusCode::FORBIDDEN);
    }

    let signature = request
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_TASK_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)?;

    let valid = signature
        .as_deref()
        .is_some_and(|sig| verify_signature(&state.config.task_signing_key, &bytes, sig));

    if !valid {
        tracing::warn!(
            path = %parts.uri.path(),
            has_signature = signature.is_some(),
            "Blocked tasks request: invalid body signature"
        );
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}
