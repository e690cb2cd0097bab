// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

/// Persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("invalid stored value: {0}")]
    Decode(String),
}

/// Failures talking to an activity provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider rate limit exceeded")]
    RateLimited,

    #[error("provider rejected credentials")]
    Unauthorized,

    #[error("provider resource not found: {0}")]
    NotFound(String),

    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("provider request failed: {0}")]
    Transport(String),

    #[error("unexpected provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Rate limiting is a soft stop for paging loops, not a task failure.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited)
    }
}

/// Failures obtaining a usable access token.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no credential for provider {provider_id} user {user_id}")]
    NotFound { provider_id: i32, user_id: Uuid },

    #[error("token refresh failed: {0}")]
    RefreshFailed(#[source] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures turning a raw payload into a canonical activity.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// Non-endurance sport. Callers treat this as a skip.
    #[error("not a qualifying endurance activity: {0}")]
    NotQualifyingActivity(String),

    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("invalid route geometry: {0}")]
    Geometry(String),
}

/// Object storage failures.
#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object location: {0}")]
    InvalidLocation(String),

    #[error("object storage returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("object storage request failed: {0}")]
    Transport(String),
}

/// Queue send failures.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to send message: {0}")]
    Send(String),
}

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// True for errors caused by the caller rather than by this service or
    /// its dependencies.
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Provider(ProviderError::RateLimited) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Provider(_) => StatusCode::BAD_GATEWAY,
            AppError::Credential(CredentialError::NotFound { .. }) => StatusCode::NOT_FOUND,
            AppError::Credential(CredentialError::RefreshFailed(_)) => StatusCode::BAD_GATEWAY,
            AppError::Normalize(NormalizeError::NotQualifyingActivity(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Normalize(NormalizeError::UnsupportedProvider(_)) => StatusCode::NOT_FOUND,
            AppError::Normalize(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Credential(CredentialError::Store(_))
            | AppError::Store(_)
            | AppError::ObjectStore(_)
            | AppError::Queue(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error, details) = match &self {
            AppError::Unauthorized => ("unauthorized", None),
            AppError::Forbidden(msg) => ("forbidden", Some(msg.clone())),
            AppError::NotFound(msg) => ("not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => ("bad_request", Some(msg.clone())),
            AppError::Provider(err) => {
                tracing::warn!(error = %err, "Provider error");
                ("provider_error", Some(err.to_string()))
            }
            AppError::Credential(CredentialError::NotFound { .. }) => {
                ("not_found", Some(self.to_string()))
            }
            AppError::Credential(err) => {
                tracing::error!(error = %err, "Credential error");
                ("credential_error", None)
            }
            AppError::Normalize(err) => ("unprocessable", Some(err.to_string())),
            AppError::Store(err) => {
                tracing::error!(error = %err, "Database error");
                ("database_error", None)
            }
            AppError::ObjectStore(err) => {
                tracing::error!(error = %err, "Object storage error");
                ("storage_error", None)
            }
            AppError::Queue(err) => {
                tracing::error!(error = %err, "Queue error");
                ("queue_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                ("internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
