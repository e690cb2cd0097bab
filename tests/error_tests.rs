// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::http::StatusCode;
use axum::response::IntoResponse;
use endurance_ingest::error::{
    AppError, CredentialError, NormalizeError, ProviderError, StoreError,
};
use uuid::Uuid;

mod common;

async fn status_and_body(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    (status, common::body_json(response).await)
}

#[tokio::test]
async fn test_client_errors_carry_details() {
    let (status, body) =
        status_and_body(AppError::BadRequest("verification token expired".to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
    assert_eq!(body["details"], "verification token expired");

    let (status, body) = status_and_body(AppError::Forbidden("unknown subscription".into())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn test_internal_errors_hide_details() {
    let (status, body) =
        status_and_body(AppError::Store(StoreError::Decode("bad row".to_string()))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "database_error");
    assert!(body.get("details").is_none());

    let (status, body) =
        status_and_body(AppError::Internal(anyhow::anyhow!("secret detail"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!body.to_string().contains("secret detail"));
}

#[tokio::test]
async fn test_provider_error_mapping() {
    let (status, _) = status_and_body(AppError::Provider(ProviderError::RateLimited)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = status_and_body(AppError::Provider(ProviderError::Http {
        status: 500,
        body: "oops".to_string(),
    }))
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[test]
fn test_is_client_error() {
    assert!(AppError::NotFound("x".to_string()).is_client_error());
    assert!(AppError::Credential(CredentialError::NotFound {
        provider_id: 1,
        user_id: Uuid::new_v4(),
    })
    .is_client_error());
    assert!(AppError::Normalize(NormalizeError::NotQualifyingActivity("Yoga".into()))
        .is_client_error());
    assert!(!AppError::Provider(ProviderError::RateLimited).is_client_error());
    assert!(!AppError::Internal(anyhow::anyhow!("boom")).is_client_error());
}
