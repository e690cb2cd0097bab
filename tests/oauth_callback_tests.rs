// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth authorization flow.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use endurance_ingest::db::{CredentialStore, UserStore};
use endurance_ingest::models::QueueMessage;
use tower::ServiceExt;

mod common;

use common::{FAKE_ATHLETE_ID, STRAVA_PROVIDER_ID};

/// Follow `/auth` and pull the signed state out of the redirect.
async fn issue_state(app: &common::TestApp) -> String {
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/providers/strava/auth")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(location.contains(&*urlencoding::encode(
        "http://localhost:8080/providers/strava/auth/callback"
    )));

    let state = location.split("state=").nth(1).unwrap();
    urlencoding::decode(state).unwrap().into_owned()
}

#[tokio::test]
async fn test_callback_stores_user_and_schedules_backfill() {
    let app = common::create_test_app();
    let state = issue_state(&app).await;

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/providers/strava/auth/callback?code=good-code&state={}",
                    urlencoding::encode(&state)
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = common::body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["backfillWindowsQueued"], 48);

    let user = app
        .store
        .find_user(STRAVA_PROVIDER_ID, FAKE_ATHLETE_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body["userId"], user.id.to_string());
    assert_eq!(user.first_name.as_deref(), Some("Test"));

    let credential = app
        .store
        .get_credential(STRAVA_PROVIDER_ID, user.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(credential.access_token, "fake-access");

    let sent = app.queue.sent();
    assert_eq!(sent.len(), 48);
    assert!(sent.iter().all(|m| matches!(
        m,
        QueueMessage::HistoricalBackfill(t) if t.user_id == user.id
    )));
}

#[tokio::test]
async fn test_callback_rejects_forged_state() {
    let app = common::create_test_app();

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/providers/strava/auth/callback?code=good-code&state=forged")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.queue.sent().is_empty());
}

#[tokio::test]
async fn test_callback_provider_error() {
    let app = common::create_test_app();
    let state = issue_state(&app).await;

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/providers/strava/auth/callback?error=access_denied&state={}",
                    urlencoding::encode(&state)
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_callback_missing_code() {
    let app = common::create_test_app();
    let state = issue_state(&app).await;

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/providers/strava/auth/callback?state={}",
                    urlencoding::encode(&state)
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_callback_failed_exchange() {
    let app = common::create_test_app();
    let state = issue_state(&app).await;

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/providers/strava/auth/callback?code=bad-code&state={}",
                    urlencoding::encode(&state)
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}
