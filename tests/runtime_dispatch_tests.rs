// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Serverless event dispatch.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, TimeZone, Utc};
use endurance_ingest::models::{BackfillTask, QueueMessage};
use endurance_ingest::runtime::{dispatch_event, handle_next, RuntimeApi, RuntimeError};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

mod common;

use common::STRAVA_PROVIDER_ID;

fn backfill_body(user_id: Uuid) -> String {
    serde_json::to_string(&QueueMessage::HistoricalBackfill(BackfillTask::new(
        user_id,
        STRAVA_PROVIDER_ID,
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
    )))
    .unwrap()
}

#[tokio::test]
async fn test_http_event_runs_through_router() {
    let app = common::create_test_app();

    let response = dispatch_event(
        app.state.clone(),
        json!({
            "requestContext": {"http": {"method": "GET"}},
            "rawPath": "/health",
            "rawQueryString": "",
            "headers": {"accept": "application/json"},
            "isBase64Encoded": false
        }),
    )
    .await
    .unwrap();

    assert_eq!(response["statusCode"], 200);
    assert_eq!(response["isBase64Encoded"], false);
    assert_eq!(response["headers"]["x-content-type-options"], "nosniff");
    let body: serde_json::Value =
        serde_json::from_str(response["body"].as_str().unwrap()).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_http_event_error_status_preserved() {
    let app = common::create_test_app();

    let response = dispatch_event(
        app.state.clone(),
        json!({
            "requestContext": {"http": {"method": "GET"}},
            "rawPath": "/providers/strava/webhook",
            "rawQueryString": "hub.mode=subscribe&hub.challenge=x&hub.verify_token=nope",
            "headers": {}
        }),
    )
    .await
    .unwrap();

    assert_eq!(response["statusCode"], 400);
}

#[tokio::test]
async fn test_queue_batch_dispatched_in_order() {
    let app = common::create_test_app();
    let user = common::seed_user(&app.store, "321", Duration::hours(6)).await;

    let response = dispatch_event(
        app.state.clone(),
        json!({
            "Records": [
                {"messageId": "m-1", "body": backfill_body(user.id), "eventSource": "aws:sqs"},
                {"messageId": "m-2", "body": "garbage", "eventSource": "aws:sqs"},
                {"messageId": "m-3", "body": backfill_body(user.id), "eventSource": "aws:sqs"}
            ]
        }),
    )
    .await
    .unwrap();

    assert_eq!(response["handled"], 2);
    assert_eq!(response["discarded"], 1);
    assert_eq!(app.provider.list_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_queue_batch_failure_reported() {
    let app = common::create_test_app();

    // No credential for this user, so the handler fails
    let err = dispatch_event(
        app.state.clone(),
        json!({
            "Records": [
                {"messageId": "m-9", "body": backfill_body(Uuid::new_v4()), "eventSource": "aws:sqs"}
            ]
        }),
    )
    .await
    .unwrap_err();

    match err {
        RuntimeError::Dispatch(e) => assert_eq!(e.message_id, "m-9"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_event_rejected() {
    let app = common::create_test_app();

    let err = dispatch_event(app.state.clone(), json!({"detail-type": "Scheduled Event"}))
        .await
        .unwrap_err();

    assert!(matches!(err, RuntimeError::UnknownEvent));
}

/// Runtime API host stand-in: hands out queued events, records replies.
#[derive(Clone, Default)]
struct FakeRuntimeHost {
    pending: Arc<Mutex<VecDeque<(String, Value)>>>,
    replies: Arc<Mutex<Vec<(String, String, Value)>>>,
}

impl FakeRuntimeHost {
    async fn start(self, events: Vec<(&str, Value)>) -> (Self, RuntimeApi) {
        self.pending
            .lock()
            .unwrap()
            .extend(events.into_iter().map(|(id, e)| (id.to_string(), e)));

        let router = Router::new()
            .route("/2018-06-01/runtime/invocation/next", get(next_event))
            .route(
                "/2018-06-01/runtime/invocation/{id}/response",
                post(record_response),
            )
            .route("/2018-06-01/runtime/invocation/{id}/error", post(record_error))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        (self, RuntimeApi::new(&addr.to_string()))
    }

    fn replies(&self) -> Vec<(String, String, Value)> {
        self.replies.lock().unwrap().clone()
    }

    fn record(&self, kind: &str, id: String, body: Value) {
        self.replies
            .lock()
            .unwrap()
            .push((kind.to_string(), id, body));
    }
}

async fn next_event(State(host): State<FakeRuntimeHost>) -> (HeaderMap, Json<Value>) {
    let (id, event) = host.pending.lock().unwrap().pop_front().unwrap();
    let mut headers = HeaderMap::new();
    headers.insert("lambda-runtime-aws-request-id", id.parse().unwrap());
    (headers, Json(event))
}

async fn record_response(
    State(host): State<FakeRuntimeHost>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) {
    host.record("response", id, body);
}

async fn record_error(
    State(host): State<FakeRuntimeHost>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) {
    host.record("error", id, body);
}

#[tokio::test]
async fn test_runtime_api_invocation_answered() {
    let app = common::create_test_app();
    let (host, api) = FakeRuntimeHost::default()
        .start(vec![(
            "req-1",
            json!({
                "requestContext": {"http": {"method": "GET"}},
                "rawPath": "/health",
                "headers": {}
            }),
        )])
        .await;

    handle_next(app.state.clone(), &api).await.unwrap();

    let replies = host.replies();
    assert_eq!(replies.len(), 1);
    let (kind, id, body) = &replies[0];
    assert_eq!(kind, "response");
    assert_eq!(id, "req-1");
    assert_eq!(body["statusCode"], 200);
}

#[tokio::test]
async fn test_runtime_api_failure_reported() {
    let app = common::create_test_app();
    let (host, api) = FakeRuntimeHost::default()
        .start(vec![("req-2", json!({"detail-type": "Scheduled Event"}))])
        .await;

    handle_next(app.state.clone(), &api).await.unwrap();

    let replies = host.replies();
    assert_eq!(replies.len(), 1);
    let (kind, id, body) = &replies[0];
    assert_eq!(kind, "error");
    assert_eq!(id, "req-2");
    assert_eq!(body["errorType"], "UnknownEvent");
}
