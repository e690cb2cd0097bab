// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Canonical pipeline, post-processing and reconciliation.

use axum::http::StatusCode;
use chrono::{Duration, TimeZone, Utc};
use endurance_ingest::db::{CanonicalActivityStore, RawActivityStore};
use endurance_ingest::error::AppError;
use endurance_ingest::models::{
    AccessToken, PostProcessActivityTask, QueueMessage, RawActivity, Sport,
};
use endurance_ingest::services::objects::stream_key;
use endurance_ingest::services::{IngestOutcome, QueueRecord};
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

mod common;

use common::STRAVA_PROVIDER_ID;

fn raw_activity(user_id: Uuid, payload: serde_json::Value) -> RawActivity {
    RawActivity {
        id: Uuid::new_v4(),
        provider_id: STRAVA_PROVIDER_ID,
        user_id,
        provider_activity_id: payload["id"].to_string(),
        start_time: Utc.with_ymd_and_hms(2025, 5, 4, 15, 0, 0).unwrap(),
        elapsed_time: 3600,
        iana_timezone: Some("America/Los_Angeles".to_string()),
        utc_offset: Some(-25200),
        data: payload,
        detail_uri: None,
        processed_at: None,
    }
}

#[tokio::test]
async fn test_ingest_remote_normalizes_and_enriches() {
    let app = common::create_test_app();
    let user = common::seed_user(&app.store, "42", Duration::hours(6)).await;
    let start = Utc.with_ymd_and_hms(2025, 5, 4, 15, 0, 0).unwrap();
    app.provider
        .add_activity(common::strava_activity(77, "TrailRun", start, "Ridge loop #hills"));
    app.provider.add_streams(77, common::strava_streams());

    let (raw_id, outcome) = app
        .state
        .pipeline
        .ingest_remote(
            app.provider.as_ref(),
            &AccessToken::new("token"),
            STRAVA_PROVIDER_ID,
            user.id,
            "77",
        )
        .await
        .unwrap();

    let IngestOutcome::Ingested(activity) = outcome else {
        panic!("expected ingested outcome");
    };
    assert_eq!(activity.raw_activity_id, raw_id);
    assert_eq!(activity.sport, Sport::TrailRunning);
    assert_eq!(activity.distance, 10012);
    assert_eq!(activity.elev_gain, Some(120));
    assert_eq!(activity.end_time, start + Duration::seconds(3600));
    assert_eq!(activity.iana_timezone.as_deref(), Some("America/Los_Angeles"));
    assert_eq!(activity.description, None);
    assert_eq!(
        activity.summary_route.as_ref().unwrap()["type"],
        "LineString"
    );

    let keys = app.objects.keys();
    assert!(keys.contains(&stream_key("strava", raw_id)));
    assert!(keys.iter().any(|k| k.ends_with(".gpx")));
}

#[tokio::test]
async fn test_post_process_replays_stored_streams() {
    let app = common::create_test_app();
    let user = common::seed_user(&app.store, "42", Duration::hours(6)).await;
    let mut raw = raw_activity(
        user.id,
        common::strava_activity(
            88,
            "Ride",
            Utc.with_ymd_and_hms(2025, 5, 4, 15, 0, 0).unwrap(),
            "Coffee ride",
        ),
    );
    raw.id = app.store.upsert_raw_activity(&raw).await.unwrap();
    app.state
        .pipeline
        .attach_streams("strava", &mut raw, &common::strava_streams())
        .await
        .unwrap();

    let task = PostProcessActivityTask {
        user_id: user.id,
        provider_id: STRAVA_PROVIDER_ID,
        raw_activity_id: raw.id,
    };
    let outcome = app.state.pipeline.post_process(&task).await.unwrap();

    let IngestOutcome::Ingested(activity) = outcome else {
        panic!("expected ingested outcome");
    };
    assert_eq!(activity.sport, Sport::Cycling);
    assert_eq!(activity.max_hr, Some(160));

    // Running it again converges
    app.state.pipeline.post_process(&task).await.unwrap();
    assert_eq!(app.store.activity_count(), 1);
    let stored = app.store.get_activity_by_raw(raw.id).await.unwrap().unwrap();
    assert_eq!(stored.id, activity.id);
}

#[tokio::test]
async fn test_post_process_rejects_other_users_row() {
    let app = common::create_test_app();
    let user = common::seed_user(&app.store, "42", Duration::hours(6)).await;
    let raw = raw_activity(
        user.id,
        common::strava_activity(1, "Run", Utc::now(), "Run"),
    );
    let raw_id = app.store.upsert_raw_activity(&raw).await.unwrap();

    let err = app
        .state
        .pipeline
        .post_process(&PostProcessActivityTask {
            user_id: Uuid::new_v4(),
            provider_id: STRAVA_PROVIDER_ID,
            raw_activity_id: raw_id,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::NotFound(_)));
}

fn post_process_record(message_id: &str, user_id: Uuid, raw_activity_id: Uuid) -> QueueRecord {
    QueueRecord {
        message_id: message_id.to_string(),
        body: serde_json::to_string(&QueueMessage::PostProcessActivity(
            PostProcessActivityTask {
                user_id,
                provider_id: STRAVA_PROVIDER_ID,
                raw_activity_id,
            },
        ))
        .unwrap(),
    }
}

#[tokio::test]
async fn test_malformed_payload_does_not_block_batch() {
    let app = common::create_test_app();
    let user = common::seed_user(&app.store, "42", Duration::hours(6)).await;

    // No sport_type
    let mut bad = raw_activity(user.id, json!({"id": 5, "name": "no sport"}));
    bad.id = app.store.upsert_raw_activity(&bad).await.unwrap();
    app.state
        .pipeline
        .attach_streams("strava", &mut bad, &common::strava_streams())
        .await
        .unwrap();

    let mut good = raw_activity(
        user.id,
        common::strava_activity(6, "Run", Utc::now(), "Lunch run"),
    );
    good.id = app.store.upsert_raw_activity(&good).await.unwrap();
    app.state
        .pipeline
        .attach_streams("strava", &mut good, &common::strava_streams())
        .await
        .unwrap();

    let summary = app
        .state
        .dispatcher
        .dispatch_batch(&[
            post_process_record("m-bad", user.id, bad.id),
            post_process_record("m-good", user.id, good.id),
        ])
        .await
        .unwrap();

    assert_eq!(summary.handled, 2);
    assert_eq!(summary.discarded, 0);
    assert_eq!(app.store.activity_count(), 1);
    assert!(app.store.get_activity_by_raw(good.id).await.unwrap().is_some());
    // Neither row is left for reconciliation
    assert!(app.store.list_unprocessed(100).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unparseable_streams_reject_record() {
    let app = common::create_test_app();
    let user = common::seed_user(&app.store, "42", Duration::hours(6)).await;
    let mut raw = raw_activity(
        user.id,
        common::strava_activity(7, "Run", Utc::now(), "Broken watch"),
    );
    raw.id = app.store.upsert_raw_activity(&raw).await.unwrap();
    app.state
        .pipeline
        .attach_streams("strava", &mut raw, &json!({"time": {"data": "not a list"}}))
        .await
        .unwrap();

    let outcome = app
        .state
        .pipeline
        .post_process(&PostProcessActivityTask {
            user_id: user.id,
            provider_id: STRAVA_PROVIDER_ID,
            raw_activity_id: raw.id,
        })
        .await
        .unwrap();

    assert!(matches!(outcome, IngestOutcome::Rejected { .. }));
    assert_eq!(app.store.activity_count(), 0);
    let stored = app.store.get_raw_activity(raw.id).await.unwrap().unwrap();
    assert!(stored.processed_at.is_some());
}

#[tokio::test]
async fn test_reconcile_requeues_unprocessed_rows() {
    let app = common::create_test_app();
    let user = common::seed_user(&app.store, "42", Duration::hours(6)).await;

    // Detail attached, pipeline never completed
    let mut pending = raw_activity(
        user.id,
        common::strava_activity(10, "Run", Utc::now(), "Pending"),
    );
    pending.id = app.store.upsert_raw_activity(&pending).await.unwrap();
    app.state
        .pipeline
        .attach_streams("strava", &mut pending, &common::strava_streams())
        .await
        .unwrap();

    // Fully processed
    let mut done = raw_activity(
        user.id,
        common::strava_activity(11, "Run", Utc::now(), "Done"),
    );
    done.id = app.store.upsert_raw_activity(&done).await.unwrap();
    app.state
        .pipeline
        .attach_streams("strava", &mut done, &common::strava_streams())
        .await
        .unwrap();
    app.store.mark_processed(done.id).await.unwrap();

    // Live handshake token survives the purge
    app.state.verification.issue().await.unwrap();

    let request =
        common::signed_task_request(&app.state.config, "/tasks/reconcile", &json!({}));
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = common::body_json(response).await;
    assert_eq!(body["queued"], 1);
    assert_eq!(body["failed"], 0);
    assert_eq!(body["purgedTokens"], 0);

    assert_eq!(
        app.queue.sent(),
        vec![QueueMessage::PostProcessActivity(PostProcessActivityTask {
            user_id: user.id,
            provider_id: STRAVA_PROVIDER_ID,
            raw_activity_id: pending.id,
        })]
    );
}
