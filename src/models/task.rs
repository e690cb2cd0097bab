// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Queue message payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task type carried by historical backfill windows.
pub const ACTIVITY_TASK_TYPE: &str = "activity";

/// One time window of historical backfill for a user.
///
/// Immutable; progress is reconstructed from stored raw activities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillTask {
    pub user_id: Uuid,
    pub provider_id: i32,
    #[serde(default = "default_task_type")]
    pub task_type: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

fn default_task_type() -> String {
    ACTIVITY_TASK_TYPE.to_string()
}

impl BackfillTask {
    pub fn new(
        user_id: Uuid,
        provider_id: i32,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            provider_id,
            task_type: default_task_type(),
            window_start,
            window_end,
        }
    }
}

/// Re-run normalization and enrichment for a stored raw activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostProcessActivityTask {
    pub user_id: Uuid,
    pub provider_id: i32,
    pub raw_activity_id: Uuid,
}

/// Envelope for everything sent through the task queue:
/// `{ "type": "...", "payload": { ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum QueueMessage {
    HistoricalBackfill(BackfillTask),
    PostProcessActivity(PostProcessActivityTask),
}

impl QueueMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            QueueMessage::HistoricalBackfill(_) => "historical_backfill",
            QueueMessage::PostProcessActivity(_) => "post_process_activity",
        }
    }

    /// Ordering group for queues that support it (the user id).
    pub fn group_key(&self) -> String {
        match self {
            QueueMessage::HistoricalBackfill(t) => t.user_id.to_string(),
            QueueMessage::PostProcessActivity(t) => t.user_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_backfill_message_wire_format() {
        let user_id = Uuid::new_v4();
        let msg = QueueMessage::HistoricalBackfill(BackfillTask::new(
            user_id,
            1,
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
        ));

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "historical_backfill");
        assert_eq!(value["payload"]["userId"], user_id.to_string());
        assert_eq!(value["payload"]["providerId"], 1);
        assert_eq!(value["payload"]["taskType"], "activity");
        assert_eq!(value["payload"]["windowStart"], "2025-01-01T00:00:00Z");
    }

    #[test]
    fn test_backfill_payload_without_task_type() {
        let user_id = Uuid::new_v4();
        let value = json!({
            "type": "historical_backfill",
            "payload": {
                "userId": user_id,
                "providerId": 1,
                "windowStart": "2025-01-01T00:00:00Z",
                "windowEnd": "2025-02-01T00:00:00Z"
            }
        });
        let msg: QueueMessage = serde_json::from_value(value).unwrap();
        match msg {
            QueueMessage::HistoricalBackfill(task) => {
                assert_eq!(task.task_type, ACTIVITY_TASK_TYPE);
                assert_eq!(task.user_id, user_id);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let value = json!({ "type": "delete_everything", "payload": {} });
        assert!(serde_json::from_value::<QueueMessage>(value).is_err());
    }
}
