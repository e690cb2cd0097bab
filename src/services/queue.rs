// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Task queue for backfill windows and post-processing.
//!
//! Production uses Cloud Tasks (google-cloud-tasks-v2 SDK) pushing each
//! message as an HMAC-signed JSON body to `POST /tasks/queue`.

use crate::error::QueueError;
use crate::models::QueueMessage;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the request body.
pub const SIGNATURE_HEADER: &str = "x-task-signature";
/// Header carrying the message group (the user id).
pub const GROUP_HEADER: &str = "x-task-group";
/// Header Cloud Tasks sets to the originating queue name.
pub const QUEUE_NAME_HEADER: &str = "x-cloudtasks-queuename";

/// Hex HMAC-SHA256 of `body` under `key`.
pub fn sign_body(key: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature.
pub fn verify_signature(key: &[u8], body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(body);
    // verify_slice compares in constant time
    mac.verify_slice(&signature).is_ok()
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn send(&self, message: &QueueMessage) -> Result<(), QueueError>;
}

/// Cloud Tasks client wrapper.
pub struct CloudTasksQueue {
    client: google_cloud_tasks_v2::client::CloudTasks,
    queue_path: String,
    target_url: String,
    signing_key: Vec<u8>,
}

impl CloudTasksQueue {
    pub async fn new(
        project_id: &str,
        region: &str,
        queue_name: &str,
        api_url: &str,
        signing_key: Vec<u8>,
    ) -> anyhow::Result<Self> {
        use google_cloud_tasks_v2::client::CloudTasks;

        let client = CloudTasks::builder()
            .build()
            .await
            .map_err(|e| anyhow::anyhow!("Cloud Tasks client error: {}", e))?;

        Ok(Self {
            client,
            queue_path: format!(
                "projects/{}/locations/{}/queues/{}",
                project_id, region, queue_name
            ),
            target_url: format!("{}/tasks/queue", api_url),
            signing_key,
        })
    }
}

#[async_trait]
impl TaskQueue for CloudTasksQueue {
    async fn send(&self, message: &QueueMessage) -> Result<(), QueueError> {
        use google_cloud_tasks_v2::model::{HttpRequest, Task};

        let body = serde_json::to_vec(message)?;
        let signature = sign_body(&self.signing_key, &body);

        let http_request = HttpRequest::default()
            .set_url(self.target_url.clone())
            .set_http_method("POST")
            .set_body(axum::body::Bytes::from(body))
            .set_headers(HashMap::from([
                ("Content-Type".to_string(), "application/json".to_string()),
                (SIGNATURE_HEADER.to_string(), signature),
                (GROUP_HEADER.to_string(), message.group_key()),
            ]));

        let task = Task::default().set_http_request(http_request);

        self.client
            .create_task()
            .set_parent(self.queue_path.clone())
            .set_task(task)
            .send()
            .await
            .map_err(|e| QueueError::Send(format!("Cloud Tasks create error: {}", e)))?;

        tracing::debug!(kind = message.kind(), group = %message.group_key(), "Queued task");
        Ok(())
    }
}

/// In-process queue that records sent messages.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    sent: Arc<Mutex<Vec<QueueMessage>>>,
    fail_next: Arc<AtomicUsize>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far, in send order.
    pub fn sent(&self) -> Vec<QueueMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Remove and return everything sent so far.
    pub fn drain(&self) -> Vec<QueueMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Make the next `count` sends fail.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn send(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let should_fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(QueueError::Send("injected failure".to_string()));
        }

        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PostProcessActivityTask;
    use uuid::Uuid;

    #[test]
    fn test_signature_round_trip() {
        let key = b"test_task_signing_key_32_bytes!!";
        let body = br#"{"type":"post_process_activity"}"#;
        let sig = sign_body(key, body);

        assert!(verify_signature(key, body, &sig));
        assert!(!verify_signature(b"other key", body, &sig));
        assert!(!verify_signature(key, b"tampered", &sig));
        assert!(!verify_signature(key, body, "not-hex"));
    }

    #[tokio::test]
    async fn test_memory_queue_injected_failures() {
        let queue = MemoryQueue::new();
        let msg = QueueMessage::PostProcessActivity(PostProcessActivityTask {
            user_id: Uuid::new_v4(),
            provider_id: 1,
            raw_activity_id: Uuid::new_v4(),
        });

        queue.fail_next(1);
        assert!(queue.send(&msg).await.is_err());
        assert!(queue.send(&msg).await.is_ok());
        assert_eq!(queue.sent(), vec![msg]);
        assert_eq!(queue.drain().len(), 1);
        assert!(queue.sent().is_empty());
    }
}
