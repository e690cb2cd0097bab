// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Historical backfill scheduling: one queue message per calendar month.

use crate::models::{BackfillTask, QueueMessage};
use crate::services::queue::TaskQueue;
use crate::time_utils::{add_months, start_of_month, sub_months};
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

const MAX_CONCURRENT_SENDS: usize = 16;

/// Calendar-month windows covering the last `months` months, newest first.
///
/// Window `i` runs from the first of the month `i` months before `now`'s
/// month to the first of the following month. The current month's window is
/// clipped to `now`.
pub fn backfill_windows(now: DateTime<Utc>, months: u32) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let current_month = start_of_month(now);

    (0..months)
        .map(|i| {
            let start = sub_months(current_month, i);
            let end = add_months(start, 1);
            let end = if i == 0 && end > now { now } else { end };
            (start, end)
        })
        .collect()
}

/// Result of scheduling a user's backfill.
#[derive(Debug, Clone, Default)]
pub struct ScheduleResult {
    /// Number of windows successfully queued.
    pub queued: u32,
    /// Number of windows that failed to queue.
    pub failed: u32,
    /// Start of each window that failed to queue.
    pub failed_windows: Vec<DateTime<Utc>>,
}

impl ScheduleResult {
    /// Returns true if every window was queued.
    pub fn is_complete_success(&self) -> bool {
        self.failed == 0
    }

    /// Returns true if some windows were queued and some failed.
    pub fn is_partial_failure(&self) -> bool {
        self.queued > 0 && self.failed > 0
    }
}

#[derive(Clone)]
pub struct TaskScheduler {
    queue: Arc<dyn TaskQueue>,
    months: u32,
}

impl TaskScheduler {
    pub fn new(queue: Arc<dyn TaskQueue>, months: u32) -> Self {
        Self { queue, months }
    }

    /// Enqueue one backfill window per month for the user.
    ///
    /// Send failures are counted, not propagated.
    pub async fn schedule_backfill(&self, user_id: Uuid, provider_id: i32) -> ScheduleResult {
        self.schedule_backfill_at(user_id, provider_id, Utc::now())
            .await
    }

    pub async fn schedule_backfill_at(
        &self,
        user_id: Uuid,
        provider_id: i32,
        now: DateTime<Utc>,
    ) -> ScheduleResult {
        let windows = backfill_windows(now, self.months);
        let requested = windows.len();
        let queued = AtomicU32::new(0);
        let failed_windows = Mutex::new(Vec::new());

        stream::iter(windows)
            .for_each_concurrent(MAX_CONCURRENT_SENDS, |(start, end)| {
                let queued = &queued;
                let failed_windows = &failed_windows;
                async move {
                    let message = QueueMessage::HistoricalBackfill(BackfillTask::new(
                        user_id,
                        provider_id,
                        start,
                        end,
                    ));

                    match self.queue.send(&message).await {
                        Ok(()) => {
                            queued.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            tracing::warn!(
                                %user_id,
                                window_start = %start,
                                error = %e,
                                "Failed to queue backfill window"
                            );
                            failed_windows
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push(start);
                        }
                    }
                }
            })
            .await;

        let mut failed_windows = failed_windows
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        failed_windows.sort();
        let queued = queued.load(Ordering::Relaxed);
        let failed = failed_windows.len() as u32;

        tracing::info!(
            %user_id,
            provider_id,
            requested,
            queued,
            failed,
            "Scheduled historical backfill"
        );

        ScheduleResult {
            queued,
            failed,
            failed_windows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::queue::MemoryQueue;
    use chrono::TimeZone;

    #[test]
    fn test_current_window_is_clipped_to_now() {
        let now = Utc.with_ymd_and_hms(2025, 3, 17, 12, 30, 0).unwrap();
        let windows = backfill_windows(now, 3);

        assert_eq!(
            windows,
            vec![
                (Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(), now),
                (
                    Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
                    Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
                ),
                (
                    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
                    Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap()
                ),
            ]
        );
    }

    #[test]
    fn test_windows_cross_year_boundary() {
        let now = Utc.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap();
        let windows = backfill_windows(now, 48);

        assert_eq!(windows.len(), 48);
        assert_eq!(windows[1].0, Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(windows[47].0, Utc.with_ymd_and_hms(2021, 2, 1, 0, 0, 0).unwrap());
        for pair in windows.windows(2) {
            assert_eq!(pair[1].1, pair[0].0, "windows must be contiguous");
        }
    }

    #[tokio::test]
    async fn test_schedule_backfill_queues_every_window() {
        let queue = Arc::new(MemoryQueue::new());
        let scheduler = TaskScheduler::new(queue.clone(), 48);
        let user_id = Uuid::new_v4();

        let result = scheduler.schedule_backfill(user_id, 1).await;

        assert!(result.is_complete_success());
        assert_eq!(result.queued, 48);
        let sent = queue.sent();
        assert_eq!(sent.len(), 48);
        assert!(sent.iter().all(|m| m.group_key() == user_id.to_string()));
    }

    #[tokio::test]
    async fn test_schedule_backfill_counts_failures() {
        let queue = Arc::new(MemoryQueue::new());
        queue.fail_next(2);
        let scheduler = TaskScheduler::new(queue.clone(), 6);

        let result = scheduler.schedule_backfill(Uuid::new_v4(), 1).await;

        assert!(result.is_partial_failure());
        assert_eq!(result.queued, 4);
        assert_eq!(result.failed, 2);
        assert_eq!(result.failed_windows.len(), 2);
        assert_eq!(queue.sent().len(), 4);
    }
}
