// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Routes queue messages to their handlers.

use crate::error::AppError;
use crate::models::QueueMessage;
use crate::services::backfill::BackfillProcessor;
use crate::services::pipeline::ActivityPipeline;

/// One delivered queue message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRecord {
    pub message_id: String,
    pub body: String,
}

/// A handler failed; the batch must be redelivered.
#[derive(Debug, thiserror::Error)]
#[error("message {message_id} failed: {source}")]
pub struct DispatchError {
    pub message_id: String,
    #[source]
    pub source: AppError,
}

/// Counts for a successfully handled batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub handled: usize,
    /// Malformed or unknown messages, acknowledged without handling
    pub discarded: usize,
}

#[derive(Clone)]
pub struct QueueDispatcher {
    backfill: BackfillProcessor,
    pipeline: ActivityPipeline,
}

impl QueueDispatcher {
    pub fn new(backfill: BackfillProcessor, pipeline: ActivityPipeline) -> Self {
        Self { backfill, pipeline }
    }

    /// Handle records in order. Stops at the first handler error.
    pub async fn dispatch_batch(
        &self,
        records: &[QueueRecord],
    ) -> Result<BatchSummary, DispatchError> {
        let mut summary = BatchSummary::default();

        for record in records {
            let message: QueueMessage = match serde_json::from_str(&record.body) {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!(
                        message_id = %record.message_id,
                        error = %e,
                        "Discarding malformed queue message"
                    );
                    summary.discarded += 1;
                    continue;
                }
            };

            self.dispatch(&message)
                .await
                .map_err(|source| {
                    tracing::error!(
                        message_id = %record.message_id,
                        kind = message.kind(),
                        error = %source,
                        "Queue message failed"
                    );
                    DispatchError {
                        message_id: record.message_id.clone(),
                        source,
                    }
                })?;

            tracing::info!(
                message_id = %record.message_id,
                kind = message.kind(),
                "Queue message handled"
            );
            summary.handled += 1;
        }

        Ok(summary)
    }

    pub async fn dispatch(&self, message: &QueueMessage) -> Result<(), AppError> {
        match message {
            QueueMessage::HistoricalBackfill(task) => {
                self.backfill.process(task).await?;
            }
            QueueMessage::PostProcessActivity(task) => {
                self.pipeline.post_process(task).await?;
            }
        }
        Ok(())
    }
}
