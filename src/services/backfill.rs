// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Historical backfill for one time window.
//!
//! Each run fetches detail for at most one activity, so a window is worked
//! through over several queue deliveries instead of bursting the provider's
//! rate limit. Progress lives entirely in the raw activity rows.

use crate::db::RawActivityStore;
use crate::error::{AppError, Result};
use crate::models::{AccessToken, BackfillTask, QueueMessage, RawActivity};
use crate::services::credentials::CredentialManager;
use crate::services::pipeline::{ActivityPipeline, IngestOutcome};
use crate::services::provider::{ActivitySummary, ProviderApi};
use crate::services::queue::TaskQueue;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Page size for activity listings (provider maximum).
pub const LIST_PAGE_SIZE: u32 = 200;

/// What one backfill run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillOutcome {
    /// Summaries listed in the window
    pub listed: usize,
    /// Summaries already stored with detail
    pub skipped: usize,
    /// Raw activity completed by this run, if any
    pub fetched: Option<Uuid>,
    /// Whether the fetched activity produced a canonical activity
    pub ingested: bool,
    /// Listing stopped early on a rate limit
    pub rate_limited: bool,
    /// The same window was queued again for the remaining summaries
    pub requeued: bool,
}

#[derive(Clone)]
pub struct BackfillProcessor {
    credentials: CredentialManager,
    provider: Arc<dyn ProviderApi>,
    raw_store: Arc<dyn RawActivityStore>,
    pipeline: ActivityPipeline,
    queue: Arc<dyn TaskQueue>,
}

impl BackfillProcessor {
    pub fn new(
        credentials: CredentialManager,
        provider: Arc<dyn ProviderApi>,
        raw_store: Arc<dyn RawActivityStore>,
        pipeline: ActivityPipeline,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            credentials,
            provider,
            raw_store,
            pipeline,
            queue,
        }
    }

    pub async fn process(&self, task: &BackfillTask) -> Result<BackfillOutcome> {
        let token = self
            .credentials
            .ensure_valid(task.provider_id, task.user_id)
            .await?;

        let (summaries, rate_limited) = self.list_window(&token, task).await?;
        let mut outcome = BackfillOutcome {
            listed: summaries.len(),
            rate_limited,
            ..BackfillOutcome::default()
        };

        if summaries.is_empty() {
            tracing::info!(
                user_id = %task.user_id,
                window_start = %task.window_start,
                window_end = %task.window_end,
                rate_limited,
                "No activities found for window"
            );
            return Ok(outcome);
        }

        let existing: HashMap<String, RawActivity> = self
            .raw_store
            .list_raw_activities(task.provider_id, task.user_id)
            .await?
            .into_iter()
            .map(|r| (r.provider_activity_id.clone(), r))
            .collect();

        let mut remaining = summaries.iter();
        for summary in remaining.by_ref() {
            let result = match existing.get(&summary.id) {
                Some(raw) if raw.has_detail() => {
                    outcome.skipped += 1;
                    continue;
                }
                Some(raw) => {
                    let ingest = self
                        .pipeline
                        .complete_detail(self.provider.as_ref(), &token, raw.clone())
                        .await?;
                    (raw.id, ingest)
                }
                None => {
                    self.pipeline
                        .ingest_remote(
                            self.provider.as_ref(),
                            &token,
                            task.provider_id,
                            task.user_id,
                            &summary.id,
                        )
                        .await?
                }
            };

            let (raw_id, ingest) = result;
            outcome.fetched = Some(raw_id);
            outcome.ingested = matches!(ingest, IngestOutcome::Ingested(_));
            break;
        }

        let has_pending = remaining.any(|s| {
            existing
                .get(&s.id)
                .map(|raw| !raw.has_detail())
                .unwrap_or(true)
        });

        if has_pending {
            self.queue
                .send(&QueueMessage::HistoricalBackfill(task.clone()))
                .await?;
            outcome.requeued = true;
        }

        tracing::info!(
            user_id = %task.user_id,
            window_start = %task.window_start,
            listed = outcome.listed,
            skipped = outcome.skipped,
            fetched = ?outcome.fetched,
            requeued = outcome.requeued,
            "Processed backfill window"
        );
        Ok(outcome)
    }

    /// Page through the window until a short page. A rate limit ends paging
    /// with whatever has been listed so far.
    async fn list_window(
        &self,
        token: &AccessToken,
        task: &BackfillTask,
    ) -> Result<(Vec<ActivitySummary>, bool)> {
        let mut summaries = Vec::new();
        let mut page = 1;

        loop {
            let batch = match self
                .provider
                .list_activities(
                    token,
                    task.window_start,
                    task.window_end,
                    page,
                    LIST_PAGE_SIZE,
                )
                .await
            {
                Ok(batch) => batch,
                Err(e) if e.is_rate_limited() => {
                    tracing::warn!(
                        user_id = %task.user_id,
                        page,
                        listed = summaries.len(),
                        "Rate limit exceeded while listing activities"
                    );
                    return Ok((summaries, true));
                }
                Err(e) => return Err(AppError::from(e)),
            };

            let short_page = batch.len() < LIST_PAGE_SIZE as usize;
            summaries.extend(batch);
            if short_page {
                return Ok((summaries, false));
            }
            page += 1;
        }
    }
}
