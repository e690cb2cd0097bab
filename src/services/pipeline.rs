// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Canonical pipeline for one raw activity.
//!
//! Every step is idempotent on natural keys, so re-running the pipeline for
//! the same raw activity (webhook retry, backfill overlap, reconciliation)
//! converges to the same rows.

use crate::db::{CanonicalActivityStore, RawActivityStore, UserStore};
use crate::error::{AppError, NormalizeError, ProviderError, Result};
use crate::models::{
    AccessToken, CanonicalActivity, Enrichment, PostProcessActivityTask, RawActivity,
};
use crate::services::analytics::{heart_rate_summary, render_gpx, ActivityStreams};
use crate::services::normalize::normalize;
use crate::services::objects::{gpx_key, stream_key, ObjectStore};
use crate::services::provider::ProviderApi;
use crate::services::tags::TagExtractor;
use std::sync::Arc;
use uuid::Uuid;

/// Result of running the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Ingested(CanonicalActivity),
    /// Non-endurance sport; the raw row is marked processed.
    Skipped { sport: String },
    /// Payload or streams cannot be interpreted. Retrying will not help, so
    /// the raw row is marked processed as well.
    Rejected { reason: String },
}

pub trait PipelineStore: RawActivityStore + CanonicalActivityStore + UserStore {}

impl<T> PipelineStore for T where T: RawActivityStore + CanonicalActivityStore + UserStore {}

#[derive(Clone)]
pub struct ActivityPipeline {
    store: Arc<dyn PipelineStore>,
    objects: Arc<dyn ObjectStore>,
    tags: TagExtractor,
}

impl ActivityPipeline {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        objects: Arc<dyn ObjectStore>,
        tags: TagExtractor,
    ) -> Self {
        Self {
            store,
            objects,
            tags,
        }
    }

    /// normalize → upsert → enrich → tag → mark processed.
    pub async fn ingest(
        &self,
        raw: &RawActivity,
        streams: Option<&ActivityStreams>,
    ) -> Result<IngestOutcome> {
        let provider = self
            .store
            .provider_by_id(raw.provider_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("provider {}", raw.provider_id)))?;

        let activity = match normalize(raw, &provider) {
            Ok(activity) => activity,
            Err(NormalizeError::NotQualifyingActivity(sport)) => {
                tracing::debug!(
                    raw_activity_id = %raw.id,
                    sport = %sport,
                    "Skipping non-endurance activity"
                );
                self.store.mark_processed(raw.id).await?;
                return Ok(IngestOutcome::Skipped { sport });
            }
            Err(e @ (NormalizeError::MalformedPayload(_) | NormalizeError::Geometry(_))) => {
                return self.reject(raw, &e).await;
            }
            Err(e) => return Err(e.into()),
        };

        let mut stored = self.store.upsert_activity(&activity).await?;

        if let Some(streams) = streams {
            let enrichment = self.enrich(&provider.slug, &stored, streams).await?;
            self.store
                .update_enrichment(stored.id, &enrichment)
                .await?;
            stored.avg_hr = enrichment.avg_hr;
            stored.max_hr = enrichment.max_hr;
            stored.gpx_file_uri = enrichment.gpx_file_uri;
        }

        let tags = self
            .tags
            .extract(&stored.name, stored.description.as_deref());
        if !tags.is_empty() {
            self.store.link_tags(stored.id, &tags).await?;
        }

        self.store.mark_processed(raw.id).await?;

        tracing::info!(
            activity_id = %stored.id,
            raw_activity_id = %raw.id,
            user_id = %raw.user_id,
            sport = %stored.sport,
            tags = tags.len(),
            "Activity ingested"
        );
        Ok(IngestOutcome::Ingested(stored))
    }

    /// Parse a stream payload and run the pipeline, rejecting the record
    /// when the payload is unusable.
    async fn ingest_with_streams(
        &self,
        raw: &RawActivity,
        streams: &serde_json::Value,
    ) -> Result<IngestOutcome> {
        match ActivityStreams::from_value(streams) {
            Ok(parsed) => self.ingest(raw, Some(&parsed)).await,
            Err(e) => self.reject(raw, &e).await,
        }
    }

    async fn reject(&self, raw: &RawActivity, err: &NormalizeError) -> Result<IngestOutcome> {
        tracing::warn!(
            raw_activity_id = %raw.id,
            provider_activity_id = %raw.provider_activity_id,
            error = %err,
            "Rejecting unusable activity"
        );
        self.store.mark_processed(raw.id).await?;
        Ok(IngestOutcome::Rejected {
            reason: err.to_string(),
        })
    }

    /// Stream-derived metrics, with the GPX uploaded under a key derived
    /// from the activity id.
    async fn enrich(
        &self,
        provider_slug: &str,
        activity: &CanonicalActivity,
        streams: &ActivityStreams,
    ) -> Result<Enrichment> {
        let (avg_hr, max_hr) = match heart_rate_summary(streams) {
            Some((avg, max)) => (Some(avg), Some(max)),
            None => (None, None),
        };

        let gpx_file_uri = match render_gpx(
            &activity.name,
            activity.sport,
            activity.start_time,
            streams,
        ) {
            Some(gpx) => Some(
                self.objects
                    .put(
                        &gpx_key(provider_slug, activity.id),
                        gpx.into_bytes(),
                        "application/gpx+xml",
                    )
                    .await?,
            ),
            None => None,
        };

        Ok(Enrichment {
            avg_hr,
            max_hr,
            gpx_file_uri,
        })
    }

    /// Re-run the pipeline for a stored raw activity from its stream blob.
    pub async fn post_process(&self, task: &PostProcessActivityTask) -> Result<IngestOutcome> {
        let raw = self
            .store
            .get_raw_activity(task.raw_activity_id)
            .await?
            .filter(|r| r.user_id == task.user_id && r.provider_id == task.provider_id)
            .ok_or_else(|| {
                AppError::NotFound(format!("raw activity {}", task.raw_activity_id))
            })?;

        let Some(location) = raw.detail_uri.as_deref() else {
            return self.ingest(&raw, None).await;
        };

        let bytes = self.objects.get(location).await?;
        match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(value) => self.ingest_with_streams(&raw, &value).await,
            Err(e) => {
                self.reject(&raw, &NormalizeError::MalformedPayload(e.to_string()))
                    .await
            }
        }
    }

    /// Upload the stream payload for `raw` and record its location.
    pub async fn attach_streams(
        &self,
        provider_slug: &str,
        raw: &mut RawActivity,
        streams: &serde_json::Value,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(streams)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("stream encode: {}", e)))?;

        let location = self
            .objects
            .put(
                &stream_key(provider_slug, raw.id),
                bytes,
                "application/json",
            )
            .await?;
        self.store.attach_detail(raw.id, &location).await?;
        raw.detail_uri = Some(location);

        Ok(())
    }

    /// Fetch streams for an already stored raw activity, then run the
    /// pipeline.
    pub async fn complete_detail(
        &self,
        api: &dyn ProviderApi,
        token: &AccessToken,
        mut raw: RawActivity,
    ) -> Result<IngestOutcome> {
        // Manual entries have no streams.
        let streams = match api
            .get_activity_streams(token, &raw.provider_activity_id)
            .await
        {
            Ok(streams) => streams,
            Err(ProviderError::NotFound(_)) => {
                tracing::debug!(raw_activity_id = %raw.id, "Activity has no streams");
                serde_json::Value::Object(serde_json::Map::new())
            }
            Err(e) => return Err(e.into()),
        };
        self.attach_streams(api.slug(), &mut raw, &streams).await?;
        self.ingest_with_streams(&raw, &streams).await
    }

    /// Fetch detail and streams for a remote activity, persist the raw row,
    /// then run the pipeline. Returns the raw activity id.
    pub async fn ingest_remote(
        &self,
        api: &dyn ProviderApi,
        token: &AccessToken,
        provider_id: i32,
        user_id: Uuid,
        provider_activity_id: &str,
    ) -> Result<(Uuid, IngestOutcome)> {
        let detail = api.get_activity(token, provider_activity_id).await?;

        let mut raw = RawActivity {
            id: Uuid::new_v4(),
            provider_id,
            user_id,
            provider_activity_id: detail.id,
            start_time: detail.start_time,
            elapsed_time: detail.elapsed_time,
            iana_timezone: detail.iana_timezone,
            utc_offset: detail.utc_offset,
            data: detail.payload,
            detail_uri: None,
            processed_at: None,
        };
        raw.id = self.store.upsert_raw_activity(&raw).await?;
        tracing::debug!(
            raw_activity_id = %raw.id,
            provider_activity_id = %raw.provider_activity_id,
            "Stored raw activity"
        );

        let outcome = self.complete_detail(api, token, raw.clone()).await?;
        Ok((raw.id, outcome))
    }
}
