// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Endurance-ingest: activity ingestion from OAuth2 fitness providers
//!
//! This crate keeps a canonical, normalized copy of each user's endurance
//! activities current through time-windowed historical backfill and webhook
//! push, with at-least-once delivery and idempotent convergence.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod runtime;
pub mod services;
pub mod time_utils;

use config::Config;
use db::{CanonicalActivityStore, PgStore, RawActivityStore, Store, UserStore};
use services::{
    ActivityPipeline, BackfillProcessor, CloudTasksQueue, CredentialManager, GcsObjectStore,
    ObjectStore, ProviderApi, QueueDispatcher, StravaClient, TagExtractor, TaskQueue,
    TaskScheduler, VerificationTokens,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub users: Arc<dyn UserStore>,
    pub raw_activities: Arc<dyn RawActivityStore>,
    pub activities: Arc<dyn CanonicalActivityStore>,
    pub provider: Arc<dyn ProviderApi>,
    pub queue: Arc<dyn TaskQueue>,
    pub credentials: CredentialManager,
    pub verification: VerificationTokens,
    pub scheduler: TaskScheduler,
    pub pipeline: ActivityPipeline,
    pub dispatcher: QueueDispatcher,
}

impl AppState {
    /// Wire every service onto one store backend.
    pub fn new<S: Store + 'static>(
        config: Config,
        store: Arc<S>,
        provider: Arc<dyn ProviderApi>,
        objects: Arc<dyn ObjectStore>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        let credentials = CredentialManager::new(store.clone(), provider.clone());
        let verification = VerificationTokens::new(store.clone());
        let scheduler = TaskScheduler::new(queue.clone(), config.backfill_months);
        let pipeline = ActivityPipeline::new(
            store.clone(),
            objects,
            TagExtractor::new(config.tag_style),
        );
        let backfill = BackfillProcessor::new(
            credentials.clone(),
            provider.clone(),
            store.clone(),
            pipeline.clone(),
            queue.clone(),
        );
        let dispatcher = QueueDispatcher::new(backfill, pipeline.clone());

        Self {
            config,
            users: store.clone(),
            raw_activities: store.clone(),
            activities: store,
            provider,
            queue,
            credentials,
            verification,
            scheduler,
            pipeline,
            dispatcher,
        }
    }

    /// Production backends: PostgreSQL (migrated), GCS, Cloud Tasks and the
    /// Strava API.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let store =
            PgStore::connect(&config.database_url, config.database_max_connections).await?;
        store.migrate().await?;
        tracing::info!("Database ready");

        let objects = GcsObjectStore::new(config.object_bucket.clone())?;
        tracing::info!(bucket = %config.object_bucket, "Object storage initialized");

        let queue = CloudTasksQueue::new(
            &config.gcp_project_id,
            &config.gcp_region,
            &config.task_queue_name,
            &config.api_url,
            config.task_signing_key.clone(),
        )
        .await?;
        tracing::info!(
            project = %config.gcp_project_id,
            queue = %config.task_queue_name,
            "Cloud Tasks queue initialized"
        );

        let provider = StravaClient::new(
            config.strava_client_id.clone(),
            config.strava_client_secret.clone(),
        );

        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(provider),
            Arc::new(objects),
            Arc::new(queue),
        ))
    }
}

/// Initialize structured JSON logging (GCP-compliant).
pub fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("endurance_ingest=debug".parse().expect("valid directive"))
                .add_directive("info".parse().expect("valid directive")),
        )
        .with(format)
        .init();
}
