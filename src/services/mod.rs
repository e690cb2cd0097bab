// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod analytics;
pub mod backfill;
pub mod credentials;
pub mod dispatcher;
pub mod normalize;
pub mod objects;
pub mod pipeline;
pub mod provider;
pub mod queue;
pub mod scheduler;
pub mod strava;
pub mod tags;
pub mod verification;

pub use backfill::{BackfillOutcome, BackfillProcessor};
pub use credentials::CredentialManager;
pub use dispatcher::{QueueDispatcher, QueueRecord};
pub use objects::{GcsObjectStore, MemoryObjectStore, ObjectStore};
pub use pipeline::{ActivityPipeline, IngestOutcome};
pub use provider::ProviderApi;
pub use queue::{CloudTasksQueue, MemoryQueue, TaskQueue};
pub use scheduler::{ScheduleResult, TaskScheduler};
pub use strava::StravaClient;
pub use tags::{TagExtractor, TagStyle};
pub use verification::{TokenCheck, VerificationTokens};
