// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Endurance-ingest serverless runtime
//!
//! Pulls events from the function host's runtime API and hands each one to
//! the same handlers the API server uses.

use endurance_ingest::{
    config::Config,
    init_logging,
    runtime::{self, RuntimeApi},
    AppState,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = Config::from_env().expect("Failed to load configuration");
    let endpoint = config
        .runtime_api
        .clone()
        .expect("AWS_LAMBDA_RUNTIME_API is not set");
    tracing::info!(endpoint = %endpoint, "Starting endurance-ingest runtime");

    let state = Arc::new(
        AppState::connect(config)
            .await
            .expect("Failed to initialize backends"),
    );

    runtime::run(state, RuntimeApi::new(&endpoint)).await?;
    Ok(())
}
