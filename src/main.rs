// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Endurance-ingest API server
//!
//! Keeps a normalized copy of each connected athlete's endurance activities
//! in PostgreSQL, fed by historical backfill and provider webhooks.

use endurance_ingest::{config::Config, init_logging, AppState};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, "Starting endurance-ingest API");

    let port = config.port;
    let state = Arc::new(
        AppState::connect(config)
            .await
            .expect("Failed to initialize backends"),
    );

    // Build router
    let app = endurance_ingest::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
