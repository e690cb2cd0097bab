// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Read-only training volume metrics.

use crate::error::{AppError, Result};
use crate::middleware::require_api_key;
use crate::models::{Frequency, Sport, VolumePoint, VolumeQuery};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    middleware,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Metrics routes (require `x-api-key`).
pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/athletes/{athlete_id}/metrics/volume", get(volume))
        .route_layer(middleware::from_fn_with_state(state, require_api_key))
}

/// Parsed query parameters.
#[derive(Debug, Validate)]
struct VolumeParams {
    #[validate(length(min = 1, max = 64))]
    provider: String,
    frequency: Frequency,
    start_date: NaiveDate,
    #[validate(length(min = 1, message = "at least one sport is required"))]
    sports: Vec<Sport>,
}

impl VolumeParams {
    /// `sport` may repeat and each value may be comma-separated.
    fn parse(pairs: &[(String, String)]) -> Result<Self> {
        let single = |name: &str| -> Result<&str> {
            let mut values = pairs.iter().filter(|(k, _)| k == name).map(|(_, v)| v);
            match (values.next(), values.next()) {
                (Some(v), None) => Ok(v.as_str()),
                (None, _) => Err(AppError::BadRequest(format!("missing '{}'", name))),
                (Some(_), Some(_)) => Err(AppError::BadRequest(format!("repeated '{}'", name))),
            }
        };

        let provider = single("provider")?.to_string();
        let frequency = single("frequency")?
            .parse::<Frequency>()
            .map_err(AppError::BadRequest)?;
        let start_date = NaiveDate::parse_from_str(single("startDate")?, "%Y-%m-%d")
            .map_err(|_| {
                AppError::BadRequest("Invalid 'startDate': expected YYYY-MM-DD".to_string())
            })?;

        let mut sports = Vec::new();
        for name in pairs
            .iter()
            .filter(|(k, _)| k == "sport")
            .flat_map(|(_, v)| v.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            let sport = name
                .parse::<Sport>()
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            if !sport.is_endurance() {
                return Err(AppError::BadRequest(format!(
                    "'{}' is not an endurance sport",
                    sport
                )));
            }
            if !sports.contains(&sport) {
                sports.push(sport);
            }
        }

        let params = Self {
            provider,
            frequency,
            start_date,
            sports,
        };
        params
            .validate()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        Ok(params)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VolumeResponse {
    athlete_id: Uuid,
    provider: String,
    frequency: Frequency,
    sports: Vec<Sport>,
    start_date: NaiveDate,
    data: BTreeMap<Sport, Vec<VolumePoint>>,
}

/// Per-sport volume buckets since `startDate`.
async fn volume(
    State(state): State<Arc<AppState>>,
    Path(athlete_id): Path<Uuid>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<VolumeResponse>> {
    let params = VolumeParams::parse(&pairs)?;

    state
        .users
        .get_user(athlete_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("athlete {}", athlete_id)))?;

    let query = VolumeQuery {
        user_id: athlete_id,
        provider_slug: params.provider.clone(),
        frequency: params.frequency,
        start_date: params.start_date,
        sports: params.sports.clone(),
    };

    let mut data: BTreeMap<Sport, Vec<VolumePoint>> =
        params.sports.iter().map(|s| (*s, Vec::new())).collect();
    for (sport, point) in state.activities.athlete_volume(&query).await? {
        data.entry(sport).or_default().push(point);
    }

    Ok(Json(VolumeResponse {
        athlete_id,
        provider: params.provider,
        frequency: params.frequency,
        sports: params.sports,
        start_date: params.start_date,
        data,
    }))
}
