// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Raw provider payload to canonical activity.

use crate::error::NormalizeError;
use crate::models::{CanonicalActivity, Provider, RawActivity};
use crate::services::analytics::{classify_strava_sport, polyline_to_geojson};
use crate::services::strava::{StravaActivity, STRAVA_SLUG};
use chrono::Duration;
use uuid::Uuid;

/// Normalize a stored raw activity.
///
/// The returned activity carries a fresh id; the store keeps the existing id
/// when the natural key already exists. Enrichment fields are left empty.
pub fn normalize(
    raw: &RawActivity,
    provider: &Provider,
) -> Result<CanonicalActivity, NormalizeError> {
    match provider.slug.as_str() {
        STRAVA_SLUG => normalize_strava(raw),
        other => Err(NormalizeError::UnsupportedProvider(other.to_string())),
    }
}

fn normalize_strava(raw: &RawActivity) -> Result<CanonicalActivity, NormalizeError> {
    let activity: StravaActivity = serde_json::from_value(raw.data.clone())
        .map_err(|e| NormalizeError::MalformedPayload(e.to_string()))?;

    let sport = classify_strava_sport(&activity.sport_type);
    if !sport.is_endurance() {
        return Err(NormalizeError::NotQualifyingActivity(
            activity.sport_type.clone(),
        ));
    }

    let summary_polyline = activity.summary_polyline().map(str::to_string);
    let summary_route = match summary_polyline.as_deref() {
        Some(encoded) => polyline_to_geojson(encoded)?,
        None => None,
    };

    let elev_gain = activity.total_elevation_gain.round() as i32;

    Ok(CanonicalActivity {
        id: Uuid::new_v4(),
        provider_id: raw.provider_id,
        user_id: raw.user_id,
        raw_activity_id: raw.id,
        name: activity.name,
        description: activity.description.filter(|d| !d.is_empty()),
        sport,
        start_time: raw.start_time,
        end_time: raw.start_time + Duration::seconds(i64::from(raw.elapsed_time)),
        iana_timezone: raw.iana_timezone.clone(),
        utc_offset: raw.utc_offset,
        elapsed_time: raw.elapsed_time,
        moving_time: activity.moving_time,
        distance: activity.distance.round() as i32,
        elev_gain: (elev_gain > 0).then_some(elev_gain),
        avg_speed: activity.average_speed,
        avg_hr: None,
        max_hr: None,
        summary_polyline,
        summary_route,
        gpx_file_uri: None,
    })
}
