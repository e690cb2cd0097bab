// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Raw provider payloads and the canonical activity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Provider-native activity payload, stored unmodified.
///
/// Natural key is (provider_id, user_id, provider_activity_id).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RawActivity {
    pub id: Uuid,
    pub provider_id: i32,
    pub user_id: Uuid,
    pub provider_activity_id: String,
    pub start_time: DateTime<Utc>,
    /// Elapsed time in seconds
    pub elapsed_time: i32,
    /// IANA timezone name (e.g. "America/Los_Angeles")
    pub iana_timezone: Option<String>,
    /// UTC offset in seconds at the activity start
    pub utc_offset: Option<i32>,
    pub data: serde_json::Value,
    /// Object-store location of the stream blob, once fetched
    pub detail_uri: Option<String>,
    /// Set when the canonical pipeline has run to completion
    pub processed_at: Option<DateTime<Utc>>,
}

impl RawActivity {
    pub fn has_detail(&self) -> bool {
        self.detail_uri.is_some()
    }
}

/// Sport classification for canonical activities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sport {
    Running,
    TrailRunning,
    Cycling,
    MountainBiking,
    GravelCycling,
    Hiking,
    Walking,
    Swimming,
    Rowing,
    CrossCountrySkiing,
    Strength,
    Yoga,
    Other,
}

impl Sport {
    /// Endurance sports are the only ones that become canonical activities.
    pub fn is_endurance(self) -> bool {
        !matches!(self, Sport::Strength | Sport::Yoga | Sport::Other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Sport::Running => "running",
            Sport::TrailRunning => "trail_running",
            Sport::Cycling => "cycling",
            Sport::MountainBiking => "mountain_biking",
            Sport::GravelCycling => "gravel_cycling",
            Sport::Hiking => "hiking",
            Sport::Walking => "walking",
            Sport::Swimming => "swimming",
            Sport::Rowing => "rowing",
            Sport::CrossCountrySkiing => "cross_country_skiing",
            Sport::Strength => "strength",
            Sport::Yoga => "yoga",
            Sport::Other => "other",
        }
    }
}

impl fmt::Display for Sport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown sport name.
#[derive(Debug, thiserror::Error)]
#[error("unknown sport: {0}")]
pub struct UnknownSport(pub String);

impl FromStr for Sport {
    type Err = UnknownSport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let sport = match s {
            "running" => Sport::Running,
            "trail_running" => Sport::TrailRunning,
            "cycling" => Sport::Cycling,
            "mountain_biking" => Sport::MountainBiking,
            "gravel_cycling" => Sport::GravelCycling,
            "hiking" => Sport::Hiking,
            "walking" => Sport::Walking,
            "swimming" => Sport::Swimming,
            "rowing" => Sport::Rowing,
            "cross_country_skiing" => Sport::CrossCountrySkiing,
            "strength" => Sport::Strength,
            "yoga" => Sport::Yoga,
            "other" => Sport::Other,
            _ => return Err(UnknownSport(s.to_string())),
        };
        Ok(sport)
    }
}

/// Normalized, provider-agnostic activity.
///
/// Enrichment fields (`avg_hr`, `max_hr`, `gpx_file_uri`) are written only by
/// the enrichment pass, never by the initial upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalActivity {
    pub id: Uuid,
    pub provider_id: i32,
    pub user_id: Uuid,
    pub raw_activity_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub sport: Sport,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub iana_timezone: Option<String>,
    pub utc_offset: Option<i32>,
    /// Seconds
    pub elapsed_time: i32,
    /// Seconds
    pub moving_time: i32,
    /// Meters
    pub distance: i32,
    /// Meters; absent when the provider reports no gain
    pub elev_gain: Option<i32>,
    /// Meters per second
    pub avg_speed: f64,
    pub avg_hr: Option<i16>,
    pub max_hr: Option<i16>,
    pub summary_polyline: Option<String>,
    /// GeoJSON LineString decoded from `summary_polyline`
    pub summary_route: Option<serde_json::Value>,
    pub gpx_file_uri: Option<String>,
}

/// Stream-derived metrics written by the enrichment pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enrichment {
    pub avg_hr: Option<i16>,
    pub max_hr: Option<i16>,
    pub gpx_file_uri: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sport_round_trips_through_str() {
        for sport in [Sport::TrailRunning, Sport::CrossCountrySkiing, Sport::Yoga] {
            assert_eq!(sport.as_str().parse::<Sport>().unwrap(), sport);
        }
        assert!("curling".parse::<Sport>().is_err());
    }

    #[test]
    fn test_endurance_classification() {
        assert!(Sport::Running.is_endurance());
        assert!(Sport::Swimming.is_endurance());
        assert!(!Sport::Strength.is_endurance());
        assert!(!Sport::Other.is_endurance());
    }
}
