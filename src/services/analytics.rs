// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Thin adapter over activity analytics: sport classification, heart-rate
//! summary, GPX rendering and route geometry.

use crate::error::NormalizeError;
use crate::models::Sport;
use crate::time_utils::format_utc_rfc3339;
use chrono::{DateTime, TimeDelta, Utc};
use geo::LineString;
use serde_json::Value;
use std::fmt::Write as _;

/// Strava polylines use 5 decimal digits of precision.
const POLYLINE_PRECISION: u32 = 5;

/// Map a Strava `sport_type` onto the canonical sport.
pub fn classify_strava_sport(sport_type: &str) -> Sport {
    match sport_type {
        "Run" | "VirtualRun" => Sport::Running,
        "TrailRun" => Sport::TrailRunning,
        "Ride" | "VirtualRide" | "Velomobile" | "Handcycle" => Sport::Cycling,
        "MountainBikeRide" => Sport::MountainBiking,
        "GravelRide" => Sport::GravelCycling,
        "Hike" => Sport::Hiking,
        "Walk" => Sport::Walking,
        "Swim" => Sport::Swimming,
        "Rowing" | "VirtualRow" => Sport::Rowing,
        "NordicSki" => Sport::CrossCountrySkiing,
        "WeightTraining" | "Crossfit" | "HighIntensityIntervalTraining" | "Workout" => {
            Sport::Strength
        }
        "Yoga" | "Pilates" => Sport::Yoga,
        _ => Sport::Other,
    }
}

/// Decode an encoded polyline into a GeoJSON LineString.
///
/// Returns `None` when the polyline has fewer than two points.
pub fn polyline_to_geojson(encoded: &str) -> Result<Option<Value>, NormalizeError> {
    let line: LineString<f64> = polyline::decode_polyline(encoded, POLYLINE_PRECISION)
        .map_err(|e| NormalizeError::Geometry(e.to_string()))?;

    if line.0.len() < 2 {
        return Ok(None);
    }

    let geometry = geojson::Geometry::new(geojson::Value::from(&line));
    serde_json::to_value(&geometry)
        .map(Some)
        .map_err(|e| NormalizeError::Geometry(e.to_string()))
}

/// Time-series streams of one activity, aligned by index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityStreams {
    /// Seconds since start
    pub time: Vec<i64>,
    /// `[lat, lng]` pairs
    pub latlng: Vec<[f64; 2]>,
    /// Meters
    pub altitude: Vec<f64>,
    /// Beats per minute
    pub heartrate: Vec<i64>,
}

impl ActivityStreams {
    /// Parse a Strava streams payload, keyed by type (`key_by_type=true`) or
    /// as a list of `{type, data}` objects.
    pub fn from_value(value: &Value) -> Result<Self, NormalizeError> {
        let data_for = |key: &str| -> Option<&Value> {
            match value {
                Value::Object(map) => map.get(key).and_then(|s| s.get("data")),
                Value::Array(items) => items
                    .iter()
                    .find(|s| s.get("type").and_then(Value::as_str) == Some(key))
                    .and_then(|s| s.get("data")),
                _ => None,
            }
        };

        if !value.is_object() && !value.is_array() {
            return Err(NormalizeError::MalformedPayload(
                "streams must be an object or array".to_string(),
            ));
        }

        let parse_err = |key: &str, e: serde_json::Error| {
            NormalizeError::MalformedPayload(format!("{} stream: {}", key, e))
        };

        let mut streams = ActivityStreams::default();
        if let Some(data) = data_for("time").cloned() {
            streams.time = serde_json::from_value(data).map_err(|e| parse_err("time", e))?;
        }
        if let Some(data) = data_for("latlng").cloned() {
            streams.latlng = serde_json::from_value(data).map_err(|e| parse_err("latlng", e))?;
        }
        if let Some(data) = data_for("altitude").cloned() {
            streams.altitude =
                serde_json::from_value(data).map_err(|e| parse_err("altitude", e))?;
        }
        if let Some(data) = data_for("heartrate").cloned() {
            let samples: Vec<f64> =
                serde_json::from_value(data).map_err(|e| parse_err("heartrate", e))?;
            streams.heartrate = samples.into_iter().map(|s| s.round() as i64).collect();
        }
        Ok(streams)
    }

}

/// Average and maximum heart rate, ignoring zero (dropout) samples.
pub fn heart_rate_summary(streams: &ActivityStreams) -> Option<(i16, i16)> {
    let samples: Vec<i64> = streams.heartrate.iter().copied().filter(|&hr| hr > 0).collect();
    if samples.is_empty() {
        return None;
    }

    let sum: i64 = samples.iter().sum();
    let avg = (sum as f64 / samples.len() as f64).round() as i64;
    let max = samples.iter().copied().max().unwrap_or(avg);

    Some((clamp_i16(avg), clamp_i16(max)))
}

fn clamp_i16(v: i64) -> i16 {
    v.clamp(0, i64::from(i16::MAX)) as i16
}

/// Render a GPX 1.1 track from the streams.
///
/// Returns `None` without position data.
pub fn render_gpx(
    name: &str,
    sport: Sport,
    start_time: DateTime<Utc>,
    streams: &ActivityStreams,
) -> Option<String> {
    if streams.latlng.is_empty() {
        return None;
    }

    let mut gpx = String::new();
    // Writing into a String cannot fail.
    let _ = write!(
        gpx,
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <gpx version=\"1.1\" creator=\"endurance-ingest\" \
         xmlns=\"http://www.topografix.com/GPX/1/1\" \
         xmlns:gpxtpx=\"http://www.garmin.com/xmlschemas/TrackPointExtension/v1\">\n\
         <metadata><time>{}</time></metadata>\n\
         <trk><name>{}</name><type>{}</type><trkseg>\n",
        format_utc_rfc3339(start_time),
        xml_escape(name),
        sport
    );

    for (i, [lat, lng]) in streams.latlng.iter().enumerate() {
        let _ = write!(gpx, "<trkpt lat=\"{:.7}\" lon=\"{:.7}\">", lat, lng);
        if let Some(ele) = streams.altitude.get(i) {
            let _ = write!(gpx, "<ele>{:.1}</ele>", ele);
        }
        // Offsets come from the provider; drop timestamps that overflow.
        let time = streams
            .time
            .get(i)
            .and_then(|offset| TimeDelta::try_seconds(*offset))
            .and_then(|delta| start_time.checked_add_signed(delta));
        if let Some(t) = time {
            let _ = write!(gpx, "<time>{}</time>", format_utc_rfc3339(t));
        }
        if let Some(hr) = streams.heartrate.get(i).filter(|&&hr| hr > 0) {
            let _ = write!(
                gpx,
                "<extensions><gpxtpx:TrackPointExtension><gpxtpx:hr>{}</gpxtpx:hr>\
                 </gpxtpx:TrackPointExtension></extensions>",
                hr
            );
        }
        gpx.push_str("</trkpt>\n");
    }

    gpx.push_str("</trkseg></trk>\n</gpx>\n");
    Some(gpx)
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
