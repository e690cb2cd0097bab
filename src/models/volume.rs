// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Training volume aggregates over canonical activities.

use super::activity::Sport;
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Aggregation bucket size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Day,
    Week,
    Month,
}

impl Frequency {
    /// Unit name accepted by PostgreSQL `date_trunc`.
    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Day => "day",
            Frequency::Week => "week",
            Frequency::Month => "month",
        }
    }

    /// Start of the bucket containing `date`. Weeks start on Monday.
    pub fn truncate(self, date: NaiveDate) -> NaiveDate {
        match self {
            Frequency::Day => date,
            Frequency::Week => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            Frequency::Month => date.with_day(1).unwrap_or(date),
        }
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Frequency::Day),
            "week" => Ok(Frequency::Week),
            "month" => Ok(Frequency::Month),
            other => Err(format!("invalid frequency: {}", other)),
        }
    }
}

/// Parameters for a volume aggregate query.
#[derive(Debug, Clone)]
pub struct VolumeQuery {
    pub user_id: Uuid,
    pub provider_slug: String,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    pub sports: Vec<Sport>,
}

/// One bucket of aggregated volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumePoint {
    pub period: NaiveDate,
    pub activity_count: i64,
    pub total_distance_meters: i64,
    pub total_elapsed_time_seconds: i64,
    pub total_moving_time_seconds: i64,
    pub total_elevation_gain_meters: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_week_starts_monday() {
        // 2025-03-13 is a Thursday
        let date = NaiveDate::from_ymd_opt(2025, 3, 13).unwrap();
        assert_eq!(
            Frequency::Week.truncate(date),
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
        );
        assert_eq!(
            Frequency::Month.truncate(date),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
        );
        assert_eq!(Frequency::Day.truncate(date), date);
    }

    #[test]
    fn test_frequency_parse() {
        assert_eq!("week".parse::<Frequency>().unwrap(), Frequency::Week);
        assert!("year".parse::<Frequency>().is_err());
    }
}
