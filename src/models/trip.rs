use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{geo::GeoPoint, route::round2};
use crate::error::AppError;

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const PLACEHOLDER: &str = "–";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TripStatus {
    #[default]
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "tracking")]
    Tracking,
    #[serde(rename = "paused")]
    Paused,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Idle => "idle",
            TripStatus::Tracking => "tracking",
            TripStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bounds of the trip currently being tracked.
#[derive(Debug, Clone, PartialEq)]
pub struct TripWindow {
    pub start_point: GeoPoint,
    pub end_point: Option<GeoPoint>,
    pub paused_ms: i64,
}

impl TripWindow {
    pub fn open(start_point: GeoPoint) -> Self {
        Self {
            start_point,
            end_point: None,
            paused_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripEntry {
    pub id: String,
    pub date_time: DateTime<Utc>,
    pub purpose: String,
    pub notes: String,
    pub miles: f64,
    pub duration_minutes: i64,
    pub paused_minutes: i64,
    pub reimbursement: f64,
}

impl TripEntry {
    pub fn new(
        date_time: DateTime<Utc>,
        purpose: &str,
        notes: &str,
        miles: f64,
        duration_minutes: i64,
        paused_minutes: i64,
        rate_per_mile: f64,
    ) -> Self {
        let miles = round2(miles);
        Self {
            id: Uuid::new_v4().to_string(),
            date_time: date_time.trunc_subsecs(0),
            purpose: or_placeholder(purpose),
            notes: or_placeholder(notes),
            miles,
            duration_minutes,
            paused_minutes,
            reimbursement: round2(miles * rate_per_mile),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date_time.date_naive()
    }

    /// Row in the fixed export column order.
    pub fn csv_fields(&self) -> [String; 7] {
        [
            self.date_time.format(DATE_FORMAT).to_string(),
            self.purpose.clone(),
            self.notes.clone(),
            format!("{:.2}", self.miles),
            format!("{} min", self.duration_minutes),
            format!("{} min", self.paused_minutes),
            format!("${:.2}", self.reimbursement),
        ]
    }

    /// Rebuilds an entry from an exported row. The id is not exported, so a
    /// fresh one is assigned.
    pub fn from_csv_fields(fields: &[&str]) -> Result<Self, AppError> {
        let [date, purpose, notes, miles, duration, paused, reimbursement] = fields else {
            return Err(AppError::Other(anyhow::anyhow!(
                "expected 7 csv fields, got {}",
                fields.len()
            )));
        };
        let date_time = NaiveDateTime::parse_from_str(date, DATE_FORMAT)
            .map_err(|err| AppError::Other(err.into()))?
            .and_utc();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            date_time,
            purpose: purpose.to_string(),
            notes: notes.to_string(),
            miles: parse_number(miles)?,
            duration_minutes: parse_minutes(duration)?,
            paused_minutes: parse_minutes(paused)?,
            reimbursement: parse_number(reimbursement.trim_start_matches('$'))?,
        })
    }
}

/// Criteria for the filtered view of the trip log; unset bounds match all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TripFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub purpose: Option<String>,
}

impl TripFilter {
    pub fn matches(&self, entry: &TripEntry) -> bool {
        let date = entry.date();
        let after_start = self.start_date.map_or(true, |start| date >= start);
        let before_end = self.end_date.map_or(true, |end| date <= end);
        let purpose_ok = match self.purpose.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => entry
                .purpose
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            _ => true,
        };
        after_start && before_end && purpose_ok
    }
}

fn or_placeholder(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        PLACEHOLDER.to_string()
    } else {
        trimmed.to_string()
    }
}

fn parse_number(raw: &str) -> Result<f64, AppError> {
    raw.trim()
        .parse()
        .map_err(|err: std::num::ParseFloatError| AppError::Other(err.into()))
}

fn parse_minutes(raw: &str) -> Result<i64, AppError> {
    raw.trim()
        .trim_end_matches("min")
        .trim()
        .parse()
        .map_err(|err: std::num::ParseIntError| AppError::Other(err.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(purpose: &str) -> TripEntry {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap();
        TripEntry::new(at, purpose, "", 10.0, 25, 3, 0.655)
    }

    #[test]
    fn reimbursement_uses_rate_at_creation() {
        let e = entry("Client visit");
        assert_eq!(e.reimbursement, 6.55);
        assert_eq!(e.notes, PLACEHOLDER);
    }

    #[test]
    fn purpose_filter_ignores_case() {
        let filter = TripFilter {
            purpose: Some("lunch".into()),
            ..TripFilter::default()
        };
        assert!(filter.matches(&entry("Lunch meeting")));
        assert!(!filter.matches(&entry("Client visit")));
    }

    #[test]
    fn date_bounds_are_inclusive() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        let filter = TripFilter {
            start_date: Some(day),
            end_date: Some(day),
            purpose: None,
        };
        assert!(filter.matches(&entry("anything")));
    }
}
