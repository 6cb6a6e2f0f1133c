use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::geo::LatLng;

static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

pub const METERS_PER_MILE: f64 = 1609.34;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRoute {
    pub legs: Vec<Leg>,
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub start_address: String,
    pub end_address: String,
    #[serde(default)]
    pub end_location: Option<LatLng>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub instruction_text: String,
    pub start_location: LatLng,
    #[serde(default)]
    pub maneuver_kind: Option<String>,
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

/// Condensed view of a route for trip summaries.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSummary {
    pub start_address: String,
    pub end_address: String,
    pub miles: f64,
    pub minutes: i64,
}

impl ResolvedRoute {
    pub fn miles(&self) -> f64 {
        round2(self.distance_meters / METERS_PER_MILE)
    }

    pub fn minutes(&self) -> i64 {
        (self.duration_seconds / 60.0).round() as i64
    }

    /// Steps of every leg in travel order.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.legs.iter().flat_map(|leg| leg.steps.iter())
    }

    pub fn destination(&self) -> Option<LatLng> {
        let last = self.legs.last()?;
        last.end_location
            .or_else(|| last.steps.last().map(|step| step.start_location))
    }

    pub fn summary(&self) -> RouteSummary {
        RouteSummary {
            start_address: self
                .legs
                .first()
                .map(|leg| leg.start_address.clone())
                .unwrap_or_default(),
            end_address: self
                .legs
                .last()
                .map(|leg| leg.end_address.clone())
                .unwrap_or_default(),
            miles: self.miles(),
            minutes: self.minutes(),
        }
    }
}

impl Step {
    /// Instruction with provider markup removed.
    pub fn plain_instruction(&self) -> String {
        let text = strip_markup(&self.instruction_text);
        if text.is_empty() {
            "Continue".to_string()
        } else {
            text
        }
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn strip_markup(html: &str) -> String {
    let text = RE_TAG
        .replace_all(html, " ")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
