use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::AppError,
    models::{
        geo::{GeoPoint, LatLng},
        route::{Leg, ResolvedRoute, Step},
    },
    services::storage::{StorageService, LAST_ROUTE_KEY},
};

/// Computes a driving route between two fixes. Failures are reported as
/// `AppError::RouteRequestFailed`.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    async fn route(&self, origin: LatLng, destination: LatLng) -> Result<ResolvedRoute, AppError>;
}

/// Resolves routes and keeps the last good one for offline replay.
#[derive(Clone)]
pub struct RouteResolver {
    provider: Arc<dyn RouteProvider>,
    storage: StorageService,
}

impl RouteResolver {
    pub fn new(provider: Arc<dyn RouteProvider>, storage: StorageService) -> Self {
        Self { provider, storage }
    }

    pub async fn resolve(
        &self,
        origin: &GeoPoint,
        destination: &GeoPoint,
    ) -> Result<ResolvedRoute, AppError> {
        let route = self
            .provider
            .route(origin.lat_lng(), destination.lat_lng())
            .await
            .map_err(|err| match err {
                AppError::RouteRequestFailed(_) => err,
                other => AppError::RouteRequestFailed(other.to_string()),
            })?;

        if let Err(err) = self.storage.write_json(LAST_ROUTE_KEY, &route).await {
            warn!(error = %err, "could not cache resolved route");
        } else {
            debug!(legs = route.legs.len(), "cached last resolved route");
        }
        info!(
            distance_m = route.distance_meters,
            duration_s = route.duration_seconds,
            "route resolved"
        );
        Ok(route)
    }

    pub async fn cached_route(&self) -> Option<ResolvedRoute> {
        match self.storage.read_json(LAST_ROUTE_KEY).await {
            Ok(route) => route,
            Err(err) => {
                warn!(error = %err, "ignoring unreadable cached route");
                None
            }
        }
    }
}

/// Directions from an OSRM-compatible HTTP service.
#[derive(Clone)]
pub struct OsrmRouteProvider {
    client: reqwest::Client,
    base_url: Url,
}

impl OsrmRouteProvider {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn route_url(&self, origin: LatLng, destination: LatLng) -> Result<Url, AppError> {
        let path = format!(
            "route/v1/driving/{},{};{},{}",
            origin.lng, origin.lat, destination.lng, destination.lat
        );
        let mut url = self
            .base_url
            .join(&path)
            .map_err(|err| AppError::RouteRequestFailed(format!("bad routing url: {err}")))?;
        url.query_pairs_mut()
            .append_pair("steps", "true")
            .append_pair("overview", "false");
        Ok(url)
    }
}

#[async_trait]
impl RouteProvider for OsrmRouteProvider {
    async fn route(&self, origin: LatLng, destination: LatLng) -> Result<ResolvedRoute, AppError> {
        let url = self.route_url(origin, destination)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| AppError::RouteRequestFailed(err.to_string()))?;
        let body: OsrmResponse = response
            .json()
            .await
            .map_err(|err| AppError::RouteRequestFailed(err.to_string()))?;
        body.into_route()
    }
}

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
    #[serde(default)]
    waypoints: Vec<OsrmWaypoint>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
    legs: Vec<OsrmLeg>,
}

#[derive(Debug, Deserialize)]
struct OsrmLeg {
    #[serde(default)]
    summary: String,
    steps: Vec<OsrmStep>,
}

#[derive(Debug, Deserialize)]
struct OsrmStep {
    distance: f64,
    duration: f64,
    #[serde(default)]
    name: String,
    maneuver: OsrmManeuver,
}

#[derive(Debug, Deserialize)]
struct OsrmManeuver {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    modifier: Option<String>,
    location: [f64; 2],
}

#[derive(Debug, Deserialize)]
struct OsrmWaypoint {
    #[serde(default)]
    name: String,
    location: [f64; 2],
}

impl OsrmResponse {
    fn into_route(self) -> Result<ResolvedRoute, AppError> {
        if self.code != "Ok" {
            let reason = self.message.unwrap_or_else(|| self.code.clone());
            return Err(AppError::RouteRequestFailed(reason));
        }
        let waypoints = self.waypoints;
        let route = self
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| AppError::RouteRequestFailed("no route returned".into()))?;

        let legs = route
            .legs
            .into_iter()
            .enumerate()
            .map(|(index, leg)| {
                let address = |i: usize| {
                    waypoints
                        .get(i)
                        .map(|wp| wp.name.clone())
                        .filter(|name| !name.is_empty())
                        .unwrap_or_else(|| leg.summary.clone())
                };
                Leg {
                    start_address: address(index),
                    end_address: address(index + 1),
                    end_location: waypoints
                        .get(index + 1)
                        .map(|wp| LatLng::new(wp.location[1], wp.location[0])),
                    steps: leg.steps.into_iter().map(OsrmStep::into_step).collect(),
                }
            })
            .collect();

        Ok(ResolvedRoute {
            legs,
            distance_meters: route.distance,
            duration_seconds: route.duration,
        })
    }
}

impl OsrmStep {
    fn into_step(self) -> Step {
        let kind = self.maneuver.kind.as_str();
        let modifier = self.maneuver.modifier.as_deref();
        let maneuver_kind = match (kind, modifier) {
            ("depart" | "arrive", _) => None,
            (_, Some("straight")) => Some("straight".to_string()),
            (kind, Some(modifier)) => {
                let modifier = modifier.replace("sharp ", "").replace("slight ", "");
                Some(format!("{}-{}", kind.replace(' ', "-"), modifier.replace(' ', "")))
            }
            (kind, None) => Some(kind.replace(' ', "-")),
        };
        Step {
            instruction_text: instruction_for(kind, modifier, &self.name),
            start_location: LatLng::new(self.maneuver.location[1], self.maneuver.location[0]),
            maneuver_kind,
            distance_meters: self.distance,
            duration_seconds: self.duration,
        }
    }
}

fn instruction_for(kind: &str, modifier: Option<&str>, road: &str) -> String {
    let onto = if road.is_empty() {
        String::new()
    } else {
        format!(" onto {road}")
    };
    match (kind, modifier) {
        ("depart", _) if road.is_empty() => "Head out".to_string(),
        ("depart", _) => format!("Head out on {road}"),
        ("arrive", _) => "Arrive at your destination".to_string(),
        ("merge", _) => format!("Merge{onto}"),
        ("roundabout" | "rotary", _) => format!("Enter the roundabout and exit{onto}"),
        ("on ramp", Some(side)) => format!("Take the ramp on the {side}{onto}"),
        ("off ramp", Some(side)) => format!("Take the exit on the {side}{onto}"),
        ("fork", Some(side)) => format!("Keep {side} at the fork{onto}"),
        (_, Some("uturn")) => format!("Make a U-turn{onto}"),
        (_, Some("straight")) | ("new name" | "continue", _) => format!("Continue{onto}"),
        (_, Some(direction)) => format!("Turn {direction}{onto}"),
        _ => format!("Continue{onto}"),
    }
}
