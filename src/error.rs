use std::fmt;

use thiserror::Error;

use crate::models::trip::TripStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
    #[error("location unavailable: {0}")]
    LocationUnavailable(String),
    #[error("route request failed: {0}")]
    RouteRequestFailed(String),
    #[error("no trips to export")]
    NoTrips,
    #[error("spreadsheet sync failed: {0}")]
    SyncFailed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A lifecycle operation was invoked from a status that does not permit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub struct InvalidTransition {
    pub operation: &'static str,
    pub status: TripStatus,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid transition: cannot {} while {}",
            self.operation, self.status
        )
    }
}
