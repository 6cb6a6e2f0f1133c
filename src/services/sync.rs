use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::{error::AppError, models::trip::TripEntry};

/// Body posted to the spreadsheet endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SyncPayload {
    pub identity: String,
    #[serde(flatten)]
    pub entry: TripEntry,
}

/// One-way replication target for committed trips.
#[async_trait]
pub trait ReplicationSink: Send + Sync {
    async fn replicate(&self, payload: &SyncPayload) -> Result<(), AppError>;
}

/// Posts trips to a spreadsheet webhook. The response body is never read.
#[derive(Clone)]
pub struct SheetsWebhook {
    client: reqwest::Client,
    endpoint: Url,
}

impl SheetsWebhook {
    pub fn new(endpoint: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl ReplicationSink for SheetsWebhook {
    async fn replicate(&self, payload: &SyncPayload) -> Result<(), AppError> {
        self.client
            .post(self.endpoint.clone())
            .json(payload)
            .send()
            .await
            .map_err(|err| AppError::SyncFailed(err.to_string()))?;
        Ok(())
    }
}

/// Used when no webhook is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl ReplicationSink for NoopSink {
    async fn replicate(&self, _payload: &SyncPayload) -> Result<(), AppError> {
        Ok(())
    }
}

/// Spawns the replication and drops the handle. The outcome is only logged;
/// callers never observe it.
pub fn replicate_in_background(sink: Arc<dyn ReplicationSink>, payload: SyncPayload) {
    tokio::spawn(async move {
        match sink.replicate(&payload).await {
            Ok(()) => debug!(trip = %payload.entry.id, "trip replicated to spreadsheet"),
            Err(err) => warn!(trip = %payload.entry.id, error = %err, "spreadsheet sync failed"),
        }
    });
}

pub fn sink_for(endpoint: Option<Url>) -> Arc<dyn ReplicationSink> {
    match endpoint {
        Some(url) => Arc::new(SheetsWebhook::new(url)),
        None => Arc::new(NoopSink),
    }
}
