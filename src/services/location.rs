use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    sync::mpsc::UnboundedSender,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::debug;

use crate::{error::AppError, models::geo::GeoPoint};

/// Accuracy and staleness hints forwarded to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationOptions {
    pub high_accuracy: bool,
    pub maximum_age: Duration,
}

impl Default for LocationOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            maximum_age: Duration::from_millis(1000),
        }
    }
}

/// Source of position fixes. Denials and timeouts are reported as
/// `AppError::LocationUnavailable`.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_position(&self, options: &LocationOptions) -> Result<GeoPoint, AppError>;
}

/// One tick of a periodic sampling run.
#[derive(Debug)]
pub struct SampleEvent {
    pub generation: u64,
    pub outcome: Result<GeoPoint, AppError>,
}

#[derive(Clone)]
pub struct GeolocationSampler {
    provider: Arc<dyn LocationProvider>,
    options: LocationOptions,
    next_generation: u64,
}

impl GeolocationSampler {
    pub fn new(provider: Arc<dyn LocationProvider>) -> Self {
        Self {
            provider,
            options: LocationOptions::default(),
            next_generation: 0,
        }
    }

    pub fn with_options(mut self, options: LocationOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn sample_once(&self) -> Result<GeoPoint, AppError> {
        self.provider.current_position(&self.options).await
    }

    /// Spawns a ticker that samples every `interval`, first tick one interval
    /// from now. Every tick, failed or not, is delivered to `sink` tagged with
    /// the run's generation.
    pub fn start_periodic(
        &mut self,
        interval: Duration,
        sink: UnboundedSender<SampleEvent>,
    ) -> PeriodicHandle {
        self.next_generation += 1;
        let generation = self.next_generation;
        let provider = Arc::clone(&self.provider);
        let options = self.options;

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let outcome = provider.current_position(&options).await;
                if sink.send(SampleEvent { generation, outcome }).is_err() {
                    break;
                }
            }
        });
        debug!(generation, interval_ms = interval.as_millis() as u64, "periodic sampling started");

        PeriodicHandle {
            generation,
            task: Some(task),
        }
    }

    pub fn stop_periodic(&self, handle: &mut PeriodicHandle) {
        handle.stop();
    }
}

/// Owns a running sampling task. Stopping is idempotent and also happens on
/// drop.
#[derive(Debug)]
pub struct PeriodicHandle {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl PeriodicHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(generation = self.generation, "periodic sampling stopped");
        }
    }
}

impl Drop for PeriodicHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
