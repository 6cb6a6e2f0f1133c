//! Trip lifecycle: Idle → Tracking ⇄ Paused → Idle.
//!
//! The tracker is the only writer of the trip status, the open window and the
//! tracked path. Periodic samples arrive over a channel from the sampler task
//! and are applied when drained, after checking that they belong to the
//! sampling run that is still active.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::{
    clock::Clock,
    config::{AppConfig, RetryPolicy},
    error::{AppError, InvalidTransition},
    models::{
        geo::{GeoPoint, LatLng},
        route::{ResolvedRoute, RouteSummary},
        trip::{TripEntry, TripStatus, TripWindow},
    },
    services::{
        directions::{RouteProvider, RouteResolver},
        location::{GeolocationSampler, LocationProvider, PeriodicHandle, SampleEvent},
        navigation::{
            Destination, Guidance, GuidanceDisplay, GuidanceSettings, NavigationAnnouncer,
            SpeechAnnouncer,
        },
        storage::StorageService,
    },
    store::TripStore,
};

const TRIP_STARTED_LINE: &str = "Trip started. Navigation will begin when route is available.";

/// Something worth telling the user about.
#[derive(Debug, Clone, PartialEq)]
pub enum TripNotice {
    Started { at: GeoPoint },
    Paused,
    Resumed { paused_ms: i64 },
    Completed { entry: TripEntry },
    Degraded { reason: String },
    InvalidTransition(InvalidTransition),
    SampleFailed { reason: String },
    LocationUnavailable { operation: &'static str, reason: String },
    RouteFailed { reason: String },
    GuidanceVisualOnly,
}

pub trait TripObserver: Send + Sync {
    fn notify(&self, notice: &TripNotice);
}

/// Observer that only writes notices to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl TripObserver for LogObserver {
    fn notify(&self, notice: &TripNotice) {
        match notice {
            TripNotice::Started { at } => {
                info!(lat = at.latitude, lng = at.longitude, "trip started")
            }
            TripNotice::Paused => info!("trip paused"),
            TripNotice::Resumed { paused_ms } => info!(paused_ms, "trip resumed"),
            TripNotice::Completed { entry } => {
                info!(miles = entry.miles, trip = %entry.id, "trip complete")
            }
            TripNotice::Degraded { reason } => {
                warn!(%reason, "offline: showing last saved route")
            }
            TripNotice::InvalidTransition(inv) => debug!(%inv, "ignored lifecycle request"),
            TripNotice::SampleFailed { reason } => warn!(%reason, "unable to access GPS during tracking"),
            TripNotice::LocationUnavailable { operation, reason } => {
                error!(operation, %reason, "GPS access failed")
            }
            TripNotice::RouteFailed { reason } => error!(%reason, "route resolution failed"),
            TripNotice::GuidanceVisualOnly => warn!("speech unavailable, visual guidance only"),
        }
    }
}

/// Result of pause/resume/start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied(TripStatus),
    Rejected(InvalidTransition),
}

/// Result of ending a trip that did not fail outright.
#[derive(Debug, Clone, PartialEq)]
pub enum TripOutcome {
    Recorded {
        entry: TripEntry,
        route: ResolvedRoute,
    },
    /// The route could not be resolved; the cached one is on display and
    /// nothing was logged.
    Degraded {
        cached: ResolvedRoute,
    },
    Rejected(InvalidTransition),
}

/// Capabilities the tracker is wired to.
pub struct TrackerDeps {
    pub location: Arc<dyn LocationProvider>,
    pub routes: Arc<dyn RouteProvider>,
    pub speech: Arc<dyn SpeechAnnouncer>,
    pub display: Arc<dyn GuidanceDisplay>,
    pub observer: Arc<dyn TripObserver>,
    pub clock: Arc<dyn Clock>,
}

pub struct TripTracker {
    status: TripStatus,
    window: Option<TripWindow>,
    path: Vec<GeoPoint>,
    pause_started_at: Option<i64>,
    started_at: Option<DateTime<Utc>>,
    purpose: String,
    notes: String,
    rate_per_mile: f64,
    sample_interval: Duration,
    retry: RetryPolicy,
    sampler: GeolocationSampler,
    sampling: Option<PeriodicHandle>,
    samples_tx: UnboundedSender<SampleEvent>,
    samples_rx: UnboundedReceiver<SampleEvent>,
    resolver: RouteResolver,
    store: TripStore,
    announcer: NavigationAnnouncer,
    observer: Arc<dyn TripObserver>,
    clock: Arc<dyn Clock>,
}

impl TripTracker {
    pub fn new(
        config: &AppConfig,
        deps: TrackerDeps,
        storage: StorageService,
        store: TripStore,
    ) -> Self {
        let (samples_tx, samples_rx) = mpsc::unbounded_channel();
        let settings = GuidanceSettings {
            step_proximity_m: config.step_proximity_m,
            arrival_threshold_m: config.arrival_threshold_m,
            voice_enabled: config.voice_guidance,
        };
        Self {
            status: TripStatus::Idle,
            window: None,
            path: Vec::new(),
            pause_started_at: None,
            started_at: None,
            purpose: String::new(),
            notes: String::new(),
            rate_per_mile: config.rate_per_mile,
            sample_interval: config.sample_interval,
            retry: config.retry,
            sampler: GeolocationSampler::new(deps.location),
            sampling: None,
            samples_tx,
            samples_rx,
            resolver: RouteResolver::new(deps.routes, storage),
            store,
            announcer: NavigationAnnouncer::new(settings, deps.speech, deps.display),
            observer: deps.observer,
            clock: deps.clock,
        }
    }

    pub fn status(&self) -> TripStatus {
        self.status
    }

    pub fn path(&self) -> &[GeoPoint] {
        &self.path
    }

    pub fn window(&self) -> Option<&TripWindow> {
        self.window.as_ref()
    }

    pub fn paused_ms(&self) -> i64 {
        self.window.as_ref().map_or(0, |window| window.paused_ms)
    }

    pub fn is_sampling(&self) -> bool {
        self.sampling.as_ref().is_some_and(PeriodicHandle::is_running)
    }

    pub fn store(&self) -> &TripStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut TripStore {
        &mut self.store
    }

    pub fn announcer(&self) -> &NavigationAnnouncer {
        &self.announcer
    }

    pub fn rate_per_mile(&self) -> f64 {
        self.rate_per_mile
    }

    /// Applies to trips completed from now on; logged entries keep their
    /// amount.
    pub fn set_rate_per_mile(&mut self, rate: f64) {
        self.rate_per_mile = rate;
    }

    pub fn set_trip_details(&mut self, purpose: impl Into<String>, notes: impl Into<String>) {
        self.purpose = purpose.into();
        self.notes = notes.into();
    }

    pub fn set_voice_guidance(&mut self, enabled: bool) {
        self.announcer.set_voice_enabled(enabled);
    }

    pub fn set_destination(&mut self, name: impl Into<String>, location: LatLng) {
        self.announcer.set_destination(Destination {
            name: name.into(),
            location,
        });
    }

    pub async fn start(&mut self) -> Result<Transition, AppError> {
        if self.status != TripStatus::Idle {
            return Ok(Transition::Rejected(self.reject("start")));
        }

        let start_point = match self.sampler.sample_once().await {
            Ok(point) => point,
            Err(err) => return Err(self.location_failed("start", err)),
        };

        self.window = Some(TripWindow::open(start_point));
        self.path.clear();
        self.path.push(start_point);
        self.pause_started_at = None;
        self.started_at = Some(self.clock.now());
        self.announcer.reset();
        self.start_sampling();
        self.status = TripStatus::Tracking;

        self.notify(TripNotice::Started { at: start_point });
        self.announcer.speak(TRIP_STARTED_LINE);
        Ok(Transition::Applied(self.status))
    }

    pub fn pause(&mut self) -> Transition {
        if self.status != TripStatus::Tracking {
            return Transition::Rejected(self.reject("pause"));
        }
        self.drain_samples();
        self.stop_sampling();
        self.pause_started_at = Some(self.clock.now_ms());
        self.status = TripStatus::Paused;
        self.notify(TripNotice::Paused);
        Transition::Applied(self.status)
    }

    pub fn resume(&mut self) -> Transition {
        if self.status != TripStatus::Paused {
            return Transition::Rejected(self.reject("resume"));
        }
        let now = self.clock.now_ms();
        let mut paused_ms = 0;
        if let Some(window) = self.window.as_mut() {
            if let Some(since) = self.pause_started_at.take() {
                window.paused_ms += (now - since).max(0);
            }
            paused_ms = window.paused_ms;
        }
        self.start_sampling();
        self.status = TripStatus::Tracking;
        self.notify(TripNotice::Resumed { paused_ms });
        Transition::Applied(self.status)
    }

    /// Closes the trip. Whatever happens, the tracker is idle afterwards.
    pub async fn end(&mut self) -> Result<TripOutcome, AppError> {
        if self.status == TripStatus::Idle {
            return Ok(TripOutcome::Rejected(self.reject("end")));
        }
        self.drain_samples();
        self.stop_sampling();

        let end_point = match self.sampler.sample_once().await {
            Ok(point) => point,
            Err(err) => {
                self.finish();
                return Err(self.location_failed("end", err));
            }
        };
        let Some(mut window) = self.window.take() else {
            self.finish();
            return Err(AppError::Other(anyhow::anyhow!("no open trip window")));
        };
        window.end_point = Some(end_point);
        let path_len = self.path.len();

        match self.resolver.resolve(&window.start_point, &end_point).await {
            Ok(route) => {
                let entry = TripEntry::new(
                    self.clock.now(),
                    &self.purpose,
                    &self.notes,
                    route.miles(),
                    route.minutes(),
                    minutes_from_ms(window.paused_ms),
                    self.rate_per_mile,
                );
                self.finish();
                self.store.append(entry.clone()).await?;
                debug!(samples = path_len, "recorded path reconciled against route");

                if !self.announcer.begin_route(&route, self.retry).await {
                    self.notify(TripNotice::GuidanceVisualOnly);
                }
                self.notify(TripNotice::Completed {
                    entry: entry.clone(),
                });
                Ok(TripOutcome::Recorded { entry, route })
            }
            Err(err) => {
                self.finish();
                self.notify(TripNotice::RouteFailed {
                    reason: err.to_string(),
                });
                match self.resolver.cached_route().await {
                    Some(cached) => {
                        self.announcer.display_route(&cached);
                        self.notify(TripNotice::Degraded {
                            reason: err.to_string(),
                        });
                        Ok(TripOutcome::Degraded { cached })
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// Redisplays the cached route and arms guidance on it.
    pub async fn restore_last_trip(&mut self) -> Option<RouteSummary> {
        let Some(route) = self.resolver.cached_route().await else {
            info!("no saved trip to restore");
            return None;
        };
        if !self.announcer.begin_route(&route, self.retry).await {
            self.notify(TripNotice::GuidanceVisualOnly);
        }
        info!("last trip restored");
        Some(route.summary())
    }

    /// Trip time since start as `HH:MM:SS`, pauses included.
    pub fn elapsed(&self) -> Option<String> {
        let started = self.started_at?;
        let secs = (self.clock.now() - started).num_seconds().max(0);
        Some(format!(
            "{:02}:{:02}:{:02}",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        ))
    }

    /// Applies every sample event already delivered. Returns how many were
    /// appended to the path.
    pub fn drain_samples(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.samples_rx.try_recv() {
            if self.apply_sample(event) {
                applied += 1;
            }
        }
        applied
    }

    /// Waits for the next sample event. `None` when nothing is sampling.
    pub async fn next_sample(&mut self) -> Option<bool> {
        self.sampling.as_ref()?;
        let event = self.samples_rx.recv().await?;
        Some(self.apply_sample(event))
    }

    /// Live position from outside the sampler, e.g. a high-frequency watch.
    pub fn feed_position(&mut self, point: GeoPoint) -> Vec<Guidance> {
        self.announcer.observe(&point, self.status)
    }

    fn apply_sample(&mut self, event: SampleEvent) -> bool {
        let active = self.sampling.as_ref().map(PeriodicHandle::generation);
        if active != Some(event.generation) || self.status != TripStatus::Tracking {
            debug!(generation = event.generation, "discarding sample from stopped run");
            return false;
        }
        match event.outcome {
            Ok(point) => {
                self.path.push(point);
                self.announcer.observe(&point, self.status);
                true
            }
            Err(err) => {
                self.notify(TripNotice::SampleFailed {
                    reason: err.to_string(),
                });
                false
            }
        }
    }

    fn start_sampling(&mut self) {
        self.stop_sampling();
        let handle = self
            .sampler
            .start_periodic(self.sample_interval, self.samples_tx.clone());
        self.sampling = Some(handle);
    }

    fn stop_sampling(&mut self) {
        if let Some(mut handle) = self.sampling.take() {
            self.sampler.stop_periodic(&mut handle);
        }
    }

    fn finish(&mut self) {
        self.stop_sampling();
        self.status = TripStatus::Idle;
        self.window = None;
        self.path.clear();
        self.pause_started_at = None;
        self.started_at = None;
    }

    fn reject(&self, operation: &'static str) -> InvalidTransition {
        let invalid = InvalidTransition {
            operation,
            status: self.status,
        };
        warn!(operation, status = %self.status, "invalid lifecycle transition");
        self.notify(TripNotice::InvalidTransition(invalid));
        invalid
    }

    fn location_failed(&self, operation: &'static str, err: AppError) -> AppError {
        let err = match err {
            AppError::LocationUnavailable(_) => err,
            other => AppError::LocationUnavailable(other.to_string()),
        };
        self.notify(TripNotice::LocationUnavailable {
            operation,
            reason: err.to_string(),
        });
        err
    }

    fn notify(&self, notice: TripNotice) {
        self.observer.notify(&notice);
    }
}

fn minutes_from_ms(ms: i64) -> i64 {
    (ms as f64 / 60_000.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        services::{location::LocationOptions, sync::NoopSink},
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };
    use tempfile::TempDir;
    use tokio::time;

    /// Drives north one fix per call; calls listed in `fail_on` time out.
    struct Drive {
        calls: AtomicUsize,
        fail_on: Vec<usize>,
    }

    #[async_trait]
    impl LocationProvider for Drive {
        async fn current_position(&self, _: &LocationOptions) -> Result<GeoPoint, AppError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.contains(&call) {
                Err(AppError::LocationUnavailable("timeout".into()))
            } else {
                Ok(GeoPoint::new(38.5 + call as f64 * 0.001, -121.5, call as i64))
            }
        }
    }

    struct Offline;

    #[async_trait]
    impl RouteProvider for Offline {
        async fn route(&self, _: LatLng, _: LatLng) -> Result<ResolvedRoute, AppError> {
            Err(AppError::RouteRequestFailed("offline".into()))
        }
    }

    #[derive(Default)]
    struct Recorder {
        notices: Mutex<Vec<TripNotice>>,
    }

    impl SpeechAnnouncer for Recorder {
        fn cancel(&self) {}
        fn speak(&self, _text: &str) {}
    }

    impl GuidanceDisplay for Recorder {
        fn show_route(&self, _route: &ResolvedRoute) {}
        fn show_instruction(&self, _text: &str) {}
        fn prompt_arrival(&self, _distance_m: f64, _destination: &str) {}
    }

    impl TripObserver for Recorder {
        fn notify(&self, notice: &TripNotice) {
            self.notices.lock().unwrap().push(notice.clone());
        }
    }

    struct Harness {
        tracker: TripTracker,
        recorder: Arc<Recorder>,
        clock: Arc<ManualClock>,
        _root: TempDir,
    }

    async fn harness(fail_on: Vec<usize>) -> Harness {
        let root = TempDir::new().unwrap();
        let config = AppConfig {
            data_dir: root.path().to_path_buf(),
            sample_interval: Duration::from_secs(10),
            ..AppConfig::default()
        };
        let storage = StorageService::new(config.data_dir.clone());
        let store = TripStore::load(storage.clone(), "ana@example.com", "ana", Arc::new(NoopSink))
            .await
            .unwrap();
        let recorder = Arc::new(Recorder::default());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap(),
        ));
        let deps = TrackerDeps {
            location: Arc::new(Drive {
                calls: AtomicUsize::new(0),
                fail_on,
            }),
            routes: Arc::new(Offline),
            speech: recorder.clone(),
            display: recorder.clone(),
            observer: recorder.clone(),
            clock: clock.clone(),
        };
        Harness {
            tracker: TripTracker::new(&config, deps, storage, store),
            recorder,
            clock,
            _root: root,
        }
    }

    fn generation(tracker: &TripTracker) -> u64 {
        tracker
            .sampling
            .as_ref()
            .map(PeriodicHandle::generation)
            .expect("sampling run")
    }

    fn late_fix(generation: u64) -> SampleEvent {
        SampleEvent {
            generation,
            outcome: Ok(GeoPoint::new(40.0, -120.0, 99)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_samples_extend_the_path_only_while_tracking() {
        let mut h = harness(Vec::new()).await;
        h.tracker.start().await.unwrap();

        time::sleep(Duration::from_secs(25)).await;
        assert_eq!(h.tracker.drain_samples(), 2);
        let stamps: Vec<i64> = h.tracker.path().iter().map(|p| p.timestamp_ms).collect();
        assert_eq!(stamps, vec![0, 1, 2]);

        h.tracker.pause();
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.tracker.drain_samples(), 0);
        assert!(!h.tracker.is_sampling());
        assert_eq!(h.tracker.path().len(), 3);

        h.tracker.resume();
        time::sleep(Duration::from_secs(15)).await;
        assert_eq!(h.tracker.drain_samples(), 1);
        assert_eq!(h.tracker.path().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn events_from_a_stopped_run_are_discarded() {
        let mut h = harness(Vec::new()).await;
        h.tracker.start().await.unwrap();
        let first = generation(&h.tracker);

        h.tracker.pause();
        h.tracker.samples_tx.send(late_fix(first)).unwrap();
        assert_eq!(h.tracker.drain_samples(), 0);

        h.tracker.resume();
        let second = generation(&h.tracker);
        assert_ne!(first, second);
        h.tracker.samples_tx.send(late_fix(first)).unwrap();
        h.tracker.samples_tx.send(late_fix(second)).unwrap();
        assert_eq!(h.tracker.drain_samples(), 1);
        assert_eq!(h.tracker.path().len(), 2);
        assert_eq!(h.tracker.path()[1].timestamp_ms, 99);
    }

    #[tokio::test(start_paused = true)]
    async fn late_events_do_not_refill_a_cleared_path() {
        let mut h = harness(Vec::new()).await;
        h.tracker.start().await.unwrap();
        let run = generation(&h.tracker);

        let ended = h.tracker.end().await;
        assert!(matches!(ended, Err(AppError::RouteRequestFailed(_))));
        assert_eq!(h.tracker.status(), TripStatus::Idle);

        h.tracker.samples_tx.send(late_fix(run)).unwrap();
        assert_eq!(h.tracker.drain_samples(), 0);
        assert!(h.tracker.path().is_empty());
        assert!(h.tracker.window().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tick_is_reported_and_tracking_continues() {
        let mut h = harness(vec![2]).await;
        h.tracker.start().await.unwrap();

        time::sleep(Duration::from_secs(35)).await;
        assert_eq!(h.tracker.drain_samples(), 2);
        assert_eq!(h.tracker.path().len(), 3);
        assert_eq!(h.tracker.status(), TripStatus::Tracking);
        assert!(h.tracker.is_sampling());

        let notices = h.recorder.notices.lock().unwrap().clone();
        let failures = notices
            .iter()
            .filter(|n| matches!(n, TripNotice::SampleFailed { .. }))
            .count();
        assert_eq!(failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn next_sample_waits_for_the_next_tick() {
        let mut h = harness(Vec::new()).await;
        assert_eq!(h.tracker.next_sample().await, None);

        h.tracker.start().await.unwrap();
        let before = time::Instant::now();
        assert_eq!(h.tracker.next_sample().await, Some(true));
        assert!(before.elapsed() >= Duration::from_secs(10));
        assert_eq!(h.tracker.path().len(), 2);

        h.tracker.pause();
        assert_eq!(h.tracker.next_sample().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_timer_runs_from_start_through_pauses() {
        let mut h = harness(Vec::new()).await;
        assert_eq!(h.tracker.elapsed(), None);

        h.tracker.start().await.unwrap();
        assert_eq!(h.tracker.elapsed().as_deref(), Some("00:00:00"));
        h.clock.advance_ms(3_725_000);
        assert_eq!(h.tracker.elapsed().as_deref(), Some("01:02:05"));

        h.tracker.pause();
        h.clock.advance_ms(60_000);
        assert_eq!(h.tracker.elapsed().as_deref(), Some("01:03:05"));
        assert_eq!(h.tracker.paused_ms(), 0);

        h.tracker.resume();
        assert_eq!(h.tracker.paused_ms(), 60_000);
    }
}
