use std::{collections::HashSet, sync::Arc};

use tracing::{debug, info};

use crate::{
    config::RetryPolicy,
    models::{
        geo::{GeoPoint, LatLng},
        route::ResolvedRoute,
        trip::TripStatus,
    },
    retry::with_bounded_retry,
};

/// Text-to-speech output.
pub trait SpeechAnnouncer: Send + Sync {
    fn is_ready(&self) -> bool {
        true
    }
    fn cancel(&self);
    fn speak(&self, text: &str);
}

/// Visual surface for routes, instructions and the arrival prompt.
pub trait GuidanceDisplay: Send + Sync {
    fn show_route(&self, route: &ResolvedRoute);
    fn show_instruction(&self, text: &str);
    fn prompt_arrival(&self, distance_m: f64, destination: &str);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuidanceSettings {
    pub step_proximity_m: f64,
    pub arrival_threshold_m: f64,
    pub voice_enabled: bool,
}

impl Default for GuidanceSettings {
    fn default() -> Self {
        Self {
            step_proximity_m: 80.0,
            arrival_threshold_m: 100.0,
            voice_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub name: String,
    pub location: LatLng,
}

/// What a single position update produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Guidance {
    Step { index: usize, instruction: String },
    Arrival { distance_m: f64 },
}

struct PendingStep {
    location: LatLng,
    instruction: String,
}

pub struct NavigationAnnouncer {
    settings: GuidanceSettings,
    speech: Arc<dyn SpeechAnnouncer>,
    display: Arc<dyn GuidanceDisplay>,
    speech_available: bool,
    steps: Vec<PendingStep>,
    announced: HashSet<usize>,
    destination: Option<Destination>,
    destination_from_route: bool,
    arrival_prompted: bool,
}

impl NavigationAnnouncer {
    pub fn new(
        settings: GuidanceSettings,
        speech: Arc<dyn SpeechAnnouncer>,
        display: Arc<dyn GuidanceDisplay>,
    ) -> Self {
        Self {
            settings,
            speech,
            display,
            speech_available: true,
            steps: Vec::new(),
            announced: HashSet::new(),
            destination: None,
            destination_from_route: false,
            arrival_prompted: false,
        }
    }

    pub fn set_voice_enabled(&mut self, enabled: bool) {
        self.settings.voice_enabled = enabled;
        if !enabled {
            self.speech.cancel();
        }
    }

    pub fn voice_enabled(&self) -> bool {
        self.settings.voice_enabled
    }

    pub fn speech_available(&self) -> bool {
        self.speech_available
    }

    pub fn set_destination(&mut self, destination: Destination) {
        info!(name = %destination.name, "destination set");
        self.destination = Some(destination);
        self.destination_from_route = false;
        self.arrival_prompted = false;
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    /// Shows the route without starting step guidance.
    pub fn display_route(&self, route: &ResolvedRoute) {
        self.display.show_route(route);
    }

    /// Shows the route and arms step guidance on it. Waits for the speech
    /// engine under `retry`; if it never becomes ready, guidance continues
    /// visual-only and `false` is returned.
    pub async fn begin_route(&mut self, route: &ResolvedRoute, retry: RetryPolicy) -> bool {
        self.display.show_route(route);
        self.steps = route
            .steps()
            .map(|step| PendingStep {
                location: step.start_location,
                instruction: step.plain_instruction(),
            })
            .collect();
        self.announced.clear();
        if self.destination.is_none() {
            if let Some(location) = route.destination() {
                let name = route
                    .legs
                    .last()
                    .map(|leg| leg.end_address.clone())
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| "Destination".to_string());
                self.destination = Some(Destination { name, location });
                self.destination_from_route = true;
            }
        }

        let speech = Arc::clone(&self.speech);
        self.speech_available = with_bounded_retry(retry, "speech synthesis", || {
            let ready = speech.is_ready();
            async move {
                if ready {
                    Ok(())
                } else {
                    Err("speech engine not ready")
                }
            }
        })
        .await
        .is_some();

        debug!(
            steps = self.steps.len(),
            speech = self.speech_available,
            "navigation guidance armed"
        );
        self.speak("Navigation initiated.");
        self.speech_available
    }

    /// Drops the previous route's steps, its derived destination and the
    /// arrival prompt for a new trip. A destination set by the user is kept.
    pub fn reset(&mut self) {
        self.steps.clear();
        self.announced.clear();
        if self.destination_from_route {
            self.destination = None;
            self.destination_from_route = false;
        }
        self.arrival_prompted = false;
        self.speech.cancel();
        self.display.show_instruction("");
    }

    pub fn announced_steps(&self) -> usize {
        self.announced.len()
    }

    pub fn observe(&mut self, point: &GeoPoint, status: TripStatus) -> Vec<Guidance> {
        if let Some(arrival) = self.check_arrival(point, status) {
            return vec![arrival];
        }

        let mut emitted = Vec::new();
        for (index, step) in self.steps.iter().enumerate() {
            if self.announced.contains(&index) {
                continue;
            }
            if point.distance_to(&step.location) < self.settings.step_proximity_m {
                self.announced.insert(index);
                emitted.push(Guidance::Step {
                    index,
                    instruction: step.instruction.clone(),
                });
            }
        }
        for guidance in &emitted {
            if let Guidance::Step { index, instruction } = guidance {
                debug!(index, %instruction, "announcing step");
                self.display.show_instruction(&format!("Next: {instruction}"));
                self.speak(&format!("Next: {instruction}"));
            }
        }
        emitted
    }

    fn check_arrival(&mut self, point: &GeoPoint, status: TripStatus) -> Option<Guidance> {
        if status != TripStatus::Tracking || self.arrival_prompted {
            return None;
        }
        let destination = self.destination.as_ref()?;
        let distance_m = point.distance_to(&destination.location);
        if distance_m >= self.settings.arrival_threshold_m {
            return None;
        }
        self.arrival_prompted = true;
        info!(distance_m = distance_m.round(), name = %destination.name, "arrival near destination");
        self.display.prompt_arrival(distance_m, &destination.name);
        let line = format!("You've arrived at {}. Trip ended.", destination.name);
        self.speak(&line);
        Some(Guidance::Arrival { distance_m })
    }

    /// Most recent utterance wins: anything still being spoken is cut off.
    pub fn speak(&self, text: &str) {
        if !self.settings.voice_enabled || !self.speech_available {
            return;
        }
        self.speech.cancel();
        self.speech.speak(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::route::{Leg, Step};
    use std::{sync::Mutex, time::Duration};

    #[derive(Default)]
    struct Recorder {
        spoken: Mutex<Vec<String>>,
        cancels: Mutex<usize>,
        banners: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
        ready: bool,
    }

    impl SpeechAnnouncer for Recorder {
        fn is_ready(&self) -> bool {
            self.ready
        }
        fn cancel(&self) {
            *self.cancels.lock().unwrap() += 1;
        }
        fn speak(&self, text: &str) {
            self.spoken.lock().unwrap().push(text.to_string());
        }
    }

    impl GuidanceDisplay for Recorder {
        fn show_route(&self, _route: &ResolvedRoute) {}
        fn show_instruction(&self, text: &str) {
            self.banners.lock().unwrap().push(text.to_string());
        }
        fn prompt_arrival(&self, _distance_m: f64, destination: &str) {
            self.prompts.lock().unwrap().push(destination.to_string());
        }
    }

    fn route() -> ResolvedRoute {
        let step = |lat: f64, text: &str| Step {
            instruction_text: text.into(),
            start_location: LatLng::new(lat, -121.5),
            maneuver_kind: None,
            distance_meters: 500.0,
            duration_seconds: 60.0,
        };
        ResolvedRoute {
            legs: vec![Leg {
                start_address: "Office".into(),
                end_address: "Warehouse".into(),
                end_location: Some(LatLng::new(38.60, -121.5)),
                steps: vec![step(38.50, "Head <b>north</b>"), step(38.55, "Turn right")],
            }],
            distance_meters: 11_000.0,
            duration_seconds: 900.0,
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 2,
            delay: Duration::from_millis(10),
        }
    }

    fn at(lat: f64) -> GeoPoint {
        GeoPoint::new(lat, -121.5, 0)
    }

    #[tokio::test]
    async fn each_step_is_spoken_once_even_on_reentry() {
        let rec = Arc::new(Recorder {
            ready: true,
            ..Recorder::default()
        });
        let mut nav = NavigationAnnouncer::new(GuidanceSettings::default(), rec.clone(), rec.clone());
        assert!(nav.begin_route(&route(), policy()).await);

        let first = nav.observe(&at(38.50), TripStatus::Idle);
        nav.observe(&at(38.52), TripStatus::Idle);
        let again = nav.observe(&at(38.50), TripStatus::Idle);

        assert_eq!(
            first,
            vec![Guidance::Step {
                index: 0,
                instruction: "Head north".into()
            }]
        );
        assert!(again.is_empty());
        let spoken = rec.spoken.lock().unwrap().clone();
        assert_eq!(spoken, vec!["Navigation initiated.", "Next: Head north"]);
        assert_eq!(*rec.cancels.lock().unwrap(), spoken.len());
    }

    #[tokio::test]
    async fn arrival_prompts_once_while_tracking() {
        let rec = Arc::new(Recorder {
            ready: true,
            ..Recorder::default()
        });
        let mut nav = NavigationAnnouncer::new(GuidanceSettings::default(), rec.clone(), rec.clone());
        nav.begin_route(&route(), policy()).await;

        assert!(nav.observe(&at(38.6003), TripStatus::Paused).is_empty());
        let arrived = nav.observe(&at(38.6003), TripStatus::Tracking);
        assert!(matches!(arrived.as_slice(), [Guidance::Arrival { .. }]));
        nav.observe(&at(38.6002), TripStatus::Tracking);

        assert_eq!(rec.prompts.lock().unwrap().as_slice(), ["Warehouse"]);
    }

    #[tokio::test]
    async fn reset_drops_previous_route_guidance() {
        let rec = Arc::new(Recorder {
            ready: true,
            ..Recorder::default()
        });
        let mut nav = NavigationAnnouncer::new(GuidanceSettings::default(), rec.clone(), rec.clone());
        nav.begin_route(&route(), policy()).await;
        nav.observe(&at(38.50), TripStatus::Idle);
        assert_eq!(nav.announced_steps(), 1);
        assert_eq!(nav.destination().map(|d| d.name.as_str()), Some("Warehouse"));

        nav.reset();
        assert_eq!(nav.announced_steps(), 0);
        assert!(nav.destination().is_none());
        assert!(nav.observe(&at(38.60), TripStatus::Tracking).is_empty());
        assert!(nav.observe(&at(38.55), TripStatus::Tracking).is_empty());
        assert!(rec.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn user_destination_survives_reset() {
        let rec = Arc::new(Recorder {
            ready: true,
            ..Recorder::default()
        });
        let mut nav = NavigationAnnouncer::new(GuidanceSettings::default(), rec.clone(), rec.clone());
        nav.set_destination(Destination {
            name: "Depot".into(),
            location: LatLng::new(38.70, -121.5),
        });
        nav.begin_route(&route(), policy()).await;
        nav.reset();

        assert_eq!(nav.destination().map(|d| d.name.as_str()), Some("Depot"));
        let arrived = nav.observe(&at(38.7002), TripStatus::Tracking);
        assert!(matches!(arrived.as_slice(), [Guidance::Arrival { .. }]));
        assert_eq!(rec.prompts.lock().unwrap().as_slice(), ["Depot"]);
    }

    #[test]
    fn muting_cancels_speech_and_silences_output() {
        let rec = Arc::new(Recorder {
            ready: true,
            ..Recorder::default()
        });
        let mut nav = NavigationAnnouncer::new(GuidanceSettings::default(), rec.clone(), rec.clone());
        nav.set_voice_enabled(false);
        assert!(!nav.voice_enabled());
        nav.speak("Next: Turn right");
        assert!(rec.spoken.lock().unwrap().is_empty());
        assert_eq!(*rec.cancels.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_visual_only_when_speech_never_ready() {
        let rec = Arc::new(Recorder::default());
        let mut nav = NavigationAnnouncer::new(GuidanceSettings::default(), rec.clone(), rec.clone());
        assert!(!nav.begin_route(&route(), policy()).await);

        nav.observe(&at(38.55), TripStatus::Idle);
        assert!(rec.spoken.lock().unwrap().is_empty());
        assert_eq!(rec.banners.lock().unwrap().as_slice(), ["Next: Turn right"]);
    }
}
