use std::{env, path::PathBuf, str::FromStr, time::Duration};

use url::Url;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub identity: String,
    pub username: String,
    pub rate_per_mile: f64,
    pub sample_interval: Duration,
    pub step_proximity_m: f64,
    pub arrival_threshold_m: f64,
    pub voice_guidance: bool,
    pub sheets_webhook: Option<Url>,
    pub routing_url: Url,
    pub retry: RetryPolicy,
}

/// How often and how patiently a capability check is retried before the
/// caller falls back to a degraded implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            identity: "default".to_string(),
            username: "user".to_string(),
            rate_per_mile: 0.655,
            sample_interval: Duration::from_secs(10),
            step_proximity_m: 80.0,
            arrival_threshold_m: 100.0,
            voice_guidance: true,
            sheets_webhook: None,
            routing_url: Url::parse("https://router.project-osrm.org/")
                .expect("default routing url is valid"),
            retry: RetryPolicy::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let data_dir = env::var("MILELOG_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let identity = non_empty_var("MILELOG_IDENTITY").unwrap_or(defaults.identity);
        let username = non_empty_var("MILELOG_USERNAME").unwrap_or(defaults.username);

        let rate_per_mile = parse_var("MILELOG_RATE_PER_MILE", defaults.rate_per_mile)?;
        if !rate_per_mile.is_finite() || rate_per_mile < 0.0 {
            return Err(AppError::Config(format!(
                "invalid MILELOG_RATE_PER_MILE: {rate_per_mile}"
            )));
        }

        let interval_secs: u64 = parse_var(
            "MILELOG_SAMPLE_INTERVAL_SECS",
            defaults.sample_interval.as_secs(),
        )?;
        if interval_secs == 0 {
            return Err(AppError::Config(
                "MILELOG_SAMPLE_INTERVAL_SECS must be positive".into(),
            ));
        }

        let step_proximity_m = parse_var("MILELOG_STEP_PROXIMITY_M", defaults.step_proximity_m)?;
        let arrival_threshold_m =
            parse_var("MILELOG_ARRIVAL_THRESHOLD_M", defaults.arrival_threshold_m)?;
        let voice_guidance = parse_var("MILELOG_VOICE_GUIDANCE", defaults.voice_guidance)?;

        let sheets_webhook = non_empty_var("MILELOG_SHEETS_WEBHOOK")
            .map(|raw| {
                Url::parse(&raw)
                    .map_err(|err| AppError::Config(format!("invalid MILELOG_SHEETS_WEBHOOK: {err}")))
            })
            .transpose()?;
        let routing_url = match non_empty_var("MILELOG_ROUTING_URL") {
            Some(raw) => Url::parse(&raw)
                .map(as_base_url)
                .map_err(|err| AppError::Config(format!("invalid MILELOG_ROUTING_URL: {err}")))?,
            None => defaults.routing_url,
        };

        let retry = RetryPolicy {
            attempts: parse_var("MILELOG_RETRY_ATTEMPTS", defaults.retry.attempts)?,
            delay: Duration::from_millis(parse_var(
                "MILELOG_RETRY_DELAY_MS",
                defaults.retry.delay.as_millis() as u64,
            )?),
        };

        Ok(Self {
            data_dir,
            identity,
            username,
            rate_per_mile,
            sample_interval: Duration::from_secs(interval_secs),
            step_proximity_m,
            arrival_threshold_m,
            voice_guidance,
            sheets_webhook,
            routing_url,
            retry,
        })
    }
}

/// Ensures relative joins append to the configured path instead of
/// replacing its last segment.
fn as_base_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty_var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|err| AppError::Config(format!("invalid {name}: {err}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_url_keeps_its_last_path_segment() {
        let base = as_base_url(Url::parse("https://maps.example.com/osrm").unwrap());
        assert_eq!(base.as_str(), "https://maps.example.com/osrm/");
        assert_eq!(
            base.join("route/v1/driving").unwrap().path(),
            "/osrm/route/v1/driving"
        );
    }

    #[test]
    fn base_url_with_slash_is_unchanged() {
        let base = as_base_url(Url::parse("https://router.project-osrm.org/").unwrap());
        assert_eq!(base.as_str(), "https://router.project-osrm.org/");
    }
}
