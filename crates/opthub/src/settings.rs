use std::path::PathBuf;
use std::time::Duration;

use opthub_core::{OptHubError, PollConfig, Result, WorkflowConfig};

pub const DEFAULT_API_URL: &str = "https://api.opthub.ai";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const API_KEY: &str = "OPTHUB_API_KEY";
const API_URL: &str = "OPTHUB_API_URL";
const POLL_INITIAL: &str = "OPTHUB_POLL_INITIAL_SECS";
const POLL_MAX: &str = "OPTHUB_POLL_MAX_SECS";
const POLL_MULTIPLIER: &str = "OPTHUB_POLL_MULTIPLIER";
const POLL_JITTER: &str = "OPTHUB_POLL_JITTER_SECS";
const REQUEST_TIMEOUT: &str = "OPTHUB_REQUEST_TIMEOUT_SECS";
const HOME: &str = "OPTHUB_HOME";

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: String,
    pub api_url: String,
    pub poll: PollConfig,
    /// Limit for a single HTTP request.
    pub request_timeout: Duration,
    /// Directory holding local client state such as the match selection.
    pub home: PathBuf,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup, empty values count as unset.
    /// ```
    /// use std::time::Duration;
    /// use opthub_lib::settings::Settings;
    ///
    /// let settings = Settings::from_lookup(|key| match key {
    ///     "OPTHUB_API_KEY" => Some("secret".to_string()),
    ///     "OPTHUB_POLL_MAX_SECS" => Some("60".to_string()),
    ///     "OPTHUB_HOME" => Some("/tmp/opthub".to_string()),
    ///     _ => None,
    /// }).unwrap();
    ///
    /// assert_eq!(settings.api_url, "https://api.opthub.ai");
    /// assert_eq!(settings.poll.max_delay, Duration::from_secs(60));
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get(API_KEY).ok_or_else(|| OptHubError::Config {
            message: format!("environment variable '{}' is required", API_KEY),
        })?;

        let api_url = get(API_URL)
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let mut poll = PollConfig::default();
        if let Some(v) = get(POLL_INITIAL) {
            poll.initial_delay = parse_secs(POLL_INITIAL, &v)?;
        }
        if let Some(v) = get(POLL_MAX) {
            poll.max_delay = parse_secs(POLL_MAX, &v)?;
        }
        if let Some(v) = get(POLL_MULTIPLIER) {
            poll.multiplier = v.trim().parse().map_err(|_| OptHubError::Config {
                message: format!("'{}' is not a number: {:?}", POLL_MULTIPLIER, v),
            })?;
        }
        if let Some(v) = get(POLL_JITTER) {
            poll.max_jitter = parse_secs(POLL_JITTER, &v)?;
        }
        poll.validate()?;

        let request_timeout = match get(REQUEST_TIMEOUT) {
            Some(v) => parse_secs(REQUEST_TIMEOUT, &v)?,
            None => DEFAULT_REQUEST_TIMEOUT,
        };
        if request_timeout.is_zero() {
            return Err(OptHubError::Config {
                message: format!("'{}' must be greater than zero", REQUEST_TIMEOUT),
            });
        }

        let home = match get(HOME) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .map(|dir| dir.join("opthub"))
                .ok_or_else(|| OptHubError::Config {
                    message: format!("no config directory found, set '{}'", HOME),
                })?,
        };

        Ok(Settings {
            api_key,
            api_url,
            poll,
            request_timeout,
            home,
        })
    }

    pub fn workflow_config(&self) -> WorkflowConfig {
        WorkflowConfig {
            poll: self.poll.clone(),
            ..Default::default()
        }
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| OptHubError::Config {
            message: format!("'{}' is not a valid number of seconds: {:?}", key, value),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn api_key_is_required() {
        let err = settings(&[(HOME, "/tmp")]).unwrap_err();
        assert!(matches!(err, OptHubError::Config { .. }));

        let err = settings(&[(API_KEY, "  "), (HOME, "/tmp")]).unwrap_err();
        assert!(err.to_string().contains(API_KEY));
    }

    #[test]
    fn poll_overrides() {
        let s = settings(&[
            (API_KEY, "k"),
            (API_URL, "http://localhost:8080/"),
            (POLL_INITIAL, "0.25"),
            (POLL_MAX, "10"),
            (POLL_MULTIPLIER, "2"),
            (POLL_JITTER, "0"),
            (HOME, "/tmp/opthub"),
        ])
        .unwrap();

        assert_eq!(s.api_url, "http://localhost:8080");
        assert_eq!(s.poll.initial_delay, Duration::from_millis(250));
        assert_eq!(s.poll.max_delay, Duration::from_secs(10));
        assert_eq!(s.poll.multiplier, 2.0);
        assert_eq!(s.poll.max_jitter, Duration::ZERO);
        assert_eq!(s.home, PathBuf::from("/tmp/opthub"));
        assert_eq!(s.workflow_config().poll, s.poll);
        assert_eq!(s.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn request_timeout() {
        let base = [(API_KEY, "k"), (HOME, "/tmp")];

        let s = settings(&[base[0], base[1], (REQUEST_TIMEOUT, "2.5")]).unwrap();
        assert_eq!(s.request_timeout, Duration::from_millis(2500));

        let err = settings(&[base[0], base[1], (REQUEST_TIMEOUT, "0")]).unwrap_err();
        assert!(err.to_string().contains(REQUEST_TIMEOUT));
    }

    #[test]
    fn bad_poll_values_are_rejected() {
        let base = [(API_KEY, "k"), (HOME, "/tmp")];

        let err = settings(&[base[0], base[1], (POLL_INITIAL, "-1")]).unwrap_err();
        assert!(err.to_string().contains(POLL_INITIAL));

        let err = settings(&[base[0], base[1], (POLL_MULTIPLIER, "fast")]).unwrap_err();
        assert!(err.to_string().contains(POLL_MULTIPLIER));

        // Valid numbers that make an invalid configuration.
        let err = settings(&[base[0], base[1], (POLL_MULTIPLIER, "0.5")]).unwrap_err();
        assert!(matches!(err, OptHubError::Config { .. }));

        let err = settings(&[base[0], base[1], (POLL_INITIAL, "600")]).unwrap_err();
        assert!(matches!(err, OptHubError::Config { .. }));
    }
}
