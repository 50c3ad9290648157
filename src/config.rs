//! Client configuration loaded from environment variables.
//!
//! Every backend URL is optional: when one is missing the matching
//! component falls back to demo behavior instead of failing.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Client configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the auth API (`{auth}/login`, `{auth}/refresh`)
    pub auth_base_url: Option<String>,
    /// Detections collection endpoint
    pub detections_url: Option<String>,
    /// Where the persisted session is kept between runs
    pub session_store_path: PathBuf,
    /// Delay added after token expiry before the forced logout fires
    pub logout_guard: Duration,
    /// How long before expiry the proactive refresh fires
    pub refresh_lead: Duration,
    /// Default detection polling interval
    pub poll_interval: Duration,
    /// Timeout for every backend HTTP request
    pub http_timeout: Duration,
    /// Force demo data for detections even when an endpoint is configured
    pub demo_mode: bool,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            auth_base_url: None,
            detections_url: None,
            session_store_path: PathBuf::from(".emotion-session.json"),
            logout_guard: Duration::from_millis(1000),
            refresh_lead: Duration::from_millis(60_000),
            poll_interval: Duration::from_millis(5000),
            http_timeout: Duration::from_secs(10),
            demo_mode: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `API_AUTH_URL` and `API_DETECTIONS_URL` win over URLs derived from
    /// `BASE_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let base_url = non_empty_var("BASE_URL").map(|v| trim_url(&v));
        let defaults = Self::default();

        Ok(Self {
            auth_base_url: non_empty_var("API_AUTH_URL")
                .map(|v| trim_url(&v))
                .or_else(|| base_url.as_ref().map(|b| format!("{}/auth", b))),
            detections_url: non_empty_var("API_DETECTIONS_URL")
                .map(|v| trim_url(&v))
                .or_else(|| base_url.as_ref().map(|b| format!("{}/detections", b))),
            session_store_path: non_empty_var("SESSION_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.session_store_path),
            logout_guard: millis_var("LOGOUT_GUARD_MS")?.unwrap_or(defaults.logout_guard),
            refresh_lead: millis_var("REFRESH_LEAD_MS")?.unwrap_or(defaults.refresh_lead),
            poll_interval: millis_var("POLL_INTERVAL_MS")?.unwrap_or(defaults.poll_interval),
            http_timeout: match non_empty_var("HTTP_TIMEOUT_SECS") {
                Some(v) => Duration::from_secs(
                    v.parse()
                        .map_err(|_| ConfigError::Invalid("HTTP_TIMEOUT_SECS", v))?,
                ),
                None => defaults.http_timeout,
            },
            demo_mode: non_empty_var("DEMO_MODE")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        })
    }

    /// Build the shared HTTP client honoring the configured timeout.
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        reqwest::Client::builder()
            .timeout(self.http_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn millis_var(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    match non_empty_var(name) {
        Some(v) => v
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ConfigError::Invalid(name, v)),
        None => Ok(None),
    }
}

/// Strip trailing slashes so endpoint paths can be appended with `/`.
pub fn trim_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    Invalid(&'static str, String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}
