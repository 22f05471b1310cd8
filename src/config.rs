use std::path::PathBuf;
use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "MedTrack";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding the backend base URL.
pub const ENV_API_URL: &str = "MEDTRACK_API_URL";
/// Environment variable holding the backend anon/public API key.
pub const ENV_API_KEY: &str = "MEDTRACK_API_KEY";
/// Environment variable overriding the HTTP timeout (seconds).
pub const ENV_HTTP_TIMEOUT_SECS: &str = "MEDTRACK_HTTP_TIMEOUT_SECS";

/// Default HTTP timeout for gateway calls.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Storage bucket holding measurement attachments.
pub const ATTACHMENTS_BUCKET: &str = "attachments";

/// Upload attempts before giving up (first try + one retry).
pub const UPLOAD_MAX_ATTEMPTS: u32 = 2;
/// Base delay for upload retries; attempt `n` waits `n * base`.
pub const UPLOAD_RETRY_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Reminder offsets (minutes before the event) used when neither the
/// appointment nor the preferences specify any.
pub const DEFAULT_REMINDER_OFFSETS_MINUTES: &[i64] = &[15];

/// Page size for the notification list.
pub const NOTIFICATION_FETCH_LIMIT: usize = 100;

/// Default `tracing` filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "medtrack=info,warn"
}

/// Get the application data directory
/// ~/MedTrack/ on all platforms. Falls back to the working directory
/// when no home directory can be resolved.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Local attachment cache root (used by `LocalFileStorage`).
pub fn attachments_dir() -> PathBuf {
    app_data_dir().join(ATTACHMENTS_BUCKET)
}

/// Connection settings for the hosted backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Base URL, without trailing slash (e.g. `https://xyz.example.co`).
    pub base_url: String,
    /// Public API key sent as `apikey` on every request.
    pub api_key: String,
    pub timeout_secs: u64,
}

impl GatewayConfig {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }

    /// Read the configuration from the environment.
    ///
    /// Returns `None` when the URL or key is missing so callers can fall
    /// back to an offline gateway.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let url = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty())?;
        let key = lookup(ENV_API_KEY).filter(|v| !v.trim().is_empty())?;
        let mut config = Self::new(url.trim(), key.trim());
        if let Some(secs) = lookup(ENV_HTTP_TIMEOUT_SECS).and_then(|v| v.trim().parse().ok()) {
            config.timeout_secs = secs;
        }
        Some(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn app_data_dir_ends_with_app_name() {
        assert!(app_data_dir().ends_with("MedTrack"));
    }

    #[test]
    fn attachments_dir_under_app_data() {
        assert!(attachments_dir().starts_with(app_data_dir()));
        assert!(attachments_dir().ends_with("attachments"));
    }

    #[test]
    fn gateway_config_trims_trailing_slash() {
        let config = GatewayConfig::new("https://db.example.co/", "key");
        assert_eq!(config.base_url, "https://db.example.co");
        assert_eq!(config.timeout_secs, DEFAULT_HTTP_TIMEOUT_SECS);
    }

    #[test]
    fn gateway_config_from_lookup_requires_url_and_key() {
        assert!(GatewayConfig::from_lookup(lookup_from(&[])).is_none());
        assert!(GatewayConfig::from_lookup(lookup_from(&[(ENV_API_URL, "https://x")])).is_none());
        assert!(GatewayConfig::from_lookup(lookup_from(&[
            (ENV_API_URL, "https://x"),
            (ENV_API_KEY, "  "),
        ]))
        .is_none());
    }

    #[test]
    fn gateway_config_from_lookup_reads_timeout() {
        let config = GatewayConfig::from_lookup(lookup_from(&[
            (ENV_API_URL, "https://x/"),
            (ENV_API_KEY, "anon"),
            (ENV_HTTP_TIMEOUT_SECS, "5"),
        ]))
        .unwrap();
        assert_eq!(config.base_url, "https://x");
        assert_eq!(config.api_key, "anon");
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn default_filter_targets_crate() {
        assert!(default_log_filter().starts_with("medtrack="));
    }
}
