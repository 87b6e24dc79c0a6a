//! Stream configuration loaded from environment variables or a JSON file.
//!
//! Credentials are optional, but when used both must be set:
//! - `BITX_API_KEY_ID`: API key id
//! - `BITX_API_KEY_SECRET`: API key secret
//!
//! Optional overrides:
//! - `BITX_PAIR`: trading pair (default `XBTZAR`)
//! - `BITX_STREAM_URL`: streaming base URL
//! - `BITX_API_URL`: REST base URL

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::dispatch::Overflow;
use crate::models::Credentials;

/// Default streaming endpoint; the pair is appended as a path segment.
pub const DEFAULT_STREAM_URL: &str = "wss://ws.luno.com/api/1/stream";

/// Default REST endpoint used for snapshots.
pub const DEFAULT_API_URL: &str = "https://api.luno.com";

pub const DEFAULT_PAIR: &str = "XBTZAR";

/// Everything a session needs; passed in at construction.
///
/// Durations are expressed in milliseconds when loaded from a file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub pair: String,
    pub stream_url: String,
    pub api_url: String,
    #[serde(skip)]
    pub credentials: Option<Credentials>,
    pub handshake_timeout_ms: u64,
    pub snapshot_timeout_ms: u64,
    /// No frame for this long is treated as a dropped connection.
    pub idle_timeout_ms: u64,
    pub keepalive_interval_ms: u64,
    pub backoff: BackoffConfig,
    /// Consecutive snapshot `RemoteError`s tolerated before giving up.
    pub max_snapshot_retries: u32,
    /// Per-subscriber event queue depth.
    pub queue_capacity: usize,
    pub overflow: Overflow,
}

/// Reconnect backoff bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 60_000,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    pub fn initial(&self) -> Duration {
        Duration::from_millis(self.initial_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            pair: DEFAULT_PAIR.to_string(),
            stream_url: DEFAULT_STREAM_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            credentials: None,
            handshake_timeout_ms: 10_000,
            snapshot_timeout_ms: 10_000,
            idle_timeout_ms: 90_000,
            keepalive_interval_ms: 30_000,
            backoff: BackoffConfig::default(),
            max_snapshot_retries: 5,
            queue_capacity: 1_024,
            overflow: Overflow::DropOldest,
        }
    }
}

impl StreamConfig {
    /// Default configuration for one pair.
    pub fn for_pair(pair: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from a JSON file; missing fields keep their
    /// defaults. Credentials are never read from the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or fails
    /// [`validate`](Self::validate).
    pub fn load(path: &Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            crate::StreamError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| crate::StreamError::Config(format!("invalid {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the session cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Config`](crate::StreamError::Config) naming
    /// the offending field.
    pub fn validate(&self) -> crate::Result<()> {
        if self.pair.trim().is_empty() {
            return Err(crate::StreamError::Config("pair must not be empty".into()));
        }
        if self.queue_capacity == 0 {
            return Err(crate::StreamError::Config(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.backoff.initial_ms == 0 || self.backoff.max_ms < self.backoff.initial_ms {
            return Err(crate::StreamError::Config(
                "backoff requires 0 < initial_ms <= max_ms".into(),
            ));
        }
        for (name, value) in [
            ("handshake_timeout_ms", self.handshake_timeout_ms),
            ("snapshot_timeout_ms", self.snapshot_timeout_ms),
            ("idle_timeout_ms", self.idle_timeout_ms),
            ("keepalive_interval_ms", self.keepalive_interval_ms),
        ] {
            if value == 0 {
                return Err(crate::StreamError::Config(format!(
                    "{name} must be greater than 0"
                )));
            }
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

/// Loads the stream configuration from environment variables.
///
/// API credentials are optional (public streams) but when one is set
/// both must be present.
///
/// # Errors
///
/// Returns [`StreamError::Config`](crate::StreamError::Config) if only
/// one of the two credential variables is set.
pub fn fetch_config() -> crate::Result<StreamConfig> {
    let mut config = StreamConfig::default();
    apply_env(&mut config)?;
    Ok(config)
}

/// Overlays environment variables onto an existing configuration.
///
/// # Errors
///
/// Same as [`fetch_config`].
pub fn apply_env(config: &mut StreamConfig) -> crate::Result<()> {
    if let Some(pair) = non_empty_var("BITX_PAIR") {
        config.pair = pair;
    }
    if let Some(url) = non_empty_var("BITX_STREAM_URL") {
        config.stream_url = url;
    }
    if let Some(url) = non_empty_var("BITX_API_URL") {
        config.api_url = url;
    }

    let key_id = non_empty_var("BITX_API_KEY_ID");
    let key_secret = non_empty_var("BITX_API_KEY_SECRET");

    config.credentials = match (key_id, key_secret) {
        (Some(id), Some(secret)) => Some(Credentials::new(id, secret)),
        (Some(_), None) => {
            return Err(crate::StreamError::Config(
                "BITX_API_KEY_ID is set but BITX_API_KEY_SECRET is missing".to_string(),
            ));
        }
        (None, Some(_)) => {
            return Err(crate::StreamError::Config(
                "BITX_API_KEY_SECRET is set but BITX_API_KEY_ID is missing".to_string(),
            ));
        }
        (None, None) => None,
    };

    Ok(())
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    /// Helper that temporarily sets env vars, runs `f`, then restores originals.
    ///
    /// # Safety
    ///
    /// No other test may read or write these variables concurrently.
    fn with_env<F: FnOnce()>(vars: &[(&str, Option<&str>)], f: F) {
        let originals: Vec<(&str, Option<String>)> = vars
            .iter()
            .map(|(k, _)| (*k, std::env::var(k).ok()))
            .collect();

        for (k, v) in vars {
            // SAFETY: only `env_overrides_and_credentials` touches these variables.
            unsafe {
                match v {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }

        f();

        for (k, original) in originals {
            // SAFETY: as above.
            unsafe {
                match original {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }
    }

    const ALL_VARS: [&str; 5] = [
        "BITX_PAIR",
        "BITX_STREAM_URL",
        "BITX_API_URL",
        "BITX_API_KEY_ID",
        "BITX_API_KEY_SECRET",
    ];

    fn cleared() -> Vec<(&'static str, Option<&'static str>)> {
        ALL_VARS.iter().map(|k| (*k, None)).collect()
    }

    #[test]
    fn env_overrides_and_credentials() {
        // All env cases share one test; they mutate process state.
        with_env(&cleared(), || {
            let config = fetch_config().unwrap();
            assert_eq!(config.pair, DEFAULT_PAIR);
            assert_eq!(config.stream_url, DEFAULT_STREAM_URL);
            assert!(config.credentials.is_none());
        });

        with_env(
            &[
                ("BITX_PAIR", Some("ETHZAR")),
                ("BITX_STREAM_URL", Some("wss://custom.example.com")),
                ("BITX_API_KEY_ID", Some("test-key")),
                ("BITX_API_KEY_SECRET", Some("test-secret")),
            ],
            || {
                let config = fetch_config().unwrap();
                assert_eq!(config.pair, "ETHZAR");
                assert_eq!(config.stream_url, "wss://custom.example.com");
                let creds = config.credentials.unwrap();
                assert_eq!(creds.api_key_id, "test-key");
                assert_eq!(creds.api_key_secret.as_str(), "test-secret");
            },
        );

        with_env(
            &[
                ("BITX_API_KEY_ID", Some("key-only")),
                ("BITX_API_KEY_SECRET", None),
            ],
            || {
                let err = fetch_config().unwrap_err();
                assert!(err.to_string().contains("BITX_API_KEY_SECRET is missing"));
            },
        );

        with_env(
            &[
                ("BITX_API_KEY_ID", None),
                ("BITX_API_KEY_SECRET", Some("secret-only")),
            ],
            || {
                let err = fetch_config().unwrap_err();
                assert!(err.to_string().contains("BITX_API_KEY_ID is missing"));
            },
        );

        with_env(
            &[
                ("BITX_PAIR", Some("")),
                ("BITX_API_KEY_ID", Some("")),
                ("BITX_API_KEY_SECRET", Some("")),
            ],
            || {
                let config = fetch_config().unwrap();
                assert_eq!(config.pair, DEFAULT_PAIR);
                assert!(config.credentials.is_none());
            },
        );
    }

    #[test]
    fn load_overrides_defaults_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"pair":"XBTNGN","snapshot_timeout_ms":2500,"backoff":{{"max_ms":5000}},"overflow":"drop_newest"}}"#
        )
        .unwrap();

        let config = StreamConfig::load(file.path()).unwrap();

        assert_eq!(config.pair, "XBTNGN");
        assert_eq!(config.snapshot_timeout(), Duration::from_millis(2500));
        assert_eq!(config.backoff.max(), Duration::from_secs(5));
        assert_eq!(config.backoff.initial(), Duration::from_secs(1));
        assert_eq!(config.overflow, Overflow::DropNewest);
        assert_eq!(config.queue_capacity, 1_024);
    }

    #[test]
    fn load_rejects_invalid_values() {
        for field in [
            "queue_capacity",
            "handshake_timeout_ms",
            "snapshot_timeout_ms",
            "idle_timeout_ms",
            "keepalive_interval_ms",
        ] {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            write!(file, r#"{{"{field}":0}}"#).unwrap();

            let err = StreamConfig::load(file.path()).unwrap_err();
            assert!(err.to_string().contains(field), "{field}: {err}");
        }
    }

    #[test]
    fn defaults_pass_validation() {
        assert!(StreamConfig::for_pair("XBTZAR").validate().is_ok());
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = StreamConfig::load(Path::new("/nonexistent/bitx.json")).unwrap_err();
        assert!(matches!(err, crate::StreamError::Config(_)));
    }
}
