//! Configuration for [`Client`](crate::Client).
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. Environment variables (`PULPLIB_*`)
//! 2. TOML config file (`~/.config/pulplib/config.toml`)
//! 3. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::poller::{
    DEFAULT_ACTIVITY_INTERVAL, DEFAULT_MAX_POLL_FAILURES, DEFAULT_POLL_INTERVAL, PollSettings,
};
use crate::pool::DEFAULT_REQUEST_THREADS;
use crate::retry::{
    DEFAULT_JITTER, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_SLEEP, DEFAULT_MULTIPLIER, DEFAULT_SLEEP,
    RetryPolicy,
};

/// Default number of results requested per search page.
pub const DEFAULT_PAGE_SIZE: usize = 2000;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The server URL could not be parsed.
    #[error("invalid server url '{value}': {source}")]
    InvalidUrl {
        value: String,
        source: url::ParseError,
    },

    /// A setting had a value of the wrong type or range.
    #[error("invalid value for {name}: '{value}'")]
    InvalidValue { name: String, value: String },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    retry: RetryFileConfig,
    poll: PollFileConfig,
    search: SearchFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    url: Option<String>,
    request_threads: Option<usize>,
}

/// `[retry]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RetryFileConfig {
    attempts: Option<u32>,
    sleep_secs: Option<f64>,
    multiplier: Option<f64>,
    max_sleep_secs: Option<f64>,
    jitter: Option<f64>,
}

/// `[poll]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct PollFileConfig {
    interval_secs: Option<f64>,
    activity_interval_secs: Option<u64>,
    max_failures: Option<u32>,
}

/// `[search]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SearchFileConfig {
    page_size: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// Base URL of the Pulp server, always ending in `/`.
    pub url: Option<Url>,
    /// Requests performed concurrently, across all operations.
    pub request_threads: usize,

    // -- Retry --
    /// Attempts per request or task submission, including the first.
    pub retry_attempts: u32,
    /// Delay before the first retry.
    pub retry_sleep: Duration,
    pub retry_multiplier: f64,
    /// Upper bound on a single retry delay.
    pub retry_max_sleep: Duration,
    /// Relative random spread applied to each delay.
    pub retry_jitter: f64,

    // -- Polling --
    pub poll_interval: Duration,
    /// Pause between "still waiting" log lines.
    pub activity_interval: Duration,
    /// Consecutive failed polls tolerated before pending futures fail.
    pub max_poll_failures: u32,

    // -- Search --
    pub page_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: None,
            request_threads: DEFAULT_REQUEST_THREADS,
            retry_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_sleep: DEFAULT_SLEEP,
            retry_multiplier: DEFAULT_MULTIPLIER,
            retry_max_sleep: DEFAULT_MAX_SLEEP,
            retry_jitter: DEFAULT_JITTER,
            poll_interval: DEFAULT_POLL_INTERVAL,
            activity_interval: DEFAULT_ACTIVITY_INTERVAL,
            max_poll_failures: DEFAULT_MAX_POLL_FAILURES,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ClientConfig {
    /// Load configuration from the environment and a TOML file.
    ///
    /// If `explicit_path` is given and the file does not exist, returns an
    /// error. Otherwise the default path (`~/.config/pulplib/config.toml`)
    /// is tried and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or a
    /// setting has an invalid value.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = load_config_file(explicit_path)?;
        Self::resolve(&file, |name| std::env::var(name).ok())
    }

    /// Parses a TOML document without consulting the environment.
    ///
    /// # Errors
    ///
    /// As [`load`](Self::load).
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(contents)?;
        Self::resolve(&file, |_| None)
    }

    /// Resolve a `ClientConfig` from a parsed config file and an
    /// environment lookup.
    ///
    /// Priority: env > file > default. Separated from `load()` so tests
    /// can supply their own environment.
    fn resolve(
        file: &ConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let url = match env("PULPLIB_URL").or_else(|| file.server.url.clone()) {
            Some(raw) => Some(parse_base_url(&raw)?),
            None => None,
        };

        let request_threads = match env("PULPLIB_REQUEST_THREADS") {
            Some(raw) => parse_env("PULPLIB_REQUEST_THREADS", &raw)?,
            None => file
                .server
                .request_threads
                .unwrap_or(defaults.request_threads),
        };
        if request_threads == 0 {
            return Err(invalid("request_threads", request_threads));
        }

        let retry_attempts = match env("PULPLIB_RETRY_ATTEMPTS") {
            Some(raw) => parse_env("PULPLIB_RETRY_ATTEMPTS", &raw)?,
            None => file.retry.attempts.unwrap_or(defaults.retry_attempts),
        };
        let retry_sleep = match env("PULPLIB_RETRY_SLEEP") {
            Some(raw) => secs("PULPLIB_RETRY_SLEEP", parse_env("PULPLIB_RETRY_SLEEP", &raw)?)?,
            None => file
                .retry
                .sleep_secs
                .map_or(Ok(defaults.retry_sleep), |s| secs("retry.sleep_secs", s))?,
        };
        let retry_max_sleep = match env("PULPLIB_RETRY_MAX_SLEEP") {
            Some(raw) => secs(
                "PULPLIB_RETRY_MAX_SLEEP",
                parse_env("PULPLIB_RETRY_MAX_SLEEP", &raw)?,
            )?,
            None => file
                .retry
                .max_sleep_secs
                .map_or(Ok(defaults.retry_max_sleep), |s| {
                    secs("retry.max_sleep_secs", s)
                })?,
        };
        let retry_multiplier = file.retry.multiplier.unwrap_or(defaults.retry_multiplier);
        if !retry_multiplier.is_finite() || retry_multiplier < 1.0 {
            return Err(invalid("retry.multiplier", retry_multiplier));
        }
        let retry_jitter = file.retry.jitter.unwrap_or(defaults.retry_jitter);
        if !(0.0..=1.0).contains(&retry_jitter) {
            return Err(invalid("retry.jitter", retry_jitter));
        }

        let poll_interval = match env("PULPLIB_POLL_INTERVAL") {
            Some(raw) => secs(
                "PULPLIB_POLL_INTERVAL",
                parse_env("PULPLIB_POLL_INTERVAL", &raw)?,
            )?,
            None => file
                .poll
                .interval_secs
                .map_or(Ok(defaults.poll_interval), |s| secs("poll.interval_secs", s))?,
        };

        let page_size = match env("PULPLIB_PAGE_SIZE") {
            Some(raw) => parse_env("PULPLIB_PAGE_SIZE", &raw)?,
            None => file.search.page_size.unwrap_or(defaults.page_size),
        };
        if page_size == 0 {
            return Err(invalid("page_size", page_size));
        }

        Ok(Self {
            url,
            request_threads,
            retry_attempts,
            retry_sleep,
            retry_multiplier,
            retry_max_sleep,
            retry_jitter,
            poll_interval,
            activity_interval: file
                .poll
                .activity_interval_secs
                .map_or(defaults.activity_interval, Duration::from_secs),
            max_poll_failures: file
                .poll
                .max_failures
                .unwrap_or(defaults.max_poll_failures),
            page_size,
        })
    }

    /// The retry policy described by this configuration.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.retry_attempts)
            .with_sleep(self.retry_sleep)
            .with_multiplier(self.retry_multiplier)
            .with_max_sleep(self.retry_max_sleep)
            .with_jitter(self.retry_jitter)
    }

    #[must_use]
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: self.poll_interval,
            activity_interval: self.activity_interval,
            max_failures: self.max_poll_failures.max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Parses a server URL so that relative API paths join beneath it.
fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl {
        value: raw.to_string(),
        source,
    })?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_env<V: std::str::FromStr>(name: &str, raw: &str) -> Result<V, ConfigError> {
    raw.trim().parse().map_err(|_| invalid(name, raw))
}

fn secs(name: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| invalid(name, value))
}

fn invalid(name: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    }
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("pulplib").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
