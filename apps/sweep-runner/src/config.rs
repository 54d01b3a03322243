//! Runner configuration.
//!
//! Loaded from YAML with `${VAR}` / `${VAR:-default}` interpolation, then
//! overridden from the `HB_*` environment variables and validated.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sweep_runner::config::load_config;
//!
//! // runner.yaml if present, built-in defaults otherwise
//! let config = load_config(None)?;
//! println!("endpoint: {}", config.endpoint.url()?);
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::{PreflightPolicy, RetryPolicy};
use crate::sweep::{Blueprint, ExpandOptions, SweepError};

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "runner.yaml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),

    /// Missing required environment variable.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Backtesting endpoint.
    #[serde(default)]
    pub endpoint: EndpointConfig,
    /// Reachability wait before dispatch.
    #[serde(default)]
    pub preflight: PreflightConfig,
    /// Per-configuration retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Worker pool settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Summary and detail packet locations.
    #[serde(default)]
    pub output: OutputConfig,
    /// Expansion settings.
    #[serde(default)]
    pub expander: ExpanderConfig,
    /// Metrics exporter.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ============================================
// Sections
// ============================================

/// Basic-auth credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// User name.
    #[serde(default = "default_username")]
    pub username: String,
    /// Password.
    #[serde(default = "default_password")]
    pub password: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: default_password(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn default_username() -> String {
    "admin".to_string()
}
fn default_password() -> String {
    "admin".to_string()
}

/// Backtesting endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Scheme, host and port.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Backtest route.
    #[serde(default = "default_path")]
    pub path: String,
    /// Basic-auth credentials.
    #[serde(flatten)]
    pub credentials: Credentials,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            path: default_path(),
            credentials: Credentials::default(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl EndpointConfig {
    /// Full backtest URL: `base_url` joined with `path`.
    pub fn url(&self) -> Result<Url, ConfigError> {
        let base = self.base_url.trim_end_matches('/');
        let path = self.path.trim_start_matches('/');
        let joined = if path.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{path}")
        };
        let url = Url::parse(&joined).map_err(|e| {
            ConfigError::ValidationError(format!("endpoint.base_url '{}' is not a URL: {e}", self.base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "endpoint.base_url must be http or https, got '{}'",
                url.scheme()
            )));
        }
        Ok(url)
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_path() -> String {
    "/run-backtesting".to_string()
}
const fn default_request_timeout() -> u64 {
    1200
}

/// Pre-flight configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightConfig {
    /// Give up after this many seconds.
    #[serde(default = "default_preflight_timeout")]
    pub timeout_secs: u64,
    /// Delay between probes in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_preflight_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl PreflightConfig {
    /// Convert to the dispatcher's policy.
    #[must_use]
    pub const fn to_policy(&self) -> PreflightPolicy {
        PreflightPolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

const fn default_preflight_timeout() -> u64 {
    30
}
const fn default_poll_interval() -> u64 {
    1000
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per configuration, the first included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial backoff in milliseconds.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Exponential growth factor.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Jitter factor in `[0, 1]`.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryConfig {
    /// Convert to the dispatcher's policy.
    #[must_use]
    pub const fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
            self.backoff_multiplier,
            self.jitter_factor,
        )
    }
}

const fn default_max_attempts() -> u32 {
    3
}
const fn default_initial_backoff() -> u64 {
    1000
}
const fn default_max_backoff() -> u64 {
    30_000
}
const fn default_backoff_multiplier() -> f64 {
    2.0
}
const fn default_jitter_factor() -> f64 {
    0.2
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum requests in flight.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Cancel the batch after this many seconds (0 = no limit).
    #[serde(default)]
    pub batch_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_timeout_secs: 0,
        }
    }
}

impl DispatchConfig {
    /// Batch timeout, if one is set.
    #[must_use]
    pub const fn batch_timeout(&self) -> Option<Duration> {
        if self.batch_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.batch_timeout_secs))
        }
    }
}

const fn default_workers() -> usize {
    4
}

/// Output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Cumulative summary CSV.
    #[serde(default = "default_summary_path")]
    pub summary_path: PathBuf,
    /// Root directory for per-run detail packets.
    #[serde(default = "default_detail_dir")]
    pub detail_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            summary_path: default_summary_path(),
            detail_dir: default_detail_dir(),
        }
    }
}

fn default_summary_path() -> PathBuf {
    PathBuf::from("results/summaries/main_results.csv")
}
fn default_detail_dir() -> PathBuf {
    PathBuf::from("results/detail_packets")
}

/// Expansion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpanderConfig {
    /// Controller blueprint JSON; enables schema validation when set.
    #[serde(default)]
    pub schema_path: Option<PathBuf>,
    /// Apply controller normalization.
    #[serde(default = "default_true")]
    pub normalize_controllers: bool,
}

impl Default for ExpanderConfig {
    fn default() -> Self {
        Self {
            schema_path: None,
            normalize_controllers: true,
        }
    }
}

const fn default_true() -> bool {
    true
}

/// Observability configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Prometheus listener port (0 = disabled).
    #[serde(default)]
    pub metrics_port: u16,
}

impl RunnerConfig {
    /// Expansion options, loading the blueprint unless `use_schema` is false.
    pub fn expand_options(&self, use_schema: bool) -> Result<ExpandOptions, SweepError> {
        let mut options = if self.expander.normalize_controllers {
            ExpandOptions::default()
        } else {
            ExpandOptions::raw()
        };
        if let Some(path) = self.expander.schema_path.as_deref().filter(|_| use_schema) {
            let blueprint = Blueprint::load(path)?;
            tracing::info!(
                path = %path.display(),
                controllers = blueprint.len(),
                "Loaded controller blueprint"
            );
            options = options.with_blueprint(Arc::new(blueprint));
        }
        Ok(options)
    }
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// With `None`, reads [`DEFAULT_CONFIG_PATH`] and falls back to the built-in
/// defaults when that file does not exist. An explicit path must exist.
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&Path>) -> Result<RunnerConfig, ConfigError> {
    let explicit = path.is_some();
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

    let mut config = match std::fs::read_to_string(path) {
        Ok(contents) => parse(&contents)?,
        Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No runner config found, using defaults");
            RunnerConfig::default()
        }
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        }
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<RunnerConfig, ConfigError> {
    let config = parse(yaml)?;
    validate_config(&config)?;
    Ok(config)
}

fn parse(yaml: &str) -> Result<RunnerConfig, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    if interpolated.trim().is_empty() {
        return Ok(RunnerConfig::default());
    }
    Ok(serde_yaml_bw::from_str(&interpolated)?)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax.
#[allow(clippy::expect_used)] // Regex is compile-time constant; expect() is safe here
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map_or("", |m| m.as_str());
        match std::env::var(&cap[1]) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

/// Apply the `HB_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides(config: &mut RunnerConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(base_url) = get("HB_API") {
        config.endpoint.base_url = base_url;
    }
    if let Some(username) = get("HB_USER") {
        config.endpoint.credentials.username = username;
    }
    if let Some(password) = get("HB_PASS") {
        config.endpoint.credentials.password = password;
    }
    if let Some(schema) = get("HB_SCHEMA") {
        config.expander.schema_path = Some(PathBuf::from(schema));
    }
    if let Some(detail_dir) = get("HB_DETAIL_DIR") {
        config.output.detail_dir = PathBuf::from(detail_dir);
    }
}

/// Validate configuration values.
pub fn validate_config(config: &RunnerConfig) -> Result<(), ConfigError> {
    config.endpoint.url()?;

    if config.endpoint.request_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "endpoint.request_timeout_secs must be positive".to_string(),
        ));
    }

    if config.dispatch.workers == 0 {
        return Err(ConfigError::ValidationError(
            "dispatch.workers must be at least 1".to_string(),
        ));
    }

    let batch_timeout = config.dispatch.batch_timeout_secs;
    if batch_timeout > 0 && batch_timeout <= config.endpoint.request_timeout_secs {
        return Err(ConfigError::ValidationError(format!(
            "dispatch.batch_timeout_secs ({batch_timeout}) must exceed endpoint.request_timeout_secs ({})",
            config.endpoint.request_timeout_secs
        )));
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "retry.max_attempts must be at least 1".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&retry.jitter_factor) {
        return Err(ConfigError::ValidationError(
            "retry.jitter_factor must be between 0.0 and 1.0".to_string(),
        ));
    }

    if retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::ValidationError(
            "retry.backoff_multiplier must be at least 1.0".to_string(),
        ));
    }

    Ok(())
}
