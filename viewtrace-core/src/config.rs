//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/viewtrace/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/viewtrace/` (~/.config/viewtrace/)
//! - State/Logs: `$XDG_STATE_HOME/viewtrace/` (~/.local/state/viewtrace/)

use crate::error::{Error, Result};
use crate::filter::FilterPolicy;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Batching and delivery
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Admission policy tables
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Viewport observation options
    #[serde(default)]
    pub visibility: VisibilityConfig,

    /// Scroll sampling options
    #[serde(default)]
    pub scroll: ScrollConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How much identifying detail events may carry.
///
/// Reserved hook: every mode currently permits every event.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyMode {
    Strict,
    #[default]
    Balanced,
    Full,
}

impl PrivacyMode {
    /// Whether an event may leave the page under this mode.
    pub fn permits(&self, _event: &crate::types::Event) -> bool {
        match self {
            PrivacyMode::Strict | PrivacyMode::Balanced | PrivacyMode::Full => true,
        }
    }
}

/// Remote collector configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    /// Batch endpoint (e.g., `https://collector.example.com/v1/events`)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Optional bearer token sent with every batch
    pub api_key: Option<String>,

    /// Events per batch; reaching it triggers an immediate flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Milliseconds between timer-driven flushes
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Log every admission, flush and requeue at debug level
    #[serde(default)]
    pub enable_debug_logging: bool,

    #[serde(default)]
    pub privacy_mode: PrivacyMode,

    /// Per-attempt request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Additional attempts after the first for transient failures
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base delay for exponential backoff in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Max events put back at the buffer head after a failed batch
    /// (defaults to `batch_size`)
    pub requeue_limit: Option<usize>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            enable_debug_logging: false,
            privacy_mode: PrivacyMode::default(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            requeue_limit: None,
        }
    }
}

impl CollectorConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::Config("collector.endpoint is required".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config(
                "collector.batch_size must be greater than 0".to_string(),
            ));
        }
        if self.flush_interval_ms == 0 {
            return Err(Error::Config(
                "collector.flush_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config(
                "collector.timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn requeue_limit(&self) -> usize {
        self.requeue_limit.unwrap_or(self.batch_size)
    }

    /// Retry settings for the network client
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            retries: self.retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }
}

/// Timeout and retry settings for a single delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        CollectorConfig::default().retry_policy()
    }
}

fn default_endpoint() -> String {
    "http://localhost:8080/v1/events".to_string()
}

fn default_batch_size() -> usize {
    20
}

fn default_flush_interval_ms() -> u64 {
    5000
}

fn default_timeout_ms() -> u64 {
    15000
}

fn default_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    300
}

/// Admission policy tables keyed by event type
#[derive(Debug, Deserialize, Clone)]
pub struct PolicyConfig {
    /// Event types that are never admitted
    #[serde(default)]
    pub skip: Vec<String>,

    /// Minimum milliseconds between admissions of the same type
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: HashMap<String, u64>,

    /// Probability in [0, 1] that an event of the type is kept
    #[serde(default)]
    pub sampling: HashMap<String, f64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            skip: Vec::new(),
            throttle_ms: default_throttle_ms(),
            sampling: HashMap::new(),
        }
    }
}

fn default_throttle_ms() -> HashMap<String, u64> {
    HashMap::from([("scroll_behavior".to_string(), 5000)])
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<()> {
        for (event_type, rate) in &self.sampling {
            if !(0.0..=1.0).contains(rate) {
                return Err(Error::Config(format!(
                    "policy.sampling.{} must be between 0 and 1 (got {})",
                    event_type, rate
                )));
            }
        }
        Ok(())
    }

    /// Build the immutable filter policy from these tables
    pub fn to_policy(&self) -> FilterPolicy {
        FilterPolicy::new(
            self.skip.iter().cloned().collect::<HashSet<_>>(),
            self.throttle_ms
                .iter()
                .map(|(k, ms)| (k.clone(), *ms as f64))
                .collect(),
            self.sampling.clone(),
        )
    }
}

/// Viewport observation options handed to the host observer
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct VisibilityConfig {
    /// Intersection ratios that fire a callback
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<f64>,

    /// Margin around the viewport so near-visible entities register early
    #[serde(default = "default_root_margin_px")]
    pub root_margin_px: u32,

    /// Attribute carrying the stable entity identifier
    #[serde(default = "default_identity_attribute")]
    pub identity_attribute: String,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            thresholds: default_thresholds(),
            root_margin_px: default_root_margin_px(),
            identity_attribute: default_identity_attribute(),
        }
    }
}

fn default_thresholds() -> Vec<f64> {
    vec![0.0, 0.25, 0.5, 0.75, 1.0]
}

fn default_root_margin_px() -> u32 {
    50
}

fn default_identity_attribute() -> String {
    "data-entity-id".to_string()
}

/// Scroll sampling options
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ScrollConfig {
    /// Quiet window before a scroll burst is sampled
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Number of speeds kept in the rolling window
    #[serde(default = "default_window")]
    pub window: usize,

    /// Positions required before `scroll_behavior` is emitted
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            window: default_window(),
            min_samples: default_min_samples(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_window() -> usize {
    10
}

fn default_min_samples() -> usize {
    5
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.collector.validate()?;
        self.policy.validate()?;
        if self.scroll.window == 0 {
            return Err(Error::Config(
                "scroll.window must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/viewtrace/config.toml` (~/.config/viewtrace/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("viewtrace").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/viewtrace/` (~/.local/state/viewtrace/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("viewtrace")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/viewtrace/viewtrace.log` (~/.local/state/viewtrace/viewtrace.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("viewtrace.log")
    }
}
