//! Application constants and the JSON settings document.
//!
//! Settings are read from `config.json` (or an explicit `--config` path).
//! Every section is optional on disk; missing keys fall back to the
//! defaults below. Required credentials are checked by the `require_*`
//! accessors, only for the stages that actually need them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "newsprint-ocr";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Placeholder shipped in the sample config; treated as "not configured".
const PLACEHOLDER_API_KEY: &str = "sk-your-api-key-here";

/// Layout engine name for the hosted PaddleOCR-VL service.
pub const PADDLEVL_ENGINE: &str = "paddlevl_api";

/// Recognizer engine name for Qwen-VL through DashScope.
pub const QWEN_VL_ENGINE: &str = "qwen_vl";

/// Layout timeout in seconds when none is configured, per mode.
pub const DEFAULT_SYNC_LAYOUT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_ASYNC_LAYOUT_TIMEOUT_SECS: u64 = 1200;

/// Upper bound for `request_interval` and `retry_base_delay`, in seconds.
pub const MAX_DELAY_SECS: f64 = 86_400.0;

/// Upper bound for `grid_rows` and `grid_cols`.
pub const MAX_GRID_SIDE: u32 = 64;

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,reqwest=warn,hyper=warn"
}

/// Fallback config location under the platform config directory.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join(DEFAULT_CONFIG_FILE))
}

/// Resolve which config file to load.
///
/// An explicit path always wins. Otherwise `./config.json` is used if it
/// exists, then the per-user config location.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }
    user_config_path()
        .filter(|p| p.exists())
        .unwrap_or(local)
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Missing configuration value: {0}")]
    Missing(String),

    #[error("Invalid configuration value: {0}")]
    Invalid(String),
}

// ──────────────────────────────────────────────
// Settings document
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub layout: LayoutSettings,
    #[serde(default)]
    pub recognizer: RecognizerSettings,
    /// Per-engine credentials, keyed by engine name (`api.qwen_vl`).
    #[serde(default)]
    pub api: HashMap<String, EngineCredentials>,
    #[serde(default)]
    pub processing: ProcessingSettings,
}

/// How the asynchronous layout API is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMode {
    /// Single request/response with a base64 JSON payload.
    #[default]
    Sync,
    /// Submit a job, poll it, then fetch the JSONL result.
    Async,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LayoutSettings {
    #[serde(default = "default_layout_engine")]
    pub engine: String,
    pub api_url: Option<String>,
    pub token: Option<String>,
    /// Seconds. For the async mode this bounds the whole polling loop.
    /// Unset means 120 s in sync mode and 1200 s in async mode.
    pub timeout: Option<u64>,
    #[serde(default)]
    pub mode: LayoutMode,
    /// Seconds between job status polls (async mode).
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Longest side allowed for the copy submitted to the layout API.
    pub max_submission_side: Option<u32>,
    #[serde(default = "default_grid_rows")]
    pub grid_rows: u32,
    #[serde(default = "default_grid_cols")]
    pub grid_cols: u32,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            engine: default_layout_engine(),
            api_url: None,
            token: None,
            timeout: None,
            mode: LayoutMode::default(),
            poll_interval: default_poll_interval(),
            max_submission_side: None,
            grid_rows: default_grid_rows(),
            grid_cols: default_grid_cols(),
        }
    }
}

impl LayoutSettings {
    pub fn uses_api(&self) -> bool {
        self.engine == PADDLEVL_ENGINE
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout.unwrap_or(match self.mode {
            LayoutMode::Sync => DEFAULT_SYNC_LAYOUT_TIMEOUT_SECS,
            LayoutMode::Async => DEFAULT_ASYNC_LAYOUT_TIMEOUT_SECS,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    /// Token for the layout API; required only when the API engine is selected.
    pub fn require_token(&self) -> Result<&str, ConfigError> {
        non_empty(self.token.as_deref()).ok_or_else(|| ConfigError::Missing("layout.token".into()))
    }

    /// Endpoint for the synchronous layout API.
    pub fn require_api_url(&self) -> Result<&str, ConfigError> {
        non_empty(self.api_url.as_deref())
            .ok_or_else(|| ConfigError::Missing("layout.api_url".into()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecognizerSettings {
    #[serde(default = "default_recognizer_engine")]
    pub engine: String,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        Self {
            engine: default_recognizer_engine(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineCredentials {
    pub api_key: Option<String>,
    pub model: Option<String>,
    /// Seconds per request.
    pub timeout: Option<u64>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingSettings {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Minimum seconds between two recognition requests, process-wide.
    #[serde(default = "default_request_interval")]
    pub request_interval: f64,
    /// Longest side of a region image sent for recognition.
    #[serde(default = "default_max_region_size")]
    pub max_region_size: u32,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Seconds; doubled on each retry.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay: f64,
    /// Skip regions whose manifest already carries a recognized text.
    #[serde(default)]
    pub reuse_region_text: bool,
    /// Documents at or below this size are treated as failed by the fix pass.
    #[serde(default = "default_min_document_bytes")]
    pub min_document_bytes: u64,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            request_interval: default_request_interval(),
            max_region_size: default_max_region_size(),
            retry_count: default_retry_count(),
            retry_base_delay: default_retry_base_delay(),
            reuse_region_text: false,
            min_document_bytes: default_min_document_bytes(),
        }
    }
}

impl ProcessingSettings {
    pub fn request_interval(&self) -> Duration {
        seconds(self.request_interval)
    }

    pub fn retry_base_delay(&self) -> Duration {
        seconds(self.retry_base_delay)
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.clamp(0.0, MAX_DELAY_SECS)).unwrap_or(Duration::ZERO)
}

impl Settings {
    /// Credentials for the configured recognizer engine.
    pub fn recognizer_credentials(&self) -> Result<&EngineCredentials, ConfigError> {
        self.api
            .get(&self.recognizer.engine)
            .ok_or_else(|| ConfigError::Missing(format!("api.{}", self.recognizer.engine)))
    }

    /// API key for the recognizer, rejecting the sample placeholder.
    pub fn require_recognizer_key(&self) -> Result<&str, ConfigError> {
        let creds = self.recognizer_credentials()?;
        match non_empty(creds.api_key.as_deref()) {
            Some(key) if key != PLACEHOLDER_API_KEY => Ok(key),
            _ => Err(ConfigError::Missing(format!(
                "api.{}.api_key",
                self.recognizer.engine
            ))),
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processing.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "processing.concurrency must be at least 1".into(),
            ));
        }
        if self.processing.retry_count == 0 {
            return Err(ConfigError::Invalid(
                "processing.retry_count must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("request_interval", self.processing.request_interval),
            ("retry_base_delay", self.processing.retry_base_delay),
        ] {
            if !(0.0..=MAX_DELAY_SECS).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "processing.{name} must be between 0 and {MAX_DELAY_SECS} seconds"
                )));
            }
        }
        for (name, value) in [
            ("grid_rows", self.layout.grid_rows),
            ("grid_cols", self.layout.grid_cols),
        ] {
            if !(1..=MAX_GRID_SIDE).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "layout.{name} must be between 1 and {MAX_GRID_SIDE}"
                )));
            }
        }
        if self.layout.max_submission_side == Some(0) {
            return Err(ConfigError::Invalid(
                "layout.max_submission_side must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Load and validate settings from a JSON file.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_settings(&contents)
}

/// Parse and validate settings from a JSON string.
pub fn parse_settings(contents: &str) -> Result<Settings, ConfigError> {
    let settings: Settings = serde_json::from_str(contents)?;
    settings.validate()?;
    Ok(settings)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn default_layout_engine() -> String {
    PADDLEVL_ENGINE.to_string()
}
fn default_poll_interval() -> u64 {
    5
}
fn default_grid_rows() -> u32 {
    3
}
fn default_grid_cols() -> u32 {
    4
}
fn default_recognizer_engine() -> String {
    QWEN_VL_ENGINE.to_string()
}
fn default_concurrency() -> usize {
    5
}
fn default_request_interval() -> f64 {
    1.0
}
fn default_max_region_size() -> u32 {
    1500
}
fn default_retry_count() -> u32 {
    5
}
fn default_retry_base_delay() -> f64 {
    2.0
}
fn default_min_document_bytes() -> u64 {
    500
}
