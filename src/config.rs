//! Exception capture configuration.
//!
//! Configuration can be loaded from:
//! 1. TOML content (a `[bound_task]` table)
//! 2. Environment variables (with `BOUND_TASK_` prefix)
//!
//! Environment variables override TOML configuration.
//!
//! # Example TOML Configuration
//!
//! ```toml
//! [bound_task]
//! capture_backtrace = true
//! catch_panics = true
//! max_trace_bytes = 65536
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default upper bound on the rendered trace stored in an envelope.
pub const DEFAULT_MAX_TRACE_BYTES: usize = 64 * 1024;

/// Controls how failures inside a task's target function are captured.
///
/// # Examples
///
/// ```
/// use bound_task::config::CaptureConfig;
///
/// let config = CaptureConfig::default()
///     .with_catch_panics(false)
///     .with_max_trace_bytes(1024);
/// assert!(config.capture_backtrace);
/// assert!(!config.catch_panics);
/// assert_eq!(config.max_trace_bytes, 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Keep the failure-site trace of a [`TaskException`](crate::TaskException)
    /// in its envelope. When `false`, readers see an empty trace.
    pub capture_backtrace: bool,

    /// Stop panics in the target function at `run()`. When `false`, the
    /// panic is still recorded as a failure and then resumes unwinding.
    pub catch_panics: bool,

    /// Maximum size of the trace text kept in an envelope. Longer traces
    /// are truncated with a marker.
    pub max_trace_bytes: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capture_backtrace: true,
            catch_panics: true,
            max_trace_bytes: DEFAULT_MAX_TRACE_BYTES,
        }
    }
}

impl CaptureConfig {
    /// Load configuration from an optional TOML file and the environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. TOML configuration file
    /// 3. Default values
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let contents =
                    std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    })?;
                Self::from_toml(&contents)?
            },
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from TOML content.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        #[derive(Deserialize)]
        struct FullConfig {
            #[serde(default)]
            bound_task: CaptureConfig,
        }

        let full: FullConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(full.bound_task)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BOUND_TASK_CAPTURE_BACKTRACE") {
            if let Ok(b) = v.parse() {
                self.capture_backtrace = b;
            }
        }
        if let Ok(v) = std::env::var("BOUND_TASK_CATCH_PANICS") {
            if let Ok(b) = v.parse() {
                self.catch_panics = b;
            }
        }
        if let Ok(v) = std::env::var("BOUND_TASK_MAX_TRACE_BYTES") {
            if let Ok(n) = v.parse() {
                self.max_trace_bytes = n;
            }
        }
    }

    /// Sets whether traces are kept in envelopes.
    pub fn with_capture_backtrace(mut self, capture: bool) -> Self {
        self.capture_backtrace = capture;
        self
    }

    /// Sets whether panics in the target function are caught.
    pub fn with_catch_panics(mut self, catch: bool) -> Self {
        self.catch_panics = catch;
        self
    }

    /// Sets the maximum trace size kept in an envelope.
    pub fn with_max_trace_bytes(mut self, max: usize) -> Self {
        self.max_trace_bytes = max;
        self
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading configuration file.
    #[error("failed to read config file {path}: {error}")]
    Io {
        /// Path to the configuration file.
        path: String,
        /// Error message.
        error: String,
    },

    /// Parse error in configuration.
    #[error("failed to parse config: {0}")]
    Parse(String),
}
