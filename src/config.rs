//! Configuration System using Figment
//!
//! Configuration is layered, lowest precedence first:
//! 1. Built-in defaults
//! 2. TOML file (default: `config/gen2_visit.toml`)
//! 3. Environment variables prefixed with `GEN2VISIT_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! GEN2VISIT_APPLICATION__LOG_LEVEL=debug
//! GEN2VISIT_FRAME_SOURCE__REQUEST_TIMEOUT_MS=2500
//! GEN2VISIT_FALLBACK__ENABLED=true
//! ```
//!
//! # Example
//!
//! ```no_run
//! use gen2_visit::config::VisitConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = VisitConfig::load_from("config/gen2_visit.toml")?;
//!     println!("Cameras: {}", config.camera_set()?.len());
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::camera::{CameraId, CameraSet};
use crate::error_recovery::RetryPolicy;
use crate::frame_id::{is_valid_instrument_code, MAX_VISIT};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/gen2_visit.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "GEN2VISIT_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisitConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Where frames come from
    #[serde(default)]
    pub frame_source: FrameSourceConfig,
    /// Whole-allocation retry settings
    #[serde(default)]
    pub allocation: AllocationConfig,
    /// Degraded-mode visit sequence
    #[serde(default)]
    pub fallback: FallbackConfig,
    /// Issued-visit ledger
    #[serde(default)]
    pub ledger: LedgerConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Frame source kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// In-process counters
    #[default]
    Simulated,
    /// External program
    Command,
}

/// Frame source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSourceConfig {
    /// Source implementation
    #[serde(default)]
    pub kind: SourceKind,
    /// Three-letter instrument code prefixing every frame identifier
    #[serde(default = "default_instrument_code")]
    pub instrument_code: String,
    /// Cameras to reconcile, in order
    #[serde(default = "default_cameras")]
    pub cameras: Vec<CameraId>,
    /// Time limit for one frame request in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Program and arguments for the `command` kind
    #[serde(default)]
    pub command: Vec<String>,
    /// Visit every simulated camera starts at
    #[serde(default = "default_start_visit")]
    pub start_visit: u32,
}

/// Retry configuration for whole allocations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// Attempts per request, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds
    #[serde(default = "default_backoff")]
    pub backoff_ms: u64,
}

/// Filesystem visit sequence used when the frame source is unreachable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Whether transport faults fall back to the sequence
    #[serde(default)]
    pub enabled: bool,
    /// Sequence state file
    #[serde(default = "default_sequence_path")]
    pub sequence_path: PathBuf,
}

/// Ledger configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// JSON-lines ledger file; issued visits are kept in memory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "gen2-visit".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_instrument_code() -> String {
    "PFS".to_string()
}

fn default_cameras() -> Vec<CameraId> {
    CameraSet::reference().iter().collect()
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_start_visit() -> u32 {
    1
}

fn default_max_attempts() -> u32 {
    1
}

fn default_backoff() -> u64 {
    100
}

fn default_sequence_path() -> PathBuf {
    PathBuf::from("visit_sequence.json")
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for FrameSourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            instrument_code: default_instrument_code(),
            cameras: default_cameras(),
            request_timeout_ms: default_request_timeout(),
            command: Vec::new(),
            start_visit: default_start_visit(),
        }
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff(),
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sequence_path: default_sequence_path(),
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl VisitConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] if present, otherwise from defaults and
    /// environment variables only.
    pub fn load() -> Result<Self, ConfigError> {
        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load_from(DEFAULT_CONFIG_PATH)
        } else {
            Self::extract(Self::base())
        }
    }

    /// Load configuration from a specific file path
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file is missing, cannot be parsed, or fails
    /// validation.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::extract(Self::base().merge(Toml::file(path)))
    }

    fn base() -> Figment {
        Figment::from(Serialized::defaults(VisitConfig::default()))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Instrument code is three uppercase letters
    /// - Cameras are non-empty and unique
    /// - Request timeout and attempt count are non-zero
    /// - The command source has a command
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let source = &self.frame_source;
        if !is_valid_instrument_code(&source.instrument_code) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid instrument_code '{}'. Must be three uppercase letters",
                source.instrument_code
            )));
        }

        self.camera_set()?;

        if source.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_ms must be > 0".to_string(),
            ));
        }

        if source.start_visit > MAX_VISIT {
            return Err(ConfigError::ValidationError(format!(
                "start_visit {} exceeds {MAX_VISIT}",
                source.start_visit
            )));
        }

        if source.kind == SourceKind::Command && source.command.is_empty() {
            return Err(ConfigError::ValidationError(
                "frame_source.command cannot be empty for the command source".to_string(),
            ));
        }

        if self.allocation.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "allocation.max_attempts must be >= 1".to_string(),
            ));
        }

        Ok(())
    }

    /// The configured cameras as a validated set.
    pub fn camera_set(&self) -> Result<CameraSet, ConfigError> {
        CameraSet::new(self.frame_source.cameras.iter().copied())
            .map_err(|e| ConfigError::ValidationError(format!("frame_source.cameras: {e}")))
    }

    /// Time limit for one frame request.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_source.request_timeout_ms)
    }

    /// Retry policy for whole allocations.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.allocation.max_attempts,
            backoff_delay: Duration::from_millis(self.allocation.backoff_ms),
        }
    }

    /// Effective configuration rendered as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}
