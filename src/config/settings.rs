//! Workcell configuration using Figment
//!
//! Configuration is loaded from:
//! 1. Built-in defaults (six 25-shelf hotels)
//! 2. A TOML file (default `config/pin_transfer.toml`)
//! 3. Environment variables prefixed with `PINTRANSFER_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! PINTRANSFER_APPLICATION__LOG_LEVEL=debug
//! PINTRANSFER_ACTUATION__TIMEOUT_MS=30000
//! PINTRANSFER_RUN_LOG__DIRECTORY=/var/lib/pin_transfer
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::labware::{PlateType, StackerKind};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/pin_transfer.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or did not match the schema
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// Values parsed but describe an impossible workcell
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level workcell configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Name and log level
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Stacker ring layout
    #[serde(default)]
    pub carousel: CarouselConfig,
    /// Tool rack
    #[serde(default)]
    pub liquid_handler: LiquidHandlerConfig,
    /// Timeouts and simulated motion times
    #[serde(default)]
    pub actuation: ActuationConfig,
    /// Where journals and snapshots are kept
    #[serde(default)]
    pub run_log: RunLogConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "pin-transfer".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Carousel layout: the ring of stackers in rotational order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarouselConfig {
    /// Stackers, index 1 first
    #[serde(default = "default_stackers")]
    pub stackers: Vec<StackerConfig>,
    /// Rotational position at power-up (1-based)
    #[serde(default = "default_initial_position")]
    pub initial_position: usize,
}

impl Default for CarouselConfig {
    fn default() -> Self {
        Self {
            stackers: default_stackers(),
            initial_position: default_initial_position(),
        }
    }
}

/// One stacker column in the carousel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackerConfig {
    /// Random-access hotel or LIFO sequential stacker
    #[serde(default = "default_stacker_kind")]
    pub kind: StackerKind,
    /// Number of shelves
    #[serde(default = "default_stacker_capacity")]
    pub capacity: usize,
    /// Plate kind accepted by a sequential stacker (fixed by its first plate when unset)
    #[serde(default)]
    pub plate_type: Option<PlateType>,
}

impl StackerConfig {
    /// A random-access hotel with the given number of shelves.
    pub fn hotel(capacity: usize) -> Self {
        Self {
            kind: StackerKind::Hotel,
            capacity,
            plate_type: None,
        }
    }

    /// A LIFO stacker dedicated to one plate kind.
    pub fn sequential(capacity: usize, plate_type: PlateType) -> Self {
        Self {
            kind: StackerKind::Sequential,
            capacity,
            plate_type: Some(plate_type),
        }
    }
}

/// Liquid handler (pin tool robot) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidHandlerConfig {
    /// Pin tools on the tool rack; `Attach` requires all of them detached
    #[serde(default = "default_tools")]
    pub tools: Vec<String>,
}

impl Default for LiquidHandlerConfig {
    fn default() -> Self {
        Self {
            tools: default_tools(),
        }
    }
}

/// Actuation behaviour shared by all drivers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuationConfig {
    /// Per-actuation timeout in milliseconds (0 = wait indefinitely)
    #[serde(default)]
    pub timeout_ms: u64,
    /// Delays used by the simulated actuator
    #[serde(default)]
    pub simulated: SimulatedDelays,
}

impl Default for ActuationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 0,
            simulated: SimulatedDelays::default(),
        }
    }
}

impl ActuationConfig {
    /// The timeout as a `Duration`, or `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Simulated motion times in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedDelays {
    /// Tool pick-up
    pub attach_ms: u64,
    /// Tool return
    pub detach_ms: u64,
    /// Wash cycle
    pub wash_ms: u64,
    /// Pin transfer, both dips
    pub transfer_ms: u64,
    /// Tool or arm move to a safe position, and arm homing
    pub move_safe_ms: u64,
    /// Any plate move between stacker, gripper and stage
    pub plate_move_ms: u64,
    /// One carousel rotation
    pub rotate_ms: u64,
}

impl Default for SimulatedDelays {
    fn default() -> Self {
        Self {
            attach_ms: 1000,
            detach_ms: 1000,
            wash_ms: 2000,
            transfer_ms: 1500,
            move_safe_ms: 1000,
            plate_move_ms: 2000,
            rotate_ms: 500,
        }
    }
}

impl SimulatedDelays {
    /// All delays zero, for tests.
    pub fn instant() -> Self {
        Self {
            attach_ms: 0,
            detach_ms: 0,
            wash_ms: 0,
            transfer_ms: 0,
            move_safe_ms: 0,
            plate_move_ms: 0,
            rotate_ms: 0,
        }
    }
}

/// Run log storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogConfig {
    /// Directory holding journals and run snapshots
    #[serde(default = "default_run_log_dir")]
    pub directory: PathBuf,
}

impl Default for RunLogConfig {
    fn default() -> Self {
        Self {
            directory: default_run_log_dir(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_stackers() -> Vec<StackerConfig> {
    (0..6).map(|_| StackerConfig::hotel(25)).collect()
}

fn default_initial_position() -> usize {
    1
}

fn default_stacker_kind() -> StackerKind {
    StackerKind::Hotel
}

fn default_stacker_capacity() -> usize {
    25
}

fn default_tools() -> Vec<String> {
    ["33", "96", "100", "300"]
        .iter()
        .map(|t| t.to_string())
        .collect()
}

fn default_run_log_dir() -> PathBuf {
    PathBuf::from("run_log")
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load configuration from the default file and environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// Precedence (highest first): `PINTRANSFER_` environment variables, the
    /// TOML file, built-in defaults. A missing file is not an error. The
    /// result is validated before it is returned.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PINTRANSFER_").split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - The carousel has at least one stacker, none with zero capacity
    /// - The initial rotational position addresses an existing stacker
    /// - Tool ids are non-empty and unique
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.carousel.stackers.is_empty() {
            return Err(ConfigError::ValidationError(
                "Carousel must contain at least one stacker".to_string(),
            ));
        }
        for (i, stacker) in self.carousel.stackers.iter().enumerate() {
            if stacker.capacity == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Stacker {} has zero capacity",
                    i + 1
                )));
            }
        }
        let n = self.carousel.stackers.len();
        if !(1..=n).contains(&self.carousel.initial_position) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid initial_position {}. Must be 1-{}",
                self.carousel.initial_position, n
            )));
        }

        let mut ids = HashSet::new();
        for tool in &self.liquid_handler.tools {
            if tool.is_empty() {
                return Err(ConfigError::ValidationError(
                    "Tool id cannot be empty".to_string(),
                ));
            }
            if !ids.insert(tool) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate tool id: '{}'",
                    tool
                )));
            }
        }

        Ok(())
    }
}
