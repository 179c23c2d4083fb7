//! Engine configuration, loaded from TOML.
//!
//! ```toml
//! iterationCap = 100
//! tapBufferCapacity = 64
//! defaultQueueCapacity = 64
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

pub const DEFAULT_ITERATION_CAP: usize = 100;
pub const DEFAULT_TAP_BUFFER_CAPACITY: usize = 64;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Tasks processed per pulse before giving up with `NonConvergence`.
    pub iteration_cap: usize,
    /// Ring size for `buffer` taps that do not set `bufferSize`.
    pub tap_buffer_capacity: usize,
    /// Queue bound for rate limiters and credit gates that do not set
    /// `queueCapacity`.
    pub default_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            iteration_cap: DEFAULT_ITERATION_CAP,
            tap_buffer_capacity: DEFAULT_TAP_BUFFER_CAPACITY,
            default_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str, path: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::ParseToml {
            path: path.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_toml_str(&text, &display)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.iteration_cap == 0 {
            return Err(ConfigError::Invalid("iterationCap must be at least 1".into()));
        }
        if self.tap_buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "tapBufferCapacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
