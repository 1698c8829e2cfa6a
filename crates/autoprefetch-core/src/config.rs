//! Batching configuration.
//!
//! The only switch is whether collection-valued relations (reverse
//! one-to-many and many-to-many in both directions) take part in peer
//! batching. Single-valued relations always do. The session owns its
//! `PrefetchConfig` and reads it on every access, so flipping the switch
//! applies to the next access without rebuilding anything.

use crate::error::{ConfigError, Error, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Environment variable read by [`PrefetchConfig::from_env`].
pub const ENABLE_FOR_RELATED_FIELDS_ENV: &str = "AUTO_PREFETCH_ENABLE_FOR_RELATED_FIELDS";

/// Configuration for peer batching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Batch collection-valued relations too (default: off).
    pub enable_for_related_fields: bool,
}

impl PrefetchConfig {
    /// Default configuration: only single-valued relations batch.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            enable_for_related_fields: false,
        }
    }

    /// Set whether collection-valued relations batch.
    #[must_use]
    pub const fn with_related_fields(mut self, enabled: bool) -> Self {
        self.enable_for_related_fields = enabled;
        self
    }

    /// Parse a JSON configuration object. Missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid prefetch configuration: {e}"),
                source: Some(Box::new(e)),
            })
        })
    }

    /// Read the configuration from `AUTO_PREFETCH_ENABLE_FOR_RELATED_FIELDS`.
    ///
    /// An unset variable yields the default; an unrecognized value is an error.
    pub fn from_env() -> Result<Self> {
        Self::from_env_value(env::var(ENABLE_FOR_RELATED_FIELDS_ENV).ok().as_deref())
    }

    /// Build the configuration from the raw value of the environment variable.
    pub fn from_env_value(value: Option<&str>) -> Result<Self> {
        let Some(raw) = value else {
            return Ok(Self::new());
        };
        match parse_flag(raw) {
            Some(enabled) => {
                tracing::debug!(
                    target: "autoprefetch::config",
                    enabled,
                    "Collection prefetch switch read from environment"
                );
                Ok(Self::new().with_related_fields(enabled))
            }
            None => Err(Error::Config(ConfigError {
                message: format!(
                    "{ENABLE_FOR_RELATED_FIELDS_ENV} must be a boolean flag, got {raw:?}"
                ),
                source: None,
            })),
        }
    }
}

/// Recognizes `1/true/yes/on` and `0/false/no/off` (case-insensitive).
fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
