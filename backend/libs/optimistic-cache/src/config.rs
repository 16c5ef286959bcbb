//! Engine configuration
//!
//! Loaded from environment variables prefixed `OPTIMISTIC_CACHE_`, e.g.
//! `OPTIMISTIC_CACHE_RANK_FIELD=position`. Unset variables fall back to the
//! defaults below.

use crate::CacheResult;
use serde::{Deserialize, Serialize};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "OPTIMISTIC_CACHE_";

/// How invalidation matches stored keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationMode {
    /// Only the computed key itself
    Exact,
    /// Every stored key starting with the computed key
    Prefix,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Prefix of ids assigned to anonymous optimistic records
    #[serde(default = "default_placeholder_prefix")]
    pub placeholder_prefix: String,

    /// Numeric field that switches list inserts to ranked order
    #[serde(default = "default_rank_field")]
    pub rank_field: String,

    #[serde(default = "default_invalidation_mode")]
    pub invalidation_mode: InvalidationMode,

    /// Buffered cache events per subscriber
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_placeholder_prefix() -> String {
    "optimistic".to_string()
}

fn default_rank_field() -> String {
    "rank".to_string()
}

fn default_invalidation_mode() -> InvalidationMode {
    InvalidationMode::Prefix
}

fn default_event_channel_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            placeholder_prefix: default_placeholder_prefix(),
            rank_field: default_rank_field(),
            invalidation_mode: default_invalidation_mode(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> CacheResult<Self> {
        Ok(envy::prefixed(ENV_PREFIX).from_env::<Self>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "PLACEHOLDER_PREFIX",
            "RANK_FIELD",
            "INVALIDATION_MODE",
            "EVENT_CHANNEL_CAPACITY",
        ] {
            std::env::remove_var(format!("{}{}", ENV_PREFIX, var));
        }
    }

    #[test]
    #[serial]
    fn test_defaults_when_env_empty() {
        clear_env();
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.invalidation_mode, InvalidationMode::Prefix);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("OPTIMISTIC_CACHE_RANK_FIELD", "position");
        std::env::set_var("OPTIMISTIC_CACHE_INVALIDATION_MODE", "exact");
        std::env::set_var("OPTIMISTIC_CACHE_EVENT_CHANNEL_CAPACITY", "16");

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.rank_field, "position");
        assert_eq!(config.invalidation_mode, InvalidationMode::Exact);
        assert_eq!(config.event_channel_capacity, 16);
        assert_eq!(config.placeholder_prefix, "optimistic");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_env_value() {
        clear_env();
        std::env::set_var("OPTIMISTIC_CACHE_EVENT_CHANNEL_CAPACITY", "lots");
        assert!(EngineConfig::from_env().is_err());
        clear_env();
    }
}
