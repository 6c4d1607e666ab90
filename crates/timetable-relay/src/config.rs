use std::collections::HashMap;
use std::env;

use thiserror::Error;

pub const BIND_ADDR_ENV: &str = "TIMETABLE_RELAY_BIND_ADDR";
pub const MAX_BATCH_ENV: &str = "TIMETABLE_RELAY_MAX_BATCH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub bind_addr: String,
    /// Largest number of envelopes accepted in one upload
    pub max_batch_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            max_batch_size: 500,
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let bind_addr = value_or_default(&lookup, BIND_ADDR_ENV, &defaults.bind_addr);
        if !bind_addr.contains(':') {
            return Err(ConfigError::Invalid(format!(
                "{BIND_ADDR_ENV} must be host:port"
            )));
        }

        let max_batch_size = value_or_default(&lookup, MAX_BATCH_ENV, "500")
            .parse::<usize>()
            .map_err(|_| {
                ConfigError::Invalid(format!("{MAX_BATCH_ENV} must be an integer in [1, 5000]"))
            })?;
        if !(1..=5_000).contains(&max_batch_size) {
            return Err(ConfigError::Invalid(format!(
                "{MAX_BATCH_ENV} must be in [1, 5000]"
            )));
        }

        Ok(Self {
            bind_addr,
            max_batch_size,
        })
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
