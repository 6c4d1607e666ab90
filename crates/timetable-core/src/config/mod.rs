//! Client configuration for talking to the sync relay.
//!
//! Values come from environment variables; `from_lookup` takes any lookup
//! function so callers (and tests) can layer their own sources on top.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

pub const SERVER_URL_ENV: &str = "TIMETABLE_SERVER_URL";
pub const HTTP_TIMEOUT_ENV: &str = "TIMETABLE_HTTP_TIMEOUT_SECS";
pub const RETENTION_DAYS_ENV: &str = "TIMETABLE_RETENTION_DAYS";
pub const UPLOAD_BATCH_SIZE_ENV: &str = "TIMETABLE_UPLOAD_BATCH_SIZE";

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;
const MAX_HTTP_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RETENTION_DAYS: u32 = 7;
const MAX_RETENTION_DAYS: u32 = 365;
/// Stays under the relay's default batch limit of 500.
pub const DEFAULT_UPLOAD_BATCH_SIZE: usize = 200;
const MAX_UPLOAD_BATCH_SIZE: usize = 5_000;

/// Relay endpoint and sync tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncClientConfig {
    /// Relay base URL without a trailing slash
    pub server_url: String,
    pub http_timeout_secs: u64,
    /// Delivered messages older than this many days are removed by cleanup
    pub retention_days: u32,
    /// Most messages sent in one upload request
    pub upload_batch_size: usize,
}

impl SyncClientConfig {
    /// Config with default tuning for `server_url`.
    pub fn new(server_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            server_url: normalize_server_url(server_url.into())?,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            retention_days: DEFAULT_RETENTION_DAYS,
            upload_batch_size: DEFAULT_UPLOAD_BATCH_SIZE,
        })
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, applying defaults for unset tuning values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let server_url = normalize_text_option(lookup(SERVER_URL_ENV))
            .ok_or_else(|| Error::InvalidInput(format!("{SERVER_URL_ENV} is not set")))?;

        let mut config = Self::new(server_url)?;
        if let Some(raw) = normalize_text_option(lookup(HTTP_TIMEOUT_ENV)) {
            config.http_timeout_secs =
                parse_in_range(HTTP_TIMEOUT_ENV, &raw, 1, MAX_HTTP_TIMEOUT_SECS)?;
        }
        if let Some(raw) = normalize_text_option(lookup(RETENTION_DAYS_ENV)) {
            config.retention_days = parse_in_range(RETENTION_DAYS_ENV, &raw, 1, MAX_RETENTION_DAYS)?;
        }
        if let Some(raw) = normalize_text_option(lookup(UPLOAD_BATCH_SIZE_ENV)) {
            config.upload_batch_size =
                parse_in_range(UPLOAD_BATCH_SIZE_ENV, &raw, 1, MAX_UPLOAD_BATCH_SIZE)?;
        }
        Ok(config)
    }

    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn normalize_server_url(raw: String) -> Result<String> {
    let value = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidInput("server URL must not be empty".to_string()))?;
    if !is_http_url(&value) {
        return Err(Error::InvalidInput(format!(
            "server URL must include http:// or https:// (got '{value}')"
        )));
    }
    Ok(value.trim_end_matches('/').to_string())
}

fn parse_in_range<T>(key: &str, raw: &str, min: T, max: T) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let value: T = raw
        .parse()
        .map_err(|_| Error::InvalidInput(format!("{key} must be a number (got '{raw}')")))?;
    if value < min || value > max {
        return Err(Error::InvalidInput(format!(
            "{key} must be between {min} and {max} (got {value})"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn from_lookup_applies_defaults() {
        let config =
            SyncClientConfig::from_lookup(lookup(&[(SERVER_URL_ENV, " http://localhost:8080/ ")]))
                .unwrap();
        assert_eq!(config.server_url, "http://localhost:8080");
        assert_eq!(config.http_timeout(), Duration::from_secs(15));
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.upload_batch_size, DEFAULT_UPLOAD_BATCH_SIZE);
    }

    #[test]
    fn from_lookup_reads_overrides() {
        let config = SyncClientConfig::from_lookup(lookup(&[
            (SERVER_URL_ENV, "https://relay.example.com"),
            (HTTP_TIMEOUT_ENV, "30"),
            (RETENTION_DAYS_ENV, "14"),
            (UPLOAD_BATCH_SIZE_ENV, "50"),
        ]))
        .unwrap();
        assert_eq!(config.http_timeout_secs, 30);
        assert_eq!(config.retention_days, 14);
        assert_eq!(config.upload_batch_size, 50);
    }

    #[test]
    fn from_lookup_requires_server_url() {
        let error = SyncClientConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(error.to_string().contains(SERVER_URL_ENV));
    }

    #[test]
    fn rejects_non_http_url_and_out_of_range_values() {
        assert!(SyncClientConfig::new("ftp://relay").is_err());
        assert!(SyncClientConfig::from_lookup(lookup(&[
            (SERVER_URL_ENV, "http://relay"),
            (HTTP_TIMEOUT_ENV, "0"),
        ]))
        .is_err());
        assert!(SyncClientConfig::from_lookup(lookup(&[
            (SERVER_URL_ENV, "http://relay"),
            (RETENTION_DAYS_ENV, "many"),
        ]))
        .is_err());
        assert!(SyncClientConfig::from_lookup(lookup(&[
            (SERVER_URL_ENV, "http://relay"),
            (UPLOAD_BATCH_SIZE_ENV, "0"),
        ]))
        .is_err());
    }
}
