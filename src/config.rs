//! Dashboard configuration: environment variables with defaults.
//!
//! Every knob has a default so the service starts with no environment at
//! all. A variable that is set but does not parse is an error rather than a
//! silent fallback.

use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_FILE_BACKEND_URL: &str = "http://localhost:5000/api";
const DEFAULT_DATA_RESET_DELAY_MS: u64 = 3000;
const DEFAULT_COUNTDOWN_TICK_MS: u64 = 1000;
const DEFAULT_STORE_WRITE_RETRIES: usize = 3;
const DEFAULT_STORE_RETRY_BASE_MS: u64 = 100;
const DEFAULT_HISTORY_PAGE_SIZE: usize = 5;
const DEFAULT_SEED_SERVERS: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}: cannot parse `{value}`")]
    Invalid { key: &'static str, value: String },
    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardConfig {
    pub port: u16,
    pub file_backend_url: String,
    /// Delay between data completion and the automatic store reset.
    pub data_reset_delay_ms: u64,
    pub countdown_tick_ms: u64,
    /// Attempts per store write, including the first.
    pub store_write_retries: usize,
    pub store_retry_base_ms: u64,
    pub history_page_size: usize,
    /// Servers created at start-up when the store is empty.
    pub seed_servers: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            file_backend_url: DEFAULT_FILE_BACKEND_URL.into(),
            data_reset_delay_ms: DEFAULT_DATA_RESET_DELAY_MS,
            countdown_tick_ms: DEFAULT_COUNTDOWN_TICK_MS,
            store_write_retries: DEFAULT_STORE_WRITE_RETRIES,
            store_retry_base_ms: DEFAULT_STORE_RETRY_BASE_MS,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            seed_servers: DEFAULT_SEED_SERVERS,
        }
    }
}

impl DashboardConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| match std::env::var(key) {
            Ok(value) => Some(value),
            Err(_) => None,
        })
    }

    /// Build from any key lookup. Used by `from_env` and tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let config = Self {
            port: env_parse(&lookup, "PORT", DEFAULT_PORT)?,
            file_backend_url: lookup("FILE_BACKEND_URL").unwrap_or_else(|| DEFAULT_FILE_BACKEND_URL.into()),
            data_reset_delay_ms: env_parse(&lookup, "DATA_RESET_DELAY_MS", DEFAULT_DATA_RESET_DELAY_MS)?,
            countdown_tick_ms: env_parse(&lookup, "COUNTDOWN_TICK_MS", DEFAULT_COUNTDOWN_TICK_MS)?,
            store_write_retries: env_parse(&lookup, "STORE_WRITE_RETRIES", DEFAULT_STORE_WRITE_RETRIES)?,
            store_retry_base_ms: env_parse(&lookup, "STORE_RETRY_BASE_MS", DEFAULT_STORE_RETRY_BASE_MS)?,
            history_page_size: env_parse(&lookup, "HISTORY_PAGE_SIZE", DEFAULT_HISTORY_PAGE_SIZE)?,
            seed_servers: env_parse(&lookup, "SEED_SERVERS", DEFAULT_SEED_SERVERS)?,
        };
        if config.countdown_tick_ms == 0 {
            return Err(ConfigError::Zero { key: "COUNTDOWN_TICK_MS" });
        }
        if config.store_write_retries == 0 {
            return Err(ConfigError::Zero { key: "STORE_WRITE_RETRIES" });
        }
        if config.history_page_size == 0 {
            return Err(ConfigError::Zero { key: "HISTORY_PAGE_SIZE" });
        }
        Ok(config)
    }

    #[must_use]
    pub fn data_reset_delay(&self) -> Duration {
        Duration::from_millis(self.data_reset_delay_ms)
    }

    #[must_use]
    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }
}

pub(crate) fn env_parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value.trim().parse::<T>().map_err(|_| ConfigError::Invalid { key, value })
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
