//! Configuration types.

use std::path::PathBuf;

use chrono::format::{Item, StrftimeItems};

use crate::error::ConfigError;

/// Prompt shown in place of the period date until one is picked.
pub const PERIOD_DATE_PROMPT: &str = "When did your last period start?";

/// Onboarding configuration.
#[derive(Debug, Clone)]
pub struct OnboardingConfig {
    /// Path of the libSQL database holding user records and preferences.
    pub db_path: PathBuf,
    /// Port for the read-only status endpoints.
    pub http_port: u16,
    /// `chrono` format string for the picked period date.
    pub period_date_format: String,
    /// Capacity of the notification broadcast channel.
    pub notice_capacity: usize,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/svastha.db"),
            http_port: 8080,
            period_date_format: "%a, %b %d".to_string(), // "EEE, MMM dd"
            notice_capacity: 64,
        }
    }
}

impl OnboardingConfig {
    /// Build configuration from `SVASTHA_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup, falling back to
    /// defaults for anything unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("SVASTHA_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(port) = lookup("SVASTHA_HTTP_PORT") {
            config.http_port = parse_value("SVASTHA_HTTP_PORT", &port)?;
        }
        if let Some(format) = lookup("SVASTHA_PERIOD_DATE_FORMAT") {
            if format.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "SVASTHA_PERIOD_DATE_FORMAT".to_string(),
                    message: "must not be blank".to_string(),
                });
            }
            if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
                return Err(ConfigError::InvalidValue {
                    key: "SVASTHA_PERIOD_DATE_FORMAT".to_string(),
                    message: format!("{format:?} is not a valid date format"),
                });
            }
            config.period_date_format = format;
        }
        if let Some(capacity) = lookup("SVASTHA_NOTICE_CAPACITY") {
            let capacity: usize = parse_value("SVASTHA_NOTICE_CAPACITY", &capacity)?;
            if capacity == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "SVASTHA_NOTICE_CAPACITY".to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
            config.notice_capacity = capacity;
        }

        Ok(config)
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}
