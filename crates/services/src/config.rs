//! Client configuration.

use norman_api::HttpConfig;
use norman_transfer::IoConfig;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::retry::RetryPolicy;

/// Overrides [`HttpConfig::base_url`].
pub const ENV_BASE_URL: &str = "NORMAN_BASE_URL";
/// Overrides [`HttpConfig::timeout_secs`].
pub const ENV_HTTP_TIMEOUT_SECS: &str = "NORMAN_HTTP_TIMEOUT_SECS";
/// Overrides [`IoConfig::chunk_size`].
pub const ENV_CHUNK_SIZE: &str = "NORMAN_CHUNK_SIZE";

/// Everything the transfer services need to run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub http: HttpConfig,
    pub io: IoConfig,
    pub retry: RetryPolicy,
}

impl ClientConfig {
    /// Defaults overridden by `NORMAN_*` environment variables.
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ServiceError> {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            config.http.base_url = url.trim().to_string();
        }
        if let Some(secs) = lookup(ENV_HTTP_TIMEOUT_SECS) {
            config.http.timeout_secs = parse_var(ENV_HTTP_TIMEOUT_SECS, &secs)?;
        }
        if let Some(size) = lookup(ENV_CHUNK_SIZE) {
            config.io.chunk_size = parse_var(ENV_CHUNK_SIZE, &size)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        self.http.validate()?;
        self.io.validate()?;
        self.retry.validate()
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ServiceError> {
    value
        .trim()
        .parse()
        .map_err(|_| ServiceError::Config(format!("{key} is not a valid number: `{value}`")))
}
