use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Control-plane base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.dev.avremy.public.norman-ai.com/v0/";

/// Per-request timeout for non-streaming calls.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// HTTP settings for the control-plane client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        let url = self.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ApiError::InvalidConfig(format!(
                "base_url must be an http(s) URL, got `{url}`"
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ApiError::InvalidConfig("timeout_secs must be non-zero".into()));
        }
        Ok(())
    }

    /// Base URL with exactly one trailing slash, ready for relative paths.
    pub(crate) fn normalized_base(&self) -> String {
        format!("{}/", self.base_url.trim().trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn base_url_normalized() {
        let config = HttpConfig {
            base_url: "http://localhost:8080/v0".into(),
            ..HttpConfig::default()
        };
        assert_eq!(config.normalized_base(), "http://localhost:8080/v0/");

        let config = HttpConfig {
            base_url: "http://localhost:8080/v0//".into(),
            ..HttpConfig::default()
        };
        assert_eq!(config.normalized_base(), "http://localhost:8080/v0/");
    }

    #[test]
    fn rejects_bad_values() {
        let bad_scheme = HttpConfig {
            base_url: "ftp://example.com".into(),
            ..HttpConfig::default()
        };
        assert!(bad_scheme.validate().is_err());

        let zero_timeout = HttpConfig {
            timeout_secs: 0,
            ..HttpConfig::default()
        };
        assert!(zero_timeout.validate().is_err());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: HttpConfig = serde_json::from_str(r#"{"timeout_secs": 3}"#).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timeout_secs, 3);
    }
}
