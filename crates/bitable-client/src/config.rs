//! Client configuration

use crate::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default Feishu Open API base URL
pub const DEFAULT_BASE_URL: &str = "https://open.feishu.cn/open-apis";

/// Quota for one executor group
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum requests admitted per second
    pub qps_limit: u32,
    /// Maximum requests in flight at once
    pub max_workers: usize,
    /// Per-request timeout
    #[serde(with = "secs")]
    pub timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::read_group()
    }
}

impl ExecutorConfig {
    /// Create a quota with the given rate and concurrency
    pub fn new(qps_limit: u32, max_workers: usize) -> Self {
        Self {
            qps_limit,
            max_workers,
            ..Default::default()
        }
    }

    /// Token fetches and schema reads
    pub fn read_group() -> Self {
        Self {
            qps_limit: 20,
            max_workers: 10,
            timeout: Duration::from_secs(10),
        }
    }

    /// Uploads and table/record mutations
    pub fn write_group() -> Self {
        Self {
            qps_limit: 5,
            max_workers: 3,
            timeout: Duration::from_secs(30),
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reject quotas that could never admit a request
    pub fn validate(&self) -> Result<()> {
        if self.qps_limit == 0 {
            return Err(ClientError::Config("qps_limit must be greater than 0".to_string()));
        }
        if self.max_workers == 0 {
            return Err(ClientError::Config("max_workers must be greater than 0".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(ClientError::Config("timeout must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// Retry settings for idempotent sub-steps
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_retries: u32,
    /// Fixed pause between attempts
    #[serde(with = "secs")]
    pub retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(ClientError::Config("max_retries must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Client configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Open API base URL, without trailing slash
    pub base_url: String,
    /// App ID used for the tenant token exchange
    pub app_id: String,
    /// App secret used for the tenant token exchange
    pub app_secret: String,
    /// User agent string
    pub user_agent: String,
    /// Quota for token fetches and reads
    pub read: ExecutorConfig,
    /// Quota for uploads and mutations
    pub write: ExecutorConfig,
    /// Retry settings for chunk uploads
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            app_id: String::new(),
            app_secret: String::new(),
            user_agent: format!("bitable-client/{}", env!("CARGO_PKG_VERSION")),
            read: ExecutorConfig::read_group(),
            write: ExecutorConfig::write_group(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Create a new config with the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the app credentials
    pub fn with_credentials(mut self, app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self.app_secret = app_secret.into();
        self
    }

    pub fn with_read_quota(mut self, quota: ExecutorConfig) -> Self {
        self.read = quota;
        self
    }

    pub fn with_write_quota(mut self, quota: ExecutorConfig) -> Self {
        self.write = quota;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Build a full URL for an API path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.app_id.is_empty() || self.app_secret.is_empty() {
            return Err(ClientError::Config("app_id and app_secret are required".to_string()));
        }
        self.read.validate()?;
        self.write.validate()?;
        self.retry.validate()
    }
}

/// Durations as fractional seconds
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_json() {
        let quota: ExecutorConfig =
            serde_json::from_str(r#"{"qps_limit": 5, "max_workers": 3, "timeout": 2.5}"#).unwrap();
        assert_eq!(quota.qps_limit, 5);
        assert_eq!(quota.max_workers, 3);
        assert_eq!(quota.timeout, Duration::from_millis(2500));

        let retry: RetryConfig = serde_json::from_str(r#"{"retry_delay": 0.25}"#).unwrap();
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.retry_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_negative_delay_rejected() {
        assert!(serde_json::from_str::<RetryConfig>(r#"{"retry_delay": -1}"#).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_err());

        let config = Config::default().with_credentials("cli_a", "secret");
        assert!(config.validate().is_ok());

        let bad = config.clone().with_write_quota(ExecutorConfig::new(0, 1));
        assert!(matches!(bad.validate(), Err(ClientError::Config(_))));

        let bad = config.with_retry(RetryConfig { max_retries: 0, ..Default::default() });
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_url_join() {
        let config = Config::new("http://localhost:8080/open-apis/");
        assert_eq!(
            config.url("/drive/v1/medias/upload_prepare"),
            "http://localhost:8080/open-apis/drive/v1/medias/upload_prepare"
        );
    }
}
