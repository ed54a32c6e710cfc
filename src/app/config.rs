//! SDK configuration loading and validation.
//!
//! Configuration is loaded from a TOML file with an environment variable
//! override for the auth token (`TRADELINK_TOKEN`), which is never read from
//! the config file.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::core::health::HealthMonitorConfig;
use crate::core::sync::{ConnectionOptions, RetryOptions};
use crate::core::transport::TransportOptions;
use crate::error::{ConfigError, Result};

mod logging;
pub use logging::LoggingConfig;

/// Synchronization retry backoff bounds, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_initial")]
    pub initial: u64,
    #[serde(default = "default_retry_max")]
    pub max: u64,
}

fn default_retry_initial() -> u64 {
    1
}

fn default_retry_max() -> u64 {
    300
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial: default_retry_initial(),
            max: default_retry_max(),
        }
    }
}

/// Health monitor settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_sample_period_ms")]
    pub sample_period_in_milliseconds: u64,
    #[serde(default = "default_quote_freshness")]
    pub quote_freshness_in_seconds: u64,
}

fn default_sample_period_ms() -> u64 {
    1000
}

fn default_quote_freshness() -> u64 {
    60
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            sample_period_in_milliseconds: default_sample_period_ms(),
            quote_freshness_in_seconds: default_quote_freshness(),
        }
    }
}

/// Main SDK configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Terminal server websocket endpoint.
    pub url: String,
    /// Auth token; populated from `TRADELINK_TOKEN`, never from the file.
    #[serde(skip)]
    pub token: Option<String>,
    /// Application tag stamped on requests.
    #[serde(default = "default_application")]
    pub application: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_in_seconds: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_in_seconds: u64,
    #[serde(default = "default_packet_ordering_timeout")]
    pub packet_ordering_timeout_in_seconds: u64,
    #[serde(default = "default_status_timer_timeout_ms")]
    pub status_timer_timeout_in_milliseconds: u64,
    #[serde(default)]
    pub synchronization_retry_interval_in_seconds: RetryConfig,
    #[serde(default)]
    pub health_monitor: HealthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_application() -> String {
    "MetaApi".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    60
}

fn default_packet_ordering_timeout() -> u64 {
    60
}

fn default_status_timer_timeout_ms() -> u64 {
    60_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            application: default_application(),
            request_timeout_in_seconds: default_request_timeout(),
            connect_timeout_in_seconds: default_connect_timeout(),
            packet_ordering_timeout_in_seconds: default_packet_ordering_timeout(),
            status_timer_timeout_in_milliseconds: default_status_timer_timeout_ms(),
            synchronization_retry_interval_in_seconds: RetryConfig::default(),
            health_monitor: HealthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        let mut config: Self = toml::from_str(&content).map_err(ConfigError::Parse)?;
        config.token = std::env::var("TRADELINK_TOKEN").ok();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "url" }.into());
        }
        url::Url::parse(&self.url).map_err(|e| ConfigError::InvalidValue {
            field: "url",
            reason: e.to_string(),
        })?;
        if self.application.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "application" }.into());
        }
        if self.request_timeout_in_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_in_seconds",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.connect_timeout_in_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connect_timeout_in_seconds",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        let retry = &self.synchronization_retry_interval_in_seconds;
        if retry.initial == 0 {
            return Err(ConfigError::InvalidValue {
                field: "synchronization_retry_interval_in_seconds.initial",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if retry.max < retry.initial {
            return Err(ConfigError::InvalidValue {
                field: "synchronization_retry_interval_in_seconds.max",
                reason: "must be >= initial".to_string(),
            }
            .into());
        }
        if self.health_monitor.sample_period_in_milliseconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "health_monitor.sample_period_in_milliseconds",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Transport-layer view of this configuration.
    #[must_use]
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            request_timeout: Duration::from_secs(self.request_timeout_in_seconds),
            connect_timeout: Duration::from_secs(self.connect_timeout_in_seconds),
            packet_ordering_timeout: Duration::from_secs(self.packet_ordering_timeout_in_seconds),
            ..TransportOptions::default()
        }
    }

    /// Per-connection view of this configuration.
    #[must_use]
    pub fn connection_options(&self) -> ConnectionOptions {
        let retry = &self.synchronization_retry_interval_in_seconds;
        ConnectionOptions {
            status_timeout: Some(Duration::from_millis(
                self.status_timer_timeout_in_milliseconds,
            )),
            retry: RetryOptions {
                initial_interval: Duration::from_secs(retry.initial),
                max_interval: Duration::from_secs(retry.max),
            },
            health: HealthMonitorConfig {
                sample_period: Duration::from_millis(
                    self.health_monitor.sample_period_in_milliseconds,
                ),
                quote_freshness: Duration::from_secs(
                    self.health_monitor.quote_freshness_in_seconds,
                ),
            },
        }
    }

    /// Endpoint URL with the auth token appended as a query parameter.
    pub fn endpoint_url(&self) -> Result<String> {
        let mut url = url::Url::parse(&self.url)?;
        if let Some(token) = &self.token {
            url.query_pairs_mut().append_pair("auth-token", token);
        }
        Ok(url.to_string())
    }

    /// Build an account handle carrying the configured application tag.
    #[must_use]
    pub fn account(&self, id: impl Into<crate::core::domain::AccountId>) -> crate::Account {
        crate::Account::new(id).with_application(self.application.clone())
    }

    /// Initialize logging with the configured settings.
    pub fn init_logging(&self) {
        self.logging.init();
    }
}
