//! Application layer - configuration and logging setup.

mod config;

pub use config::{Config, HealthConfig, LoggingConfig, RetryConfig};
