//! # Vector Config
//!
//! Configuration for the resilient vector client.
//!
//! A [`ClientConfig`] is read from YAML, TOML or JSON, overridden from the
//! environment, validated, and then passed explicitly to the client.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod loader;

pub use config::{
    ClientConfig, EndpointConfig, MetricsConfig, MetricsPush, TransportConfig, TransportStrategy,
    DEFAULT_BATCH_CONCURRENCY, DEFAULT_HOST, DEFAULT_PORT,
};
pub use error::ConfigError;
pub use loader::{apply_env_overrides, from_env, from_env_with, load_config, load_config_with};
