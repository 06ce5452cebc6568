//! hatunnel Core Library
//!
//! Shared functionality for hatunnel components:
//! - Tunnel configuration, validation and the reconnect backoff policy
//! - Health snapshot channel read by the health endpoint
//! - Common error types
//! - Tracing setup

pub mod config;
pub mod error;
pub mod health;
pub mod tracing_init;

pub use config::{ReconnectPolicy, RemoteEndpoint, RetryContext, TunnelConfig};
pub use error::{ConfigError, ConnectError};
pub use health::{HealthReceiver, HealthReporter, HealthSnapshot};
