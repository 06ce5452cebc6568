//! Error types shared across hatunnel components.

use std::time::Duration;

/// Errors that can end a connection attempt.
///
/// Every variant is retriable: the supervisor records it, backs off and
/// dials again. `Auth` is logged at elevated severity because it usually
/// means bad credentials rather than a transient outage, but it still does
/// not stop the retry loop.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Dial failure, connection reset, or a handshake that went off the rails.
    #[error("Network error: {0}")]
    Network(String),

    /// The connect and handshake did not complete within the configured timeout.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The relay rejected the presented credentials.
    #[error("Authentication rejected: {0}")]
    Auth(String),
}

impl ConnectError {
    /// Whether the relay rejected our credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// Errors found while validating the tunnel configuration.
///
/// These are fatal: the daemon refuses to start its supervisor loop.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid remote URL: {0}")]
    InvalidRemoteUrl(String),

    #[error("Missing credentials: {0} must not be empty")]
    MissingCredentials(&'static str),

    #[error("Invalid interval: {0}")]
    InvalidInterval(&'static str),
}
