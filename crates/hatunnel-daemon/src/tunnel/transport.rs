//! Transport seam between the supervisor and a concrete tunnel.
//!
//! The supervisor only ever sees these traits. Production wires in
//! [`crate::tunnel::TcpTransport`]; tests drive the state machine with a
//! scripted fake.

use async_trait::async_trait;

use hatunnel_core::{ConnectError, TunnelConfig};

/// Why an established session ended.
///
/// Every variant is an ordinary, retriable disconnect. The supervisor
/// treats a relay restart or an idle 60-minute cutoff exactly like a
/// network blip: record, back off, reconnect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DisconnectReason {
    /// The relay closed the connection (EOF or an explicit shutdown notice).
    #[error("remote closed the tunnel")]
    RemoteClosed,

    /// Nothing arrived within twice the keepalive interval.
    #[error("keepalive timeout")]
    KeepaliveTimeout,

    /// The peer violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport-level read or write failure.
    #[error("i/o error: {0}")]
    Io(String),
}

/// Factory for tunnel sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    type Session: TunnelSession;

    /// Dial the remote endpoint and complete the handshake.
    ///
    /// The supervisor bounds the whole call with the configured connect
    /// timeout, so implementations do not need their own deadline.
    async fn open(&self, config: &TunnelConfig) -> Result<Self::Session, ConnectError>;
}

/// One established tunnel connection.
#[async_trait]
pub trait TunnelSession: Send {
    /// Relay traffic between the remote and local target connections until
    /// the session ends for any reason.
    async fn forward(&mut self) -> DisconnectReason;

    /// Release the socket and any per-stream tasks. Safe to call more than
    /// once; later calls are no-ops.
    async fn close(&mut self);
}
