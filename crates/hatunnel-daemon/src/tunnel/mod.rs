//! Tunnel client core.
//!
//! The supervisor drives the connect/retry state machine over the
//! [`Transport`] seam; [`TcpTransport`] is the production implementation
//! speaking the hatunnel wire protocol.

pub mod supervisor;
pub mod tcp;
pub mod transport;

pub use supervisor::{ConnectionState, Supervisor, SupervisorStatus};
pub use tcp::TcpTransport;
pub use transport::{DisconnectReason, Transport, TunnelSession};
