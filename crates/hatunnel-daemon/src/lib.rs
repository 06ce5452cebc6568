//! hatunnel Daemon Library
//!
//! Core functionality for the hatunnel daemon:
//! - Connection supervisor driving the reconnect state machine
//! - TCP transport speaking the hatunnel wire protocol
//! - HTTP health endpoint for external monitoring

pub mod health;
pub mod tunnel;
