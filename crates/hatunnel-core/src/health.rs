//! Health state shared between the supervisor and the health endpoint.
//!
//! The supervisor is the only writer; the HTTP endpoint and tests read
//! through cloned watch receivers. Reads never block and never touch the
//! tunnel's hot path.

use std::time::SystemTime;

use tokio::sync::watch;

/// Point-in-time view of tunnel connectivity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthSnapshot {
    /// Whether a tunnel session is currently established.
    pub connected: bool,
    /// Human-readable description of the most recent failure, if any.
    pub last_error: Option<String>,
    /// When the tunnel last completed a handshake. Survives disconnects.
    pub last_connected_at: Option<SystemTime>,
}

/// Read side of the health channel.
pub type HealthReceiver = watch::Receiver<HealthSnapshot>;

/// Single-writer handle the supervisor uses to publish health updates.
#[derive(Debug)]
pub struct HealthReporter {
    tx: watch::Sender<HealthSnapshot>,
}

/// Create a connected reporter/receiver pair with an empty snapshot.
pub fn channel() -> (HealthReporter, HealthReceiver) {
    let (tx, rx) = watch::channel(HealthSnapshot::default());
    (HealthReporter { tx }, rx)
}

impl HealthReporter {
    /// Record a successful connection: clears the last error and stamps the
    /// connect time.
    pub fn record_connected(&self) {
        self.tx.send_modify(|snapshot| {
            snapshot.connected = true;
            snapshot.last_error = None;
            snapshot.last_connected_at = Some(SystemTime::now());
        });
    }

    /// Record a disconnect or failed attempt. Keeps `last_connected_at` so
    /// operators can see when the tunnel was last up.
    pub fn record_disconnected(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_modify(|snapshot| {
            snapshot.connected = false;
            snapshot.last_error = Some(reason);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected_with_no_history() {
        let (_reporter, rx) = channel();
        let snapshot = rx.borrow();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.last_error, None);
        assert_eq!(snapshot.last_connected_at, None);
    }

    #[test]
    fn connect_clears_error_and_stamps_time() {
        let (reporter, rx) = channel();
        let before = SystemTime::now();

        reporter.record_disconnected("Network error: connection refused");
        reporter.record_connected();

        let snapshot = rx.borrow().clone();
        assert!(snapshot.connected);
        assert_eq!(snapshot.last_error, None);
        assert!(snapshot.last_connected_at.is_some_and(|at| at >= before));
    }

    #[test]
    fn disconnect_preserves_last_connected_at() {
        let (reporter, rx) = channel();

        reporter.record_connected();
        let connected_at = rx.borrow().last_connected_at;
        assert!(connected_at.is_some());

        reporter.record_disconnected("Timed out after 10s");
        let snapshot = rx.borrow().clone();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.last_error.as_deref(), Some("Timed out after 10s"));
        assert_eq!(snapshot.last_connected_at, connected_at);
    }

    #[test]
    fn every_cloned_receiver_sees_updates() {
        let (reporter, rx) = channel();
        let other = rx.clone();

        reporter.record_connected();
        assert!(rx.borrow().connected);
        assert!(other.borrow().connected);
    }
}
