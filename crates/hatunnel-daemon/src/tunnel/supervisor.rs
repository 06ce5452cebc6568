//! Connection supervisor: the reconnect state machine.
//!
//! The supervisor owns the connection lifecycle and is the only writer of
//! both the connection state and the health snapshot. Connection failures
//! never tear the daemon down; they are recorded, backed off, and retried.

use std::fmt;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use hatunnel_core::{ConnectError, HealthReporter, RetryContext, TunnelConfig};

use super::transport::{Transport, TunnelSession};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session and none being attempted.
    Disconnected,
    /// A dial and handshake are in flight.
    Connecting,
    /// A session is established and forwarding.
    Connected,
    /// Waiting out the delay before the next attempt.
    Backoff,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Backoff => "backoff",
        })
    }
}

/// Supervisor state published through a watch channel.
#[derive(Debug, Clone)]
pub struct SupervisorStatus {
    pub state: ConnectionState,
    pub retry: RetryContext,
}

enum CycleEnd {
    Failed,
    Shutdown,
}

/// Owns the connect/monitor/backoff loop around a [`Transport`].
pub struct Supervisor<T: Transport> {
    transport: T,
    config: TunnelConfig,
    health: HealthReporter,
    retry: RetryContext,
    status_tx: watch::Sender<SupervisorStatus>,
    rng: StdRng,
}

impl<T: Transport> Supervisor<T> {
    pub fn new(transport: T, config: TunnelConfig, health: HealthReporter) -> Self {
        Self::with_rng(transport, config, health, StdRng::from_rng(&mut rand::rng()))
    }

    /// Fixed jitter seed, for reproducible backoff sequences in tests.
    pub fn with_seed(transport: T, config: TunnelConfig, health: HealthReporter, seed: u64) -> Self {
        Self::with_rng(transport, config, health, StdRng::seed_from_u64(seed))
    }

    fn with_rng(transport: T, config: TunnelConfig, health: HealthReporter, rng: StdRng) -> Self {
        let (status_tx, _) = watch::channel(SupervisorStatus {
            state: ConnectionState::Disconnected,
            retry: RetryContext::new(),
        });
        Self { transport, config, health, retry: RetryContext::new(), status_tx, rng }
    }

    /// Observe state transitions and retry bookkeeping.
    pub fn status(&self) -> watch::Receiver<SupervisorStatus> {
        self.status_tx.subscribe()
    }

    /// Retry bookkeeping for the current failure streak.
    pub fn retry_context(&self) -> &RetryContext {
        &self.retry
    }

    /// Drive the tunnel until `shutdown` flips to true or the retry budget
    /// runs out. With the default unlimited policy this only returns on
    /// shutdown.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(remote_url = %self.config.remote_url, "Tunnel supervisor starting");
        let mut stop_reason = "shutdown requested";

        while !*shutdown.borrow() {
            if matches!(self.cycle(&mut shutdown).await, CycleEnd::Shutdown) {
                break;
            }

            let attempts = self.retry.attempt_count();
            if !self.config.reconnect.should_retry(attempts) {
                error!(attempts, "Reconnect attempt limit reached");
                stop_reason = "reconnect attempt limit reached";
                break;
            }

            tokio::select! {
                () = sleep(self.retry.next_delay()) => {}
                _ = shutdown.changed() => {
                    info!("Shutdown requested during backoff wait");
                    break;
                }
            }
        }

        self.health.record_disconnected(stop_reason);
        self.transition(ConnectionState::Disconnected, stop_reason);
        info!("Tunnel supervisor stopped");
    }

    /// One connect attempt plus, on success, one full session.
    async fn cycle(&mut self, shutdown: &mut watch::Receiver<bool>) -> CycleEnd {
        self.transition(ConnectionState::Connecting, "attempting connection");

        let opened = tokio::select! {
            opened = timeout(self.config.connect_timeout, self.transport.open(&self.config)) => opened,
            _ = shutdown.changed() => {
                info!("Shutdown requested during connection attempt");
                return CycleEnd::Shutdown;
            }
        };
        let mut session = match opened {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => {
                self.note_connect_failure(&err);
                return CycleEnd::Failed;
            }
            Err(_) => {
                self.note_connect_failure(&ConnectError::Timeout(self.config.connect_timeout));
                return CycleEnd::Failed;
            }
        };

        self.retry.reset();
        self.health.record_connected();
        self.transition(ConnectionState::Connected, "handshake complete");

        let reason = tokio::select! {
            reason = session.forward() => reason,
            _ = shutdown.changed() => {
                session.close().await;
                info!("Session closed for shutdown");
                return CycleEnd::Shutdown;
            }
        };
        session.close().await;

        warn!(reason = %reason, "Tunnel session ended");
        self.health.record_disconnected(reason.to_string());
        self.enter_backoff(&reason.to_string());
        CycleEnd::Failed
    }

    fn note_connect_failure(&mut self, err: &ConnectError) {
        if err.is_auth() {
            error!(error = %err, "Relay rejected credentials; check auth_user and auth_pass");
        } else {
            warn!(error = %err, "Connection attempt failed");
        }
        self.health.record_disconnected(err.to_string());
        self.enter_backoff(&err.to_string());
    }

    fn enter_backoff(&mut self, reason: &str) {
        let delay = self.retry.record_failure(&self.config.reconnect, &mut self.rng);
        self.transition(ConnectionState::Backoff, reason);
        warn!(
            attempt = self.retry.attempt_count(),
            delay_ms = delay.as_millis(),
            "Reconnecting after backoff delay"
        );
    }

    fn transition(&self, next: ConnectionState, reason: &str) {
        let mut previous = next;
        self.status_tx.send_modify(|status| {
            previous = status.state;
            status.state = next;
            status.retry = self.retry.clone();
        });
        if previous != next {
            info!(previous_state = %previous, new_state = %next, reason, "Tunnel state changed");
        }
    }
}
