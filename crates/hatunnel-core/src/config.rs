//! Tunnel client configuration and the reconnect backoff policy.

use std::fmt;
use std::time::Duration;

use rand::RngExt;

use crate::error::ConfigError;

/// Interval between keepalive pings on an established tunnel.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

/// Budget for one dial plus handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Jitter factor bounds applied to every backoff delay.
const JITTER_LOW: f64 = 0.8;
const JITTER_HIGH: f64 = 1.2;

/// Clamp for the exponent cast; growth saturates long before this.
const MAX_EXPONENT: u32 = 64;

/// Immutable tunnel client configuration, assembled once at startup.
///
/// The supervisor never mutates this after the daemon boots; changing any
/// field requires a restart.
#[derive(Clone)]
pub struct TunnelConfig {
    /// Relay endpoint, e.g. `tcp://relay.example.net:9443`.
    pub remote_url: String,
    /// Username presented during the relay handshake.
    pub auth_user: String,
    /// Password presented during the relay handshake. Never logged.
    pub auth_pass: String,
    /// Local `host:port` that tunneled streams are forwarded to.
    pub local_target: String,
    /// Interval between keepalive pings on an established tunnel.
    pub keepalive_interval: Duration,
    /// Budget for one dial plus handshake.
    pub connect_timeout: Duration,
    /// Backoff schedule for reconnect attempts.
    pub reconnect: ReconnectPolicy,
}

impl TunnelConfig {
    /// Create a configuration with default timing and backoff settings.
    pub fn new(
        remote_url: impl Into<String>,
        auth_user: impl Into<String>,
        auth_pass: impl Into<String>,
        local_target: impl Into<String>,
    ) -> Self {
        Self {
            remote_url: remote_url.into(),
            auth_user: auth_user.into(),
            auth_pass: auth_pass.into(),
            local_target: local_target.into(),
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Validate the configuration before the supervisor loop starts.
    ///
    /// Failures here are fatal. Anything that passes validation can only
    /// fail at runtime in retriable ways.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth_user.trim().is_empty() {
            return Err(ConfigError::MissingCredentials("auth_user"));
        }
        if self.auth_pass.is_empty() {
            return Err(ConfigError::MissingCredentials("auth_pass"));
        }
        self.remote_endpoint()?;
        if self.keepalive_interval.is_zero() {
            return Err(ConfigError::InvalidInterval("keepalive interval must be positive"));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidInterval("connect timeout must be positive"));
        }
        Ok(())
    }

    /// Parse `remote_url` into a dialable endpoint.
    ///
    /// The scheme selects a default port (`ws`/`http` 80, `wss`/`https` 443);
    /// `tcp` URLs must carry an explicit port.
    pub fn remote_endpoint(&self) -> Result<RemoteEndpoint, ConfigError> {
        let url = self.remote_url.trim();
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| ConfigError::InvalidRemoteUrl(format!("missing scheme in {url:?}")))?;
        if !matches!(scheme, "tcp" | "ws" | "wss" | "http" | "https") {
            return Err(ConfigError::InvalidRemoteUrl(format!("unsupported scheme {scheme:?}")));
        }

        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port_str)) => {
                let port = port_str.parse::<u16>().map_err(|_| {
                    ConfigError::InvalidRemoteUrl(format!("invalid port {port_str:?}"))
                })?;
                (host, port)
            }
            None => {
                let port = default_port(scheme).ok_or_else(|| {
                    ConfigError::InvalidRemoteUrl(format!(
                        "no port given and no default for scheme {scheme:?}"
                    ))
                })?;
                (authority, port)
            }
        };
        if host.is_empty() {
            return Err(ConfigError::InvalidRemoteUrl("empty host".into()));
        }

        Ok(RemoteEndpoint { host: host.to_owned(), port })
    }
}

impl fmt::Debug for TunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelConfig")
            .field("remote_url", &self.remote_url)
            .field("auth_user", &self.auth_user)
            .field("auth_pass", &"<redacted>")
            .field("local_target", &self.local_target)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("connect_timeout", &self.connect_timeout)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "ws" | "http" => Some(80),
        "wss" | "https" => Some(443),
        _ => None,
    }
}

/// Host and port parsed out of a remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Exponential backoff schedule for reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub multiplier: f64,
    /// Total failed attempts before the supervisor gives up. `None` retries
    /// forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (zero-based), jittered.
    ///
    /// The raw delay grows exponentially from `initial_delay`, is capped at
    /// `max_delay`, then multiplied by a random factor in [0.8, 1.2] and
    /// capped again so jitter can never push past the maximum.
    pub fn delay_for_attempt(&self, attempt: u32, rng: &mut impl RngExt) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let raw_ms = base_ms * self.multiplier.powi(attempt.min(MAX_EXPONENT) as i32);
        let jittered_ms = raw_ms.min(max_ms) * rng.random_range(JITTER_LOW..=JITTER_HIGH);
        Duration::from_millis(jittered_ms.min(max_ms) as u64)
    }

    /// Whether another reconnect attempt is allowed after `attempts` failures.
    pub fn should_retry(&self, attempts: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts < max,
            None => true,
        }
    }
}

/// Retry bookkeeping owned by the supervisor.
///
/// `attempt_count` counts consecutive failures since the last successful
/// connection. The delay for a failure is computed from the count *before*
/// it increments, so the first failure waits roughly `initial_delay`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryContext {
    attempt_count: u32,
    next_delay: Duration,
}

impl RetryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consecutive failures since the last successful connection.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Delay computed for the most recent failure.
    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }

    /// Record one failed attempt: compute the backoff delay for the current
    /// count, store it, then increment the count.
    pub fn record_failure(&mut self, policy: &ReconnectPolicy, rng: &mut impl RngExt) -> Duration {
        self.next_delay = policy.delay_for_attempt(self.attempt_count, rng);
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.next_delay
    }

    /// Reset after a successful connection so the next failure starts the
    /// backoff schedule from the beginning.
    pub fn reset(&mut self) {
        self.attempt_count = 0;
        self.next_delay = Duration::ZERO;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn default_reconnect_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert!((policy.multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(policy.max_attempts, None);
    }

    #[test]
    fn exponential_backoff_delays() {
        let policy = ReconnectPolicy::default();
        let mut rng = StdRng::seed_from_u64(42);

        let raw_secs: [f64; 8] = [1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 60.0, 60.0]; // capped at 60
        for (attempt, raw) in raw_secs.iter().enumerate() {
            let delay = policy.delay_for_attempt(attempt as u32, &mut rng).as_secs_f64();
            let low = raw * 0.8;
            let high = (raw * 1.2).min(60.0);
            assert!(
                delay >= low && delay <= high,
                "attempt {attempt}: delay {delay}s outside [{low}, {high}]"
            );
        }
    }

    #[test]
    fn jitter_is_deterministic_per_seed() {
        let policy = ReconnectPolicy::default();
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);

        for attempt in 0..10 {
            assert_eq!(
                policy.delay_for_attempt(attempt, &mut a),
                policy.delay_for_attempt(attempt, &mut b)
            );
        }
    }

    #[test]
    fn delay_never_exceeds_max() {
        let policy = ReconnectPolicy::default();
        let mut rng = StdRng::seed_from_u64(1);

        for attempt in [0, 6, 7, 32, 1_000, u32::MAX] {
            let delay = policy.delay_for_attempt(attempt, &mut rng);
            assert!(delay <= policy.max_delay, "attempt {attempt}: {delay:?}");
            assert!(delay > Duration::ZERO, "attempt {attempt}: {delay:?}");
        }
    }

    #[test]
    fn retry_with_max_attempts() {
        let policy = ReconnectPolicy { max_attempts: Some(3), ..Default::default() };
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(10));
    }

    #[test]
    fn retry_unlimited() {
        let policy = ReconnectPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1_000));
        assert!(policy.should_retry(u32::MAX));
    }

    #[test]
    fn first_failure_waits_about_the_initial_delay() {
        let policy = ReconnectPolicy::default();
        let mut rng = StdRng::seed_from_u64(9);
        let mut retry = RetryContext::new();

        let delay = retry.record_failure(&policy, &mut rng);
        assert_eq!(retry.attempt_count(), 1);
        assert!(delay >= Duration::from_millis(800), "{delay:?}");
        assert!(delay <= Duration::from_millis(1200), "{delay:?}");
        assert_eq!(retry.next_delay(), delay);
    }

    #[test]
    fn retry_context_resets_after_success() {
        let policy = ReconnectPolicy::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut retry = RetryContext::new();

        for _ in 0..5 {
            retry.record_failure(&policy, &mut rng);
        }
        assert_eq!(retry.attempt_count(), 5);
        assert!(retry.next_delay() > Duration::ZERO);

        retry.reset();
        assert_eq!(retry.attempt_count(), 0);
        assert_eq!(retry.next_delay(), Duration::ZERO);

        // The schedule starts over after a reset.
        let delay = retry.record_failure(&policy, &mut rng);
        assert!(delay <= Duration::from_millis(1200), "{delay:?}");
    }

    #[test]
    fn tunnel_config_new() {
        let config = TunnelConfig::new("tcp://relay.example.net:9443", "user", "secret", "127.0.0.1:8123");
        assert_eq!(config.remote_url, "tcp://relay.example.net:9443");
        assert_eq!(config.local_target, "127.0.0.1:8123");
        assert_eq!(config.keepalive_interval, DEFAULT_KEEPALIVE_INTERVAL);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.reconnect.max_attempts, None);
    }

    #[test]
    fn redacts_password_in_debug() {
        let config = TunnelConfig::new("tcp://relay.example.net:9443", "user", "hunter2", "127.0.0.1:8123");
        let debug = format!("{config:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn validate_accepts_good_config() {
        let config = TunnelConfig::new("wss://relay.example.net", "user", "secret", "127.0.0.1:8123");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_credentials() {
        let config = TunnelConfig::new("tcp://relay.example.net:9443", " ", "secret", "127.0.0.1:8123");
        assert!(matches!(config.validate(), Err(ConfigError::MissingCredentials("auth_user"))));

        let config = TunnelConfig::new("tcp://relay.example.net:9443", "user", "", "127.0.0.1:8123");
        assert!(matches!(config.validate(), Err(ConfigError::MissingCredentials("auth_pass"))));
    }

    #[test]
    fn validate_rejects_zero_intervals() {
        let mut config = TunnelConfig::new("tcp://relay.example.net:9443", "user", "secret", "127.0.0.1:8123");
        config.keepalive_interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidInterval(_))));

        let mut config = TunnelConfig::new("tcp://relay.example.net:9443", "user", "secret", "127.0.0.1:8123");
        config.connect_timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidInterval(_))));
    }

    #[test]
    fn remote_endpoint_requires_scheme() {
        let config = TunnelConfig::new("relay.example.net:9443", "user", "secret", "127.0.0.1:8123");
        assert!(matches!(config.remote_endpoint(), Err(ConfigError::InvalidRemoteUrl(_))));
    }

    #[test]
    fn remote_endpoint_rejects_unknown_scheme() {
        let config = TunnelConfig::new("ftp://relay.example.net:21", "user", "secret", "127.0.0.1:8123");
        assert!(matches!(config.remote_endpoint(), Err(ConfigError::InvalidRemoteUrl(_))));
    }

    #[test]
    fn remote_endpoint_defaults_port_by_scheme() {
        for (url, port) in [
            ("ws://relay.example.net", 80),
            ("http://relay.example.net", 80),
            ("wss://relay.example.net", 443),
            ("https://relay.example.net", 443),
        ] {
            let config = TunnelConfig::new(url, "user", "secret", "127.0.0.1:8123");
            let endpoint = config.remote_endpoint().unwrap();
            assert_eq!(endpoint.host, "relay.example.net");
            assert_eq!(endpoint.port, port, "{url}");
        }
    }

    #[test]
    fn remote_endpoint_tcp_needs_explicit_port() {
        let config = TunnelConfig::new("tcp://relay.example.net", "user", "secret", "127.0.0.1:8123");
        assert!(matches!(config.remote_endpoint(), Err(ConfigError::InvalidRemoteUrl(_))));

        let config = TunnelConfig::new("tcp://relay.example.net:9443", "user", "secret", "127.0.0.1:8123");
        let endpoint = config.remote_endpoint().unwrap();
        assert_eq!(endpoint.to_string(), "relay.example.net:9443");
    }

    #[test]
    fn remote_endpoint_strips_path() {
        let config = TunnelConfig::new("wss://relay.example.net/tunnel?x=1", "user", "secret", "127.0.0.1:8123");
        let endpoint = config.remote_endpoint().unwrap();
        assert_eq!(endpoint.host, "relay.example.net");
        assert_eq!(endpoint.port, 443);
    }

    #[test]
    fn remote_endpoint_rejects_garbage() {
        for url in ["tcp://:9443", "tcp://relay.example.net:port", "wss://"] {
            let config = TunnelConfig::new(url, "user", "secret", "127.0.0.1:8123");
            assert!(config.remote_endpoint().is_err(), "{url}");
        }
    }
}
