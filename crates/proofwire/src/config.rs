//! Session and relay configuration.

use std::time::Duration;

use proofwire_core::shm::{ShmConfig, DEFAULT_EXPECTED_TOTAL};

/// Floor for every periodic timer.
pub(crate) const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Port the reference relay peer listens on.
pub const DEFAULT_PEER_PORT: u16 = 8080;

/// Build the relay endpoint for `host`, following the page's scheme.
pub fn websocket_url(host: &str, tls: bool) -> String {
    let scheme = if tls { "wss" } else { "ws" };
    format!("{scheme}://{host}:{DEFAULT_PEER_PORT}")
}

/// Errors from [`SessionConfig::from_env`].
#[derive(Debug, thiserror::Error)]
#[error("invalid {var}={value:?}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// How the relay worker schedules its drains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// How often the relay looks at the outbound ring on its own.
    pub drain_interval: Duration,
    /// Pending bytes that trigger a drain without waiting for a flush.
    pub batch_threshold: usize,
    /// Largest single network send.
    pub max_send_chunk: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_millis(10),
            batch_threshold: 64 * 1024,
            max_send_chunk: 1024 * 1024,
        }
    }
}

/// Everything the controller needs to run one proof session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Where the relay worker connects.
    pub endpoint: String,
    /// Ring allocation.
    pub shm: ShmConfig,
    /// Expected bytes for the whole session, used for the percentage.
    pub expected_total: u64,
    /// How often progress is published.
    pub poll_interval: Duration,
    /// Supervisory timeout; `None` lets a session run forever.
    pub session_timeout: Option<Duration>,
    /// How long the relay gets to push out its last bytes after completion.
    pub shutdown_grace: Duration,
    pub relay: RelayConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: websocket_url("localhost", false),
            shm: ShmConfig::default(),
            expected_total: DEFAULT_EXPECTED_TOTAL,
            poll_interval: Duration::from_millis(500),
            session_timeout: Some(Duration::from_secs(600)),
            shutdown_grace: Duration::from_secs(1),
            relay: RelayConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `PROOFWIRE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(endpoint) = lookup("PROOFWIRE_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Some(v) = parse(&lookup, "PROOFWIRE_RING_CAPACITY")? {
            if v == 0 {
                return Err(ConfigError {
                    var: "PROOFWIRE_RING_CAPACITY",
                    value: v.to_string(),
                    reason: "must be non-zero".into(),
                });
            }
            config.shm.capacity = usize::try_from(v).map_err(|e| ConfigError {
                var: "PROOFWIRE_RING_CAPACITY",
                value: v.to_string(),
                reason: e.to_string(),
            })?;
        }
        if let Some(v) = parse(&lookup, "PROOFWIRE_EXPECTED_TOTAL")? {
            config.expected_total = v;
        }
        if let Some(v) = parse(&lookup, "PROOFWIRE_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(v.max(1));
        }
        if let Some(v) = parse(&lookup, "PROOFWIRE_SESSION_TIMEOUT_SECS")? {
            config.session_timeout = (v > 0).then(|| Duration::from_secs(v));
        }
        if let Some(v) = parse(&lookup, "PROOFWIRE_STALL_TIMEOUT_SECS")? {
            config.shm.stall_timeout = (v > 0).then(|| Duration::from_secs(v));
        }

        Ok(config)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Capacity of each ring. Zero is raised to one byte.
    pub fn with_ring_capacity(mut self, capacity: usize) -> Self {
        self.shm.capacity = capacity.max(1);
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.shm.stall_timeout = timeout;
        self
    }

    pub fn with_expected_total(mut self, expected_total: u64) -> Self {
        self.expected_total = expected_total;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn with_session_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }
}

fn parse(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<u64>, ConfigError> {
    lookup(var)
        .map(|value| {
            value.trim().parse::<u64>().map_err(|e| ConfigError {
                var,
                value: value.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}
