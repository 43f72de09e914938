use crate::error::{Result, StoveError};
use rand::Rng;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// IANA dynamic/private port range.
pub const DYNAMIC_PORTS: RangeInclusive<u16> = 49152..=65535;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(200);
const DEFAULT_MAX_ATTEMPTS: u32 = 64;

/// A `(host, port)` pair a worker is launched with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Picks unused ports by probing random candidates.
///
/// A candidate is rejected when something accepts a connection on it. No
/// reservation is held, so a port can still be taken between the probe and
/// the worker binding it.
pub struct AddrAllocator {
    host: String,
    current_port: Option<u16>,
    max_attempts: u32,
    probe_timeout: Duration,
}

impl AddrAllocator {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            current_port: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn set_limits(&mut self, max_attempts: u32, probe_timeout: Duration) {
        self.max_attempts = max_attempts.max(1);
        self.probe_timeout = probe_timeout;
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Last port handed out, if any.
    pub fn current_port(&self) -> Option<u16> {
        self.current_port
    }

    /// Re-target the allocator, e.g. after the configured host changed.
    pub fn set_host(&mut self, host: impl Into<String>) {
        self.host = host.into();
    }

    pub async fn allocate(&mut self) -> Result<Address> {
        self.allocate_with(|| rand::rng().random_range(DYNAMIC_PORTS))
            .await
    }

    /// Probe candidates from `next_candidate` until one is free.
    pub async fn allocate_with<F>(&mut self, mut next_candidate: F) -> Result<Address>
    where
        F: FnMut() -> u16,
    {
        for attempt in 1..=self.max_attempts {
            let port = next_candidate();
            if self.is_occupied(port).await {
                debug!(port, attempt, "Port {} is in use, retrying", port);
                continue;
            }
            trace!(port, attempt, "Allocated port");
            self.current_port = Some(port);
            return Ok(Address::new(self.host.clone(), port));
        }

        Err(StoveError::PortExhausted {
            host: self.host.clone(),
            attempts: self.max_attempts,
        })
    }

    async fn is_occupied(&self, port: u16) -> bool {
        let probe = TcpStream::connect((self.host.as_str(), port));
        // The stream, if any, is dropped (closed) right here.
        matches!(
            tokio::time::timeout(self.probe_timeout, probe).await,
            Ok(Ok(_))
        )
    }
}
