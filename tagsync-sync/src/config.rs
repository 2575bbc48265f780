//! Session and transport configuration.
//!
//! Both structs deserialize from JSON with every field optional, so a host
//! only needs to spell out what it overrides.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default zstd level for compact descriptors.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 19;

/// Timing and encoding settings for a sync session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long to collect local candidates before returning a descriptor (ms).
    pub gathering_timeout_ms: u64,
    /// How long the initiator waits for the channel after applying the answer (ms).
    pub handshake_timeout_ms: u64,
    /// How long the responder waits for the channel after producing its answer (ms).
    pub responder_wait_ms: u64,
    /// Health poll interval (ms).
    pub health_interval_ms: u64,
    /// Consecutive failed restarts before a new handshake is required.
    pub max_restart_attempts: u32,
    /// Delay before the first blob of a batch is sent (ms).
    pub blob_initial_delay_ms: u64,
    /// Additional delay for each following blob (ms).
    pub blob_stagger_ms: u64,
    /// zstd level used by `ConnectionDescriptor::to_compact`.
    pub compression_level: i32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            gathering_timeout_ms: 3_000,
            handshake_timeout_ms: 30_000,
            responder_wait_ms: 120_000,
            health_interval_ms: 30_000,
            max_restart_attempts: 3,
            blob_initial_delay_ms: 2_000,
            blob_stagger_ms: 500,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl SyncConfig {
    pub fn gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.gathering_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn responder_wait(&self) -> Duration {
        Duration::from_millis(self.responder_wait_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    /// Delay for the `index`-th blob of a batch.
    pub fn blob_delay(&self, index: usize) -> Duration {
        let stagger = self.blob_stagger_ms.saturating_mul(index as u64);
        Duration::from_millis(self.blob_initial_delay_ms.saturating_add(stagger))
    }
}

/// Settings for `DirectTransport`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectConfig {
    /// Address the initiator listens on. Port 0 picks a free port.
    pub bind_addr: SocketAddr,
    /// Extra addresses to advertise as host candidates.
    pub advertise_addrs: Vec<IpAddr>,
    /// Advertise the address of the interface holding the default route.
    pub discover_outbound: bool,
    /// Advertise the loopback address.
    pub include_loopback: bool,
    /// Timeout for a single TCP connect attempt (ms).
    pub connect_timeout_ms: u64,
    /// Pause between rounds of dialing every candidate (ms).
    pub redial_interval_ms: u64,
    /// How long the responder keeps dialing until a listener takes its hello (ms).
    pub dial_window_ms: u64,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            advertise_addrs: Vec::new(),
            discover_outbound: true,
            include_loopback: true,
            connect_timeout_ms: 3_000,
            redial_interval_ms: 500,
            dial_window_ms: 30_000,
        }
    }
}

impl DirectConfig {
    /// Loopback-only settings, for two endpoints on the same host.
    pub fn loopback() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            discover_outbound: false,
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn redial_interval(&self) -> Duration {
        Duration::from_millis(self.redial_interval_ms)
    }

    pub fn dial_window(&self) -> Duration {
        Duration::from_millis(self.dial_window_ms)
    }
}
