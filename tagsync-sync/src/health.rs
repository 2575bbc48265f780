//! Link health monitoring and lightweight reconnection.
//!
//! A connected session is polled at a fixed interval. When the transport is
//! unhealthy the monitor asks it to restart, up to a bounded number of
//! consecutive attempts, after which only a fresh handshake can recover.

use crate::config::SyncConfig;
use crate::establisher::HandshakeState;
use crate::orchestrator::SyncEvent;
use crate::transport::PeerTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Link health as seen by the monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkStatus {
    /// No check has run yet.
    #[default]
    Unknown,
    Healthy,
    /// A restart has been requested; `attempt` counts from 1.
    Reconnecting { attempt: u32 },
    /// Restarts are exhausted. Terminal.
    NeedsNewHandshake,
}

/// Polls a transport and restarts it when the link drops.
pub struct HealthMonitor {
    transport: Arc<dyn PeerTransport>,
    handshake: watch::Receiver<HandshakeState>,
    interval: Duration,
    max_attempts: u32,
    failures: u32,
    status: watch::Sender<LinkStatus>,
    events: Option<mpsc::UnboundedSender<SyncEvent>>,
}

impl HealthMonitor {
    pub fn new(
        transport: Arc<dyn PeerTransport>,
        handshake: watch::Receiver<HandshakeState>,
        config: &SyncConfig,
    ) -> Self {
        let (status, _) = watch::channel(LinkStatus::Unknown);
        Self {
            transport,
            handshake,
            interval: config.health_interval(),
            max_attempts: config.max_restart_attempts,
            failures: 0,
            status,
            events: None,
        }
    }

    /// Also report `SyncEvent::NeedsNewHandshake` on this channel.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<SyncEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    /// Runs one health check.
    pub async fn check(&mut self) -> LinkStatus {
        if self.status() == LinkStatus::NeedsNewHandshake {
            return LinkStatus::NeedsNewHandshake;
        }

        let state = self.transport.state();
        if state.is_healthy() {
            if self.failures > 0 {
                info!("Link recovered after {} restart attempts", self.failures);
            }
            self.failures = 0;
            return self.set(LinkStatus::Healthy);
        }

        if !self.handshake.borrow().is_connected() {
            debug!("Link is {:?} but the handshake never completed; not restarting", state);
            return self.status();
        }

        if self.failures >= self.max_attempts {
            warn!(
                "Link still {:?} after {} restart attempts; a new handshake is required",
                state, self.failures
            );
            if let Some(events) = &self.events {
                let _ = events.send(SyncEvent::NeedsNewHandshake);
            }
            return self.set(LinkStatus::NeedsNewHandshake);
        }

        self.failures += 1;
        info!(
            "Link is {:?}; restart attempt {}/{}",
            state, self.failures, self.max_attempts
        );
        if let Err(e) = self.transport.restart().await {
            warn!("Restart attempt {} failed: {}", self.failures, e);
        }
        self.set(LinkStatus::Reconnecting {
            attempt: self.failures,
        })
    }

    /// Checks every interval until cancelled or a new handshake is needed.
    pub async fn run(mut self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Health monitor stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if self.check().await == LinkStatus::NeedsNewHandshake {
                        break;
                    }
                }
            }
        }
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }

    fn set(&self, status: LinkStatus) -> LinkStatus {
        self.status.send_replace(status);
        status
    }
}
