//! Peer transport abstraction.
//!
//! A `PeerTransport` is one endpoint of a direct, reliable, ordered text
//! channel set up by an offer/answer exchange. The establisher drives the
//! exchange; the orchestrator consumes the resulting event stream.

use crate::descriptor::{NetworkCandidate, SessionDescription};
use crate::error::SyncResult;
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Connectivity of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Only `Connected` can carry messages.
    pub fn is_healthy(self) -> bool {
        self == ConnectionState::Connected
    }
}

/// Something that happened on a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A local candidate was discovered and should reach the other side.
    LocalCandidate(NetworkCandidate),
    /// No more local candidates will be reported.
    GatheringComplete,
    StateChanged(ConnectionState),
    /// The data channel can carry messages.
    ChannelOpen,
    /// A text message from the peer.
    Message(String),
    /// The data channel stopped carrying messages.
    ChannelClosed,
}

/// One endpoint of a direct peer link.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Creates a local offer and starts gathering candidates.
    async fn create_offer(&self) -> SyncResult<SessionDescription>;

    /// Applies a remote offer and returns the local answer.
    async fn accept_offer(&self, offer: &SessionDescription) -> SyncResult<SessionDescription>;

    /// Applies the remote answer to a previously created offer.
    async fn apply_answer(&self, answer: &SessionDescription) -> SyncResult<()>;

    /// Adds a candidate received from the other side.
    async fn add_remote_candidate(&self, candidate: &NetworkCandidate) -> SyncResult<()>;

    /// Sends a text message on the open channel.
    async fn send(&self, text: String) -> SyncResult<()>;

    /// Next event, or `None` once the transport is closed and drained.
    /// There must be a single consumer at a time. Must be cancel-safe.
    async fn next_event(&self) -> Option<TransportEvent>;

    /// Current connectivity.
    fn state(&self) -> ConnectionState;

    /// Attempts to re-establish a dropped link without a new handshake.
    async fn restart(&self) -> SyncResult<()>;

    /// Tears the transport down. Idempotent.
    fn close(&self);
}

/// A random `ice-ufrag` style credential.
pub(crate) fn random_credential() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

/// Minimal SDP for a data-channel-only session.
pub(crate) fn session_sdp(ufrag: &str, protocol: &str) -> String {
    let session_id: u64 = rand::thread_rng().gen_range(1..u64::MAX / 2);
    format!(
        "v=0\r\n\
         o=- {session_id} 2 IN IP4 127.0.0.1\r\n\
         s=-\r\n\
         t=0 0\r\n\
         m=application 9 {protocol} webrtc-datachannel\r\n\
         c=IN IP4 0.0.0.0\r\n\
         a=ice-ufrag:{ufrag}\r\n\
         a=mid:0\r\n"
    )
}

/// An in-process transport for testing.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
    use tokio::sync::mpsc;

    struct Endpoint {
        events: mpsc::UnboundedSender<TransportEvent>,
        state: ConnectionState,
        peer: Option<String>,
    }

    #[derive(Default)]
    struct Registry {
        endpoints: HashMap<String, Endpoint>,
        severed: bool,
    }

    /// A shared medium that loopback transports connect through.
    #[derive(Clone, Default)]
    pub struct LoopbackNetwork {
        registry: Arc<Mutex<Registry>>,
    }

    impl LoopbackNetwork {
        pub fn new() -> Self {
            Self::default()
        }

        /// A new endpoint on this network.
        pub fn endpoint(&self) -> LoopbackTransport {
            let (tx, rx) = mpsc::unbounded_channel();
            let ufrag = random_credential();
            self.lock().endpoints.insert(
                ufrag.clone(),
                Endpoint {
                    events: tx,
                    state: ConnectionState::New,
                    peer: None,
                },
            );
            LoopbackTransport {
                network: self.clone(),
                ufrag,
                events: tokio::sync::Mutex::new(rx),
            }
        }

        /// Two endpoints, for tests that drive the handshake themselves.
        pub fn pair(&self) -> (LoopbackTransport, LoopbackTransport) {
            (self.endpoint(), self.endpoint())
        }

        /// Drops every established link, as a brief network outage would.
        /// `restart()` recovers.
        pub fn interrupt(&self) {
            let mut registry = self.lock();
            let ids: Vec<String> = registry
                .endpoints
                .iter()
                .filter(|(_, e)| e.state == ConnectionState::Connected)
                .map(|(id, _)| id.clone())
                .collect();
            for id in ids {
                set_state(&mut registry, &id, ConnectionState::Disconnected);
            }
        }

        /// Drops every link for good. `restart()` fails from now on.
        pub fn sever(&self) {
            let mut registry = self.lock();
            registry.severed = true;
            let ids: Vec<String> = registry
                .endpoints
                .iter()
                .filter(|(_, e)| e.peer.is_some())
                .map(|(id, _)| id.clone())
                .collect();
            for id in ids {
                set_state(&mut registry, &id, ConnectionState::Failed);
            }
        }

        /// Re-allows links after `sever()`.
        pub fn heal(&self) {
            self.lock().severed = false;
        }

        fn lock(&self) -> MutexGuard<'_, Registry> {
            self.registry.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    fn emit(registry: &Registry, id: &str, event: TransportEvent) {
        if let Some(endpoint) = registry.endpoints.get(id) {
            let _ = endpoint.events.send(event);
        }
    }

    fn set_state(registry: &mut Registry, id: &str, state: ConnectionState) {
        let Some(endpoint) = registry.endpoints.get_mut(id) else {
            return;
        };
        let previous = endpoint.state;
        if previous == state {
            return;
        }
        endpoint.state = state;
        emit(registry, id, TransportEvent::StateChanged(state));
        if state == ConnectionState::Connected {
            emit(registry, id, TransportEvent::ChannelOpen);
        } else if previous == ConnectionState::Connected {
            emit(registry, id, TransportEvent::ChannelClosed);
        }
    }

    /// An endpoint of a `LoopbackNetwork`.
    pub struct LoopbackTransport {
        network: LoopbackNetwork,
        ufrag: String,
        events: tokio::sync::Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
    }

    impl LoopbackTransport {
        /// This endpoint's credential.
        pub fn ufrag(&self) -> &str {
            &self.ufrag
        }

        fn candidate(&self) -> NetworkCandidate {
            NetworkCandidate::new(format!(
                "candidate:1 1 loopback 2130706431 {} 0 typ host",
                self.ufrag
            ))
        }

        fn link(&self, registry: &mut Registry, peer: &str) {
            for (a, b) in [(self.ufrag.as_str(), peer), (peer, self.ufrag.as_str())] {
                if let Some(endpoint) = registry.endpoints.get_mut(a) {
                    endpoint.peer = Some(b.to_string());
                }
            }
            set_state(registry, &self.ufrag, ConnectionState::Connected);
            set_state(registry, peer, ConnectionState::Connected);
        }
    }

    #[async_trait]
    impl PeerTransport for LoopbackTransport {
        async fn create_offer(&self) -> SyncResult<SessionDescription> {
            let registry = self.network.lock();
            if !registry.endpoints.contains_key(&self.ufrag) {
                return Err(SyncError::ChannelClosed);
            }
            emit(&registry, &self.ufrag, TransportEvent::LocalCandidate(self.candidate()));
            emit(&registry, &self.ufrag, TransportEvent::GatheringComplete);
            Ok(SessionDescription::offer(session_sdp(&self.ufrag, "LOOPBACK")))
        }

        async fn accept_offer(&self, offer: &SessionDescription) -> SyncResult<SessionDescription> {
            offer.validate()?;
            let remote = offer
                .attribute("ice-ufrag")
                .ok_or_else(|| SyncError::MalformedDescriptor("offer has no ice-ufrag".into()))?
                .to_string();
            let mut registry = self.network.lock();
            let endpoint = registry.endpoints.get_mut(&self.ufrag).ok_or(SyncError::ChannelClosed)?;
            endpoint.peer = Some(remote);
            set_state(&mut registry, &self.ufrag, ConnectionState::Connecting);
            emit(&registry, &self.ufrag, TransportEvent::LocalCandidate(self.candidate()));
            emit(&registry, &self.ufrag, TransportEvent::GatheringComplete);
            Ok(SessionDescription::answer(session_sdp(&self.ufrag, "LOOPBACK")))
        }

        async fn apply_answer(&self, answer: &SessionDescription) -> SyncResult<()> {
            answer.validate()?;
            let remote = answer
                .attribute("ice-ufrag")
                .ok_or_else(|| SyncError::MalformedDescriptor("answer has no ice-ufrag".into()))?
                .to_string();
            let mut registry = self.network.lock();
            set_state(&mut registry, &self.ufrag, ConnectionState::Connecting);

            let answered_us = registry
                .endpoints
                .get(&remote)
                .is_some_and(|e| e.peer.as_deref() == Some(self.ufrag.as_str()));
            if answered_us && !registry.severed {
                self.link(&mut registry, &remote);
            }
            Ok(())
        }

        async fn add_remote_candidate(&self, _candidate: &NetworkCandidate) -> SyncResult<()> {
            Ok(())
        }

        async fn send(&self, text: String) -> SyncResult<()> {
            let registry = self.network.lock();
            let endpoint = registry.endpoints.get(&self.ufrag).ok_or(SyncError::ChannelClosed)?;
            if !endpoint.state.is_healthy() {
                return Err(SyncError::ChannelClosed);
            }
            let peer = endpoint.peer.clone().ok_or(SyncError::ChannelClosed)?;
            emit(&registry, &peer, TransportEvent::Message(text));
            Ok(())
        }

        async fn next_event(&self) -> Option<TransportEvent> {
            self.events.lock().await.recv().await
        }

        fn state(&self) -> ConnectionState {
            self.network
                .lock()
                .endpoints
                .get(&self.ufrag)
                .map(|e| e.state)
                .unwrap_or(ConnectionState::Closed)
        }

        async fn restart(&self) -> SyncResult<()> {
            let mut registry = self.network.lock();
            if registry.severed {
                return Err(SyncError::Network("link severed".into()));
            }
            let peer = registry
                .endpoints
                .get(&self.ufrag)
                .and_then(|e| e.peer.clone())
                .ok_or_else(|| SyncError::InvalidState("no peer to restart with".into()))?;
            if !registry.endpoints.contains_key(&peer) {
                return Err(SyncError::Network("peer is gone".into()));
            }
            self.link(&mut registry, &peer);
            Ok(())
        }

        fn close(&self) {
            let mut registry = self.network.lock();
            let Some(endpoint) = registry.endpoints.get(&self.ufrag) else {
                return;
            };
            let peer = endpoint.peer.clone();
            set_state(&mut registry, &self.ufrag, ConnectionState::Closed);
            registry.endpoints.remove(&self.ufrag);
            if let Some(peer) = peer {
                set_state(&mut registry, &peer, ConnectionState::Disconnected);
            }
        }
    }
}
