//! Connection establishment state machine.
//!
//! Drives a `PeerTransport` through an offer/answer exchange whose
//! descriptors travel out of band. Every failure is terminal for the
//! attempt: the caller starts over from `Idle` rather than retrying.

use crate::config::SyncConfig;
use crate::descriptor::{ConnectionDescriptor, NetworkCandidate};
use crate::error::{SyncError, SyncResult};
use crate::transport::{ConnectionState, PeerTransport, TransportEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Progress of the side that produced the offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiatorPhase {
    GeneratingDescriptor,
    AwaitingPeerDescriptor,
    DescriptorAccepted,
    Connected,
    Failed,
}

/// Progress of the side that answers an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderPhase {
    AwaitingOffer,
    GeneratingAnswer,
    AnswerReady,
    Connected,
    Failed,
}

/// Where a handshake stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandshakeState {
    #[default]
    Idle,
    Initiator(InitiatorPhase),
    Responder(ResponderPhase),
}

impl HandshakeState {
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            HandshakeState::Initiator(InitiatorPhase::Connected)
                | HandshakeState::Responder(ResponderPhase::Connected)
        )
    }

    pub fn is_failed(self) -> bool {
        matches!(
            self,
            HandshakeState::Initiator(InitiatorPhase::Failed)
                | HandshakeState::Responder(ResponderPhase::Failed)
        )
    }
}

/// Runs one handshake over a transport.
pub struct ConnectionEstablisher {
    transport: Arc<dyn PeerTransport>,
    config: SyncConfig,
    state: watch::Sender<HandshakeState>,
}

impl std::fmt::Debug for ConnectionEstablisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEstablisher")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionEstablisher {
    pub fn new(transport: Arc<dyn PeerTransport>, config: SyncConfig) -> Self {
        let (state, _) = watch::channel(HandshakeState::Idle);
        Self {
            transport,
            config,
            state,
        }
    }

    pub fn state(&self) -> HandshakeState {
        *self.state.borrow()
    }

    /// Observes state transitions.
    pub fn subscribe(&self) -> watch::Receiver<HandshakeState> {
        self.state.subscribe()
    }

    pub fn transport(&self) -> &Arc<dyn PeerTransport> {
        &self.transport
    }

    // ── Initiator ────────────────────────────────────────────────

    /// Creates the offer and gathers candidates.
    pub async fn begin_as_initiator(&self) -> SyncResult<ConnectionDescriptor> {
        self.transition(
            HandshakeState::Idle,
            HandshakeState::Initiator(InitiatorPhase::GeneratingDescriptor),
        )?;

        let offer = match self.transport.create_offer().await {
            Ok(offer) => offer,
            Err(e) => return Err(self.fail_initiator(e)),
        };
        let candidates = self.gather().await;

        self.set(HandshakeState::Initiator(InitiatorPhase::AwaitingPeerDescriptor));
        info!("Offer ready with {} candidates", candidates.len());
        Ok(ConnectionDescriptor::with_offer(offer, candidates))
    }

    /// [`begin_as_initiator`](Self::begin_as_initiator) rendered as compact text.
    pub async fn begin_as_initiator_text(&self) -> SyncResult<String> {
        let descriptor = self.begin_as_initiator().await?;
        descriptor.to_compact_with_level(self.config.compression_level)
    }

    /// Applies the responder's answer and waits for the channel to open.
    pub async fn complete_as_initiator(&self, peer: &ConnectionDescriptor) -> SyncResult<()> {
        self.transition(
            HandshakeState::Initiator(InitiatorPhase::AwaitingPeerDescriptor),
            HandshakeState::Initiator(InitiatorPhase::DescriptorAccepted),
        )?;

        let answer = match peer.valid_answer() {
            Ok(answer) => answer,
            Err(e) => return Err(self.fail_initiator(e)),
        };
        if let Err(e) = self.transport.apply_answer(answer).await {
            return Err(self.fail_initiator(e));
        }
        self.apply_candidates(&peer.candidates).await;

        match self.await_open(self.config.handshake_timeout()).await {
            Ok(()) => {
                self.set(HandshakeState::Initiator(InitiatorPhase::Connected));
                info!("Handshake complete (initiator)");
                Ok(())
            }
            Err(e) => Err(self.fail_initiator(e)),
        }
    }

    pub async fn complete_as_initiator_text(&self, text: &str) -> SyncResult<()> {
        match ConnectionDescriptor::parse(text) {
            Ok(peer) => self.complete_as_initiator(&peer).await,
            Err(e) => {
                self.transition(
                    HandshakeState::Initiator(InitiatorPhase::AwaitingPeerDescriptor),
                    HandshakeState::Initiator(InitiatorPhase::Failed),
                )?;
                warn!("Rejected answer: {}", e);
                Err(e)
            }
        }
    }

    // ── Responder ────────────────────────────────────────────────

    /// Applies the initiator's offer and produces the answer descriptor.
    pub async fn begin_as_responder(&self, peer: &ConnectionDescriptor) -> SyncResult<ConnectionDescriptor> {
        self.transition(
            HandshakeState::Idle,
            HandshakeState::Responder(ResponderPhase::AwaitingOffer),
        )?;

        let offer = match peer.valid_offer() {
            Ok(offer) => offer,
            Err(e) => return Err(self.fail_responder(e)),
        };

        self.set(HandshakeState::Responder(ResponderPhase::GeneratingAnswer));
        let answer = match self.transport.accept_offer(offer).await {
            Ok(answer) => answer,
            Err(e) => return Err(self.fail_responder(e)),
        };
        self.apply_candidates(&peer.candidates).await;
        let candidates = self.gather().await;

        self.set(HandshakeState::Responder(ResponderPhase::AnswerReady));
        info!("Answer ready with {} candidates", candidates.len());
        Ok(ConnectionDescriptor::with_answer(answer, candidates))
    }

    /// Parses compact or JSON offer text and answers it as compact text.
    pub async fn begin_as_responder_text(&self, text: &str) -> SyncResult<String> {
        let peer = match ConnectionDescriptor::parse(text) {
            Ok(peer) => peer,
            Err(e) => {
                self.transition(
                    HandshakeState::Idle,
                    HandshakeState::Responder(ResponderPhase::Failed),
                )?;
                warn!("Rejected offer: {}", e);
                return Err(e);
            }
        };
        let descriptor = self.begin_as_responder(&peer).await?;
        descriptor.to_compact_with_level(self.config.compression_level)
    }

    /// Waits for the initiator to apply the answer and the channel to open.
    pub async fn await_connected(&self) -> SyncResult<()> {
        if self.state() != HandshakeState::Responder(ResponderPhase::AnswerReady) {
            return Err(SyncError::InvalidState(format!(
                "cannot await connection in {:?}",
                self.state()
            )));
        }
        match self.await_open(self.config.responder_wait()).await {
            Ok(()) => {
                self.set(HandshakeState::Responder(ResponderPhase::Connected));
                info!("Handshake complete (responder)");
                Ok(())
            }
            Err(e) => Err(self.fail_responder(e)),
        }
    }

    // ── Teardown ─────────────────────────────────────────────────

    /// Closes the transport and returns to `Idle`.
    pub fn cancel(&self) {
        self.transport.close();
        let previous = self.state.send_replace(HandshakeState::Idle);
        if previous != HandshakeState::Idle {
            info!("Handshake cancelled from {:?}", previous);
        }
    }

    // ── Internals ────────────────────────────────────────────────

    fn set(&self, state: HandshakeState) {
        let previous = self.state.send_replace(state);
        debug!("Handshake {:?} -> {:?}", previous, state);
    }

    fn transition(&self, expected: HandshakeState, next: HandshakeState) -> SyncResult<()> {
        let mut found = expected;
        let moved = self.state.send_if_modified(|current| {
            found = *current;
            if *current == expected {
                *current = next;
                true
            } else {
                false
            }
        });
        if moved {
            debug!("Handshake {:?} -> {:?}", expected, next);
            Ok(())
        } else {
            Err(SyncError::InvalidState(format!(
                "expected {expected:?}, handshake is {found:?}"
            )))
        }
    }

    fn fail_initiator(&self, error: SyncError) -> SyncError {
        warn!("Initiator handshake failed: {}", error);
        self.set(HandshakeState::Initiator(InitiatorPhase::Failed));
        error
    }

    fn fail_responder(&self, error: SyncError) -> SyncError {
        warn!("Responder handshake failed: {}", error);
        self.set(HandshakeState::Responder(ResponderPhase::Failed));
        error
    }

    async fn apply_candidates(&self, candidates: &[NetworkCandidate]) {
        for candidate in candidates {
            if let Err(e) = self.transport.add_remote_candidate(candidate).await {
                warn!("Skipping remote candidate {:?}: {}", candidate.candidate, e);
            }
        }
    }

    /// Collects local candidates until gathering completes or times out.
    /// Running out of time is not an error.
    async fn gather(&self) -> Vec<NetworkCandidate> {
        let deadline = Instant::now() + self.config.gathering_timeout();
        let mut candidates = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, self.transport.next_event()).await {
                Ok(Some(TransportEvent::LocalCandidate(candidate))) => candidates.push(candidate),
                Ok(Some(TransportEvent::GatheringComplete)) => break,
                Ok(Some(other)) => debug!("Ignoring {:?} while gathering", other),
                Ok(None) => {
                    debug!("Transport closed while gathering");
                    break;
                }
                Err(_) => {
                    warn!(
                        "Candidate gathering timed out; continuing with {} candidates",
                        candidates.len()
                    );
                    break;
                }
            }
        }
        candidates
    }

    async fn await_open(&self, timeout: Duration) -> SyncResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let event = tokio::time::timeout_at(deadline, self.transport.next_event())
                .await
                .map_err(|_| SyncError::Timeout)?;
            match event {
                Some(TransportEvent::ChannelOpen) => return Ok(()),
                Some(TransportEvent::StateChanged(ConnectionState::Failed)) => {
                    return Err(SyncError::Network("connection failed".to_string()));
                }
                Some(TransportEvent::StateChanged(ConnectionState::Closed)) | None => {
                    return Err(SyncError::ChannelClosed);
                }
                Some(other) => debug!("Ignoring {:?} while connecting", other),
            }
        }
    }
}
