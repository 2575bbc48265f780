//! Direct TCP transport.
//!
//! The initiator listens; its offer carries a session credential and its
//! host candidates. The responder dials those candidates and opens with a
//! `Hello` carrying both credentials. The initiator holds an incoming link
//! until it has applied the answer and the credentials match, then replies
//! `HelloAck` and both sides report the channel open.

use super::candidate::{gather_addresses, host_candidate, parse_candidate};
use super::codec::{read_frame, write_frame, Frame};
use crate::config::DirectConfig;
use crate::descriptor::{NetworkCandidate, SessionDescription};
use crate::error::{SyncError, SyncResult};
use crate::transport::{random_credential, session_sdp, ConnectionState, PeerTransport, TransportEvent};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long an incoming connection may take to send its `Hello`.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

const SDP_PROTOCOL: &str = "TCP/DIRECT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Initiator,
    Responder,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A `PeerTransport` over a plain TCP connection.
pub struct DirectTransport {
    config: DirectConfig,
    shared: Arc<Shared>,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
}

struct Shared {
    local_ufrag: String,
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    state: Mutex<ConnectionState>,
    role: Mutex<Option<Role>>,
    remote_ufrag: Mutex<Option<String>>,
    candidates: Mutex<Vec<SocketAddr>>,
    /// An authenticated-by-offer connection waiting for the answer.
    parked: Mutex<Option<(TcpStream, String)>>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    generation: AtomicU64,
    listening: AtomicBool,
    dialing: AtomicBool,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for DirectTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectTransport")
            .field("ufrag", &self.shared.local_ufrag)
            .field("role", &*lock(&self.shared.role))
            .field("state", &self.state())
            .finish()
    }
}

impl DirectTransport {
    pub fn new(config: DirectConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            config,
            shared: Arc::new(Shared {
                local_ufrag: random_credential(),
                events: Mutex::new(Some(tx)),
                state: Mutex::new(ConnectionState::New),
                role: Mutex::new(None),
                remote_ufrag: Mutex::new(None),
                candidates: Mutex::new(Vec::new()),
                parked: Mutex::new(None),
                writer: tokio::sync::Mutex::new(None),
                generation: AtomicU64::new(0),
                listening: AtomicBool::new(false),
                dialing: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
            events: tokio::sync::Mutex::new(rx),
        }
    }

    /// This endpoint's session credential.
    pub fn local_ufrag(&self) -> &str {
        &self.shared.local_ufrag
    }

    fn claim_role(&self, role: Role) -> SyncResult<()> {
        let mut current = lock(&self.shared.role);
        match *current {
            None => {
                *current = Some(role);
                Ok(())
            }
            Some(existing) => Err(SyncError::InvalidState(format!(
                "transport is already the {existing:?}"
            ))),
        }
    }

    fn role(&self) -> Option<Role> {
        *lock(&self.shared.role)
    }

    fn start_dialing(&self) {
        if self.shared.dialing.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = self.shared.clone();
        let config = self.config.clone();
        tokio::spawn(async move { shared.dial_loop(config).await });
    }
}

impl Drop for DirectTransport {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

fn ufrag_of(desc: &SessionDescription) -> SyncResult<String> {
    desc.attribute("ice-ufrag")
        .map(str::to_string)
        .ok_or_else(|| SyncError::MalformedDescriptor("description has no ice-ufrag".to_string()))
}

#[async_trait]
impl PeerTransport for DirectTransport {
    async fn create_offer(&self) -> SyncResult<SessionDescription> {
        self.claim_role(Role::Initiator)?;

        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let bound = listener.local_addr()?;
        info!("Listening for peer on {}", bound);

        for (i, addr) in gather_addresses(&self.config, bound).await.into_iter().enumerate() {
            self.shared.emit(TransportEvent::LocalCandidate(host_candidate(i, addr)));
        }
        self.shared.emit(TransportEvent::GatheringComplete);

        self.shared.listening.store(true, Ordering::SeqCst);
        let shared = self.shared.clone();
        tokio::spawn(async move { shared.accept_loop(listener).await });

        Ok(SessionDescription::offer(session_sdp(&self.shared.local_ufrag, SDP_PROTOCOL)))
    }

    async fn accept_offer(&self, offer: &SessionDescription) -> SyncResult<SessionDescription> {
        offer.validate()?;
        let remote = ufrag_of(offer)?;
        self.claim_role(Role::Responder)?;

        *lock(&self.shared.remote_ufrag) = Some(remote);
        self.shared.set_state(ConnectionState::Connecting);
        // The dialing side has nothing to advertise.
        self.shared.emit(TransportEvent::GatheringComplete);

        Ok(SessionDescription::answer(session_sdp(&self.shared.local_ufrag, SDP_PROTOCOL)))
    }

    async fn apply_answer(&self, answer: &SessionDescription) -> SyncResult<()> {
        if self.role() != Some(Role::Initiator) {
            return Err(SyncError::InvalidState("no offer to answer".to_string()));
        }
        answer.validate()?;
        let remote = ufrag_of(answer)?;

        let parked = {
            let mut parked = lock(&self.shared.parked);
            *lock(&self.shared.remote_ufrag) = Some(remote.clone());
            parked.take()
        };
        self.shared.set_state(ConnectionState::Connecting);

        if let Some((stream, answer_ufrag)) = parked {
            if answer_ufrag == remote {
                self.shared.accept_peer(stream).await?;
            } else {
                warn!("Dropping held connection with mismatched credentials");
            }
        }
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &NetworkCandidate) -> SyncResult<()> {
        let addr = parse_candidate(candidate).ok_or_else(|| {
            SyncError::Protocol(format!("unsupported candidate: {}", candidate.candidate))
        })?;
        {
            let mut candidates = lock(&self.shared.candidates);
            if !candidates.contains(&addr) {
                candidates.push(addr);
            }
        }
        debug!("Added remote candidate {}", addr);
        if self.role() == Some(Role::Responder) {
            self.start_dialing();
        }
        Ok(())
    }

    async fn send(&self, text: String) -> SyncResult<()> {
        if self.shared.shutdown.is_cancelled() {
            return Err(SyncError::ChannelClosed);
        }
        let mut writer = self.shared.writer.lock().await;
        let stream = writer.as_mut().ok_or(SyncError::ChannelClosed)?;
        if let Err(e) = write_frame(stream, &Frame::Data { text }).await {
            writer.take();
            return Err(SyncError::Network(e.to_string()));
        }
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.events.lock().await.recv().await
    }

    fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    async fn restart(&self) -> SyncResult<()> {
        if self.shared.shutdown.is_cancelled() {
            return Err(SyncError::ChannelClosed);
        }
        match self.role() {
            Some(Role::Responder) => {
                if lock(&self.shared.remote_ufrag).is_none() {
                    return Err(SyncError::InvalidState("no offer applied".to_string()));
                }
                if self.state().is_healthy() {
                    return Ok(());
                }
                info!("Redialing peer");
                self.shared.set_state(ConnectionState::Connecting);
                self.start_dialing();
                Ok(())
            }
            Some(Role::Initiator) => {
                if !self.shared.listening.load(Ordering::SeqCst) {
                    return Err(SyncError::NeedsNewHandshake);
                }
                debug!("Waiting for peer to redial");
                Ok(())
            }
            None => Err(SyncError::InvalidState("no session to restart".to_string())),
        }
    }

    fn close(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        self.shared.shutdown.cancel();
        let writer = self.shared.writer.try_lock().ok().and_then(|mut w| w.take());
        if let (Some(mut writer), Ok(handle)) = (writer, tokio::runtime::Handle::try_current()) {
            handle.spawn(async move {
                let _ = write_frame(&mut writer, &Frame::Bye).await;
            });
        }
        lock(&self.shared.parked).take();
        self.shared.set_state(ConnectionState::Closed);
        lock(&self.shared.events).take();
        info!("Direct transport closed");
    }
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        if let Some(tx) = lock(&self.events).as_ref() {
            let _ = tx.send(event);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = {
            let mut current = lock(&self.state);
            if *current == state {
                return;
            }
            std::mem::replace(&mut *current, state)
        };
        debug!("Direct link {:?} -> {:?}", previous, state);
        self.emit(TransportEvent::StateChanged(state));
        if state == ConnectionState::Connected {
            self.emit(TransportEvent::ChannelOpen);
        } else if previous == ConnectionState::Connected {
            self.emit(TransportEvent::ChannelClosed);
        }
    }

    // ── Initiator ────────────────────────────────────────────────

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, addr)) => {
                    debug!("Incoming connection from {}", addr);
                    let shared = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = shared.handle_incoming(stream).await {
                            warn!("Rejected connection from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Listener failed: {}", e);
                    break;
                }
            }
        }
        self.listening.store(false, Ordering::SeqCst);
    }

    async fn handle_incoming(self: Arc<Self>, mut stream: TcpStream) -> SyncResult<()> {
        let hello = tokio::time::timeout(HELLO_TIMEOUT, read_frame(&mut stream))
            .await
            .map_err(|_| SyncError::Timeout)??;
        let Frame::Hello { offer_ufrag, answer_ufrag } = hello else {
            return Err(SyncError::Protocol(format!("expected hello, got {hello:?}")));
        };
        if offer_ufrag != self.local_ufrag {
            return Err(SyncError::Protocol("offer credential mismatch".to_string()));
        }

        let stream = {
            let mut parked = lock(&self.parked);
            match lock(&self.remote_ufrag).clone() {
                None => {
                    debug!("Holding connection until the answer is applied");
                    *parked = Some((stream, answer_ufrag));
                    return Ok(());
                }
                Some(remote) if remote != answer_ufrag => {
                    return Err(SyncError::Protocol("answer credential mismatch".to_string()));
                }
                Some(_) => stream,
            }
        };
        self.accept_peer(stream).await
    }

    async fn accept_peer(self: &Arc<Self>, mut stream: TcpStream) -> SyncResult<()> {
        write_frame(&mut stream, &Frame::HelloAck).await?;
        info!("Peer connected");
        self.establish(stream).await;
        Ok(())
    }

    // ── Responder ────────────────────────────────────────────────

    async fn dial_loop(self: Arc<Self>, config: DirectConfig) {
        let connected = tokio::select! {
            _ = self.shutdown.cancelled() => false,
            connected = self.dial_until_connected(&config) => connected,
        };
        self.dialing.store(false, Ordering::SeqCst);
        if !connected && !self.shutdown.is_cancelled() {
            warn!("Could not reach peer on any candidate");
            self.set_state(ConnectionState::Failed);
        }
    }

    /// The dial window bounds reaching a listener. Once the initiator holds
    /// our `Hello`, its `HelloAck` waits on the out-of-band answer, so that
    /// wait is bounded only by shutdown.
    async fn dial_until_connected(self: &Arc<Self>, config: &DirectConfig) -> bool {
        let deadline = Instant::now() + config.dial_window();
        loop {
            let Ok((addr, stream)) = tokio::time::timeout_at(deadline, self.reach_peer(config)).await
            else {
                return false;
            };
            match self.await_ack(addr, stream).await {
                Ok(()) => return true,
                Err(e) => debug!("Handshake with {} failed: {}", addr, e),
            }
            tokio::time::sleep(config.redial_interval()).await;
        }
    }

    async fn reach_peer(&self, config: &DirectConfig) -> (SocketAddr, TcpStream) {
        loop {
            let candidates = lock(&self.candidates).clone();
            for addr in candidates {
                match self.send_hello(addr, config).await {
                    Ok(stream) => return (addr, stream),
                    Err(e) => debug!("Dial {} failed: {}", addr, e),
                }
            }
            tokio::time::sleep(config.redial_interval()).await;
        }
    }

    async fn send_hello(&self, addr: SocketAddr, config: &DirectConfig) -> SyncResult<TcpStream> {
        let offer_ufrag = lock(&self.remote_ufrag)
            .clone()
            .ok_or_else(|| SyncError::InvalidState("no offer applied".to_string()))?;

        let mut stream = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| SyncError::Timeout)??;
        write_frame(
            &mut stream,
            &Frame::Hello {
                offer_ufrag,
                answer_ufrag: self.local_ufrag.clone(),
            },
        )
        .await?;
        Ok(stream)
    }

    async fn await_ack(self: &Arc<Self>, addr: SocketAddr, mut stream: TcpStream) -> SyncResult<()> {
        match read_frame(&mut stream).await? {
            Frame::HelloAck => {
                info!("Connected to peer at {}", addr);
                self.establish(stream).await;
                Ok(())
            }
            other => Err(SyncError::Protocol(format!("expected hello-ack, got {other:?}"))),
        }
    }

    // ── Established link ─────────────────────────────────────────

    async fn establish(self: &Arc<Self>, stream: TcpStream) {
        let (reader, writer) = stream.into_split();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.writer.lock().await = Some(writer);
        self.set_state(ConnectionState::Connected);

        let shared = self.clone();
        tokio::spawn(async move { shared.read_loop(reader, generation).await });
    }

    async fn read_loop(self: Arc<Self>, mut reader: OwnedReadHalf, generation: u64) {
        loop {
            let frame = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                frame = read_frame(&mut reader) => frame,
            };
            match frame {
                Ok(Frame::Data { text }) => self.emit(TransportEvent::Message(text)),
                Ok(Frame::Bye) => {
                    debug!("Peer closed the link");
                    break;
                }
                Ok(other) => debug!("Ignoring unexpected {:?} frame", other),
                Err(e) => {
                    debug!("Link read ended: {}", e);
                    break;
                }
            }
        }
        self.link_lost(generation).await;
    }

    async fn link_lost(&self, generation: u64) {
        let mut writer = self.writer.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        writer.take();
        drop(writer);
        if !self.shutdown.is_cancelled() {
            warn!("Direct link lost");
            self.set_state(ConnectionState::Disconnected);
        }
    }
}
