//! A complete sync session: handshake, message exchange and health
//! monitoring over one transport.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::establisher::{ConnectionEstablisher, HandshakeState};
use crate::health::{HealthMonitor, LinkStatus};
use crate::orchestrator::{SyncEvent, SyncOrchestrator, SyncStatus};
use crate::state::SyncState;
use crate::transport::PeerTransport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tagsync_blobstore::BlobRepository;
use tagsync_storage::ItemRepository;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Combined view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub handshake: HandshakeState,
    pub link: LinkStatus,
    pub sync: SyncStatus,
}

/// Owns every moving part of a sync with one peer.
///
/// Drive the handshake with either `start_as_initiator` followed by
/// `finish_with_answer`, or `accept_offer` followed by
/// `wait_until_connected`. Once connected, the exchange and the health
/// monitor run in the background until `cancel` or drop.
pub struct SyncSession<R, B> {
    establisher: ConnectionEstablisher,
    orchestrator: Arc<SyncOrchestrator<R, B>>,
    config: SyncConfig,
    token: CancellationToken,
    link: Mutex<Option<watch::Receiver<LinkStatus>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl<R, B> std::fmt::Debug for SyncSession<R, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("handshake", &self.establisher.state())
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<R, B> SyncSession<R, B>
where
    R: ItemRepository + 'static,
    B: BlobRepository + 'static,
{
    /// Creates a session and the receiving end of its event stream.
    pub fn new(
        transport: Arc<dyn PeerTransport>,
        items: Arc<tokio::sync::Mutex<R>>,
        blobs: Arc<B>,
        state: SyncState,
        config: SyncConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let token = CancellationToken::new();
        let establisher = ConnectionEstablisher::new(transport.clone(), config.clone());
        let (orchestrator, events) = SyncOrchestrator::new(
            transport,
            items,
            blobs,
            state,
            config.clone(),
            token.child_token(),
        );
        let session = Self {
            establisher,
            orchestrator: Arc::new(orchestrator),
            config,
            token,
            link: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        };
        (session, events)
    }

    pub fn establisher(&self) -> &ConnectionEstablisher {
        &self.establisher
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator<R, B>> {
        &self.orchestrator
    }

    // ── Handshake ────────────────────────────────────────────────

    /// Produces the compact offer to hand to the peer.
    pub async fn start_as_initiator(&self) -> SyncResult<String> {
        self.establisher.begin_as_initiator_text().await
    }

    /// Applies the peer's compact answer and starts syncing once the
    /// channel opens.
    pub async fn finish_with_answer(&self, answer: &str) -> SyncResult<()> {
        self.establisher.complete_as_initiator_text(answer).await?;
        self.spawn();
        Ok(())
    }

    /// Accepts the peer's compact offer and returns the compact answer.
    pub async fn accept_offer(&self, offer: &str) -> SyncResult<String> {
        self.establisher.begin_as_responder_text(offer).await
    }

    /// Waits for the initiator to connect, then starts syncing.
    pub async fn wait_until_connected(&self) -> SyncResult<()> {
        self.establisher.await_connected().await?;
        self.spawn();
        Ok(())
    }

    // ── Connected ────────────────────────────────────────────────

    /// Re-runs the exchange with the connected peer.
    pub async fn trigger_sync(&self) -> SyncResult<bool> {
        self.orchestrator.trigger_sync().await
    }

    pub async fn status(&self) -> SessionStatus {
        let link = self
            .lock_link()
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or_default();
        SessionStatus {
            handshake: self.establisher.state(),
            link,
            sync: self.orchestrator.status().await,
        }
    }

    /// Stops background work and closes the transport.
    pub fn cancel(&self) {
        self.token.cancel();
        self.establisher.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
        info!("Sync session cancelled");
    }

    fn spawn(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Sync session already running");
            return;
        }

        let orchestrator = self.orchestrator.clone();
        let exchange = tokio::spawn(async move {
            if let Err(e) = orchestrator.on_channel_open().await {
                warn!("Failed to start exchange: {}", e);
            }
            orchestrator.run().await;
        });

        let monitor = HealthMonitor::new(
            self.establisher.transport().clone(),
            self.establisher.subscribe(),
            &self.config,
        )
        .with_events(self.orchestrator.event_sender());
        *self.lock_link() = Some(monitor.subscribe());
        let health = monitor.spawn(self.token.child_token());

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([exchange, health]);
        debug!("Sync session started");
    }

    fn lock_link(&self) -> std::sync::MutexGuard<'_, Option<watch::Receiver<LinkStatus>>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R, B> Drop for SyncSession<R, B> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
