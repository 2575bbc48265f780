//! Sync orchestrator.
//!
//! Runs the message flow over an open channel:
//!
//! 1. Both sides announce their device id.
//! 2. On a peer's device id, each side sends its watermark for that peer.
//! 3. On a watermark addressed to us, we send every delta newer than it in
//!    one `item-sync`, then one `blob-sync` per added photo, staggered.
//! 4. On an `item-sync`, we merge and advance the peer's watermark.
//!
//! Inbound events are processed one at a time, in arrival order.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::protocol::SyncMessage;
use crate::state::SyncState;
use crate::transport::{ConnectionState, PeerTransport, TransportEvent};
use std::collections::BTreeMap;
use std::sync::Arc;
use tagsync_blobstore::{Blob, BlobRepository};
use tagsync_storage::{ApplyReport, ItemRepository};
use tagsync_types::{DeviceId, ItemDelta, PhotoId, Timestamp};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Notifications for the host application.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The peer announced its device id.
    PeerIdentified { peer: DeviceId, first_contact: bool },
    /// A delta batch from the peer was merged.
    ItemsReceived { from: DeviceId, report: ApplyReport },
    /// A delta batch was sent to the peer.
    ItemsSent { to: DeviceId, count: usize },
    /// Photos from the peer were stored.
    BlobsReceived { from: DeviceId, count: usize },
    /// A photo was sent to the peer.
    BlobSent { to: DeviceId, id: PhotoId },
    /// The channel closed. The health monitor may still recover it.
    LinkLost,
    /// The link is gone for good; a new descriptor exchange is needed.
    NeedsNewHandshake,
}

/// Pending change counters for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChanges {
    pub device_id: DeviceId,
    /// The watermark the counts are relative to.
    pub since: Timestamp,
    pub changes: usize,
    pub photos: usize,
}

/// Snapshot of the orchestrator's view of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub device_id: DeviceId,
    pub peer: Option<DeviceId>,
    pub connection: ConnectionState,
    pub watermarks: BTreeMap<DeviceId, Timestamp>,
    pub pending: Vec<PendingChanges>,
}

#[derive(Debug, Clone, Default)]
struct PeerLink {
    device_id: Option<DeviceId>,
    /// The watermark the peer last reported for us.
    reported: Option<Timestamp>,
}

/// Coordinates delta and photo exchange with one peer.
pub struct SyncOrchestrator<R, B> {
    device_id: DeviceId,
    transport: Arc<dyn PeerTransport>,
    items: Arc<Mutex<R>>,
    blobs: Arc<B>,
    state: Arc<Mutex<SyncState>>,
    peer: RwLock<PeerLink>,
    config: SyncConfig,
    events: mpsc::UnboundedSender<SyncEvent>,
    token: CancellationToken,
}

impl<R, B> SyncOrchestrator<R, B>
where
    R: ItemRepository + 'static,
    B: BlobRepository + 'static,
{
    /// Creates an orchestrator and the receiving end of its event stream.
    pub fn new(
        transport: Arc<dyn PeerTransport>,
        items: Arc<Mutex<R>>,
        blobs: Arc<B>,
        state: SyncState,
        config: SyncConfig,
        token: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            device_id: state.device_id().clone(),
            transport,
            items,
            blobs,
            state: Arc::new(Mutex::new(state)),
            peer: RwLock::new(PeerLink::default()),
            config,
            events,
            token,
        };
        (orchestrator, rx)
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn items(&self) -> &Arc<Mutex<R>> {
        &self.items
    }

    pub fn blobs(&self) -> &Arc<B> {
        &self.blobs
    }

    pub fn sync_state(&self) -> &Arc<Mutex<SyncState>> {
        &self.state
    }

    /// A sender into this orchestrator's event stream.
    pub fn event_sender(&self) -> mpsc::UnboundedSender<SyncEvent> {
        self.events.clone()
    }

    /// The peer's device id, once announced.
    pub async fn peer(&self) -> Option<DeviceId> {
        self.peer.read().await.device_id.clone()
    }

    // ── Event loop ───────────────────────────────────────────────

    /// Processes transport events until the transport closes or the
    /// session is cancelled. Local saves and removes made while the link
    /// is up are pushed to the peer as they happen.
    pub async fn run(&self) {
        let mut changes = Some(self.items.lock().await.subscribe_changes());
        loop {
            let event = tokio::select! {
                _ = self.token.cancelled() => {
                    debug!("Orchestrator cancelled");
                    break;
                }
                _ = local_change(&mut changes) => {
                    self.on_local_change().await;
                    continue;
                }
                event = self.transport.next_event() => event,
            };
            match event {
                Some(event) => self.handle_event(event).await,
                None => {
                    info!("Transport closed; orchestrator stopping");
                    break;
                }
            }
        }
    }

    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::ChannelOpen => {
                if let Err(e) = self.on_channel_open().await {
                    warn!("Failed to announce device id: {}", e);
                }
            }
            TransportEvent::Message(text) => self.handle_text(&text).await,
            TransportEvent::ChannelClosed => {
                warn!("Data channel closed");
                self.emit(SyncEvent::LinkLost);
            }
            TransportEvent::StateChanged(state) => debug!("Transport state {:?}", state),
            TransportEvent::LocalCandidate(_) | TransportEvent::GatheringComplete => {
                debug!("Ignoring late candidate event");
            }
        }
    }

    /// Announces our device id. Called whenever the channel (re)opens.
    pub async fn on_channel_open(&self) -> SyncResult<()> {
        info!("Channel open; announcing {}", self.device_id);
        self.send(&SyncMessage::DeviceId {
            device_id: self.device_id.clone(),
        })
        .await
    }

    /// Decodes and handles one inbound message. Undecodable messages are
    /// logged and dropped.
    pub async fn handle_text(&self, text: &str) {
        let message = match SyncMessage::decode(text) {
            Ok(message) => message,
            Err(SyncError::UnknownMessage(kind)) => {
                warn!("Dropping message of unknown type {:?}", kind);
                return;
            }
            Err(e) => {
                warn!("Dropping malformed message: {}", e);
                return;
            }
        };
        let kind = message.kind();
        if let Err(e) = self.handle_message(message).await {
            warn!("Failed to handle {} message: {}", kind, e);
        }
    }

    pub async fn handle_message(&self, message: SyncMessage) -> SyncResult<()> {
        match message {
            SyncMessage::DeviceId { device_id } => self.on_device_id(device_id).await,
            SyncMessage::Watermark {
                device_id,
                for_device,
                watermark,
            } => {
                if for_device != self.device_id {
                    debug!("Ignoring watermark meant for {}", for_device);
                    return Ok(());
                }
                self.on_watermark(device_id, watermark).await
            }
            SyncMessage::ItemSync { deltas, from, to } => {
                if to != self.device_id {
                    debug!("Ignoring item-sync meant for {}", to);
                    return Ok(());
                }
                self.on_item_sync(from, deltas).await;
                Ok(())
            }
            SyncMessage::BlobSync { blobs, from, to } => {
                if to != self.device_id {
                    debug!("Ignoring blob-sync meant for {}", to);
                    return Ok(());
                }
                let count = self.blobs.import_blobs(blobs);
                debug!("Stored {} photos from {}", count, from);
                self.emit(SyncEvent::BlobsReceived { from, count });
                Ok(())
            }
        }
    }

    // ── Handlers ─────────────────────────────────────────────────

    async fn on_device_id(&self, peer: DeviceId) -> SyncResult<()> {
        let (first_contact, watermark) = {
            let mut state = self.state.lock().await;
            let first_contact = state.ensure_peer(&peer);
            (first_contact, state.watermark(&peer).unwrap_or(Timestamp::EPOCH))
        };
        info!("Peer identified: {} (first contact: {})", peer, first_contact);

        self.peer.write().await.device_id = Some(peer.clone());
        self.emit(SyncEvent::PeerIdentified {
            peer: peer.clone(),
            first_contact,
        });

        self.send(&SyncMessage::Watermark {
            device_id: self.device_id.clone(),
            for_device: peer,
            watermark,
        })
        .await
    }

    async fn on_watermark(&self, peer: DeviceId, watermark: Timestamp) -> SyncResult<()> {
        {
            let mut link = self.peer.write().await;
            if link.device_id.is_none() {
                link.device_id = Some(peer.clone());
            }
            link.reported = Some(watermark);
        }
        debug!("{} has our deltas up to {}", peer, watermark);
        self.push_deltas(&peer, watermark).await
    }

    async fn on_local_change(&self) {
        match self.trigger_sync().await {
            Ok(true) => debug!("Pushed local change"),
            Ok(false) => debug!("Local change queued until the peer is linked"),
            Err(e) => warn!("Failed to push local change: {}", e),
        }
    }

    async fn on_item_sync(&self, from: DeviceId, deltas: Vec<ItemDelta>) {
        let received = deltas.len();
        let report = self.items.lock().await.apply_remote_deltas(deltas);
        // Stamped with our clock at merge time. A change the sender made
        // while this batch was in flight is covered too, so only the live
        // push after that change delivers it.
        self.state.lock().await.advance(&from, Timestamp::now());
        info!(
            "Merged {} deltas from {} ({} new)",
            received, from, report.applied
        );
        self.emit(SyncEvent::ItemsReceived { from, report });
    }

    /// Sends every delta newer than `since`, then schedules its photos.
    async fn push_deltas(&self, peer: &DeviceId, since: Timestamp) -> SyncResult<()> {
        let deltas = self.items.lock().await.deltas_since(since);
        let photos = added_photos(&deltas);
        let count = deltas.len();

        self.send(&SyncMessage::ItemSync {
            deltas,
            from: self.device_id.clone(),
            to: peer.clone(),
        })
        .await?;
        info!("Sent {} deltas to {} (since {})", count, peer, since);
        self.emit(SyncEvent::ItemsSent {
            to: peer.clone(),
            count,
        });

        self.schedule_blobs(peer, photos);
        Ok(())
    }

    /// Sends each photo in its own message after a staggered delay. A send
    /// whose timer fires on an unhealthy link is skipped.
    fn schedule_blobs(&self, peer: &DeviceId, photos: Vec<PhotoId>) {
        for (index, id) in photos.into_iter().enumerate() {
            let delay = self.config.blob_delay(index);
            let transport = self.transport.clone();
            let blobs = self.blobs.clone();
            let events = self.events.clone();
            let token = self.token.clone();
            let from = self.device_id.clone();
            let to = peer.clone();

            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                if !transport.state().is_healthy() {
                    debug!("Link unhealthy; skipping photo {}", id);
                    return;
                }
                let Some(data) = blobs.get_blob_data(&id) else {
                    debug!("Photo {} is not stored locally; skipping", id);
                    return;
                };
                let message = SyncMessage::BlobSync {
                    blobs: vec![Blob::new(id.clone(), data)],
                    from,
                    to: to.clone(),
                };
                let sent = match message.encode() {
                    Ok(text) => transport.send(text).await,
                    Err(e) => Err(e),
                };
                match sent {
                    Ok(()) => {
                        debug!("Sent photo {} to {}", id, to);
                        let _ = events.send(SyncEvent::BlobSent { to, id });
                    }
                    Err(e) => warn!("Failed to send photo {}: {}", id, e),
                }
            });
        }
    }

    // ── Host operations ──────────────────────────────────────────

    /// Re-runs the exchange with the current peer: re-announces our
    /// watermark and pushes what the peer has not acknowledged.
    ///
    /// Returns `false` without doing anything when the link is unhealthy or
    /// no peer watermark is known yet. Repeating it only re-delivers deltas
    /// the peer already has, which it drops.
    pub async fn trigger_sync(&self) -> SyncResult<bool> {
        if !self.transport.state().is_healthy() {
            debug!("Sync trigger ignored; link is {:?}", self.transport.state());
            return Ok(false);
        }
        let link = self.peer.read().await.clone();
        let Some(peer) = link.device_id else {
            debug!("Sync trigger ignored; peer unknown");
            return Ok(false);
        };
        let Some(watermark) = self.state.lock().await.watermark(&peer) else {
            debug!("Sync trigger ignored; no watermark for {}", peer);
            return Ok(false);
        };

        info!("Sync triggered with {}", peer);
        self.send(&SyncMessage::Watermark {
            device_id: self.device_id.clone(),
            for_device: peer.clone(),
            watermark,
        })
        .await?;
        if let Some(reported) = link.reported {
            self.push_deltas(&peer, reported).await?;
        }
        Ok(true)
    }

    /// A snapshot of peer, watermarks and pending change counters.
    pub async fn status(&self) -> SyncStatus {
        let peer = self.peer().await;
        let watermarks = self.state.lock().await.peers().clone();

        let items = self.items.lock().await;
        let mut devices = items.known_devices();
        devices.extend(watermarks.keys().cloned());
        devices.remove(&self.device_id);

        let pending = devices
            .into_iter()
            .map(|device_id| {
                let since = watermarks.get(&device_id).copied().unwrap_or(Timestamp::EPOCH);
                PendingChanges {
                    changes: items.changes_since_by(&device_id, since),
                    photos: items.photos_added_since_by(&device_id, since),
                    device_id,
                    since,
                }
            })
            .collect();

        SyncStatus {
            device_id: self.device_id.clone(),
            peer,
            connection: self.transport.state(),
            watermarks,
            pending,
        }
    }

    // ── Internals ────────────────────────────────────────────────

    async fn send(&self, message: &SyncMessage) -> SyncResult<()> {
        let text = message.encode()?;
        self.transport.send(text).await?;
        debug!("Sent {} message", message.kind());
        Ok(())
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }
}

/// Distinct photo ids added by a batch, in first-seen order.
/// Resolves on the next local change. Never resolves once the store's
/// sender is gone.
async fn local_change(changes: &mut Option<watch::Receiver<u64>>) {
    if let Some(receiver) = changes.as_mut() {
        if receiver.changed().await.is_ok() {
            return;
        }
    }
    *changes = None;
    std::future::pending::<()>().await
}

fn added_photos(deltas: &[ItemDelta]) -> Vec<PhotoId> {
    let mut photos: Vec<PhotoId> = Vec::new();
    for id in deltas.iter().flat_map(|d| d.photos_added.iter()) {
        if !photos.contains(id) {
            photos.push(id.clone());
        }
    }
    photos
}
