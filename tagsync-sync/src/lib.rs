//! Peer-to-peer sync for TagSync.
//!
//! Two devices connect directly after exchanging connection descriptors out
//! of band (copy and paste, QR code), then reconcile their item deltas.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Descriptor**: offer/answer plus candidates, with a compact text form
//! - **Transport**: the `PeerTransport` abstraction, a loopback mock and a
//!   direct TCP implementation
//! - **Establisher**: the handshake state machine for both roles
//! - **Protocol**: the four data-channel messages
//! - **State**: device identity and per-peer watermarks
//! - **Orchestrator**: runs the message exchange
//! - **Health**: polls the link and restarts it when it drops
//! - **Session**: ties all of the above together
//!
//! ## Sync Process
//!
//! 1. **Handshake**: the initiator's offer and the responder's answer travel
//!    out of band until the data channel opens
//! 2. **Identify**: each side announces its device id
//! 3. **Watermarks**: each side tells the other how far it has merged
//! 4. **Item sync**: each side sends the deltas the other is missing
//! 5. **Blob sync**: photos referenced by added deltas follow, staggered
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tagsync_blobstore::BlobStore;
//! use tagsync_storage::{DeltaStore, KeyValueStore, MemoryKv};
//! use tagsync_sync::mock::LoopbackNetwork;
//! use tagsync_sync::{SyncConfig, SyncSession, SyncState};
//!
//! let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKv::new());
//! let state = SyncState::load(kv.clone()).unwrap();
//! let store = DeltaStore::open(state.device_id().clone(), kv).unwrap();
//! let blobs = BlobStore::open_in_memory().unwrap();
//!
//! let network = LoopbackNetwork::new();
//! let (session, _events) = SyncSession::new(
//!     Arc::new(network.endpoint()),
//!     Arc::new(tokio::sync::Mutex::new(store)),
//!     Arc::new(blobs),
//!     state,
//!     SyncConfig::default(),
//! );
//! assert!(!session.establisher().state().is_connected());
//! ```

mod config;
mod descriptor;
pub mod direct;
mod error;
mod establisher;
mod health;
mod orchestrator;
pub mod protocol;
mod session;
mod state;
pub mod transport;

pub use config::{DirectConfig, SyncConfig, DEFAULT_COMPRESSION_LEVEL};
pub use descriptor::{
    compress_text, decompress_text, ConnectionDescriptor, NetworkCandidate, SdpType, SessionDescription,
};
pub use direct::DirectTransport;
pub use error::{SyncError, SyncResult};
pub use establisher::{ConnectionEstablisher, HandshakeState, InitiatorPhase, ResponderPhase};
pub use health::{HealthMonitor, LinkStatus};
pub use orchestrator::{PendingChanges, SyncEvent, SyncOrchestrator, SyncStatus};
pub use protocol::SyncMessage;
pub use session::{SessionStatus, SyncSession};
pub use state::{SyncState, DEVICE_ID_KEY, WATERMARKS_KEY};
pub use transport::{mock, ConnectionState, PeerTransport, TransportEvent};
