//! Tests for the direct TCP transport on the loopback interface.

use pretty_assertions::assert_eq;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tagsync_blobstore::BlobStore;
use tagsync_storage::{DeltaStore, KeyValueStore, MemoryKv};
use tagsync_sync::direct::candidate::{host_candidate, parse_candidate};
use tagsync_sync::direct::codec::{read_frame, write_frame};
use tagsync_sync::direct::{Frame, MAX_FRAME_SIZE};
use tagsync_sync::{
    ConnectionEstablisher, ConnectionState, DirectConfig, DirectTransport, NetworkCandidate, PeerTransport,
    SyncConfig, SyncEvent, SyncSession, SyncState, TransportEvent,
};
use tagsync_types::{Item, ItemId};
use tokio::io::AsyncWriteExt;

fn direct() -> Arc<DirectTransport> {
    Arc::new(DirectTransport::new(DirectConfig::loopback()))
}

async fn next_message(transport: &dyn PeerTransport) -> String {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match transport.next_event().await {
                Some(TransportEvent::Message(text)) => return text,
                Some(_) => continue,
                None => panic!("transport closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for message")
}

// ── Candidates ──────────────────────────────────────────────────

#[test]
fn host_candidate_parses_back() {
    let addr: SocketAddr = "127.0.0.1:40123".parse().unwrap();
    let candidate = host_candidate(0, addr);
    assert!(candidate.candidate.starts_with("candidate:1 1 tcp "));
    assert_eq!(parse_candidate(&candidate), Some(addr));
}

#[test]
fn foreign_candidates_are_not_dialable() {
    let udp = NetworkCandidate::new("candidate:1 1 udp 2130706431 192.168.1.2 50000 typ host");
    assert_eq!(parse_candidate(&udp), None);
    assert_eq!(parse_candidate(&NetworkCandidate::new("garbage")), None);
}

// ── Framing ─────────────────────────────────────────────────────

#[tokio::test]
async fn frames_cross_a_stream() {
    let (mut client, mut server) = tokio::io::duplex(1024);
    write_frame(&mut client, &Frame::Data { text: "hello".into() }).await.unwrap();
    write_frame(&mut client, &Frame::Bye).await.unwrap();

    assert_eq!(read_frame(&mut server).await.unwrap(), Frame::Data { text: "hello".into() });
    assert_eq!(read_frame(&mut server).await.unwrap(), Frame::Bye);
}

#[tokio::test]
async fn oversized_frame_is_rejected() {
    let (mut client, mut server) = tokio::io::duplex(64);
    let len = (MAX_FRAME_SIZE as u32) + 1;
    client.write_all(&len.to_be_bytes()).await.unwrap();

    let err = read_frame(&mut server).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

// ── Handshake ───────────────────────────────────────────────────

#[tokio::test]
async fn handshake_and_messages_over_tcp() {
    let a = direct();
    let b = direct();
    let initiator = ConnectionEstablisher::new(a.clone(), SyncConfig::default());
    let responder = ConnectionEstablisher::new(b.clone(), SyncConfig::default());

    let offer = initiator.begin_as_initiator().await.unwrap();
    assert!(!offer.candidates.is_empty());
    let answer = responder.begin_as_responder_text(&offer.to_compact().unwrap()).await.unwrap();
    initiator.complete_as_initiator_text(&answer).await.unwrap();
    responder.await_connected().await.unwrap();

    assert_eq!(a.state(), ConnectionState::Connected);
    assert_eq!(b.state(), ConnectionState::Connected);

    a.send("ping".to_string()).await.unwrap();
    assert_eq!(next_message(b.as_ref()).await, "ping");
    b.send("pong".to_string()).await.unwrap();
    assert_eq!(next_message(a.as_ref()).await, "pong");
}

#[tokio::test]
async fn late_answer_outlasts_dial_window() {
    let short = DirectConfig {
        dial_window_ms: 300,
        ..DirectConfig::loopback()
    };
    let a = Arc::new(DirectTransport::new(short.clone()));
    let b = Arc::new(DirectTransport::new(short));
    let initiator = ConnectionEstablisher::new(a.clone(), SyncConfig::default());
    let responder = ConnectionEstablisher::new(b.clone(), SyncConfig::default());

    let offer = initiator.begin_as_initiator().await.unwrap();
    let answer = responder.begin_as_responder_text(&offer.to_compact().unwrap()).await.unwrap();

    // The answer travels out of band and lands well after the window.
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_ne!(b.state(), ConnectionState::Failed);

    initiator.complete_as_initiator_text(&answer).await.unwrap();
    responder.await_connected().await.unwrap();

    assert_eq!(a.state(), ConnectionState::Connected);
    assert_eq!(b.state(), ConnectionState::Connected);
    a.send("late".to_string()).await.unwrap();
    assert_eq!(next_message(b.as_ref()).await, "late");
}

#[tokio::test]
async fn peer_close_disconnects_link() {
    let a = direct();
    let b = direct();
    let initiator = ConnectionEstablisher::new(a.clone(), SyncConfig::default());
    let responder = ConnectionEstablisher::new(b.clone(), SyncConfig::default());

    let offer = initiator.begin_as_initiator_text().await.unwrap();
    let answer = responder.begin_as_responder_text(&offer).await.unwrap();
    initiator.complete_as_initiator_text(&answer).await.unwrap();
    responder.await_connected().await.unwrap();

    a.close();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match b.next_event().await {
                Some(TransportEvent::ChannelClosed) => break,
                Some(_) => continue,
                None => panic!("transport closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for link loss");
    assert_eq!(b.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn send_before_connect_fails() {
    let a = direct();
    assert!(a.send("early".to_string()).await.is_err());
}

#[tokio::test]
async fn closed_transport_reports_closed() {
    let a = direct();
    a.create_offer().await.unwrap();
    a.close();
    assert_eq!(a.state(), ConnectionState::Closed);
    assert!(a.send("late".to_string()).await.is_err());
    assert!(a.restart().await.is_err());
}

#[tokio::test]
async fn responder_cannot_also_offer() {
    let a = direct();
    let b = direct();
    let offer = a.create_offer().await.unwrap();
    b.accept_offer(&offer).await.unwrap();
    assert!(b.create_offer().await.is_err());
}

// ── Full sync ───────────────────────────────────────────────────

#[tokio::test]
async fn sessions_sync_over_tcp() {
    let kv_a: Arc<dyn KeyValueStore> = Arc::new(MemoryKv::new());
    let state_a = SyncState::load(kv_a.clone()).unwrap();
    let id_a = state_a.device_id().clone();
    let store_a = DeltaStore::open(id_a.clone(), kv_a).unwrap();
    let items_a = Arc::new(tokio::sync::Mutex::new(store_a));
    items_a.lock().await.create(Item::new("X1").with_item_tags(["Tools"])).unwrap();

    let kv_b: Arc<dyn KeyValueStore> = Arc::new(MemoryKv::new());
    let state_b = SyncState::load(kv_b.clone()).unwrap();
    let store_b = DeltaStore::open(state_b.device_id().clone(), kv_b).unwrap();
    let items_b = Arc::new(tokio::sync::Mutex::new(store_b));

    let (a, _events_a) = SyncSession::new(
        direct(),
        items_a,
        Arc::new(BlobStore::open_in_memory().unwrap()),
        state_a,
        SyncConfig::default(),
    );
    let (b, mut events_b) = SyncSession::new(
        direct(),
        items_b.clone(),
        Arc::new(BlobStore::open_in_memory().unwrap()),
        state_b,
        SyncConfig::default(),
    );

    let offer = a.start_as_initiator().await.unwrap();
    let answer = b.accept_offer(&offer).await.unwrap();
    a.finish_with_answer(&answer).await.unwrap();
    b.wait_until_connected().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events_b.recv().await {
                Some(SyncEvent::ItemsReceived { from, report }) if from == id_a => {
                    assert_eq!(report.created, 1);
                    break;
                }
                Some(_) => continue,
                None => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for items");

    let store = items_b.lock().await;
    assert_eq!(store.item(&ItemId::new("X1")).unwrap().item_tags, vec!["Tools".to_string()]);
}
