//! Tests for establisher.rs over the loopback transport.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use tagsync_sync::mock::LoopbackNetwork;
use tagsync_sync::{
    ConnectionDescriptor, ConnectionEstablisher, ConnectionState, HandshakeState, InitiatorPhase,
    PeerTransport, ResponderPhase, SyncConfig, SyncError,
};

fn establisher(network: &LoopbackNetwork) -> ConnectionEstablisher {
    let transport: Arc<dyn PeerTransport> = Arc::new(network.endpoint());
    ConnectionEstablisher::new(transport, SyncConfig::default())
}

// ── Successful handshake ────────────────────────────────────────

#[tokio::test]
async fn full_handshake_connects_both_sides() {
    let network = LoopbackNetwork::new();
    let initiator = establisher(&network);
    let responder = establisher(&network);

    let offer = initiator.begin_as_initiator_text().await.unwrap();
    assert_eq!(
        initiator.state(),
        HandshakeState::Initiator(InitiatorPhase::AwaitingPeerDescriptor)
    );

    let answer = responder.begin_as_responder_text(&offer).await.unwrap();
    assert_eq!(
        responder.state(),
        HandshakeState::Responder(ResponderPhase::AnswerReady)
    );

    initiator.complete_as_initiator_text(&answer).await.unwrap();
    responder.await_connected().await.unwrap();

    assert!(initiator.state().is_connected());
    assert!(responder.state().is_connected());
    assert_eq!(initiator.transport().state(), ConnectionState::Connected);
    assert_eq!(responder.transport().state(), ConnectionState::Connected);
}

#[tokio::test]
async fn offer_carries_gathered_candidates() {
    let network = LoopbackNetwork::new();
    let initiator = establisher(&network);

    let offer = initiator.begin_as_initiator().await.unwrap();
    assert!(offer.valid_offer().is_ok());
    assert_eq!(offer.candidates.len(), 1);
}

#[tokio::test]
async fn state_changes_are_observable() {
    let network = LoopbackNetwork::new();
    let initiator = establisher(&network);
    let mut rx = initiator.subscribe();

    initiator.begin_as_initiator().await.unwrap();
    assert!(rx.has_changed().unwrap());
    assert_eq!(
        *rx.borrow_and_update(),
        HandshakeState::Initiator(InitiatorPhase::AwaitingPeerDescriptor)
    );
}

// ── Failures ────────────────────────────────────────────────────

#[tokio::test]
async fn undecodable_offer_fails_responder() {
    let network = LoopbackNetwork::new();
    let responder = establisher(&network);

    let err = responder.begin_as_responder_text("%%% not an offer %%%").await.unwrap_err();
    assert!(matches!(err, SyncError::MalformedDescriptor(_)));
    assert_eq!(responder.state(), HandshakeState::Responder(ResponderPhase::Failed));
}

#[tokio::test]
async fn descriptor_without_offer_fails_responder() {
    let network = LoopbackNetwork::new();
    let responder = establisher(&network);

    let err = responder
        .begin_as_responder(&ConnectionDescriptor::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::MalformedDescriptor(_)));
    assert!(responder.state().is_failed());
}

#[tokio::test]
async fn undecodable_answer_fails_initiator() {
    let network = LoopbackNetwork::new();
    let initiator = establisher(&network);
    initiator.begin_as_initiator().await.unwrap();

    let err = initiator.complete_as_initiator_text("").await.unwrap_err();
    assert!(matches!(err, SyncError::MalformedDescriptor(_)));
    assert_eq!(initiator.state(), HandshakeState::Initiator(InitiatorPhase::Failed));
}

#[tokio::test]
async fn operations_out_of_order_are_rejected() {
    let network = LoopbackNetwork::new();
    let peer = establisher(&network);

    assert!(matches!(peer.await_connected().await, Err(SyncError::InvalidState(_))));
    assert!(matches!(
        peer.complete_as_initiator(&ConnectionDescriptor::default()).await,
        Err(SyncError::InvalidState(_))
    ));
    assert_eq!(peer.state(), HandshakeState::Idle);

    peer.begin_as_initiator().await.unwrap();
    assert!(matches!(peer.begin_as_initiator().await, Err(SyncError::InvalidState(_))));
    assert!(matches!(
        peer.begin_as_responder_text("{}").await,
        Err(SyncError::InvalidState(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn answer_that_never_connects_times_out() {
    let network = LoopbackNetwork::new();
    let initiator = establisher(&network);
    // A responder on another network can never reach the initiator.
    let elsewhere = establisher(&LoopbackNetwork::new());

    let offer = initiator.begin_as_initiator_text().await.unwrap();
    let answer = elsewhere.begin_as_responder_text(&offer).await.unwrap();

    let err = initiator.complete_as_initiator_text(&answer).await.unwrap_err();
    assert!(matches!(err, SyncError::Timeout));
    assert_eq!(initiator.state(), HandshakeState::Initiator(InitiatorPhase::Failed));
}

#[tokio::test(start_paused = true)]
async fn responder_gives_up_without_initiator() {
    let network = LoopbackNetwork::new();
    let initiator = establisher(&network);
    let responder = establisher(&network);

    let offer = initiator.begin_as_initiator_text().await.unwrap();
    responder.begin_as_responder_text(&offer).await.unwrap();

    assert!(matches!(responder.await_connected().await, Err(SyncError::Timeout)));
    assert_eq!(responder.state(), HandshakeState::Responder(ResponderPhase::Failed));
}

// ── Cancel ──────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_returns_to_idle_and_closes_transport() {
    let network = LoopbackNetwork::new();
    let initiator = establisher(&network);
    initiator.begin_as_initiator().await.unwrap();

    initiator.cancel();
    assert_eq!(initiator.state(), HandshakeState::Idle);
    assert_eq!(initiator.transport().state(), ConnectionState::Closed);
}

#[tokio::test]
async fn cancel_after_connect_disconnects_peer() {
    let network = LoopbackNetwork::new();
    let initiator = establisher(&network);
    let responder = establisher(&network);

    let offer = initiator.begin_as_initiator_text().await.unwrap();
    let answer = responder.begin_as_responder_text(&offer).await.unwrap();
    initiator.complete_as_initiator_text(&answer).await.unwrap();
    responder.await_connected().await.unwrap();

    initiator.cancel();
    assert_eq!(responder.transport().state(), ConnectionState::Disconnected);
}
