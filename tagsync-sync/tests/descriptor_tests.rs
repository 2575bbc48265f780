//! Tests for descriptor.rs: compact encoding and validation.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tagsync_sync::{
    compress_text, decompress_text, ConnectionDescriptor, NetworkCandidate, SdpType, SessionDescription,
    SyncError,
};

const SDP: &str = "v=0\r\no=- 42 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=application 9 TCP webrtc-datachannel\r\na=ice-ufrag:abcd\r\n";

fn offer() -> ConnectionDescriptor {
    ConnectionDescriptor::with_offer(
        SessionDescription::offer(SDP),
        vec![NetworkCandidate::new("candidate:1 1 tcp 2130706431 127.0.0.1 4000 typ host")],
    )
}

// ── Compact text ────────────────────────────────────────────────

proptest! {
    #[test]
    fn compress_roundtrips_any_text(text in "\\PC{1,400}") {
        let compact = compress_text(&text, 3).unwrap();
        prop_assert_eq!(decompress_text(&compact), Some(text));
    }
}

#[test]
fn compact_form_is_url_safe() {
    let compact = offer().to_compact().unwrap();
    assert!(compact
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
}

#[test]
fn parse_accepts_compact_and_raw_json() {
    let descriptor = offer();
    assert_eq!(ConnectionDescriptor::parse(&descriptor.to_compact().unwrap()).unwrap(), descriptor);
    assert_eq!(ConnectionDescriptor::parse(&descriptor.to_json().unwrap()).unwrap(), descriptor);
}

#[test]
fn parse_ignores_surrounding_whitespace() {
    let descriptor = offer();
    let pasted = format!("\n  {}  \n", descriptor.to_compact().unwrap());
    assert_eq!(ConnectionDescriptor::parse(&pasted).unwrap(), descriptor);
}

#[test]
fn parse_rejects_empty_and_garbage() {
    assert!(matches!(ConnectionDescriptor::parse("   "), Err(SyncError::MalformedDescriptor(_))));
    assert!(matches!(
        ConnectionDescriptor::parse("definitely not a descriptor"),
        Err(SyncError::MalformedDescriptor(_))
    ));
}

#[test]
fn json_uses_browser_field_names() {
    let value: serde_json::Value = serde_json::from_str(&offer().to_json().unwrap()).unwrap();
    assert_eq!(value["offer"]["type"], "offer");
    assert_eq!(value["candidates"][0]["sdpMid"], "0");
    assert_eq!(value["candidates"][0]["sdpMLineIndex"], 0);
}

// ── Validation ──────────────────────────────────────────────────

#[test]
fn valid_offer_requires_offer() {
    let answer_only = ConnectionDescriptor::with_answer(SessionDescription::answer(SDP), vec![]);
    assert!(matches!(answer_only.valid_offer(), Err(SyncError::MalformedDescriptor(_))));
    assert!(answer_only.valid_answer().is_ok());
}

#[test]
fn valid_offer_rejects_mislabelled_description() {
    let mut descriptor = offer();
    descriptor.offer.as_mut().unwrap().kind = SdpType::Answer;
    assert!(matches!(descriptor.valid_offer(), Err(SyncError::MalformedDescriptor(_))));
}

#[test]
fn sdp_without_media_line_is_invalid() {
    let desc = SessionDescription::offer("v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n");
    assert!(matches!(desc.validate(), Err(SyncError::MalformedDescriptor(_))));
}

#[test]
fn attribute_lookup() {
    let desc = SessionDescription::offer(SDP);
    assert_eq!(desc.attribute("ice-ufrag"), Some("abcd"));
    assert_eq!(desc.attribute("ice-pwd"), None);
}
