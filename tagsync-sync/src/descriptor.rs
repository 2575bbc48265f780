//! Connection descriptors and their compact text form.
//!
//! A descriptor is everything one side must hand to the other out of band:
//! a session description (offer or answer) plus the network candidates it
//! gathered. For QR codes and copy/paste it is rendered as zstd-compressed,
//! URL-safe base64 JSON.

use crate::config::DEFAULT_COMPRESSION_LEVEL;
use crate::error::{SyncError, SyncResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Upper bound on a decompressed descriptor.
const MAX_DESCRIPTOR_BYTES: usize = 1024 * 1024;

/// Whether a session description is an offer or an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// An SDP session description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Checks the SDP has a version line, an origin line and at least one
    /// media section.
    pub fn validate(&self) -> SyncResult<()> {
        for (prefix, what) in [("v=", "version"), ("o=", "origin"), ("m=", "media")] {
            if !self.sdp.lines().any(|line| line.trim_start().starts_with(prefix)) {
                return Err(SyncError::MalformedDescriptor(format!(
                    "{:?} description has no {what} line",
                    self.kind
                )));
            }
        }
        Ok(())
    }

    /// Value of the first `a=<name>:<value>` attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.sdp.lines().find_map(|line| {
            let rest = line.trim().strip_prefix("a=")?;
            let (key, value) = rest.split_once(':')?;
            (key == name).then_some(value.trim())
        })
    }
}

/// A network candidate for reaching the other side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

impl NetworkCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }
    }
}

/// What one side hands to the other out of band.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    #[serde(default)]
    pub candidates: Vec<NetworkCandidate>,
}

impl ConnectionDescriptor {
    /// An initiator's descriptor.
    pub fn with_offer(offer: SessionDescription, candidates: Vec<NetworkCandidate>) -> Self {
        Self {
            offer: Some(offer),
            answer: None,
            candidates,
        }
    }

    /// A responder's descriptor.
    pub fn with_answer(answer: SessionDescription, candidates: Vec<NetworkCandidate>) -> Self {
        Self {
            offer: None,
            answer: Some(answer),
            candidates,
        }
    }

    /// The offer, if present and structurally valid.
    pub fn valid_offer(&self) -> SyncResult<&SessionDescription> {
        Self::require(self.offer.as_ref(), SdpType::Offer)
    }

    /// The answer, if present and structurally valid.
    pub fn valid_answer(&self) -> SyncResult<&SessionDescription> {
        Self::require(self.answer.as_ref(), SdpType::Answer)
    }

    fn require(desc: Option<&SessionDescription>, kind: SdpType) -> SyncResult<&SessionDescription> {
        let desc = desc.ok_or_else(|| {
            SyncError::MalformedDescriptor(format!("descriptor has no {kind:?}"))
        })?;
        if desc.kind != kind {
            return Err(SyncError::MalformedDescriptor(format!(
                "expected {kind:?}, found {:?}",
                desc.kind
            )));
        }
        desc.validate()?;
        Ok(desc)
    }

    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json).map_err(|e| SyncError::MalformedDescriptor(e.to_string()))
    }

    /// Compressed text for QR codes and copy/paste.
    pub fn to_compact(&self) -> SyncResult<String> {
        self.to_compact_with_level(DEFAULT_COMPRESSION_LEVEL)
    }

    pub fn to_compact_with_level(&self, level: i32) -> SyncResult<String> {
        compress_text(&self.to_json()?, level)
    }

    /// Parses compact or raw JSON text. Surrounding whitespace is ignored.
    pub fn parse(text: &str) -> SyncResult<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::MalformedDescriptor("empty descriptor".to_string()));
        }
        match decompress_text(text) {
            Some(json) => Self::from_json(&json),
            None => Self::from_json(text),
        }
    }
}

/// zstd-compresses `text` and encodes it as URL-safe base64 without padding.
pub fn compress_text(text: &str, level: i32) -> SyncResult<String> {
    let compressed = zstd::bulk::compress(text.as_bytes(), level)
        .map_err(|e| SyncError::Protocol(format!("compression failed: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(compressed))
}

/// Reverses [`compress_text`]. Returns `None` for anything it did not produce.
pub fn decompress_text(text: &str) -> Option<String> {
    let compressed = URL_SAFE_NO_PAD.decode(text.trim()).ok()?;
    let raw = zstd::bulk::decompress(&compressed, MAX_DESCRIPTOR_BYTES).ok()?;
    String::from_utf8(raw).ok()
}
