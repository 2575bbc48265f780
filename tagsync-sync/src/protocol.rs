//! Data-channel messages.
//!
//! One JSON object per message, discriminated by `type`:
//!
//! ```text
//! {"type":"device-id","deviceId":…}
//! {"type":"watermark","deviceId":…,"forDevice":…,"watermark":…}
//! {"type":"item-sync","deltas":[…],"from":…,"to":…}
//! {"type":"blob-sync","blobs":[{"id":…,"data":…}],"from":…,"to":…}
//! ```

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use tagsync_blobstore::Blob;
use tagsync_types::{DeviceId, ItemDelta, Timestamp};

/// Message types this build understands.
const KNOWN_TYPES: [&str; 4] = ["device-id", "watermark", "item-sync", "blob-sync"];

/// A sync protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncMessage {
    /// Announces the sender's device id. Sent as soon as the channel opens.
    #[serde(rename_all = "camelCase")]
    DeviceId { device_id: DeviceId },

    /// The sender's watermark for `for_device`: the time up to which it has
    /// merged that device's deltas.
    #[serde(rename_all = "camelCase")]
    Watermark {
        device_id: DeviceId,
        for_device: DeviceId,
        watermark: Timestamp,
    },

    /// A batch of deltas.
    ItemSync {
        deltas: Vec<ItemDelta>,
        from: DeviceId,
        to: DeviceId,
    },

    /// One or more photos.
    BlobSync {
        blobs: Vec<Blob>,
        from: DeviceId,
        to: DeviceId,
    },
}

impl SyncMessage {
    /// The wire `type` of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::DeviceId { .. } => "device-id",
            SyncMessage::Watermark { .. } => "watermark",
            SyncMessage::ItemSync { .. } => "item-sync",
            SyncMessage::BlobSync { .. } => "blob-sync",
        }
    }

    /// Serializes the message to its JSON text.
    pub fn encode(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a message.
    ///
    /// An unrecognised `type` yields `SyncError::UnknownMessage`, anything
    /// else that does not parse yields `SyncError::Protocol`.
    pub fn decode(text: &str) -> SyncResult<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| SyncError::Protocol(format!("invalid JSON: {e}")))?;

        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| SyncError::Protocol("missing message type".to_string()))?
            .to_string();

        if !KNOWN_TYPES.contains(&kind.as_str()) {
            return Err(SyncError::UnknownMessage(kind));
        }

        serde_json::from_value(value)
            .map_err(|e| SyncError::Protocol(format!("malformed {kind} message: {e}")))
    }
}
