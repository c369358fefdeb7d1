//! The envelope - the unit exchanged between peers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One message on a logical channel.
///
/// `channel` is a dotted hierarchical name (e.g. `general.scenario.preview`);
/// uniqueness is by convention only. When `reply_to` is present it names a
/// channel the sender expects a single reply envelope on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Target channel name. Must be non-empty.
    pub channel: String,
    /// Arbitrary JSON value; may be null.
    pub payload: Value,
    /// Ephemeral reply channel, if the sender expects an answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl Envelope {
    /// Create an envelope without a reply channel.
    pub fn new(channel: impl Into<String>, payload: Value) -> Self {
        Self {
            channel: channel.into(),
            payload,
            reply_to: None,
        }
    }

    /// Create an envelope that requests a reply on `reply_to`.
    pub fn with_reply_to(
        channel: impl Into<String>,
        payload: Value,
        reply_to: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            payload,
            reply_to: Some(reply_to.into()),
        }
    }
}
