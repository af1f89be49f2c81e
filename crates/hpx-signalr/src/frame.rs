//! Parsing of inbound SSE payloads.

use serde_json::Value;

use crate::{
    endpoint::GroupContinuity,
    error::{SignalRError, SignalRResult},
};

/// Payload the server sends once the session is usable.
pub const INITIALIZED: &str = "initialized";

/// The message batch carried by a frame.
#[derive(Clone, Debug, PartialEq)]
pub enum MessageBatch {
    /// No batch field at all: the frame is a keepalive.
    Absent,
    /// A batch array, possibly empty.
    Present(Vec<Value>),
    /// A batch field that is not an array.
    Malformed(Value),
}

/// One parsed inbound payload.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundFrame {
    /// The `initialized` sentinel.
    Initialized,
    /// A persistent-connection response object.
    Data(DataFrame),
}

/// Structured frame contents.
#[derive(Clone, Debug, PartialEq)]
pub struct DataFrame {
    pub messages: MessageBatch,
    /// Cursor of the last message (`MessageId` or `C`).
    pub message_id: Option<String>,
    /// Group continuation; a token wins over a group list.
    pub groups: GroupContinuity,
}

impl InboundFrame {
    /// Parse a raw SSE data payload.
    ///
    /// # Errors
    ///
    /// Returns [`SignalRError::FrameDecode`] when the payload is neither the
    /// sentinel nor a JSON object.
    pub fn parse(raw: &str) -> SignalRResult<Self> {
        if raw.trim().eq_ignore_ascii_case(INITIALIZED) {
            return Ok(Self::Initialized);
        }

        let root: Value = serde_json::from_str(raw)
            .map_err(|e| SignalRError::frame_decode(format!("invalid JSON frame: {e}")))?;
        let Value::Object(mut root) = root else {
            return Err(SignalRError::frame_decode("frame is not a JSON object"));
        };

        let messages = match root.remove("Messages").or_else(|| root.remove("M")) {
            None => MessageBatch::Absent,
            Some(Value::Array(items)) => MessageBatch::Present(items),
            Some(other) => MessageBatch::Malformed(other),
        };

        let message_id = root
            .remove("MessageId")
            .or_else(|| root.remove("C"))
            .and_then(value_text);

        let groups = if let Some(token) = root.remove("G").and_then(value_text) {
            GroupContinuity::Token(token)
        } else {
            root.get("TransportData")
                .and_then(|data| data.get("Groups"))
                .and_then(|groups| serde_json::from_value::<Vec<String>>(groups.clone()).ok())
                .map_or(GroupContinuity::None, GroupContinuity::Names)
        };

        Ok(Self::Data(DataFrame {
            messages,
            message_id,
            groups,
        }))
    }
}

/// Text form of a scalar JSON value; `null` counts as missing.
fn value_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
