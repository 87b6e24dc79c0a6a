//! Inbound frame classification.

use crate::Result;
use crate::error::StreamError;
use crate::models::book::BookSnapshot;
use crate::models::update::UpdateMessage;

/// One decoded stream frame.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    /// Empty keepalive frame.
    Keepalive,
    /// Full book, sent first on every connection.
    Snapshot(BookSnapshot),
    /// Incremental sequenced update.
    Update(UpdateMessage),
}

/// Decodes one text frame.
///
/// Frames carrying `bids` or `asks` are snapshots; any other object with a
/// `sequence` is an update. Empty frames and the JSON empty string are
/// keepalives.
///
/// # Errors
///
/// Returns [`StreamError::Decode`] if the frame matches neither shape.
pub fn parse_stream_message(text: &str) -> Result<StreamMessage> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == "\"\"" {
        return Ok(StreamMessage::Keepalive);
    }

    let value: serde_json::Value = serde_json::from_str(trimmed)
        .map_err(|e| StreamError::Decode(format!("invalid JSON frame: {e}")))?;

    let Some(object) = value.as_object() else {
        return Err(StreamError::Decode(format!(
            "expected JSON object, got: {trimmed}"
        )));
    };

    if object.contains_key("bids") || object.contains_key("asks") {
        let snapshot = serde_json::from_value(value)
            .map_err(|e| StreamError::Decode(format!("invalid snapshot: {e}")))?;
        return Ok(StreamMessage::Snapshot(snapshot));
    }

    if object.contains_key("sequence") {
        let update = serde_json::from_value(value)
            .map_err(|e| StreamError::Decode(format!("invalid update: {e}")))?;
        return Ok(StreamMessage::Update(update));
    }

    Err(StreamError::Decode(format!("unrecognized frame: {trimmed}")))
}
