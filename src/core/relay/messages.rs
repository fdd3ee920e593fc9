//! Message types exchanged with the whisper backend.
//!
//! Everything the backend sends is JSON text. A message shaped exactly like a
//! [`TranscriptBlock`] is a transcription; any other JSON value is a source
//! message meant for the audio producers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Whether a block's text can still change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranscriptKind {
    Final,
    InProgress,
}

/// One span of transcribed speech.
///
/// Deserialization is strict: unknown fields make the payload a source
/// message rather than a transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranscriptBlock {
    pub kind: TranscriptKind,
    /// Seconds from stream start
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Which subscribers an event is delivered to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayEventKind {
    Transcription,
    SourceMessage,
}

impl std::fmt::Display for RelayEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayEventKind::Transcription => write!(f, "transcription"),
            RelayEventKind::SourceMessage => write!(f, "sourceMessage"),
        }
    }
}

/// A classified inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Transcription(TranscriptBlock),
    SourceMessage(Value),
}

impl RelayEvent {
    pub fn kind(&self) -> RelayEventKind {
        match self {
            RelayEvent::Transcription(_) => RelayEventKind::Transcription,
            RelayEvent::SourceMessage(_) => RelayEventKind::SourceMessage,
        }
    }

    /// Serialize the payload for delivery to a client
    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            RelayEvent::Transcription(block) => serde_json::to_string(block),
            RelayEvent::SourceMessage(value) => serde_json::to_string(value),
        }
    }
}

/// Classify one text frame from the backend.
///
/// Fails only when the text is not JSON at all.
pub fn classify(text: &str) -> serde_json::Result<RelayEvent> {
    let value: Value = serde_json::from_str(text)?;
    Ok(classify_value(value))
}

fn classify_value(value: Value) -> RelayEvent {
    if value.is_object()
        && let Ok(block) = TranscriptBlock::deserialize(&value)
    {
        return RelayEvent::Transcription(block);
    }
    RelayEvent::SourceMessage(value)
}

/// First frame on every upstream connection
#[derive(Debug, Serialize)]
pub struct Handshake<'a> {
    pub api_key: &'a str,
}

/// A client frame on its way upstream, kept in its original framing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Binary(Bytes),
    Text(String),
}

impl RelayFrame {
    pub fn is_binary(&self) -> bool {
        matches!(self, RelayFrame::Binary(_))
    }

    pub fn len(&self) -> usize {
        match self {
            RelayFrame::Binary(bytes) => bytes.len(),
            RelayFrame::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn into_message(self) -> Message {
        match self {
            RelayFrame::Binary(bytes) => Message::Binary(bytes),
            RelayFrame::Text(text) => Message::Text(text.into()),
        }
    }
}
