//! Upstream relay to the whisper transcription backend.
//!
//! # Modules
//! - `client`: the [`RelayEngine`] and its connection task
//! - `config`: endpoint, API key and reconnection policy
//! - `events`: publish/subscribe registry for classified messages
//! - `messages`: wire types and classification

mod client;
mod config;
mod error;
mod events;
mod messages;

pub use client::{RelayConnectionState, RelayEngine};
pub use config::{ReconnectionConfig, RelayConfig};
pub use error::RelayError;
pub use events::{EventHandler, SubscriberRegistry, Subscription};
pub use messages::{
    Handshake, RelayEvent, RelayEventKind, RelayFrame, TranscriptBlock, TranscriptKind, classify,
};
