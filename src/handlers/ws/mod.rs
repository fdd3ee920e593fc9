//! Source and sink WebSocket endpoints
//!
//! - `/sourcesink`: audio in, transcripts out
//! - `/source`: audio in; receives the backend's control messages
//! - `/sink`: transcripts out; client frames are ignored
//!
//! Audio frames from sources are forwarded upstream verbatim. The first
//! source to connect opens the upstream link and the last one to leave
//! closes it.

pub mod auth;
pub mod endpoint;
mod handler;
pub mod messages;

pub use auth::{InBandAuthError, authorize_in_band};
pub use endpoint::Endpoint;
pub use handler::{sink_handler, source_handler, sourcesink_handler};
pub use messages::{MessageRoute, SESSION_EXPIRED_CLOSE_CODE};
