//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `session` - Access token and session token issuance
//! - `ws` - Source and sink WebSocket endpoints

pub mod api;
pub mod session;
pub mod ws;

pub use ws::{sink_handler, source_handler, sourcesink_handler};
