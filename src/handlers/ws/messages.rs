//! Frames queued for delivery to a gateway client

use crate::core::relay::RelayEvent;

/// Close code sent when the session token behind a connection expires
pub const SESSION_EXPIRED_CLOSE_CODE: u16 = 3000;

/// Work item for a connection's sender task
#[derive(Debug, Clone)]
pub enum MessageRoute {
    /// Relay event, sent as a JSON text frame
    Event(RelayEvent),
    /// Close frame; the sender task stops after sending it
    Close { code: u16, reason: &'static str },
}
