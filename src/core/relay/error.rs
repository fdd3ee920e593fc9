use thiserror::Error;

/// Failures inside the upstream connection task.
///
/// These are logged where they happen; the public engine operations never
/// return them.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Failed to connect to whisper backend: {0}")]
    ConnectionFailed(String),

    #[error("Failed to send handshake: {0}")]
    HandshakeFailed(String),

    #[error("Failed to send frame upstream: {0}")]
    SendFailed(String),

    #[error("Upstream socket error: {0}")]
    Socket(String),
}
