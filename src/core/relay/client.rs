//! Upstream relay engine.
//!
//! Owns the single WebSocket connection to the whisper backend. Audio and
//! control frames from sources go up through [`RelayEngine::forward`];
//! everything the backend sends comes back as [`RelayEvent`]s published to
//! subscribers.
//!
//! ```text
//! ┌─────────────┐   ┌───────────────────┐   ┌──────────────────┐
//! │  forward()  │──▶│ outbound (mpsc)   │──▶│ connection task  │──▶ backend
//! └─────────────┘   └───────────────────┘   └────────┬─────────┘
//!                                                    │ classify
//!                                           ┌────────▼─────────┐
//!                                           │ SubscriberRegistry│──▶ handlers
//!                                           └──────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use super::config::{ReconnectionConfig, RelayConfig};
use super::error::RelayError;
use super::events::{EventHandler, SubscriberRegistry, Subscription};
use super::messages::{Handshake, RelayEventKind, RelayFrame, classify};

// =============================================================================
// Constants
// =============================================================================

/// How long `connect`/`disconnect` wait for a previous connection task to wind down
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

type UpstreamSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle of the upstream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayConnectionState {
    Disconnected,
    Connecting,
    /// Socket open, API key handshake in flight
    Handshaking,
    Open,
    Closing,
}

impl fmt::Display for RelayConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayConnectionState::Disconnected => write!(f, "disconnected"),
            RelayConnectionState::Connecting => write!(f, "connecting"),
            RelayConnectionState::Handshaking => write!(f, "handshaking"),
            RelayConnectionState::Open => write!(f, "open"),
            RelayConnectionState::Closing => write!(f, "closing"),
        }
    }
}

struct ConnectionHandle {
    id: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Everything the connection task needs, detached from the engine
struct ConnectionContext {
    id: u64,
    endpoint: String,
    api_key: Zeroizing<String>,
    reconnection: ReconnectionConfig,
    subscribers: Arc<SubscriberRegistry>,
    state: Arc<watch::Sender<RelayConnectionState>>,
}

/// Why a single socket session ended
enum SessionEnd {
    /// The engine asked the task to stop
    Cancelled,
    /// The backend or the network closed the socket
    Closed,
}

// =============================================================================
// RelayEngine
// =============================================================================

/// Single upstream connection shared by every gateway client.
///
/// `connect` always replaces an existing connection, and `disconnect` is
/// idempotent. Neither returns errors: failures are logged and show up as
/// state transitions.
pub struct RelayEngine {
    config: RelayConfig,
    subscribers: Arc<SubscriberRegistry>,
    state: Arc<watch::Sender<RelayConnectionState>>,
    outbound: parking_lot::Mutex<Option<mpsc::UnboundedSender<RelayFrame>>>,
    connection: Mutex<Option<ConnectionHandle>>,
    next_connection_id: AtomicU64,
}

impl fmt::Debug for RelayEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayEngine")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl RelayEngine {
    pub fn new(config: RelayConfig) -> Self {
        let (state, _) = watch::channel(RelayConnectionState::Disconnected);
        Self {
            config,
            subscribers: SubscriberRegistry::new(),
            state: Arc::new(state),
            outbound: parking_lot::Mutex::new(None),
            connection: Mutex::new(None),
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn state(&self) -> RelayConnectionState {
        *self.state.borrow()
    }

    /// Observe state transitions
    pub fn watch_state(&self) -> watch::Receiver<RelayConnectionState> {
        self.state.subscribe()
    }

    pub fn subscribers(&self) -> &Arc<SubscriberRegistry> {
        &self.subscribers
    }

    pub fn subscribe(&self, kind: RelayEventKind, handler: EventHandler) -> Subscription {
        self.subscribers.subscribe(kind, handler)
    }

    /// Open a connection to the backend, closing any existing one first.
    ///
    /// Returns once the connection task is running; use [`watch_state`]
    /// to wait for [`RelayConnectionState::Open`].
    ///
    /// [`watch_state`]: RelayEngine::watch_state
    pub async fn connect(&self) {
        let mut slot = self.connection.lock().await;

        if let Some(existing) = slot.take() {
            info!(connection_id = existing.id, "Replacing existing upstream connection");
            *self.outbound.lock() = None;
            Self::shutdown(existing).await;
        }

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let context = ConnectionContext {
            id,
            endpoint: self.config.endpoint.clone(),
            api_key: Zeroizing::new(self.config.api_key.clone()),
            reconnection: self.config.reconnection.clone(),
            subscribers: self.subscribers.clone(),
            state: self.state.clone(),
        };

        self.state.send_replace(RelayConnectionState::Connecting);
        *self.outbound.lock() = Some(outbound_tx);

        let task = tokio::spawn(run_connection(context, outbound_rx, cancel.clone()));
        *slot = Some(ConnectionHandle { id, cancel, task });
    }

    /// Close the upstream connection if there is one
    pub async fn disconnect(&self) {
        let mut slot = self.connection.lock().await;

        let Some(existing) = slot.take() else {
            debug!("Disconnect requested with no upstream connection");
            return;
        };

        *self.outbound.lock() = None;
        let id = existing.id;
        Self::shutdown(existing).await;
        self.state.send_replace(RelayConnectionState::Disconnected);

        info!(connection_id = id, "Disconnected from whisper backend");
    }

    /// Send a frame upstream, preserving its framing.
    ///
    /// Frames are dropped, not queued, while the connection is not open.
    pub fn forward(&self, frame: RelayFrame) {
        let state = self.state();
        if state != RelayConnectionState::Open {
            debug!(%state, bytes = frame.len(), "Upstream not open, dropping frame");
            return;
        }

        match self.outbound.lock().as_ref() {
            Some(tx) => {
                if tx.send(frame).is_err() {
                    debug!("Upstream connection task gone, dropping frame");
                }
            }
            None => debug!("No upstream connection, dropping frame"),
        }
    }

    async fn shutdown(mut handle: ConnectionHandle) {
        handle.cancel.cancel();
        if timeout(SHUTDOWN_TIMEOUT, &mut handle.task).await.is_err() {
            warn!(
                connection_id = handle.id,
                "Upstream connection task did not stop in time, aborting"
            );
            handle.task.abort();
        }
    }
}

impl Drop for RelayEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.connection.get_mut().take() {
            handle.cancel.cancel();
        }
    }
}

// =============================================================================
// Connection task
// =============================================================================

async fn run_connection(
    ctx: ConnectionContext,
    mut outbound_rx: mpsc::UnboundedReceiver<RelayFrame>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        ctx.state.send_replace(RelayConnectionState::Connecting);
        debug!(connection_id = ctx.id, endpoint = %ctx.endpoint, "Connecting to whisper backend");

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect_async(ctx.endpoint.as_str()) => result,
        };

        match connected {
            Ok((socket, _response)) => {
                info!(connection_id = ctx.id, "Connected to whisper backend");
                match run_session(&ctx, socket, &mut outbound_rx, &cancel, &mut attempt).await {
                    SessionEnd::Cancelled => break,
                    SessionEnd::Closed => {}
                }
            }
            Err(e) => {
                let err = RelayError::ConnectionFailed(e.to_string());
                error!(connection_id = ctx.id, "{}", err);
            }
        }

        let dropped = drain(&mut outbound_rx);
        if dropped > 0 {
            debug!(connection_id = ctx.id, dropped, "Dropped frames queued on a closed connection");
        }

        if !ctx.reconnection.should_retry(attempt) {
            break;
        }
        attempt += 1;
        let delay = ctx.reconnection.calculate_delay(attempt);
        info!(
            connection_id = ctx.id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting to whisper backend"
        );

        ctx.state.send_replace(RelayConnectionState::Disconnected);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    ctx.state.send_replace(RelayConnectionState::Disconnected);
    debug!(connection_id = ctx.id, "Upstream connection task finished");
}

/// Drive one socket from handshake to close
async fn run_session(
    ctx: &ConnectionContext,
    socket: UpstreamSocket,
    outbound_rx: &mut mpsc::UnboundedReceiver<RelayFrame>,
    cancel: &CancellationToken,
    attempt: &mut u32,
) -> SessionEnd {
    let (mut ws_sink, mut ws_stream) = socket.split();

    ctx.state.send_replace(RelayConnectionState::Handshaking);
    let handshake = match serde_json::to_string(&Handshake {
        api_key: ctx.api_key.as_str(),
    }) {
        Ok(json) => json,
        Err(e) => {
            error!(connection_id = ctx.id, "{}", RelayError::HandshakeFailed(e.to_string()));
            return SessionEnd::Closed;
        }
    };
    if let Err(e) = ws_sink.send(Message::Text(handshake.into())).await {
        error!(connection_id = ctx.id, "{}", RelayError::HandshakeFailed(e.to_string()));
        return SessionEnd::Closed;
    }

    ctx.state.send_replace(RelayConnectionState::Open);
    *attempt = 0;
    info!(connection_id = ctx.id, "Upstream connection open");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                ctx.state.send_replace(RelayConnectionState::Closing);
                let close = Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                }));
                if let Err(e) = ws_sink.send(close).await {
                    debug!(connection_id = ctx.id, error = %e, "Failed to send close frame upstream");
                }
                return SessionEnd::Cancelled;
            }

            Some(frame) = outbound_rx.recv() => {
                let binary = frame.is_binary();
                let len = frame.len();
                // The socket's close event decides when the session ends
                if let Err(e) = ws_sink.send(frame.into_message()).await {
                    warn!(connection_id = ctx.id, "{}", RelayError::SendFailed(e.to_string()));
                } else {
                    debug!(connection_id = ctx.id, binary, bytes = len, "Forwarded frame upstream");
                }
            }

            message = ws_stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => dispatch(ctx, text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code));
                        info!(connection_id = ctx.id, ?code, "Whisper backend closed the connection");
                        return SessionEnd::Closed;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(connection_id = ctx.id, bytes = data.len(), "Ignoring binary frame from whisper backend");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(connection_id = ctx.id, "{}", RelayError::Socket(e.to_string()));
                        return SessionEnd::Closed;
                    }
                    None => {
                        info!(connection_id = ctx.id, "Whisper backend stream ended");
                        return SessionEnd::Closed;
                    }
                }
            }
        }
    }
}

fn dispatch(ctx: &ConnectionContext, text: &str) {
    match classify(text) {
        Ok(event) => {
            let delivered = ctx.subscribers.publish(&event);
            debug!(connection_id = ctx.id, kind = %event.kind(), delivered, "Published upstream event");
        }
        Err(e) => {
            warn!(connection_id = ctx.id, error = %e, "Dropping non-JSON message from whisper backend");
        }
    }
}

fn drain(outbound_rx: &mut mpsc::UnboundedReceiver<RelayFrame>) -> usize {
    let mut dropped = 0;
    while outbound_rx.try_recv().is_ok() {
        dropped += 1;
    }
    dropped
}
