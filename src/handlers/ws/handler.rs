//! Gateway WebSocket handler
//!
//! Each accepted socket moves through `PendingAuth → Authorized → Active →
//! Closed`. Sockets upgraded behind the request-mode authorization layer
//! arrive already authorized and go straight to `Active`.

use axum::{
    Extension,
    extract::{
        State,
        ws::{
            CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code,
            rejection::WebSocketUpgradeRejection,
        },
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, sleep_until, timeout};
use tokio::{select, task::JoinHandle};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::auth::AuthorizationResult;
use crate::core::relay::{EventHandler, RelayEvent, RelayEventKind, RelayFrame, Subscription};
use crate::middleware::ClientIp;
use crate::state::AppState;

use super::auth::authorize_in_band;
use super::endpoint::Endpoint;
use super::messages::{MessageRoute, SESSION_EXPIRED_CLOSE_CODE};

/// Per-connection outbound queue depth
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// How long queued frames may take to flush after the connection ends
const SENDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionPhase {
    PendingAuth,
    Authorized,
    Active,
    Closed,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionPhase::PendingAuth => "pending_auth",
            ConnectionPhase::Authorized => "authorized",
            ConnectionPhase::Active => "active",
            ConnectionPhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

fn transition(phase: &mut ConnectionPhase, next: ConnectionPhase) {
    debug!(from = %phase, to = %next, "Connection phase change");
    *phase = next;
}

/// Holds the connection slot reserved by the connection limit layer
struct ConnectionGuard {
    state: Arc<AppState>,
    ip: Option<IpAddr>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(ip) = self.ip.take() {
            self.state.release_connection(ip);
        }
    }
}

/// `GET /sourcesink`
pub async fn sourcesink_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
    authorization: Option<Extension<AuthorizationResult>>,
) -> Response {
    upgrade(Endpoint::SourceSink, ws, state, client_ip, authorization)
}

/// `GET /source`
pub async fn source_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
    authorization: Option<Extension<AuthorizationResult>>,
) -> Response {
    upgrade(Endpoint::Source, ws, state, client_ip, authorization)
}

/// `GET /sink`
pub async fn sink_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
    authorization: Option<Extension<AuthorizationResult>>,
) -> Response {
    upgrade(Endpoint::Sink, ws, state, client_ip, authorization)
}

fn upgrade(
    endpoint: Endpoint,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    state: Arc<AppState>,
    client_ip: Option<Extension<ClientIp>>,
    authorization: Option<Extension<AuthorizationResult>>,
) -> Response {
    let guard = ConnectionGuard {
        state: state.clone(),
        ip: client_ip.map(|Extension(ClientIp(ip))| ip),
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(%endpoint, "Rejected non-WebSocket request");
            return rejection.into_response();
        }
    };

    let pre_authorized = authorization.map(|Extension(result)| result);
    debug!(%endpoint, pre_authorized = pre_authorized.is_some(), "WebSocket upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| {
            let connection_id = Uuid::new_v4();
            let span = info_span!("ws_connection", %connection_id, %endpoint);
            handle_socket(socket, state, endpoint, connection_id, pre_authorized, guard)
                .instrument(span)
        })
}

fn deliver_to(message_tx: &mpsc::Sender<MessageRoute>) -> EventHandler {
    let message_tx = message_tx.clone();
    Arc::new(move |event: &RelayEvent| {
        if let Err(e) = message_tx.try_send(MessageRoute::Event(event.clone())) {
            warn!(kind = %event.kind(), error = %e, "Dropping relay event for slow client");
        }
    })
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    endpoint: Endpoint,
    connection_id: Uuid,
    pre_authorized: Option<AuthorizationResult>,
    guard: ConnectionGuard,
) {
    let mut phase = ConnectionPhase::PendingAuth;
    let (mut sender, mut receiver) = socket.split();

    let authorization = match pre_authorized {
        Some(result) => result,
        None => {
            let deadline = Duration::from_millis(state.config.websocket.auth_timeout_ms);
            match authorize_in_band(
                &mut receiver,
                &state.policy,
                endpoint.allowed_identities(),
                deadline,
            )
            .await
            {
                Ok(result) => {
                    transition(&mut phase, ConnectionPhase::Authorized);
                    result
                }
                Err(e) => {
                    info!(error = %e, "In-band authorization failed, closing");
                    let close = Message::Close(Some(CloseFrame {
                        code: close_code::POLICY,
                        reason: "unauthorized".into(),
                    }));
                    if let Err(e) = sender.send(close).await {
                        debug!(error = %e, "Failed to send close frame");
                    }
                    return;
                }
            }
        }
    };

    let (message_tx, mut message_rx) = mpsc::channel::<MessageRoute>(CHANNEL_BUFFER_SIZE);

    let mut sender_task: JoinHandle<()> = tokio::spawn(
        async move {
            while let Some(route) = message_rx.recv().await {
                let (message, closing) = match route {
                    MessageRoute::Event(event) => match event.to_json() {
                        Ok(json) => (Message::Text(json.into()), false),
                        Err(e) => {
                            error!("Failed to serialize relay event: {}", e);
                            continue;
                        }
                    },
                    MessageRoute::Close { code, reason } => (
                        Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })),
                        true,
                    ),
                };

                if let Err(e) = sender.send(message).await {
                    debug!(error = %e, "Failed to send WebSocket message");
                    break;
                }
                if closing {
                    break;
                }
            }
        }
        .in_current_span(),
    );

    let mut subscriptions: Vec<Subscription> = Vec::with_capacity(2);
    if endpoint.is_sink() {
        subscriptions.push(
            state
                .relay
                .subscribe(RelayEventKind::Transcription, deliver_to(&message_tx)),
        );
    }
    if endpoint.is_source() {
        subscriptions.push(
            state
                .relay
                .subscribe(RelayEventKind::SourceMessage, deliver_to(&message_tx)),
        );
        let active = state.sources.register(connection_id).await;
        debug!(active_sources = active, "Registered source");
    }

    transition(&mut phase, ConnectionPhase::Active);
    info!(
        expires_in_ms = ?authorization.expires_in_ms,
        "WebSocket connection active"
    );

    let expiry = authorization
        .expires_in_ms
        .map(|ms| Instant::now() + Duration::from_millis(ms.max(0) as u64));
    let expired = async move {
        match expiry {
            Some(at) => sleep_until(at).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(expired);

    loop {
        select! {
            _ = &mut expired => {
                info!("Session expired, closing connection");
                let _ = message_tx
                    .send(MessageRoute::Close {
                        code: SESSION_EXPIRED_CLOSE_CODE,
                        reason: "session expired",
                    })
                    .await;
                break;
            }
            msg_result = receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Binary(data))) => {
                        if endpoint.is_source() {
                            state.relay.forward(RelayFrame::Binary(data));
                        } else {
                            debug!(bytes = data.len(), "Ignoring binary frame from sink");
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if endpoint.is_source() {
                            state.relay.forward(RelayFrame::Text(text.as_str().to_owned()));
                        } else {
                            debug!("Ignoring text frame from sink");
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        info!(code = ?frame.map(|f| f.code), "Client closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!("WebSocket connection dropped");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup
    transition(&mut phase, ConnectionPhase::Closed);
    drop(subscriptions);
    if endpoint.is_source() {
        let active = state.sources.unregister(connection_id).await;
        debug!(active_sources = active, "Unregistered source");
    }

    drop(message_tx);
    if timeout(SENDER_DRAIN_TIMEOUT, &mut sender_task).await.is_err() {
        sender_task.abort();
    }
    drop(guard);

    info!("WebSocket connection closed");
}
