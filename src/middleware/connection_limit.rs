//! Admission control for relay WebSocket endpoints
//!
//! Two caps are enforced before an upgrade reaches its handler:
//! - `max_websocket_connections` across the whole process
//! - `max_connections_per_ip` per client address
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use whisper_relay::middleware::connection_limit_middleware;
//!
//! let app = Router::new()
//!     .route("/sink", get(sink_handler))
//!     .layer(axum::middleware::from_fn_with_state(
//!         state.clone(),
//!         connection_limit_middleware,
//!     ));
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::state::{AppState, ConnectionLimitError};

/// Client address of an upgrade that holds a connection slot.
///
/// The WebSocket handler releases the slot for this IP when the socket ends.
#[derive(Clone, Debug)]
pub struct ClientIp(pub IpAddr);

/// Reserve a connection slot before a `/source`, `/sink` or `/sourcesink` upgrade.
///
/// Responds 503 when the server-wide cap is reached and 429 when the caller's
/// IP already holds `max_connections_per_ip` sockets. Requests without an
/// `Upgrade: websocket` header are passed through untouched.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let is_ws_upgrade = request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade {
        return next.run(request).await;
    }

    let client_ip = addr.ip();

    match state.try_acquire_connection(client_ip) {
        Ok(()) => {
            request.extensions_mut().insert(ClientIp(client_ip));
            next.run(request).await
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(
                ip = %client_ip,
                "Rejecting WebSocket upgrade: global limit reached"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Relay at capacity. Please try again later.",
            )
                .into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(
                ip = %client_ip,
                "Rejecting WebSocket upgrade: per-IP limit reached"
            );
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many connections from your IP address.",
            )
                .into_response()
        }
    }
}
