//! WebSocket route configuration
//!
//! `GET /sourcesink`, `GET /source` and `GET /sink` upgrade to WebSocket.
//!
//! # Authentication
//!
//! With `websocket.auth_mode: in_band` (the default) the upgrade is always
//! accepted and the client authorizes with its first message:
//!
//! ```json
//! {"sourceToken": "..."}
//! {"sessionToken": "..."}
//! ```
//!
//! With `websocket.auth_mode: request` the tokens travel in the query string
//! and the upgrade is refused with 403 before the socket exists.

use axum::{
    Router,
    extract::{Request, State},
    middleware::{self, Next},
    routing::{MethodRouter, get},
};
use tower_http::trace::TraceLayer;

use crate::config::WsAuthMode;
use crate::handlers::ws::{Endpoint, sink_handler, source_handler, sourcesink_handler};
use crate::middleware::{authorize_request, connection_limit_middleware};
use crate::state::AppState;
use std::sync::Arc;

fn endpoint_route(
    endpoint: Endpoint,
    route: MethodRouter<Arc<AppState>>,
    state: &Arc<AppState>,
) -> MethodRouter<Arc<AppState>> {
    let route = route.layer(middleware::from_fn_with_state(
        state.clone(),
        connection_limit_middleware,
    ));

    match state.config.websocket.auth_mode {
        WsAuthMode::InBand => route,
        WsAuthMode::Request => {
            let allowed = endpoint.allowed_identities();
            // Outermost, so rejected upgrades never reserve a connection slot
            route.layer(middleware::from_fn_with_state(
                state.clone(),
                move |state: State<Arc<AppState>>, request: Request, next: Next| {
                    authorize_request(state, allowed, request, next)
                },
            ))
        }
    }
}

/// Create the WebSocket router
pub fn create_ws_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            Endpoint::SourceSink.path(),
            endpoint_route(Endpoint::SourceSink, get(sourcesink_handler), &state),
        )
        .route(
            Endpoint::Source.path(),
            endpoint_route(Endpoint::Source, get(source_handler), &state),
        )
        .route(
            Endpoint::Sink.path(),
            endpoint_route(Endpoint::Sink, get(sink_handler), &state),
        )
        .layer(TraceLayer::new_for_http())
}
