use axum::{
    Router,
    extract::{Request, State},
    middleware::{self, Next},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::auth::Identity;
use crate::handlers::{api, session};
use crate::middleware::{ACCESS_TOKEN_ONLY, authorize_request};
use crate::state::AppState;
use std::sync::Arc;

const SOURCE_TOKEN_ONLY: &[Identity] = &[Identity::SourceToken];

/// Create the HTTP router for token issuance and health checks
///
/// - `POST /accessToken` requires the source token
/// - `POST /startSession` requires a current access token
/// - `GET /healthcheck` is public
pub fn create_api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let access_token = Router::new()
        .route("/accessToken", post(session::access_token))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            |state: State<Arc<AppState>>, request: Request, next: Next| {
                authorize_request(state, SOURCE_TOKEN_ONLY, request, next)
            },
        ));

    let start_session = Router::new()
        .route("/startSession", post(session::start_session))
        .layer(middleware::from_fn_with_state(
            state,
            |state: State<Arc<AppState>>, request: Request, next: Next| {
                authorize_request(state, ACCESS_TOKEN_ONLY, request, next)
            },
        ));

    Router::new()
        .merge(access_token)
        .merge(start_session)
        .route("/healthcheck", get(api::health_check))
        .layer(TraceLayer::new_for_http())
}
