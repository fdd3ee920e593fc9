pub mod api;
pub mod ws;

use axum::Router;
use std::sync::Arc;

use crate::state::AppState;

/// Build the complete application router with state attached
pub fn create_app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(api::create_api_router(state.clone()))
        .merge(ws::create_ws_router(state.clone()))
        .with_state(state)
}
