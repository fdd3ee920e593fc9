//! Token issuance routes
//!
//! - `POST /accessToken`: hands the current access token to a holder of the
//!   source token, together with the address clients should connect to
//! - `POST /startSession`: exchanges a valid access token for a session token

use axum::{
    Json,
    body::Bytes,
    extract::{RawQuery, State},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::auth::{Credentials, format_expiry};
use crate::errors::{AuthError, AuthResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub server_address: String,
    /// RFC 3339
    pub expires: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_token: String,
    pub expires: String,
}

/// Return the access token currently in rotation
pub async fn access_token(State(state): State<Arc<AppState>>) -> Json<AccessTokenResponse> {
    let issued = state.tokens.current_access_token();
    debug!(expires_at_ms = issued.expires_at_ms, "Handing out current access token");

    Json(AccessTokenResponse {
        access_token: issued.token,
        server_address: state.config.server_address.clone(),
        expires: format_expiry(issued.expires_at_ms),
    })
}

/// Start a viewer session.
///
/// The body must be a JSON object. The access token is read from its
/// `accessToken` field, or from the query string when the body has none,
/// and is validated again here even though the route layer already did.
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> AuthResult<Json<SessionResponse>> {
    let value: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AuthError::BadRequest(format!("Invalid JSON body: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| AuthError::BadRequest("Body must be a JSON object".to_string()))?;

    let from_query = query
        .as_deref()
        .map(Credentials::from_query)
        .unwrap_or_default();
    let credentials = Credentials::from_json_object(object).or(from_query);

    if !state
        .tokens
        .access_token_valid(credentials.access_token.as_deref())
    {
        return Err(AuthError::InvalidAccessToken);
    }

    let issued = state.tokens.create_session_token();
    info!(
        expires = %format_expiry(issued.expires_at_ms),
        "Session started"
    );

    Ok(Json(SessionResponse {
        session_token: issued.token,
        expires: format_expiry(issued.expires_at_ms),
    }))
}
