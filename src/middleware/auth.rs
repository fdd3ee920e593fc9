use crate::auth::{AuthorizationResult, Credentials, Identity};
use crate::errors::auth_error::AuthError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use http_body_util::BodyExt;
use std::sync::Arc;

/// Largest request body inspected for credentials
const MAX_CREDENTIAL_BODY_BYTES: usize = 64 * 1024;

/// Identities accepted by `POST /startSession`
pub const ACCESS_TOKEN_ONLY: &[Identity] = &[Identity::AccessToken];

/// Extract credentials from the request body and query string
///
/// Token sources, per credential:
/// 1. JSON body field (`accessToken`, `sessionToken`, `sourceToken`)
/// 2. Query parameter of the same name
///
/// GET requests (including WebSocket upgrades) are never buffered.
async fn extract_credentials(request: Request) -> Result<(Request, Credentials), AuthError> {
    let query = request
        .uri()
        .query()
        .map(Credentials::from_query)
        .unwrap_or_default();

    if request.method() == Method::GET || request.method() == Method::HEAD {
        return Ok((request, query));
    }

    let (parts, body) = request.into_parts();
    let body_bytes = body
        .collect()
        .await
        .map_err(|e| AuthError::BadRequest(format!("Failed to read request body: {e}")))?
        .to_bytes();

    if body_bytes.len() > MAX_CREDENTIAL_BODY_BYTES {
        return Err(AuthError::BadRequest("Request body too large".to_string()));
    }

    let from_body = serde_json::from_slice::<serde_json::Value>(&body_bytes)
        .ok()
        .and_then(|value| value.as_object().map(Credentials::from_json_object))
        .unwrap_or_default();

    let request = Request::from_parts(parts, Body::from(body_bytes));
    Ok((request, from_body.or(query)))
}

/// Pre-handler authorization hook
///
/// The middleware:
/// 1. Collects credentials from the JSON body and the query string
/// 2. Evaluates them against `allowed` with the shared [`AuthenticationPolicy`]
/// 3. Inserts the [`AuthorizationResult`] into request extensions on success
/// 4. Returns 403 otherwise, before the handler runs
///
/// Attach it with a closure that fixes the allowed identities:
///
/// ```ignore
/// router.layer(middleware::from_fn_with_state(
///     state.clone(),
///     |state: State<Arc<AppState>>, request: Request, next: Next| {
///         authorize_request(state, ACCESS_TOKEN_ONLY, request, next)
///     },
/// ));
/// ```
///
/// [`AuthenticationPolicy`]: crate::auth::AuthenticationPolicy
pub async fn authorize_request(
    State(state): State<Arc<AppState>>,
    allowed: &'static [Identity],
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let (mut request, credentials) = extract_credentials(request).await?;
    let result: AuthorizationResult = state.policy.authorize(&credentials, allowed);

    if !result.authorized {
        tracing::warn!(
            method = %method,
            path = %path,
            "Request rejected: no acceptable credential"
        );
        return Err(AuthError::Forbidden);
    }

    tracing::debug!(
        method = %method,
        path = %path,
        expires_in_ms = ?result.expires_in_ms,
        "Request authorized"
    );
    request.extensions_mut().insert(result);
    Ok(next.run(request).await)
}
