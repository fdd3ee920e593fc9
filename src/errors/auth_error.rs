use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the HTTP authorization layer and token routes
#[derive(Debug, Error)]
pub enum AuthError {
    /// None of the presented credentials satisfied the endpoint
    #[error("Forbidden")]
    Forbidden,

    /// `/startSession` was called with an unknown or expired access token
    #[error("Invalid access token")]
    InvalidAccessToken,

    #[error("Bad request: {0}")]
    BadRequest(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::InvalidAccessToken => StatusCode::UNAUTHORIZED,
            AuthError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AuthError::Forbidden => "forbidden",
            AuthError::InvalidAccessToken => "invalid_access_token",
            AuthError::BadRequest(_) => "bad_request",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
