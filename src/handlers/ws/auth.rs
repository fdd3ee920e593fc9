//! Post-upgrade authorization.
//!
//! The first message on a freshly accepted socket must be a JSON object
//! carrying `sourceToken` and/or `sessionToken`. Whichever arrives first wins:
//! that message or the deadline.

use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tracing::debug;

use crate::auth::{AuthenticationPolicy, AuthorizationResult, Credentials, Identity};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InBandAuthError {
    #[error("no authorization message within {0:?}")]
    Timeout(Duration),

    #[error("connection closed before authorizing")]
    ConnectionClosed,

    #[error("authorization message is not valid JSON")]
    InvalidJson,

    #[error("authorization message is not a JSON object")]
    NotAnObject,

    #[error("credentials rejected")]
    Rejected,
}

/// Wait for the authorization message and evaluate it against `allowed`.
///
/// Ping and pong frames do not count as the first message.
pub async fn authorize_in_band<S, E>(
    receiver: &mut S,
    policy: &AuthenticationPolicy,
    allowed: &[Identity],
    deadline: Duration,
) -> Result<AuthorizationResult, InBandAuthError>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let payload = tokio::time::timeout(deadline, first_payload(receiver))
        .await
        .map_err(|_| InBandAuthError::Timeout(deadline))??;

    let value: serde_json::Value =
        serde_json::from_slice(&payload).map_err(|_| InBandAuthError::InvalidJson)?;
    let object = value.as_object().ok_or(InBandAuthError::NotAnObject)?;

    // Access tokens only buy a session; they never open a socket.
    let credentials = Credentials {
        access_token: None,
        ..Credentials::from_json_object(object)
    };

    let result = policy.authorize(&credentials, allowed);
    if result.authorized {
        Ok(result)
    } else {
        Err(InBandAuthError::Rejected)
    }
}

async fn first_payload<S, E>(receiver: &mut S) -> Result<Vec<u8>, InBandAuthError>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.as_str().as_bytes().to_vec()),
            Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => return Err(InBandAuthError::ConnectionClosed),
            Some(Err(e)) => {
                debug!(error = %e, "Socket error while waiting for authorization");
                return Err(InBandAuthError::ConnectionClosed);
            }
        }
    }
}
