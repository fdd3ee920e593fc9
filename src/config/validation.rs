use url::Url;

use super::{AuthConfig, WebSocketConfig};
use crate::core::relay::RelayConfig;

/// Validate token settings
///
/// With authentication required, a source token must be configured and every
/// token length and lifetime must be at least one unit.
pub(super) fn validate_auth(auth: &AuthConfig) -> Result<(), Box<dyn std::error::Error>> {
    if !auth.required {
        return Ok(());
    }

    if auth.source_token.as_deref().is_none_or(str::is_empty) {
        return Err(
            "Authentication is required but no source token is configured (SOURCE_TOKEN)".into(),
        );
    }

    let checks = [
        ("ACCESS_TOKEN_BYTES", auth.access_token_bytes as u64),
        (
            "ACCESS_TOKEN_REFRESH_INTERVAL_SEC",
            auth.access_token_refresh_interval_sec,
        ),
        (
            "ACCESS_TOKEN_VALID_PERIOD_SEC",
            auth.access_token_valid_period_sec,
        ),
        ("SESSION_TOKEN_BYTES", auth.session_token_bytes as u64),
        ("SESSION_LENGTH_SEC", auth.session_length_sec),
    ];
    for (name, value) in checks {
        if value < 1 {
            return Err(format!("{name} must be at least 1 when authentication is required").into());
        }
    }

    Ok(())
}

/// Validate the upstream backend settings
pub(super) fn validate_whisper(whisper: &RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    if whisper.endpoint.is_empty() {
        return Err("Whisper service endpoint is not configured (WHISPER_SERVICE_ENDPOINT)".into());
    }

    let url = Url::parse(&whisper.endpoint)
        .map_err(|e| format!("Invalid whisper endpoint '{}': {e}", whisper.endpoint))?;
    if url.scheme() != "ws" && url.scheme() != "wss" {
        return Err(format!(
            "Whisper endpoint must use ws:// or wss://, got '{}'",
            url.scheme()
        )
        .into());
    }

    if whisper.api_key.is_empty() {
        return Err("Whisper service API key is not configured (WHISPER_SERVICE_API_KEY)".into());
    }

    let reconnection = &whisper.reconnection;
    if reconnection.initial_delay_ms == 0 {
        return Err("Reconnect initial delay must be at least 1ms".into());
    }
    if reconnection.initial_delay_ms > reconnection.max_delay_ms {
        return Err(format!(
            "Reconnect initial delay ({}ms) exceeds maximum delay ({}ms)",
            reconnection.initial_delay_ms, reconnection.max_delay_ms
        )
        .into());
    }

    Ok(())
}

pub(super) fn validate_websocket(
    websocket: &WebSocketConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    if websocket.auth_timeout_ms == 0 {
        return Err("WebSocket auth timeout must be at least 1ms".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay_config() -> RelayConfig {
        RelayConfig {
            endpoint: "ws://localhost:9000".to_string(),
            api_key: "key".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_auth_not_required_skips_checks() {
        let auth = AuthConfig {
            required: false,
            source_token: None,
            session_length_sec: 0,
            ..Default::default()
        };
        assert!(validate_auth(&auth).is_ok());
    }

    #[test]
    fn test_validate_auth_requires_source_token() {
        let auth = AuthConfig {
            required: true,
            source_token: Some(String::new()),
            ..Default::default()
        };
        let err = validate_auth(&auth).unwrap_err();
        assert!(err.to_string().contains("SOURCE_TOKEN"));
    }

    #[test]
    fn test_validate_auth_rejects_zero_lengths() {
        let auth = AuthConfig {
            required: true,
            source_token: Some("secret".to_string()),
            session_token_bytes: 0,
            ..Default::default()
        };
        let err = validate_auth(&auth).unwrap_err();
        assert!(err.to_string().contains("SESSION_TOKEN_BYTES"));

        let auth = AuthConfig {
            required: true,
            source_token: Some("secret".to_string()),
            access_token_valid_period_sec: 0,
            ..Default::default()
        };
        assert!(validate_auth(&auth).is_err());
    }

    #[test]
    fn test_validate_whisper_endpoint() {
        assert!(validate_whisper(&relay_config()).is_ok());

        let mut config = relay_config();
        config.endpoint = "http://localhost:9000".to_string();
        assert!(validate_whisper(&config).is_err());

        config.endpoint = "not a url".to_string();
        assert!(validate_whisper(&config).is_err());

        config.endpoint = String::new();
        assert!(validate_whisper(&config).is_err());
    }

    #[test]
    fn test_validate_whisper_requires_api_key() {
        let mut config = relay_config();
        config.api_key = String::new();
        assert!(validate_whisper(&config).is_err());
    }

    #[test]
    fn test_validate_whisper_reconnect_bounds() {
        let mut config = relay_config();
        config.reconnection.initial_delay_ms = 5000;
        config.reconnection.max_delay_ms = 1000;
        assert!(validate_whisper(&config).is_err());

        config.reconnection.initial_delay_ms = 0;
        assert!(validate_whisper(&config).is_err());
    }

    #[test]
    fn test_validate_websocket_timeout() {
        let websocket = WebSocketConfig {
            auth_timeout_ms: 0,
            ..Default::default()
        };
        assert!(validate_websocket(&websocket).is_err());
        assert!(validate_websocket(&WebSocketConfig::default()).is_ok());
    }
}
