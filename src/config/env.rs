use std::path::PathBuf;

use super::utils::{env_var, parse_env, parse_env_bool};
use super::{ServerConfig, TlsConfig, WsAuthMode};

/// Build a configuration from defaults overlaid with environment variables
pub(super) fn load_from_env() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = ServerConfig::default();

    // Server
    if let Some(host) = env_var("HOST") {
        config.host = host;
    }
    if let Some(port) = parse_env::<u16>("PORT")? {
        config.port = port;
    }
    if let Some(address) = env_var("SERVER_ADDRESS") {
        config.server_address = address;
    }
    config.tls = match (env_var("TLS_CERT_PATH"), env_var("TLS_KEY_PATH")) {
        (Some(cert), Some(key)) => Some(TlsConfig {
            cert_path: PathBuf::from(cert),
            key_path: PathBuf::from(key),
        }),
        (None, None) => None,
        _ => return Err("TLS_CERT_PATH and TLS_KEY_PATH must be set together".into()),
    };

    // Auth
    let auth = &mut config.auth;
    if let Some(required) = parse_env_bool("AUTH_REQUIRED")? {
        auth.required = required;
    }
    auth.source_token = env_var("SOURCE_TOKEN");
    if let Some(bytes) = parse_env::<usize>("ACCESS_TOKEN_BYTES")? {
        auth.access_token_bytes = bytes;
    }
    if let Some(secs) = parse_env::<u64>("ACCESS_TOKEN_REFRESH_INTERVAL_SEC")? {
        auth.access_token_refresh_interval_sec = secs;
    }
    if let Some(secs) = parse_env::<u64>("ACCESS_TOKEN_VALID_PERIOD_SEC")? {
        auth.access_token_valid_period_sec = secs;
    }
    if let Some(bytes) = parse_env::<usize>("SESSION_TOKEN_BYTES")? {
        auth.session_token_bytes = bytes;
    }
    if let Some(secs) = parse_env::<u64>("SESSION_LENGTH_SEC")? {
        auth.session_length_sec = secs;
    }

    // Upstream
    let whisper = &mut config.whisper;
    if let Some(endpoint) = env_var("WHISPER_SERVICE_ENDPOINT") {
        whisper.endpoint = endpoint;
    }
    if let Some(api_key) = env_var("WHISPER_SERVICE_API_KEY") {
        whisper.api_key = api_key;
    }
    let reconnection = &mut whisper.reconnection;
    if let Some(enabled) = parse_env_bool("WHISPER_RECONNECT_ENABLED")? {
        reconnection.enabled = enabled;
    }
    if let Some(attempts) = parse_env::<u32>("WHISPER_RECONNECT_MAX_ATTEMPTS")? {
        reconnection.max_attempts = attempts;
    }
    if let Some(delay) = parse_env::<u64>("WHISPER_RECONNECT_INITIAL_DELAY_MS")? {
        reconnection.initial_delay_ms = delay;
    }
    if let Some(delay) = parse_env::<u64>("WHISPER_RECONNECT_MAX_DELAY_MS")? {
        reconnection.max_delay_ms = delay;
    }

    // WebSocket gateway
    if let Some(mode) = parse_env::<WsAuthMode>("WS_AUTH_MODE")? {
        config.websocket.auth_mode = mode;
    }
    if let Some(timeout) = parse_env::<u64>("WS_AUTH_TIMEOUT_MS")? {
        config.websocket.auth_timeout_ms = timeout;
    }

    // Security
    config.cors_allowed_origins = env_var("CORS_ALLOWED_ORIGINS");
    if let Some(rps) = parse_env::<u32>("RATE_LIMIT_REQUESTS_PER_SECOND")? {
        config.rate_limit_requests_per_second = rps;
    }
    if let Some(burst) = parse_env::<u32>("RATE_LIMIT_BURST_SIZE")? {
        config.rate_limit_burst_size = burst;
    }
    config.max_websocket_connections = parse_env::<usize>("MAX_WEBSOCKET_CONNECTIONS")?;
    if let Some(per_ip) = parse_env::<u32>("MAX_CONNECTIONS_PER_IP")? {
        config.max_connections_per_ip = per_ip;
    }

    Ok(config)
}
