use std::path::PathBuf;

use super::yaml::YamlConfig;
use super::{ServerConfig, TlsConfig, WsAuthMode, env};

/// Merge environment configuration with optional YAML overrides
///
/// Environment variables (and defaults) form the base; any value present in
/// the YAML file replaces it.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = env::load_from_env()?;

    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if let Some(address) = server.address {
            config.server_address = address;
        }
        if let Some(tls) = server.tls {
            match tls.enabled {
                Some(false) => config.tls = None,
                _ => {
                    if let (Some(cert), Some(key)) = (tls.cert_path, tls.key_path) {
                        config.tls = Some(TlsConfig {
                            cert_path: PathBuf::from(cert),
                            key_path: PathBuf::from(key),
                        });
                    } else if tls.enabled == Some(true) {
                        return Err(
                            "server.tls.enabled requires both cert_path and key_path".into()
                        );
                    }
                }
            }
        }
    }

    if let Some(auth) = yaml.auth {
        let target = &mut config.auth;
        if let Some(required) = auth.required {
            target.required = required;
        }
        if let Some(token) = auth.source_token {
            target.source_token = Some(token);
        }
        if let Some(bytes) = auth.access_token_bytes {
            target.access_token_bytes = bytes;
        }
        if let Some(secs) = auth.access_token_refresh_interval_sec {
            target.access_token_refresh_interval_sec = secs;
        }
        if let Some(secs) = auth.access_token_valid_period_sec {
            target.access_token_valid_period_sec = secs;
        }
        if let Some(bytes) = auth.session_token_bytes {
            target.session_token_bytes = bytes;
        }
        if let Some(secs) = auth.session_length_sec {
            target.session_length_sec = secs;
        }
    }

    if let Some(whisper) = yaml.whisper {
        if let Some(endpoint) = whisper.endpoint {
            config.whisper.endpoint = endpoint;
        }
        if let Some(api_key) = whisper.api_key {
            config.whisper.api_key = api_key;
        }
        if let Some(reconnect) = whisper.reconnect {
            let target = &mut config.whisper.reconnection;
            if let Some(enabled) = reconnect.enabled {
                target.enabled = enabled;
            }
            if let Some(attempts) = reconnect.max_attempts {
                target.max_attempts = attempts;
            }
            if let Some(delay) = reconnect.initial_delay_ms {
                target.initial_delay_ms = delay;
            }
            if let Some(delay) = reconnect.max_delay_ms {
                target.max_delay_ms = delay;
            }
        }
    }

    if let Some(websocket) = yaml.websocket {
        if let Some(mode) = websocket.auth_mode {
            config.websocket.auth_mode = mode.parse::<WsAuthMode>()?;
        }
        if let Some(timeout) = websocket.auth_timeout_ms {
            config.websocket.auth_timeout_ms = timeout;
        }
    }

    if let Some(security) = yaml.security {
        if let Some(origins) = security.cors_allowed_origins {
            config.cors_allowed_origins = Some(origins);
        }
        if let Some(rps) = security.rate_limit_requests_per_second {
            config.rate_limit_requests_per_second = rps;
        }
        if let Some(burst) = security.rate_limit_burst_size {
            config.rate_limit_burst_size = burst;
        }
        if let Some(max) = security.max_websocket_connections {
            config.max_websocket_connections = Some(max);
        }
        if let Some(per_ip) = security.max_connections_per_ip {
            config.max_connections_per_ip = per_ip;
        }
    }

    Ok(config)
}
