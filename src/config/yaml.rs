use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in the
/// YAML file override the environment.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8080
///   address: "captions.example.com:443"
///   tls:
///     enabled: true
///     cert_path: "/etc/relay/cert.pem"
///     key_path: "/etc/relay/key.pem"
///
/// auth:
///   required: true
///   source_token: "source-secret"
///   access_token_bytes: 32
///   access_token_refresh_interval_sec: 300
///   access_token_valid_period_sec: 600
///   session_token_bytes: 32
///   session_length_sec: 3600
///
/// whisper:
///   endpoint: "ws://whisper.internal:9000"
///   api_key: "backend-key"
///   reconnect:
///     enabled: false
///     initial_delay_ms: 1000
///     max_delay_ms: 30000
///
/// websocket:
///   auth_mode: "in_band"
///   auth_timeout_ms: 5000
///
/// security:
///   cors_allowed_origins: "https://captions.example.com"
///   rate_limit_requests_per_second: 60
///   rate_limit_burst_size: 10
///   max_websocket_connections: 500
///   max_connections_per_ip: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub auth: Option<AuthYaml>,
    pub whisper: Option<WhisperYaml>,
    pub websocket: Option<WebSocketYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Address advertised to clients in `/accessToken` responses
    pub address: Option<String>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Authentication configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthYaml {
    pub required: Option<bool>,
    pub source_token: Option<String>,
    pub access_token_bytes: Option<usize>,
    pub access_token_refresh_interval_sec: Option<u64>,
    pub access_token_valid_period_sec: Option<u64>,
    pub session_token_bytes: Option<usize>,
    pub session_length_sec: Option<u64>,
}

/// Upstream transcription backend from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WhisperYaml {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub reconnect: Option<ReconnectYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ReconnectYaml {
    pub enabled: Option<bool>,
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WebSocketYaml {
    pub auth_mode: Option<String>,
    pub auth_timeout_ms: Option<u64>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
