//! Configuration module for the relay server
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//! - `utils`: Utility functions for configuration parsing
//!
//! # Example
//! ```rust,no_run
//! use whisper_relay::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use crate::core::relay::{RelayConfig, ReconnectionConfig};

mod env;
mod merge;
mod utils;
mod validation;
mod yaml;

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Token and credential settings.
///
/// When `required` is false every credential check passes and no rotation
/// timer is started; tokens are still minted so the HTTP routes keep working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub required: bool,
    /// Static secret presented by trusted audio sources
    pub source_token: Option<String>,
    pub access_token_bytes: usize,
    pub access_token_refresh_interval_sec: u64,
    pub access_token_valid_period_sec: u64,
    pub session_token_bytes: usize,
    pub session_length_sec: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            required: false,
            source_token: None,
            access_token_bytes: 32,
            access_token_refresh_interval_sec: 300,
            access_token_valid_period_sec: 600,
            session_token_bytes: 32,
            session_length_sec: 3600,
        }
    }
}

/// Where a WebSocket endpoint looks for credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WsAuthMode {
    /// Credentials arrive as the first JSON message after the upgrade
    #[default]
    InBand,
    /// Credentials are read from the upgrade request's query string
    Request,
}

impl std::str::FromStr for WsAuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "in_band" | "in-band" | "inband" => Ok(Self::InBand),
            "request" | "query" => Ok(Self::Request),
            other => Err(format!(
                "Invalid WebSocket auth mode '{other}'. Expected 'in_band' or 'request'"
            )),
        }
    }
}

/// WebSocket gateway settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConfig {
    pub auth_mode: WsAuthMode,
    /// How long a freshly upgraded socket may take to authorize in-band
    pub auth_timeout_ms: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            auth_mode: WsAuthMode::InBand,
            auth_timeout_ms: 5000,
        }
    }
}

/// Server configuration
///
/// Contains all configuration needed to run the relay, including:
/// - Server settings (host, port, TLS, advertised address)
/// - Token and session settings
/// - Upstream transcription backend settings
/// - Security settings (CORS, rate limiting, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    /// Address advertised to clients alongside freshly issued access tokens
    pub server_address: String,

    pub auth: AuthConfig,
    pub whisper: RelayConfig,
    pub websocket: WebSocketConfig,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

/// Implement Drop to zeroize all secret fields when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut token) = self.auth.source_token {
            token.zeroize();
        }
        self.whisper.api_key.zeroize();
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only
    ///
    /// Reads every setting from the process environment (the .env file is
    /// loaded in main.rs), falling back to defaults, then validates the result.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    /// Run every validation rule against the merged configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_auth(&self.auth)?;
        validation::validate_whisper(&self.whisper)?;
        validation::validate_websocket(&self.websocket)?;
        Ok(())
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Reconnection policy for the upstream connection
    pub fn reconnection(&self) -> &ReconnectionConfig {
        &self.whisper.reconnection
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            tls: None,
            server_address: "127.0.0.1:8080".to_string(),
            auth: AuthConfig::default(),
            whisper: RelayConfig::default(),
            websocket: WebSocketConfig::default(),
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
            max_websocket_connections: None,
            max_connections_per_ip: 100,
        }
    }
}
