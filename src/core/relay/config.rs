//! Upstream connection settings.

use std::fmt;
use std::time::Duration;

/// Reconnection policy applied when the upstream socket closes unexpectedly.
///
/// Disabled by default: the gateway drives the connection from the number of
/// live audio sources instead. When enabled, the connection task owns every
/// retry and stops as soon as the engine disconnects or replaces it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionConfig {
    pub enabled: bool,

    /// Maximum number of consecutive attempts, 0 for unlimited.
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds).
    pub initial_delay_ms: u64,

    /// Ceiling for the delay between retries (milliseconds).
    pub max_delay_ms: u64,

    pub backoff_multiplier: f32,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 0,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectionConfig {
    /// Retry forever with the default backoff.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (1-based): the initial delay doubled
    /// for every earlier failure, capped at `max_delay_ms`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay_ms as f64;
        let multiplier = self.backoff_multiplier as f64;

        let delay = base_delay * multiplier.powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32);
        let delay = delay.min(self.max_delay_ms as f64);

        Duration::from_millis(delay as u64)
    }

    /// Check if more reconnection attempts are allowed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && (self.max_attempts == 0 || attempt < self.max_attempts)
    }
}

/// Upstream transcription backend configuration
#[derive(Clone, Default)]
pub struct RelayConfig {
    /// WebSocket URL of the backend (`ws://` or `wss://`)
    pub endpoint: String,
    /// Sent as the first frame of every connection
    pub api_key: String,
    pub reconnection: ReconnectionConfig,
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("reconnection", &self.reconnection)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnection_config_default() {
        let config = ReconnectionConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.max_attempts, 0);
        assert_eq!(config.initial_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 30000);
        assert_eq!(config.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_reconnection_should_retry() {
        let disabled = ReconnectionConfig::default();
        assert!(!disabled.should_retry(0));

        let unlimited = ReconnectionConfig::enabled();
        assert!(unlimited.should_retry(0));
        assert!(unlimited.should_retry(u32::MAX));

        let bounded = ReconnectionConfig {
            max_attempts: 3,
            ..ReconnectionConfig::enabled()
        };
        assert!(bounded.should_retry(2));
        assert!(!bounded.should_retry(3));
    }

    #[test]
    fn test_backoff_doubles_up_to_ceiling() {
        let config = ReconnectionConfig::enabled();

        let delays: Vec<u64> = (1..=7)
            .map(|attempt| config.calculate_delay(attempt).as_millis() as u64)
            .collect();

        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn test_backoff_large_attempt_stays_capped() {
        let config = ReconnectionConfig::enabled();
        assert_eq!(config.calculate_delay(u32::MAX), Duration::from_millis(30000));
    }

    #[test]
    fn test_relay_config_debug_redacts_key() {
        let config = RelayConfig {
            endpoint: "ws://localhost:9000".to_string(),
            api_key: "super-secret".to_string(),
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(rendered.contains("ws://localhost:9000"));
        assert!(!rendered.contains("super-secret"));
    }
}
