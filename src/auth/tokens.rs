//! Access and session token storage.
//!
//! Access tokens are minted on a fixed cadence and handed to clients through
//! `POST /accessToken`; several generations stay valid at once so a client that
//! fetched one just before rotation is not cut off. Session tokens are minted on
//! demand in exchange for a valid access token. Both kinds are opaque random
//! strings that expire strictly after their recorded instant (`expiry > now`).

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::RwLock;
use rand::RngCore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::clock::{Clock, FAR_FUTURE_MS};
use crate::config::AuthConfig;

/// Lifetimes and sizes used when minting tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSettings {
    pub required: bool,
    pub access_token_bytes: usize,
    pub access_token_refresh_interval: Duration,
    pub access_token_valid_period: Duration,
    pub session_token_bytes: usize,
    pub session_length: Duration,
}

impl From<&AuthConfig> for TokenSettings {
    fn from(auth: &AuthConfig) -> Self {
        Self {
            required: auth.required,
            access_token_bytes: auth.access_token_bytes,
            access_token_refresh_interval: Duration::from_secs(
                auth.access_token_refresh_interval_sec,
            ),
            access_token_valid_period: Duration::from_secs(auth.access_token_valid_period_sec),
            session_token_bytes: auth.session_token_bytes,
            session_length: Duration::from_secs(auth.session_length_sec),
        }
    }
}

/// A freshly minted token and the instant (Unix ms) after which it stops working
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at_ms: i64,
}

struct TokenMaps {
    access: HashMap<String, i64>,
    session: HashMap<String, i64>,
    current: IssuedToken,
}

pub struct TokenStore {
    settings: TokenSettings,
    clock: Arc<dyn Clock>,
    maps: RwLock<TokenMaps>,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let maps = self.maps.read();
        f.debug_struct("TokenStore")
            .field("settings", &self.settings)
            .field("access_tokens", &maps.access.len())
            .field("session_tokens", &maps.session.len())
            .finish()
    }
}

impl TokenStore {
    /// Create a store and mint the first access token immediately
    pub fn new(settings: TokenSettings, clock: Arc<dyn Clock>) -> Self {
        let store = Self {
            settings,
            clock,
            maps: RwLock::new(TokenMaps {
                access: HashMap::new(),
                session: HashMap::new(),
                current: IssuedToken {
                    token: String::new(),
                    expires_at_ms: 0,
                },
            }),
        };
        store.issue_access_token();
        store
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    /// Mint a new access token, make it current, and sweep expired entries
    pub fn issue_access_token(&self) -> IssuedToken {
        let now = self.clock.now_ms();
        let expires_at_ms = self.expiry_after(now, self.settings.access_token_valid_period);

        let mut maps = self.maps.write();
        let token = mint_unique(&maps.access, self.settings.access_token_bytes);
        maps.access.insert(token.clone(), expires_at_ms);

        let issued = IssuedToken {
            token,
            expires_at_ms,
        };
        maps.current = issued.clone();

        let before = maps.access.len() + maps.session.len();
        maps.access.retain(|_, expiry| *expiry > now);
        maps.session.retain(|_, expiry| *expiry > now);
        let swept = before - (maps.access.len() + maps.session.len());
        if swept > 0 {
            debug!(swept, "Removed expired tokens");
        }

        issued
    }

    /// The most recently minted access token
    pub fn current_access_token(&self) -> IssuedToken {
        self.maps.read().current.clone()
    }

    pub fn access_token_valid(&self, token: Option<&str>) -> bool {
        if !self.settings.required {
            return true;
        }
        self.lookup(token, |maps| &maps.access)
            .is_some_and(|expiry| expiry > self.clock.now_ms())
    }

    /// Mint a session token valid for the configured session length
    pub fn create_session_token(&self) -> IssuedToken {
        let now = self.clock.now_ms();
        let expires_at_ms = self.expiry_after(now, self.settings.session_length);

        let mut maps = self.maps.write();
        let token = mint_unique(&maps.session, self.settings.session_token_bytes);
        maps.session.insert(token.clone(), expires_at_ms);

        IssuedToken {
            token,
            expires_at_ms,
        }
    }

    pub fn session_token_valid(&self, token: Option<&str>) -> bool {
        if !self.settings.required {
            return true;
        }
        self.lookup(token, |maps| &maps.session)
            .is_some_and(|expiry| expiry > self.clock.now_ms())
    }

    /// Recorded expiry of a session token, if the store knows it
    pub fn session_token_expiry(&self, token: Option<&str>) -> Option<i64> {
        if !self.settings.required {
            return Some(FAR_FUTURE_MS);
        }
        self.lookup(token, |maps| &maps.session)
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Start the periodic access-token rotation.
    ///
    /// Returns `None` when authentication is disabled. The task stops when
    /// `shutdown` is cancelled or the store is dropped.
    pub fn spawn_rotation(self: &Arc<Self>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.settings.required {
            return None;
        }

        let period = self.settings.access_token_refresh_interval;
        let store: Weak<Self> = Arc::downgrade(self);
        info!(period_secs = period.as_secs(), "Starting access token rotation");

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let Some(store) = store.upgrade() else { break };
                        let issued = store.issue_access_token();
                        debug!(expires_at_ms = issued.expires_at_ms, "Rotated access token");
                    }
                }
            }

            debug!("Access token rotation stopped");
        }))
    }

    fn lookup(
        &self,
        token: Option<&str>,
        map: impl Fn(&TokenMaps) -> &HashMap<String, i64>,
    ) -> Option<i64> {
        let token = token?;
        map(&self.maps.read()).get(token).copied()
    }

    fn expiry_after(&self, now: i64, lifetime: Duration) -> i64 {
        if !self.settings.required {
            return FAR_FUTURE_MS;
        }
        now.saturating_add(i64::try_from(lifetime.as_millis()).unwrap_or(i64::MAX))
    }
}

fn mint_unique(existing: &HashMap<String, i64>, bytes: usize) -> String {
    loop {
        let candidate = random_token(bytes);
        if !existing.contains_key(&candidate) {
            return candidate;
        }
    }
}

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes.max(1)];
    rand::rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}
