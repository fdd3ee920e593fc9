use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::{AuthenticationPolicy, Clock, SystemClock, TokenSettings, TokenStore};
use crate::config::ServerConfig;
use crate::core::relay::{RelayConnectionState, RelayEngine};

/// Why a WebSocket upgrade was refused before reaching its handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionLimitError {
    #[error("global WebSocket connection limit reached")]
    GlobalLimitReached,
    #[error("per-IP WebSocket connection limit reached")]
    PerIpLimitReached,
}

/// Tracks which connections are currently acting as audio sources.
///
/// The upstream connection follows this set: it is opened when the first
/// source registers and closed when the last one leaves. A source arriving
/// while the upstream is down also reopens it. The lock is held across
/// `connect`/`disconnect`, so transitions never interleave.
pub struct SourceRegistry {
    relay: Arc<RelayEngine>,
    active: Mutex<HashSet<Uuid>>,
}

impl SourceRegistry {
    pub fn new(relay: Arc<RelayEngine>) -> Self {
        Self {
            relay,
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Add a source; returns the number of active sources afterwards
    pub async fn register(&self, connection_id: Uuid) -> usize {
        let mut active = self.active.lock().await;
        let first = active.is_empty();
        active.insert(connection_id);

        if first {
            info!(%connection_id, "First source registered, connecting upstream");
            self.relay.connect().await;
        } else if self.relay.state() == RelayConnectionState::Disconnected {
            info!(%connection_id, "Source registered while upstream is down, reconnecting");
            self.relay.connect().await;
        }
        active.len()
    }

    /// Remove a source; returns the number of active sources afterwards
    pub async fn unregister(&self, connection_id: Uuid) -> usize {
        let mut active = self.active.lock().await;
        if active.remove(&connection_id) && active.is_empty() {
            info!(%connection_id, "Last source left, disconnecting upstream");
            self.relay.disconnect().await;
        }
        active.len()
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }
}

/// Shared state handed to every route
pub struct AppState {
    pub config: ServerConfig,
    pub tokens: Arc<TokenStore>,
    pub policy: AuthenticationPolicy,
    pub relay: Arc<RelayEngine>,
    pub sources: SourceRegistry,

    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, u32>,

    background: CancellationToken,
    rotation: Option<JoinHandle<()>>,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    /// Build state on top of an explicit time source
    pub async fn with_clock(config: ServerConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        let tokens = Arc::new(TokenStore::new(TokenSettings::from(&config.auth), clock));
        let policy = AuthenticationPolicy::new(
            config.auth.required,
            config.auth.source_token.clone(),
            tokens.clone(),
        );
        let relay = Arc::new(RelayEngine::new(config.whisper.clone()));

        let background = CancellationToken::new();
        let rotation = tokens.spawn_rotation(background.clone());
        if rotation.is_none() {
            info!("Authentication disabled, every credential check passes");
        }

        Arc::new(Self {
            sources: SourceRegistry::new(relay.clone()),
            config,
            tokens,
            policy,
            relay,
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
            background,
            rotation,
        })
    }

    /// Reserve a WebSocket slot for `ip`, enforcing global and per-IP limits
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        match self.config.max_websocket_connections {
            Some(max) => {
                self.ws_connections
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                        (current < max).then_some(current + 1)
                    })
                    .map_err(|_| ConnectionLimitError::GlobalLimitReached)?;
            }
            None => {
                self.ws_connections.fetch_add(1, Ordering::SeqCst);
            }
        }

        let mut per_ip = self.ip_connections.entry(ip).or_insert(0);
        if *per_ip >= self.config.max_connections_per_ip {
            drop(per_ip);
            self.ws_connections.fetch_sub(1, Ordering::SeqCst);
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *per_ip += 1;
        Ok(())
    }

    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(1)
            });

        if let Some(mut count) = self.ip_connections.get_mut(&ip) {
            *count = count.saturating_sub(1);
        }
        self.ip_connections.remove_if(&ip, |_, count| *count == 0);
        debug!(%ip, "Released WebSocket connection slot");
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::SeqCst)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.get(ip).map(|count| *count).unwrap_or(0)
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.background.cancel();
        if let Some(rotation) = self.rotation.take() {
            rotation.abort();
        }
    }
}
