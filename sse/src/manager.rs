//! App-facing facade over the registry and the keepalive loop.

use crate::error::Result;
use crate::event::SseEvent;
use crate::keepalive::{
    Keepalive, KeepaliveMode, DEFAULT_KEEPALIVE_INTERVAL_SECS,
};
use crate::registry::{Registry, DEFAULT_DISCONNECTION_GRACE_MS};
use events::EventPublisher;
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Engine construction knobs, mapped straight from host configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Delay before a superseded or refused connection is force-closed.
    pub disconnection_grace_ms: u64,
    pub keepalive_interval_secs: u64,
    pub keepalive_mode: KeepaliveMode,
    /// Whether the host detected a reverse-proxy manager in front of the
    /// process (consulted by `KeepaliveMode::BehindProxy`).
    pub behind_proxy: bool,
    /// Reconnect interval advertised to newly admitted connections, if any.
    pub default_reconnect_interval_ms: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            disconnection_grace_ms: DEFAULT_DISCONNECTION_GRACE_MS,
            keepalive_interval_secs: DEFAULT_KEEPALIVE_INTERVAL_SECS,
            keepalive_mode: KeepaliveMode::Always,
            behind_proxy: false,
            default_reconnect_interval_ms: None,
        }
    }
}

/// The engine service object: owns the registry and the keepalive loop.
/// Constructed once by the host and shared (via `Arc`) with whatever
/// accepts inbound connections.
pub struct Manager {
    registry: Arc<Registry>,
    keepalive: Keepalive,
    settings: EngineSettings,
}

impl Manager {
    pub fn new(settings: EngineSettings, publisher: EventPublisher) -> Self {
        let registry = Arc::new(Registry::new(
            Duration::from_millis(settings.disconnection_grace_ms),
            settings.default_reconnect_interval_ms,
            publisher,
        ));
        let keepalive = Keepalive::new(
            registry.clone(),
            Duration::from_secs(settings.keepalive_interval_secs),
        );
        Self {
            registry,
            keepalive,
            settings,
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Starts the keepalive loop if the configured mode calls for it.
    pub fn start_keepalive(&self) -> bool {
        if !self
            .settings
            .keepalive_mode
            .should_run(self.settings.behind_proxy)
        {
            info!(
                "Keepalive loop disabled (mode: {}, behind_proxy: {})",
                self.settings.keepalive_mode, self.settings.behind_proxy
            );
            return false;
        }
        self.keepalive.start()
    }

    /// Stops the keepalive loop, waiting at most `deadline`.
    pub async fn stop_keepalive(&self, deadline: Duration) -> bool {
        self.keepalive.stop(deadline).await
    }

    /// Broadcasts an event to every connected connection; returns the
    /// attempted count.
    pub async fn broadcast(&self, event: &SseEvent) -> Result<usize> {
        self.registry
            .broadcast_event(event, &CancellationToken::new())
            .await
    }

    /// Sends an event to the current connection of a user, if any.
    pub async fn send_to_user(&self, user_id: &str, event: &SseEvent) -> bool {
        self.registry.send_to_user(user_id, event).await
    }

    /// Changes the reconnect interval policy and notifies all connected
    /// connections.
    pub async fn change_reconnect_interval(&self, interval_ms: u64) -> Result<usize> {
        self.registry
            .change_reconnect_interval(interval_ms, &CancellationToken::new())
            .await
    }

    /// Force-closes connections that ignored their close instruction.
    pub fn disconnect_marked(&self) {
        self.registry.disconnect_marked()
    }
}
