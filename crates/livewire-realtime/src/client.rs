//! Composition root: one transport, one registry, one supervisor.

use std::path::Path;
use std::sync::Arc;

use livewire_config::LivewireConfig;
use tracing::{info, warn};

use crate::presence::PresenceTracker;
use crate::registry::ChannelRegistry;
use crate::stream::EventStream;
use crate::supervisor::ReconnectionSupervisor;
use crate::transport::Transport;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A running realtime core.
///
/// Construct one per backend connection and pass it (or its parts) to
/// whatever needs it.
pub struct Realtime {
    registry: ChannelRegistry,
    supervisor: ReconnectionSupervisor,
}

impl Realtime {
    /// Connect `transport` and start supervising it.
    ///
    /// A failed initial connect is not an error: the supervisor keeps
    /// retrying and subscriptions made meanwhile settle once it succeeds.
    pub async fn start(transport: Arc<dyn Transport>, config: &LivewireConfig) -> Self {
        match transport.connect().await {
            Ok(()) => info!("realtime connected"),
            Err(e) => warn!(error = %e, "initial connect failed, supervisor will retry"),
        }
        let registry = ChannelRegistry::new(transport, config);
        let supervisor = ReconnectionSupervisor::spawn(&registry, &config.reconnect);
        Self {
            registry,
            supervisor,
        }
    }

    /// Load the TOML config at `path`, then [`start`](Self::start).
    pub async fn start_from_path(
        transport: Arc<dyn Transport>,
        path: &Path,
    ) -> livewire_common::Result<Self> {
        let config = livewire_config::load_from_path(path)?;
        Ok(Self::start(transport, &config).await)
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn stream(&self) -> &EventStream {
        self.registry.stream()
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        self.registry.presence()
    }

    pub fn supervisor(&self) -> &ReconnectionSupervisor {
        &self.supervisor
    }

    /// Stop reconnecting and close every channel.
    pub async fn shutdown(mut self) {
        self.supervisor.shutdown();
        self.registry.shutdown().await;
        info!("realtime shut down");
    }
}
