use std::sync::Arc;

use townhall_events::Bus;

use crate::config::ServerConfig;
use crate::connection::ConnectionRegistry;
use crate::mutations::MutationSite;
use crate::security::SessionVerifier;

#[derive(Clone)]
pub(crate) struct AppState {
    bus: Bus,
    sessions: Arc<dyn SessionVerifier>,
    connections: Arc<ConnectionRegistry>,
    config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig, sessions: Arc<dyn SessionVerifier>) -> Self {
        Self {
            bus: Bus::new(config.bus_capacity),
            sessions,
            connections: Arc::new(ConnectionRegistry::default()),
            config: Arc::new(config),
        }
    }

    pub fn bus(&self) -> Bus {
        self.bus.clone()
    }

    pub fn sessions(&self) -> &dyn SessionVerifier {
        self.sessions.as_ref()
    }

    pub fn connections(&self) -> Arc<ConnectionRegistry> {
        self.connections.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn mutations(&self) -> MutationSite {
        MutationSite::new(self.bus())
    }
}
