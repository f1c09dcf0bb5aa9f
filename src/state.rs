//! Application state management
//!
//! Central state container: the registry of per-user monitor sessions,
//! the shared threshold table, the history store and the device
//! configuration bus.

use actix::{Actor, Addr};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::MonitorSettings;
use crate::device::ConfigBus;
use crate::profiles::ThresholdTable;
use crate::session::{MonitorSession, Stop};
use crate::store::HistoryStore;

/// Central application state
pub struct AppState {
    /// Running monitor session per user
    sessions: HashMap<String, Addr<MonitorSession>>,
    /// Sessions removed from the registry whose final save may not have
    /// landed yet
    stopping: HashMap<String, Addr<MonitorSession>>,
    table: Arc<ThresholdTable>,
    settings: MonitorSettings,
    store: Arc<dyn HistoryStore>,
    config_bus: ConfigBus,
    /// Application start time
    start_time: DateTime<Utc>,
    /// Connected WebSocket clients
    connected_clients: Vec<String>,
}

impl AppState {
    pub fn new(
        table: Arc<ThresholdTable>,
        settings: MonitorSettings,
        store: Arc<dyn HistoryStore>,
    ) -> Self {
        info!(profiles = table.profiles().len(), "Initializing application state");
        Self {
            sessions: HashMap::new(),
            stopping: HashMap::new(),
            table,
            settings,
            store,
            config_bus: ConfigBus::new(),
            start_time: Utc::now(),
            connected_clients: Vec::new(),
        }
    }

    /// Start monitoring `user_id`, restoring persisted history.
    ///
    /// Idempotent: a running session is returned as is. Returns the
    /// session address and whether it was newly started.
    pub fn start_session(&mut self, user_id: &str) -> (Addr<MonitorSession>, bool) {
        if let Some(addr) = self.sessions.get(user_id).filter(|a| a.connected()) {
            debug!(user_id = %user_id, "Monitor session already running");
            return (addr.clone(), false);
        }

        // A session still stopping is handed over so the new one restores
        // only after its final save
        let predecessor = self.stopping.remove(user_id).filter(|addr| addr.connected());

        let addr = MonitorSession::new(
            user_id,
            self.table.clone(),
            self.settings.clone(),
            self.store.clone(),
            predecessor,
        )
        .start();
        self.sessions.insert(user_id.to_string(), addr.clone());
        (addr, true)
    }

    /// Take `user_id`'s session out of the registry for stopping. It stays
    /// tracked as stopping until [`AppState::finish_stop`].
    pub fn remove_session(&mut self, user_id: &str) -> Option<Addr<MonitorSession>> {
        let addr = self.sessions.remove(user_id)?;
        self.stopping.insert(user_id.to_string(), addr.clone());
        Some(addr)
    }

    /// Forget a stopped session, unless a restart already took it over.
    pub fn finish_stop(&mut self, user_id: &str, addr: &Addr<MonitorSession>) {
        if self.stopping.get(user_id) == Some(addr) {
            self.stopping.remove(user_id);
        }
    }

    /// Address of the running session for `user_id`
    pub fn session(&self, user_id: &str) -> Option<Addr<MonitorSession>> {
        self.sessions
            .get(user_id)
            .filter(|addr| addr.connected())
            .cloned()
    }

    /// Number of running sessions
    pub fn session_count(&self) -> usize {
        self.sessions.values().filter(|addr| addr.connected()).count()
    }

    /// Running sessions ordered by user id
    pub fn running_sessions(&self) -> Vec<(String, Addr<MonitorSession>)> {
        let mut running: Vec<_> = self
            .sessions
            .iter()
            .filter(|(_, addr)| addr.connected())
            .map(|(user_id, addr)| (user_id.clone(), addr.clone()))
            .collect();
        running.sort_by(|a, b| a.0.cmp(&b.0));
        running
    }

    /// Remove every session from the registry, used at shutdown. The
    /// caller stops them.
    pub fn drain_sessions(&mut self) -> Vec<(String, Addr<MonitorSession>)> {
        self.stopping.clear();
        self.sessions.drain().collect()
    }

    pub fn table(&self) -> &Arc<ThresholdTable> {
        &self.table
    }

    pub fn config_bus(&self) -> &ConfigBus {
        &self.config_bus
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        (Utc::now() - self.start_time).num_seconds().max(0) as u64
    }

    /// Register a new WebSocket client
    pub fn add_client(&mut self, client_id: String) {
        info!(client_id = %client_id, "WebSocket client connected");
        self.connected_clients.push(client_id);
    }

    /// Remove a WebSocket client
    pub fn remove_client(&mut self, client_id: &str) {
        info!(client_id = %client_id, "WebSocket client disconnected");
        self.connected_clients.retain(|id| id != client_id);
    }

    /// Get count of connected clients
    pub fn client_count(&self) -> usize {
        self.connected_clients.len()
    }
}

/// Stop monitoring `user_id` and wait until its history is persisted.
///
/// The registry lock is released before waiting. Returns false when no
/// session was running.
pub async fn stop_session(state: &RwLock<AppState>, user_id: &str) -> bool {
    let Some(addr) = state.write().await.remove_session(user_id) else {
        return false;
    };

    if let Err(e) = addr.send(Stop).await {
        warn!(user_id = %user_id, error = %e, "Monitor session already gone");
    }
    state.write().await.finish_stop(user_id, &addr);
    true
}
