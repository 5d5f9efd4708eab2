//! Activation and deactivation of the query cache inside a host
//!
//! Loading captures the static snapshot, registers the console variables,
//! and hooks the receive path. When the host's networking is unavailable the
//! extension still loads, but without interception.

use crate::cache::{shared_state, ReplyCache, SharedState};
use crate::config::{
    register_query_cache_vars, unregister_query_cache_vars, ConVarRegistry, ConfigError,
};
use crate::hook::{InterceptStats, ReceiveShim, SuppressMode};
use crate::host::{HostError, HostInfo, ReceiveHookSlot};
use crate::snapshot::StatusSnapshot;
use log::{info, warn};
use std::sync::Arc;

pub struct QueryCache {
    state: SharedState,
    shim: ReceiveShim,
}

impl QueryCache {
    /// Activates the extension
    ///
    /// `network` is the host's receive hook slot, or the reason it could not
    /// be obtained.
    pub fn load(
        host: Arc<dyn HostInfo>,
        network: Result<Arc<ReceiveHookSlot>, HostError>,
        registry: &mut ConVarRegistry,
    ) -> Result<Self, ConfigError> {
        Self::load_with(host, network, registry, ReplyCache::default(), SuppressMode::default())
    }

    pub fn load_with(
        host: Arc<dyn HostInfo>,
        network: Result<Arc<ReceiveHookSlot>, HostError>,
        registry: &mut ConVarRegistry,
        cache: ReplyCache,
        mode: SuppressMode,
    ) -> Result<Self, ConfigError> {
        let snapshot = StatusSnapshot::initialize_static(host.as_ref());
        info!(
            "Query cache loading for '{}' (app {}, {} slots)",
            snapshot.game_directory(),
            snapshot.app_id(),
            snapshot.real_max_clients()
        );

        let state = shared_state(snapshot, cache);
        register_query_cache_vars(registry, &state)?;

        let mut shim = ReceiveShim::with_mode(Arc::clone(&state), host, mode);
        match network {
            Ok(slot) => {
                shim.install(&slot);
            }
            Err(e) => warn!("{}; info queries will not be cached", e),
        }

        Ok(Self { state, shim })
    }

    /// Deactivates the extension, restoring the host's receive path
    pub fn unload(mut self, registry: &mut ConVarRegistry) {
        self.shim.uninstall();
        unregister_query_cache_vars(registry);
        info!("Query cache unloaded");
    }

    pub fn is_intercepting(&self) -> bool {
        self.shim.is_installed()
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn stats(&self) -> Arc<InterceptStats> {
        self.shim.stats()
    }
}
