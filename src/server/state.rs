use std::path::PathBuf;
use std::sync::Arc;

use crate::common::config::{AppConfig, ServerConfig};
use crate::storage::Mounts;
use crate::transfer::{CounterDispenser, IdDispenser, TransferManager};

// One configured upload endpoint. Cloned per request by axum,
// everything heavy sits behind an Arc.
#[derive(Clone, Debug)]
pub struct ServerState {
    pub name: String,
    pub config: Arc<ServerConfig>,
    pub manager: Arc<TransferManager>,
    pub dispenser: Arc<dyn IdDispenser>,
    pub spool_dir: PathBuf,
}

impl ServerState {
    pub fn new(
        name: impl Into<String>,
        config: ServerConfig,
        mounts: Arc<Mounts>,
        dispenser: Arc<dyn IdDispenser>,
        spool_dir: impl Into<PathBuf>,
    ) -> Self {
        let manager = TransferManager::new(mounts, config.filesystem_ident.clone());
        Self {
            name: name.into(),
            config: Arc::new(config),
            manager: Arc::new(manager),
            dispenser,
            spool_dir: spool_dir.into(),
        }
    }

    //-- Accessors
    pub fn transfer_dir(&self) -> &str {
        &self.config.transfer_dir
    }
}

/// Build one state per configured server, sharing mounts and the id dispenser.
pub fn build_states(config: &AppConfig, mounts: Arc<Mounts>) -> Vec<ServerState> {
    let dispenser: Arc<dyn IdDispenser> = Arc::new(CounterDispenser::new());

    config
        .servers
        .iter()
        .map(|(name, server)| {
            ServerState::new(
                name.clone(),
                server.clone(),
                mounts.clone(),
                dispenser.clone(),
                config.spool_dir.clone(),
            )
        })
        .collect()
}
