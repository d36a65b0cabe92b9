//! Application state.

use std::sync::Arc;

use fleetcron_jobs::{JobRegistry, Node};
use fleetcron_models::{MachineId, NodeRole, Roster};
use fleetcron_rpc::SessionSigner;

use crate::config::ServerConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub machine_id: MachineId,
    pub role: NodeRole,
    pub roster: Roster,
    pub registry: Arc<JobRegistry>,
    pub signer: SessionSigner,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        machine_id: MachineId,
        role: NodeRole,
        roster: Roster,
        registry: Arc<JobRegistry>,
        signer: SessionSigner,
    ) -> Self {
        Self {
            config,
            machine_id,
            role,
            roster,
            registry,
            signer,
        }
    }

    /// State for an assembled node.
    pub fn for_node(config: ServerConfig, node: &Node) -> Self {
        Self::new(
            config,
            node.context.machine_id.clone(),
            node.context.role,
            node.context.roster.clone(),
            node.registry.clone(),
            node.signer(),
        )
    }
}
