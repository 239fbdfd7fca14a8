use serde::Serialize;

use crate::{
    models::StepSnapshot,
    sensing::{ActiveTier, PowerState},
    tracking::BatchStats,
};

use super::state::{ServiceHealth, ServiceState};

/// Point-in-time view of the whole subsystem for support screens and logs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub state: ServiceState,
    pub running: bool,
    pub bound: bool,
    pub healthy: bool,
    pub has_permissions: bool,
    pub snapshot: StepSnapshot,
    pub active_tier: ActiveTier,
    pub power_state: PowerState,
    pub last_error: Option<String>,
    pub restart_failures: u32,
    pub escalated: bool,
    pub transitions: u64,
    pub restarts: u64,
    pub sensor_registrations: u64,
    /// Observations waiting for the next service instance after a failed stop.
    pub unsaved_observations: usize,
    pub batch: Option<BatchStats>,
    pub last_health: Option<ServiceHealth>,
}
