use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ServiceState {
    #[default]
    Stopped,
    Starting,
    RunningUnbound,
    RunningBound,
    Unhealthy,
}

impl ServiceState {
    pub fn is_running(&self) -> bool {
        matches!(self, ServiceState::RunningUnbound | ServiceState::RunningBound)
    }
}

/// Result of the most recent health check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub running: bool,
    pub bound: bool,
    pub healthy: bool,
    pub last_error: Option<String>,
    pub checked_at: DateTime<Utc>,
}
