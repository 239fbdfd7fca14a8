use thiserror::Error;

use crate::models::StepObservation;

/// Failures surfaced by the step-tracking core.
///
/// Everything except [`TrackerError::PermissionDenied`] is recoverable inside
/// the subsystem; callers mostly see these through diagnostics.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("no step sensor tier could be registered")]
    SensorUnavailable,

    #[error("persistence failure: {0:#}")]
    Persistence(#[source] anyhow::Error),

    #[error("missing permissions: {}", missing.join(", "))]
    PermissionDenied { missing: Vec<&'static str> },

    #[error("step service unhealthy: {0}")]
    ServiceUnhealthy(String),

    #[error("step service is not running")]
    NotRunning,

    #[error("settings error: {0:#}")]
    Settings(#[source] anyhow::Error),
}

impl TrackerError {
    pub fn persistence(err: anyhow::Error) -> Self {
        TrackerError::Persistence(err)
    }
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// A stop whose final flush failed. The observations it could not write are
/// handed back so the next service instance can retry them.
#[derive(Debug, Error)]
#[error("{} step observation(s) left unsaved: {error}", .pending.len())]
pub struct UnsavedSteps {
    #[source]
    pub error: TrackerError,
    pub pending: Vec<StepObservation>,
}
