//! Sensor abstraction.
//!
//! A [`SensorSource`] is one motion sensor the platform may or may not have.
//! Readings are pushed into a [`SensorListener`] on the platform's callback
//! thread, serially, while the source is registered.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capability tiers in fallback order: best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SensorTier {
    /// Hardware cumulative step counter (counts since boot).
    Counter,
    /// Hardware step detector emitting one pulse per step.
    Detector,
    /// Raw 3-axis accelerometer; steps are derived in software.
    Accelerometer,
}

impl SensorTier {
    pub const FALLBACK_ORDER: [SensorTier; 3] = [
        SensorTier::Counter,
        SensorTier::Detector,
        SensorTier::Accelerometer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorTier::Counter => "counter",
            SensorTier::Detector => "detector",
            SensorTier::Accelerometer => "accelerometer",
        }
    }
}

/// The tier currently feeding the pipeline, or `Unavailable` when none registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActiveTier {
    Counter,
    Detector,
    Accelerometer,
    #[default]
    Unavailable,
}

impl ActiveTier {
    pub fn tier(&self) -> Option<SensorTier> {
        match self {
            ActiveTier::Counter => Some(SensorTier::Counter),
            ActiveTier::Detector => Some(SensorTier::Detector),
            ActiveTier::Accelerometer => Some(SensorTier::Accelerometer),
            ActiveTier::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, ActiveTier::Unavailable)
    }
}

impl From<SensorTier> for ActiveTier {
    fn from(tier: SensorTier) -> Self {
        match tier {
            SensorTier::Counter => ActiveTier::Counter,
            SensorTier::Detector => ActiveTier::Detector,
            SensorTier::Accelerometer => ActiveTier::Accelerometer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorValue {
    /// Steps since the sensor's own epoch (usually boot).
    Cumulative(u64),
    /// Steps detected since the previous pulse, normally 1.
    Pulse(u32),
    Acceleration { x: f64, y: f64, z: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub timestamp: DateTime<Utc>,
    pub value: SensorValue,
}

impl SensorReading {
    pub fn cumulative(timestamp: DateTime<Utc>, steps: u64) -> Self {
        Self {
            timestamp,
            value: SensorValue::Cumulative(steps),
        }
    }

    pub fn pulse(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            value: SensorValue::Pulse(1),
        }
    }

    pub fn acceleration(timestamp: DateTime<Utc>, x: f64, y: f64, z: f64) -> Self {
        Self {
            timestamp,
            value: SensorValue::Acceleration { x, y, z },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SensorAccuracy {
    Unreliable,
    Low,
    Medium,
    High,
}

/// Registration parameters handed to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingParams {
    pub sampling_delay: Duration,
    /// Hardware FIFO batching window; zero means deliver in real time.
    pub max_report_latency: Duration,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("{0} sensor is not present on this device")]
    NotPresent(&'static str),
    #[error("platform rejected {tier} registration: {reason}")]
    Rejected { tier: &'static str, reason: String },
}

pub trait SensorListener: Send + Sync {
    fn on_reading(&self, reading: SensorReading);

    fn on_accuracy_changed(&self, _tier: SensorTier, _accuracy: SensorAccuracy) {}

    /// The platform dropped this registration (the source is no longer registered).
    fn on_registration_lost(&self, _tier: SensorTier) {}
}

pub trait SensorSource: Send + Sync {
    fn tier(&self) -> SensorTier;

    fn is_present(&self) -> bool;

    /// Whether the hardware can buffer events while the application processor sleeps.
    fn supports_batching(&self) -> bool;

    /// Synchronous; fails immediately when the platform refuses.
    fn register(
        &self,
        params: SamplingParams,
        listener: Arc<dyn SensorListener>,
    ) -> Result<(), RegistrationError>;

    /// No-op when not registered.
    fn unregister(&self);
}
