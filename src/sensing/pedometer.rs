//! Software step detection for devices without a hardware step sensor.
//!
//! A step is counted when the acceleration magnitude jumps by more than the
//! threshold between consecutive samples and the previous step is at least the
//! minimum interval old. The interval rejects double counts within one stride.

use std::time::Duration;

use crate::settings::PedometerSettings;

use super::source::SensorAccuracy;

#[derive(Debug, Clone, PartialEq)]
pub struct PedometerConfig {
    pub threshold: f64,
    pub min_step_interval: Duration,
    pub unreliable_threshold_factor: f64,
}

impl Default for PedometerConfig {
    fn default() -> Self {
        Self::from(&PedometerSettings::default())
    }
}

impl From<&PedometerSettings> for PedometerConfig {
    fn from(settings: &PedometerSettings) -> Self {
        Self {
            threshold: settings.threshold,
            min_step_interval: Duration::from_millis(settings.min_step_interval_ms),
            unreliable_threshold_factor: settings.unreliable_threshold_factor,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PedometerAlgorithm {
    config: PedometerConfig,
    threshold: f64,
    last_magnitude: Option<f64>,
    last_step_ms: Option<i64>,
    session_steps: u64,
}

impl PedometerAlgorithm {
    pub fn new(config: PedometerConfig) -> Self {
        Self {
            threshold: config.threshold,
            config,
            last_magnitude: None,
            last_step_ms: None,
            session_steps: 0,
        }
    }

    /// Feed one sample; returns true when it completes a step.
    pub fn process(&mut self, timestamp_ms: i64, x: f64, y: f64, z: f64) -> bool {
        let magnitude = (x * x + y * y + z * z).sqrt();
        let previous = self.last_magnitude.replace(magnitude);

        let Some(previous) = previous else {
            return false;
        };

        if (magnitude - previous).abs() <= self.threshold {
            return false;
        }

        let min_interval_ms = self.config.min_step_interval.as_millis() as i64;
        let debounced = self
            .last_step_ms
            .map(|last| timestamp_ms - last > min_interval_ms)
            .unwrap_or(true);
        if !debounced {
            return false;
        }

        self.last_step_ms = Some(timestamp_ms);
        self.session_steps += 1;
        true
    }

    pub fn on_accuracy_changed(&mut self, accuracy: SensorAccuracy) {
        self.threshold = match accuracy {
            SensorAccuracy::Unreliable => {
                self.config.threshold * self.config.unreliable_threshold_factor
            }
            _ => self.config.threshold,
        };
    }

    pub fn effective_threshold(&self) -> f64 {
        self.threshold
    }

    pub fn session_steps(&self) -> u64 {
        self.session_steps
    }

    pub fn reset(&mut self) {
        self.last_magnitude = None;
        self.last_step_ms = None;
        self.session_steps = 0;
    }
}
