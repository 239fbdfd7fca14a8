//! Daily step count owned by one running service.
//!
//! Each sensor tier reports something different: the counter tier a value
//! that only means anything relative to a baseline, the detector tier pulses,
//! the accelerometer raw samples. `TrackerState` folds all three into a single
//! count for the current local day that never goes down except on reset.

use chrono::{DateTime, NaiveDate, Utc};

use crate::models::local_day;
use crate::sensing::{
    ActiveTier, PedometerAlgorithm, PedometerConfig, SensorAccuracy, SensorReading, SensorValue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepUpdate {
    pub timestamp: DateTime<Utc>,
    pub day: NaiveDate,
    pub steps: u64,
    pub added: u64,
    pub rolled_over: bool,
}

#[derive(Debug)]
pub struct TrackerState {
    day: NaiveDate,
    steps: u64,
    tier: ActiveTier,
    /// Counter value that corresponds to `counter_offset` daily steps.
    counter_baseline: Option<u64>,
    counter_offset: u64,
    last_counter_value: Option<u64>,
    pedometer: PedometerAlgorithm,
    updated_at: Option<DateTime<Utc>>,
}

impl TrackerState {
    /// Resume `day` at `steps`, typically the persisted record for today.
    pub fn new(day: NaiveDate, steps: u64, pedometer: PedometerConfig) -> Self {
        Self {
            day,
            steps,
            tier: ActiveTier::Unavailable,
            counter_baseline: None,
            counter_offset: steps,
            last_counter_value: None,
            pedometer: PedometerAlgorithm::new(pedometer),
            updated_at: None,
        }
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn tier(&self) -> ActiveTier {
        self.tier
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn pedometer(&self) -> &PedometerAlgorithm {
        &self.pedometer
    }

    /// Called after every (re)registration. Re-registering the same tier keeps
    /// the counter baseline; switching tiers rebases at the current count so
    /// steps seen by the other tier are not counted twice.
    pub fn set_tier(&mut self, tier: ActiveTier) {
        if tier != self.tier {
            self.counter_baseline = None;
            self.last_counter_value = None;
            self.counter_offset = self.steps;
        }
        self.tier = tier;
    }

    pub fn on_accuracy_changed(&mut self, accuracy: SensorAccuracy) {
        self.pedometer.on_accuracy_changed(accuracy);
    }

    /// Fold one reading into the count. Returns `None` when nothing changed.
    pub fn apply(&mut self, reading: SensorReading) -> Option<StepUpdate> {
        let rolled_over = self.roll_over_to(local_day(reading.timestamp));
        let before = self.steps;

        match reading.value {
            SensorValue::Cumulative(value) => self.apply_counter(value),
            SensorValue::Pulse(count) => self.steps += u64::from(count),
            SensorValue::Acceleration { x, y, z } => {
                if self
                    .pedometer
                    .process(reading.timestamp.timestamp_millis(), x, y, z)
                {
                    self.steps += 1;
                }
            }
        }

        if self.steps == before && !rolled_over {
            return None;
        }

        self.updated_at = Some(reading.timestamp);
        Some(StepUpdate {
            timestamp: reading.timestamp,
            day: self.day,
            steps: self.steps,
            added: self.steps - before,
            rolled_over,
        })
    }

    /// Explicit user reset of the current day.
    pub fn reset_daily(&mut self, at: DateTime<Utc>) {
        self.roll_over_to(local_day(at));
        self.steps = 0;
        self.counter_offset = 0;
        self.counter_baseline = self.last_counter_value;
        self.pedometer.reset();
        self.updated_at = Some(at);
    }

    fn apply_counter(&mut self, value: u64) {
        self.last_counter_value = Some(value);
        match self.counter_baseline {
            None => {
                self.counter_baseline = Some(value);
                self.counter_offset = self.steps;
            }
            Some(baseline) if value < baseline => {
                // The counter restarted from zero (device reboot).
                self.counter_baseline = Some(0);
                self.counter_offset = self.steps;
                self.steps = self.counter_offset + value;
            }
            Some(baseline) => {
                let daily = self.counter_offset + (value - baseline);
                self.steps = self.steps.max(daily);
            }
        }
    }

    /// Only moves forward; a clock set backwards keeps the current day.
    fn roll_over_to(&mut self, day: NaiveDate) -> bool {
        if day <= self.day {
            return false;
        }
        self.day = day;
        self.steps = 0;
        self.counter_offset = 0;
        self.counter_baseline = self.last_counter_value;
        true
    }
}
