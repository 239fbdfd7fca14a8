use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::db::DailyStepRecord;

/// One accepted daily count, held by the batcher until it is flushed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepObservation {
    /// Assigned by the batcher on `record`.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub day: NaiveDate,
    /// Cumulative steps for `day`, not a delta.
    pub steps: u64,
    pub goal: u32,
    pub calories: f64,
    pub distance_m: f64,
}

impl StepObservation {
    pub fn new(
        timestamp: DateTime<Utc>,
        day: NaiveDate,
        steps: u64,
        goal: u32,
        calories: f64,
        distance_m: f64,
    ) -> Self {
        Self {
            seq: 0,
            timestamp,
            day,
            steps,
            goal,
            calories,
            distance_m,
        }
    }

    pub fn to_record(&self, user_id: &str) -> DailyStepRecord {
        DailyStepRecord::new(
            user_id,
            self.day,
            self.steps,
            self.goal,
            self.calories,
            self.distance_m,
            self.timestamp,
        )
    }
}
