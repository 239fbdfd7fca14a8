//! Goal and workout rows, limited to the columns the step core touches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DAILY_STEPS_GOAL_KIND: &str = "daily_steps";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GoalProgress {
    pub id: String,
    pub user_id: String,
    pub target_value: u64,
    pub current_value: u64,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

impl GoalProgress {
    pub fn fraction(&self) -> f64 {
        if self.target_value == 0 {
            return 0.0;
        }
        (self.current_value as f64 / self.target_value as f64).min(1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutProgress {
    pub id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Daily count when the first step update reached this workout.
    pub start_steps: Option<u64>,
    pub steps: u64,
}
