use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::sensing::ActiveTier;

/// Read-only view of the current day published to observers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSnapshot {
    pub count: u64,
    pub goal: u32,
    /// `count / goal`, capped at 1.0.
    pub progress: f64,
    pub distance_m: f64,
    pub calories: f64,
    pub tracking_active: bool,
    pub day: Option<NaiveDate>,
    pub tier: ActiveTier,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StepSnapshot {
    pub fn progress_for(count: u64, goal: u32) -> f64 {
        if goal == 0 {
            return 0.0;
        }
        (count as f64 / f64::from(goal)).min(1.0)
    }

    pub fn goal_met(&self) -> bool {
        self.goal > 0 && self.count >= u64::from(self.goal)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementEvent {
    pub user_id: String,
    pub day: NaiveDate,
    pub steps: u64,
    pub goal: u32,
    pub at: DateTime<Utc>,
}
