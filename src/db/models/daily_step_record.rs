//! Persisted daily step totals.
//!
//! One record per (user, calendar day). The step count only grows during the
//! day; the single exception is an explicit user reset.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Rough conversion used for the derived "active minutes" column.
pub const STEPS_PER_ACTIVE_MINUTE: u64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyStepRecord {
    pub id: String,
    pub user_id: String,
    pub date: NaiveDate,
    pub steps: u64,
    pub goal: u32,
    pub calories: f64,
    pub distance_m: f64,
    pub active_minutes: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DailyStepRecord {
    pub fn new(
        user_id: impl Into<String>,
        date: NaiveDate,
        steps: u64,
        goal: u32,
        calories: f64,
        distance_m: f64,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            date,
            steps,
            goal,
            calories,
            distance_m,
            active_minutes: active_minutes_for(steps),
            created_at: at,
            updated_at: at,
        }
    }

    pub fn goal_met(&self) -> bool {
        self.goal > 0 && self.steps >= u64::from(self.goal)
    }
}

pub fn active_minutes_for(steps: u64) -> u32 {
    u32::try_from(steps / STEPS_PER_ACTIVE_MINUTE).unwrap_or(u32::MAX)
}
