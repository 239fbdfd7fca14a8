//! Collaborators the step core talks to but does not own.
//!
//! The SQLite [`Database`](crate::db::Database) implements the storage and
//! goal traits; hosts can substitute their own.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use log::info;

use crate::db::{DailyStepRecord, GoalProgress};
use crate::models::{AchievementEvent, StepSnapshot};

#[async_trait]
pub trait StepStore: Send + Sync {
    async fn upsert_daily_record(&self, record: &DailyStepRecord) -> Result<()>;

    async fn get_record_for_date(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyStepRecord>>;

    async fn get_records_in_range(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyStepRecord>>;

    async fn reset_daily_record(
        &self,
        user_id: &str,
        date: NaiveDate,
        goal: u32,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

#[async_trait]
pub trait GoalTracker: Send + Sync {
    /// The user's active daily-steps goal, if one exists.
    async fn daily_step_goal(&self, user_id: &str) -> Result<Option<GoalProgress>>;

    async fn update_progress(&self, goal_id: &str, current: u64, at: DateTime<Utc>) -> Result<()>;

    /// True once the day's goal has been celebrated or its stored record meets it.
    async fn is_daily_goal_met(&self, user_id: &str, date: NaiveDate) -> Result<bool>;

    /// Persist that the day's goal was celebrated.
    async fn record_achievement(&self, event: &AchievementEvent) -> Result<()>;
}

#[async_trait]
pub trait WorkoutSink: Send + Sync {
    async fn push_steps(&self, _user_id: &str, _daily_steps: u64, _at: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
}

pub struct NoopWorkoutSink;

impl WorkoutSink for NoopWorkoutSink {}

/// User-visible notifications. Content formatting belongs to the host.
pub trait Notifier: Send + Sync {
    fn show_progress(&self, snapshot: &StepSnapshot);

    fn show_achievement(&self, event: &AchievementEvent);
}

/// Writes notifications to the log instead of a notification shade.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show_progress(&self, snapshot: &StepSnapshot) {
        log::debug!(
            "progress: {}/{} steps ({:.0}%)",
            snapshot.count,
            snapshot.goal,
            snapshot.progress * 100.0
        );
    }

    fn show_achievement(&self, event: &AchievementEvent) {
        info!(
            "Daily goal reached for {} on {}: {} / {} steps",
            event.user_id, event.day, event.steps, event.goal
        );
    }
}
