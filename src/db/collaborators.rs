use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use log::debug;

use crate::models::AchievementEvent;
use crate::tracking::ports::{GoalTracker, StepStore, WorkoutSink};

use super::{connection::Database, DailyStepRecord, GoalProgress};

#[async_trait]
impl StepStore for Database {
    async fn upsert_daily_record(&self, record: &DailyStepRecord) -> Result<()> {
        Database::upsert_daily_record(self, record).await
    }

    async fn get_record_for_date(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyStepRecord>> {
        Database::get_record_for_date(self, user_id, date).await
    }

    async fn get_records_in_range(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyStepRecord>> {
        Database::get_records_in_range(self, user_id, start, end).await
    }

    async fn reset_daily_record(
        &self,
        user_id: &str,
        date: NaiveDate,
        goal: u32,
        at: DateTime<Utc>,
    ) -> Result<()> {
        Database::reset_daily_record(self, user_id, date, goal, at).await
    }
}

#[async_trait]
impl GoalTracker for Database {
    async fn daily_step_goal(&self, user_id: &str) -> Result<Option<GoalProgress>> {
        self.get_daily_step_goal(user_id).await
    }

    async fn update_progress(&self, goal_id: &str, current: u64, at: DateTime<Utc>) -> Result<()> {
        self.update_goal_progress(goal_id, current, at).await
    }

    async fn is_daily_goal_met(&self, user_id: &str, date: NaiveDate) -> Result<bool> {
        Database::is_daily_goal_met(self, user_id, date).await
    }

    async fn record_achievement(&self, event: &AchievementEvent) -> Result<()> {
        let recorded = self
            .record_daily_achievement(&event.user_id, event.day, event.steps, event.goal, event.at)
            .await?;
        if !recorded {
            debug!("achievement for {} on {} was already stored", event.user_id, event.day);
        }
        Ok(())
    }
}

#[async_trait]
impl WorkoutSink for Database {
    async fn push_steps(&self, user_id: &str, daily_steps: u64, at: DateTime<Utc>) -> Result<()> {
        let touched = self.push_workout_steps(user_id, daily_steps, at).await?;
        if touched > 0 {
            debug!("credited {daily_steps} daily steps to {touched} open workout(s)");
        }
        Ok(())
    }
}
