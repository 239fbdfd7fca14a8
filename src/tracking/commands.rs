//! In-process binder: what a bound client may ask of a running service.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};

use crate::{
    db::DailyStepRecord,
    error::{TrackerError, TrackerResult},
    models::StepSnapshot,
};

use super::service::ServiceShared;

#[async_trait]
pub trait StepTracking: Send + Sync {
    async fn current_step_data(&self) -> TrackerResult<StepSnapshot>;

    /// Persist a new daily goal; reaching it immediately counts as an achievement.
    async fn set_daily_goal(&self, goal: u32) -> TrackerResult<()>;

    /// Zero today's count, in memory and in storage.
    async fn reset_daily_steps(&self) -> TrackerResult<()>;

    /// Stored daily records for the last `days` days including today, oldest first.
    async fn recent_days(&self, days: u32) -> TrackerResult<Vec<DailyStepRecord>>;
}

/// Does not keep the service alive; calls fail with `NotRunning` once it stops.
#[derive(Clone)]
pub struct StepServiceHandle {
    shared: Weak<ServiceShared>,
}

impl StepServiceHandle {
    pub(crate) fn new(shared: Weak<ServiceShared>) -> Self {
        Self { shared }
    }

    fn service(&self) -> TrackerResult<Arc<ServiceShared>> {
        self.shared
            .upgrade()
            .filter(|shared| shared.is_running())
            .ok_or(TrackerError::NotRunning)
    }

    pub fn is_connected(&self) -> bool {
        self.service().is_ok()
    }
}

#[async_trait]
impl StepTracking for StepServiceHandle {
    async fn current_step_data(&self) -> TrackerResult<StepSnapshot> {
        Ok(self.service()?.pipeline.snapshot())
    }

    async fn set_daily_goal(&self, goal: u32) -> TrackerResult<()> {
        let service = self.service()?;
        service
            .settings
            .update_daily_goal(goal)
            .map_err(TrackerError::Settings)?;
        service.pipeline.set_goal(goal, Utc::now());
        log::info!("daily goal for {} set to {goal}", service.user_id);
        Ok(())
    }

    async fn reset_daily_steps(&self) -> TrackerResult<()> {
        let service = self.service()?;
        let pipeline = service.pipeline.clone();
        let now = Utc::now();
        service
            .batcher
            .reset_day(now, move || pipeline.reset_daily(now))
            .await?;
        Ok(())
    }

    async fn recent_days(&self, days: u32) -> TrackerResult<Vec<DailyStepRecord>> {
        let service = self.service()?;
        let end = service.pipeline.day();
        // Windows reaching past the calendar start at its first day.
        let start = end
            .checked_sub_days(Days::new(u64::from(days.saturating_sub(1))))
            .unwrap_or(NaiveDate::MIN);
        service
            .store
            .get_records_in_range(&service.user_id, start, end)
            .await
            .map_err(TrackerError::persistence)
    }
}
