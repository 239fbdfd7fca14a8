//! Fans daily counts out to goals, workouts and notifications.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use log::{info, warn};

use crate::models::{AchievementEvent, StepSnapshot};

use super::ports::{GoalTracker, Notifier, WorkoutSink};

pub const CALORIES_PER_STEP: f64 = 0.04;
/// Average adult stride.
pub const DEFAULT_STEP_LENGTH_M: f64 = 0.762;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepMetrics {
    pub calories: f64,
    pub distance_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepModel {
    step_length_m: f64,
}

impl StepModel {
    pub fn new(step_length_m: Option<f64>) -> Self {
        let step_length_m = step_length_m
            .filter(|length| length.is_finite() && *length > 0.0)
            .unwrap_or(DEFAULT_STEP_LENGTH_M);
        Self { step_length_m }
    }

    pub fn step_length_m(&self) -> f64 {
        self.step_length_m
    }

    pub fn metrics(&self, steps: u64) -> StepMetrics {
        let steps = steps as f64;
        StepMetrics {
            calories: steps * CALORIES_PER_STEP,
            distance_m: steps * self.step_length_m,
        }
    }
}

impl Default for StepModel {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Work handed to the async side after an accepted update.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncUpdate {
    pub snapshot: StepSnapshot,
    pub achievement: Option<AchievementEvent>,
}

pub struct SyncBridge {
    user_id: String,
    model: StepModel,
    goals: Arc<dyn GoalTracker>,
    workouts: Arc<dyn WorkoutSink>,
    notifier: Arc<dyn Notifier>,
    /// Day whose goal has already been celebrated.
    achieved_day: Mutex<Option<NaiveDate>>,
}

impl SyncBridge {
    pub fn new(
        user_id: impl Into<String>,
        model: StepModel,
        goals: Arc<dyn GoalTracker>,
        workouts: Arc<dyn WorkoutSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            model,
            goals,
            workouts,
            notifier,
            achieved_day: Mutex::new(None),
        }
    }

    pub fn model(&self) -> StepModel {
        self.model
    }

    /// Latch `day` if its goal was already reached before this start, either
    /// by the resumed count against the current goal or by storage.
    pub async fn seed(&self, day: NaiveDate, steps: u64, goal: u32) {
        let met = if goal > 0 && steps >= u64::from(goal) {
            true
        } else {
            match self.goals.is_daily_goal_met(&self.user_id, day).await {
                Ok(met) => met,
                Err(err) => {
                    warn!("could not read goal status for {day}: {err:#}");
                    false
                }
            }
        };
        if met {
            info!("daily goal for {day} already met before start");
            *self.achieved_day.lock().unwrap_or_else(PoisonError::into_inner) = Some(day);
        }
    }

    /// Returns an event only on the first not-met to met edge for `day`.
    pub fn check_goal(
        &self,
        day: NaiveDate,
        steps: u64,
        goal: u32,
        at: DateTime<Utc>,
    ) -> Option<AchievementEvent> {
        if goal == 0 || steps < u64::from(goal) {
            return None;
        }
        let mut achieved = self.achieved_day.lock().unwrap_or_else(PoisonError::into_inner);
        if *achieved == Some(day) {
            return None;
        }
        *achieved = Some(day);
        Some(AchievementEvent {
            user_id: self.user_id.clone(),
            day,
            steps,
            goal,
            at,
        })
    }

    pub fn achieved_day(&self) -> Option<NaiveDate> {
        *self.achieved_day.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push one update to the collaborators. Failures are logged and swallowed.
    pub async fn push(&self, update: &SyncUpdate) {
        let snapshot = &update.snapshot;
        let at = snapshot.updated_at.unwrap_or_else(Utc::now);

        if let Some(event) = &update.achievement {
            if let Err(err) = self.goals.record_achievement(event).await {
                warn!("could not store achievement for {}: {err:#}", event.day);
            }
        }

        match self.goals.daily_step_goal(&self.user_id).await {
            Ok(Some(goal)) if !goal.completed => {
                if let Err(err) = self.goals.update_progress(&goal.id, snapshot.count, at).await {
                    warn!("goal progress update failed for {}: {err:#}", goal.id);
                }
            }
            Ok(_) => {}
            Err(err) => warn!("daily goal lookup failed: {err:#}"),
        }

        if let Err(err) = self.workouts.push_steps(&self.user_id, snapshot.count, at).await {
            warn!("workout step push failed: {err:#}");
        }

        self.notifier.show_progress(snapshot);
        if let Some(event) = &update.achievement {
            self.notifier.show_achievement(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::GoalProgress;
    use crate::tracking::ports::NoopWorkoutSink;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct FixedGoals {
        met: bool,
        goal: Option<GoalProgress>,
        updates: Mutex<Vec<u64>>,
        recorded: Mutex<Vec<AchievementEvent>>,
        broken: bool,
    }

    impl FixedGoals {
        fn new(met: bool, goal: Option<GoalProgress>) -> Self {
            Self {
                met,
                goal,
                updates: Mutex::new(Vec::new()),
                recorded: Mutex::new(Vec::new()),
                broken: false,
            }
        }
    }

    #[async_trait]
    impl GoalTracker for FixedGoals {
        async fn daily_step_goal(&self, _user_id: &str) -> Result<Option<GoalProgress>> {
            if self.broken {
                return Err(anyhow!("goal table missing"));
            }
            Ok(self.goal.clone())
        }

        async fn update_progress(&self, _goal_id: &str, current: u64, _at: DateTime<Utc>) -> Result<()> {
            self.updates.lock().unwrap().push(current);
            Ok(())
        }

        async fn is_daily_goal_met(&self, _user_id: &str, _date: NaiveDate) -> Result<bool> {
            if self.broken {
                return Err(anyhow!("goal table missing"));
            }
            Ok(self.met)
        }

        async fn record_achievement(&self, event: &AchievementEvent) -> Result<()> {
            if self.broken {
                return Err(anyhow!("goal table missing"));
            }
            self.recorded.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        progress: Mutex<Vec<u64>>,
        achievements: Mutex<Vec<AchievementEvent>>,
    }

    impl Notifier for RecordingNotifier {
        fn show_progress(&self, snapshot: &StepSnapshot) {
            self.progress.lock().unwrap().push(snapshot.count);
        }

        fn show_achievement(&self, event: &AchievementEvent) {
            self.achievements.lock().unwrap().push(event.clone());
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 18, 0, 0).unwrap()
    }

    fn goal(completed: bool) -> GoalProgress {
        GoalProgress {
            id: "goal_1".into(),
            user_id: "u1".into(),
            target_value: 10_000,
            current_value: 0,
            completed,
            updated_at: at(),
        }
    }

    fn bridge(goals: Arc<FixedGoals>, notifier: Arc<RecordingNotifier>) -> SyncBridge {
        SyncBridge::new("u1", StepModel::default(), goals, Arc::new(NoopWorkoutSink), notifier)
    }

    #[test]
    fn metrics_use_default_or_override_stride() {
        let metrics = StepModel::default().metrics(1_000);
        assert!((metrics.calories - 40.0).abs() < 1e-9);
        assert!((metrics.distance_m - 762.0).abs() < 1e-9);

        let custom = StepModel::new(Some(0.5)).metrics(1_000);
        assert!((custom.distance_m - 500.0).abs() < 1e-9);
        assert_eq!(StepModel::new(Some(-1.0)).step_length_m(), DEFAULT_STEP_LENGTH_M);
    }

    #[test]
    fn achievement_fires_once_on_crossing() {
        let bridge = bridge(
            Arc::new(FixedGoals::new(false, None)),
            Arc::new(RecordingNotifier::default()),
        );
        assert!(bridge.check_goal(day(), 9_000, 10_000, at()).is_none());
        let event = bridge.check_goal(day(), 10_500, 10_000, at()).unwrap();
        assert_eq!(event.steps, 10_500);
        assert!(bridge.check_goal(day(), 10_600, 10_000, at()).is_none());

        let tomorrow = day().succ_opt().unwrap();
        assert!(bridge.check_goal(tomorrow, 10_000, 10_000, at()).is_some());
    }

    #[tokio::test]
    async fn seeded_day_does_not_fire_again() {
        let bridge = bridge(
            Arc::new(FixedGoals::new(true, None)),
            Arc::new(RecordingNotifier::default()),
        );
        bridge.seed(day(), 9_000, 10_000).await;
        assert!(bridge.check_goal(day(), 12_000, 10_000, at()).is_none());
    }

    #[tokio::test]
    async fn resumed_count_meeting_current_goal_is_latched() {
        // Storage knows nothing, but the count already covers today's goal.
        let bridge = bridge(
            Arc::new(FixedGoals::new(false, None)),
            Arc::new(RecordingNotifier::default()),
        );
        bridge.seed(day(), 50, 40).await;
        assert_eq!(bridge.achieved_day(), Some(day()));
        assert!(bridge.check_goal(day(), 51, 40, at()).is_none());
    }

    #[tokio::test]
    async fn push_updates_open_goal_and_notifies() {
        let goals = Arc::new(FixedGoals::new(false, Some(goal(false))));
        let notifier = Arc::new(RecordingNotifier::default());
        let bridge = bridge(goals.clone(), notifier.clone());

        let snapshot = StepSnapshot {
            count: 10_500,
            goal: 10_000,
            updated_at: Some(at()),
            ..StepSnapshot::default()
        };
        let achievement = bridge.check_goal(day(), 10_500, 10_000, at());
        bridge.push(&SyncUpdate { snapshot, achievement }).await;

        assert_eq!(*goals.updates.lock().unwrap(), vec![10_500]);
        assert_eq!(*notifier.progress.lock().unwrap(), vec![10_500]);
        assert_eq!(notifier.achievements.lock().unwrap().len(), 1);
        let recorded = goals.recorded.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].day, day());
    }

    #[tokio::test]
    async fn completed_goal_is_left_alone() {
        let goals = Arc::new(FixedGoals::new(true, Some(goal(true))));
        let bridge = bridge(goals.clone(), Arc::new(RecordingNotifier::default()));
        bridge
            .push(&SyncUpdate {
                snapshot: StepSnapshot::default(),
                achievement: None,
            })
            .await;
        assert!(goals.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn collaborator_failures_are_swallowed() {
        let mut goals = FixedGoals::new(false, None);
        goals.broken = true;
        let notifier = Arc::new(RecordingNotifier::default());
        let bridge = bridge(Arc::new(goals), notifier.clone());

        bridge.seed(day(), 3, 10_000).await;
        assert_eq!(bridge.achieved_day(), None);
        let achievement = bridge.check_goal(day(), 10_000, 10_000, at());
        bridge
            .push(&SyncUpdate {
                snapshot: StepSnapshot {
                    count: 10_000,
                    ..StepSnapshot::default()
                },
                achievement,
            })
            .await;
        assert_eq!(*notifier.progress.lock().unwrap(), vec![10_000]);
        assert_eq!(notifier.achievements.lock().unwrap().len(), 1);
    }
}
