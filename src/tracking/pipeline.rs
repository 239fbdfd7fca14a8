//! The synchronous sensor-callback path.
//!
//! Runs on the platform's sensor thread: it updates the daily count, records
//! the observation, publishes live state and queues I/O for the worker. It
//! never awaits and never touches storage directly.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::mpsc;

use crate::models::{StepObservation, StepSnapshot};
use crate::sensing::{ActiveTier, SensorAccuracy, SensorListener, SensorReading, SensorTier};

use super::{
    batcher::{FlushReason, StepBatcher},
    live::StepBroadcaster,
    state::{StepUpdate, TrackerState},
    sync_bridge::{SyncBridge, SyncUpdate},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = false;

use crate::{log_debug, log_warn};

#[derive(Debug)]
pub enum WorkerCommand {
    Flush(FlushReason),
    Sync(SyncUpdate),
    /// The active sensor registration was lost.
    Reselect(SensorTier),
}

pub struct StepPipeline {
    state: Mutex<TrackerState>,
    goal: AtomicU32,
    batcher: Arc<StepBatcher>,
    sync: Arc<SyncBridge>,
    live: StepBroadcaster,
    commands: mpsc::UnboundedSender<WorkerCommand>,
}

impl StepPipeline {
    pub fn new(
        state: TrackerState,
        goal: u32,
        batcher: Arc<StepBatcher>,
        sync: Arc<SyncBridge>,
        live: StepBroadcaster,
        commands: mpsc::UnboundedSender<WorkerCommand>,
    ) -> Self {
        Self {
            state: Mutex::new(state),
            goal: AtomicU32::new(goal),
            batcher,
            sync,
            live,
            commands,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn goal(&self) -> u32 {
        self.goal.load(Ordering::SeqCst)
    }

    pub fn day(&self) -> NaiveDate {
        self.lock().day()
    }

    pub fn snapshot(&self) -> StepSnapshot {
        self.snapshot_of(&self.lock())
    }

    fn snapshot_of(&self, state: &TrackerState) -> StepSnapshot {
        let goal = self.goal();
        let count = state.steps();
        let metrics = self.sync.model().metrics(count);
        StepSnapshot {
            count,
            goal,
            progress: StepSnapshot::progress_for(count, goal),
            distance_m: metrics.distance_m,
            calories: metrics.calories,
            tracking_active: state.tier().is_available(),
            day: Some(state.day()),
            tier: state.tier(),
            updated_at: state.updated_at(),
        }
    }

    /// Record which tier is feeding readings after a (re)selection.
    pub fn set_tier(&self, tier: ActiveTier) {
        let snapshot = {
            let mut state = self.lock();
            state.set_tier(tier);
            self.snapshot_of(&state)
        };
        self.live.publish(snapshot);
    }

    /// Publish the current state without a new reading.
    pub fn publish(&self) {
        self.live.publish(self.snapshot());
    }

    /// New goal for today; may complete it on the spot. Today's count is
    /// recorded again so the stored record carries the new goal.
    pub fn set_goal(&self, goal: u32, at: DateTime<Utc>) {
        self.goal.store(goal, Ordering::SeqCst);
        let (day, steps, due, snapshot) = {
            let state = self.lock();
            let (day, steps) = (state.day(), state.steps());
            let metrics = self.sync.model().metrics(steps);
            let due = self.batcher.record(StepObservation::new(
                at,
                day,
                steps,
                goal,
                metrics.calories,
                metrics.distance_m,
            ));
            (day, steps, due, self.snapshot_of(&state))
        };
        let achievement = self.sync.check_goal(day, steps, goal, at);
        self.live.publish(snapshot.clone());
        self.send(WorkerCommand::Sync(SyncUpdate {
            snapshot,
            achievement,
        }));
        if due {
            self.send(WorkerCommand::Flush(FlushReason::Threshold));
        }
    }

    /// Zero today's count and drop its pending observations. Returns the day
    /// and goal the zero record should carry.
    pub fn reset_daily(&self, at: DateTime<Utc>) -> (NaiveDate, u32) {
        let goal = self.goal();
        let (day, snapshot) = {
            let mut state = self.lock();
            state.reset_daily(at);
            self.batcher.discard_day(state.day());
            (state.day(), self.snapshot_of(&state))
        };
        self.live.publish(snapshot.clone());
        self.send(WorkerCommand::Sync(SyncUpdate {
            snapshot,
            achievement: None,
        }));
        (day, goal)
    }

    fn accept(&self, state: &TrackerState, update: StepUpdate) -> (bool, SyncUpdate) {
        let goal = self.goal();
        let metrics = self.sync.model().metrics(update.steps);
        let due = self.batcher.record(StepObservation::new(
            update.timestamp,
            update.day,
            update.steps,
            goal,
            metrics.calories,
            metrics.distance_m,
        ));
        let achievement = self
            .sync
            .check_goal(update.day, update.steps, goal, update.timestamp);
        (
            due,
            SyncUpdate {
                snapshot: self.snapshot_of(state),
                achievement,
            },
        )
    }

    fn send(&self, command: WorkerCommand) {
        if self.commands.send(command).is_err() {
            log_warn!("step worker is gone; dropping command");
        }
    }
}

impl SensorListener for StepPipeline {
    fn on_reading(&self, reading: SensorReading) {
        // The observation is recorded under the state lock so a concurrent
        // reset cannot interleave between the count and its observation.
        let accepted = {
            let mut state = self.lock();
            match state.apply(reading) {
                Some(update) => {
                    if update.rolled_over {
                        log::info!("step day rolled over to {}", update.day);
                    }
                    log_debug!("+{} steps, {} today", update.added, update.steps);
                    Some(self.accept(&state, update))
                }
                None => None,
            }
        };

        let Some((due, update)) = accepted else {
            return;
        };
        self.live.publish(update.snapshot.clone());
        self.send(WorkerCommand::Sync(update));
        if due {
            self.send(WorkerCommand::Flush(FlushReason::Threshold));
        }
    }

    fn on_accuracy_changed(&self, tier: SensorTier, accuracy: SensorAccuracy) {
        if tier == SensorTier::Accelerometer {
            log_debug!("accelerometer accuracy now {:?}", accuracy);
            self.lock().on_accuracy_changed(accuracy);
        }
    }

    fn on_registration_lost(&self, tier: SensorTier) {
        log::warn!("{} sensor registration lost", tier.as_str());
        self.send(WorkerCommand::Reselect(tier));
    }
}
