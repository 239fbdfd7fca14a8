use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Duration,
};
use tokio_util::sync::CancellationToken;

use crate::{
    db::Database,
    error::{TrackerError, TrackerResult, UnsavedSteps},
    models::{local_day, StepObservation, StepSnapshot},
    sensing::{
        ActiveTier, FallbackSelector, PedometerConfig, PowerProfile, PowerState,
        PowerStateController, PowerTransition, SensorListener, SensorSource, SensorTier,
    },
    settings::SettingsStore,
};

use super::{
    batcher::{BatchConfig, BatchStats, FlushOutcome, FlushReason, StepBatcher},
    commands::StepServiceHandle,
    live::StepBroadcaster,
    pipeline::StepPipeline,
    ports::{GoalTracker, Notifier, StepStore, WorkoutSink},
    state::TrackerState,
    sync_bridge::{StepModel, SyncBridge},
    worker::step_worker,
};

/// Everything a service instance needs from the host. Cloned into every
/// restart.
#[derive(Clone)]
pub struct ServiceDeps {
    pub store: Arc<dyn StepStore>,
    pub goals: Arc<dyn GoalTracker>,
    pub workouts: Arc<dyn WorkoutSink>,
    pub notifier: Arc<dyn Notifier>,
    pub sources: Vec<Arc<dyn SensorSource>>,
    pub settings: Arc<SettingsStore>,
}

impl ServiceDeps {
    /// Use the SQLite database for storage, goals and workouts.
    pub fn with_database(
        db: Database,
        sources: Vec<Arc<dyn SensorSource>>,
        settings: Arc<SettingsStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let db = Arc::new(db);
        Self {
            store: db.clone(),
            goals: db.clone(),
            workouts: db,
            notifier,
            sources,
            settings,
        }
    }
}

struct SensorRig {
    selector: FallbackSelector,
    power: PowerStateController,
}

/// State shared between the service, its worker and bound handles.
pub(crate) struct ServiceShared {
    pub(crate) user_id: String,
    pub(crate) pipeline: Arc<StepPipeline>,
    pub(crate) batcher: Arc<StepBatcher>,
    pub(crate) sync: Arc<SyncBridge>,
    pub(crate) store: Arc<dyn StepStore>,
    pub(crate) settings: Arc<SettingsStore>,
    sensors: Mutex<SensorRig>,
    flush_interval: watch::Sender<Duration>,
    running: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl ServiceShared {
    fn sensors(&self) -> MutexGuard<'_, SensorRig> {
        self.sensors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listener(&self) -> Arc<dyn SensorListener> {
        self.pipeline.clone()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn record_error(&self, message: String) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(message);
    }

    fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Register the best tier for the current power state.
    fn select_sensor(&self) -> ActiveTier {
        let selection = {
            let mut rig = self.sensors();
            let plan = rig.power.plan();
            rig.selector.select(plan, self.listener())
        };
        self.settle_selection(selection)
    }

    pub(crate) fn reselect_after_loss(&self, lost: SensorTier) -> ActiveTier {
        if !self.is_running() {
            return ActiveTier::Unavailable;
        }
        let selection = {
            let mut rig = self.sensors();
            if rig.selector.active_tier().tier() != Some(lost) {
                // Already replaced by a power transition.
                return rig.selector.active_tier();
            }
            rig.selector.mark_lost();
            let plan = rig.power.plan();
            rig.selector.select(plan, self.listener())
        };
        self.settle_selection(selection)
    }

    fn settle_selection(&self, selection: TrackerResult<ActiveTier>) -> ActiveTier {
        let tier = match selection {
            Ok(tier) => tier,
            Err(err) => {
                self.record_error(err.to_string());
                ActiveTier::Unavailable
            }
        };
        self.pipeline.set_tier(tier);
        tier
    }

    fn apply_power_state(&self, next: PowerState) -> Option<PowerTransition> {
        let (transition, selection) = {
            let mut rig = self.sensors();
            let transition = rig.power.on_power_state(next)?;
            let selection = rig.selector.select(transition.plan, self.listener());
            (transition, selection)
        };
        info!(
            "power {:?} -> {:?}: sampling every {:?}, flushing every {:?}",
            transition.from,
            transition.to,
            transition.plan.sampling_delay,
            transition.flush_interval
        );
        self.settle_selection(selection);
        self.flush_interval.send_replace(transition.flush_interval);
        Some(transition)
    }

    fn release_sensors(&self) {
        self.sensors().selector.release();
        self.pipeline.set_tier(ActiveTier::Unavailable);
    }
}

/// One running instance of the step pipeline.
pub struct StepService {
    shared: Arc<ServiceShared>,
    worker: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
    started_at: DateTime<Utc>,
}

impl StepService {
    /// Resume today's count from storage, pick a sensor and start the worker.
    /// `carried` holds observations a previous instance failed to write; they
    /// are queued for the next flush and win over the stored count for today.
    /// A device with no usable sensor still starts, with tracking inactive.
    pub async fn start(
        deps: &ServiceDeps,
        live: StepBroadcaster,
        power_state: PowerState,
        carried: &[StepObservation],
    ) -> TrackerResult<Self> {
        let settings = deps.settings.current();
        let started_at = Utc::now();
        let today = local_day(started_at);
        let user_id = settings.user_id.clone();

        let stored = deps
            .store
            .get_record_for_date(&user_id, today)
            .await
            .map_err(TrackerError::persistence)?
            .map(|record| record.steps)
            .unwrap_or(0);
        let resumed = carried
            .iter()
            .rev()
            .find(|observation| observation.day == today)
            .map(|observation| observation.steps)
            .unwrap_or(stored);

        let sync = Arc::new(SyncBridge::new(
            user_id.clone(),
            StepModel::new(settings.step_length_m),
            deps.goals.clone(),
            deps.workouts.clone(),
            deps.notifier.clone(),
        ));
        sync.seed(today, resumed, settings.daily_goal).await;

        let batcher = Arc::new(StepBatcher::new(
            BatchConfig::from(&settings.batch),
            user_id.clone(),
            deps.store.clone(),
        ));
        batcher.restore(carried);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let pipeline = Arc::new(StepPipeline::new(
            TrackerState::new(today, resumed, PedometerConfig::from(&settings.pedometer)),
            settings.daily_goal,
            batcher.clone(),
            sync.clone(),
            live,
            command_tx,
        ));

        let power = PowerStateController::new(PowerProfile::from(&settings.power), power_state);
        let (flush_interval, flush_interval_rx) = watch::channel(power.flush_interval());

        let shared = Arc::new(ServiceShared {
            user_id: user_id.clone(),
            pipeline,
            batcher,
            sync,
            store: deps.store.clone(),
            settings: deps.settings.clone(),
            sensors: Mutex::new(SensorRig {
                selector: FallbackSelector::new(deps.sources.clone()),
                power,
            }),
            flush_interval,
            running: AtomicBool::new(true),
            last_error: Mutex::new(None),
        });

        let tier = shared.select_sensor();
        if !tier.is_available() {
            warn!("step service running without a sensor; tracking disabled");
        }

        let cancel_token = CancellationToken::new();
        let worker = tokio::spawn(step_worker(
            shared.clone(),
            command_rx,
            flush_interval_rx,
            cancel_token.clone(),
        ));

        info!(
            "step service started for {} ({} steps today, tier {:?}, power {:?})",
            user_id, resumed, tier, power_state
        );

        Ok(Self {
            shared,
            worker: Some(worker),
            cancel_token,
            started_at,
        })
    }

    pub fn bind(&self) -> StepServiceHandle {
        StepServiceHandle::new(Arc::downgrade(&self.shared))
    }

    /// Running and the worker task is still alive.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
            && self
                .worker
                .as_ref()
                .map(|handle| !handle.is_finished())
                .unwrap_or(false)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn active_tier(&self) -> ActiveTier {
        self.shared.sensors().selector.active_tier()
    }

    pub fn power_state(&self) -> PowerState {
        self.shared.sensors().power.state()
    }

    pub fn sensor_registrations(&self) -> u64 {
        self.shared.sensors().selector.registrations()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error()
    }

    pub fn snapshot(&self) -> StepSnapshot {
        self.shared.pipeline.snapshot()
    }

    pub fn batch_stats(&self) -> BatchStats {
        self.shared.batcher.stats()
    }

    /// Re-register for the new power level and retime flushes. Entering idle
    /// flushes right away.
    pub async fn apply_power_state(&self, next: PowerState) -> Option<PowerTransition> {
        let transition = self.shared.apply_power_state(next)?;
        if transition.flush_now {
            if let Err(err) = self.shared.batcher.flush(FlushReason::EnteredIdle).await {
                self.shared.record_error(err.to_string());
            }
        }
        Some(transition)
    }

    pub async fn flush_now(&self) -> TrackerResult<FlushOutcome> {
        self.shared.batcher.flush(FlushReason::Manual).await
    }

    /// Unregister sensors, stop the worker and flush what is left. Returns
    /// only after the final write; if it fails, the unwritten observations
    /// come back in the error.
    pub async fn stop(mut self) -> Result<(), UnsavedSteps> {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.release_sensors();
        self.cancel_token.cancel();

        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.await {
                warn!("step worker ended abnormally: {err}");
            }
        }

        let outcome = self.shared.batcher.flush(FlushReason::Shutdown).await;
        info!("step service for {} stopped", self.shared.user_id);
        match outcome {
            Ok(_) => Ok(()),
            Err(error) => Err(UnsavedSteps {
                error,
                pending: self.shared.batcher.take_pending(),
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn abort_worker(&self) {
        if let Some(worker) = &self.worker {
            worker.abort();
        }
    }
}

impl Drop for StepService {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shared.running.store(false, Ordering::SeqCst);
            self.shared.release_sensors();
            self.cancel_token.cancel();
        }
    }
}
