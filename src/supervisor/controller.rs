use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{self, Duration, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{TrackerError, TrackerResult},
    models::{StepObservation, StepSnapshot},
    sensing::{ActiveTier, PowerState},
    tracking::{ServiceDeps, StepBroadcaster, StepService, StepServiceHandle},
};

use super::{
    diagnostics::Diagnostics,
    permissions::PermissionChecker,
    state::{ServiceHealth, ServiceState},
};

struct SupervisorInner {
    state: ServiceState,
    service: Option<StepService>,
    handle: Option<StepServiceHandle>,
    /// Survives restarts so a new instance comes up at the right cadence.
    power_state: PowerState,
    /// Observations a stopped instance could not write; handed to the next one.
    unsaved: Vec<StepObservation>,
    last_error: Option<String>,
    last_health: Option<ServiceHealth>,
    restart_failures: u32,
    escalated: bool,
    transitions: u64,
    restarts: u64,
}

impl SupervisorInner {
    fn transition(&mut self, next: ServiceState) {
        if self.state == next {
            return;
        }
        info!("step service {:?} -> {:?}", self.state, next);
        self.state = next;
        self.transitions += 1;
    }

    fn service_running(&self) -> bool {
        self.service
            .as_ref()
            .map(StepService::is_running)
            .unwrap_or(false)
    }
}

/// Owns the step service lifecycle. Every lifecycle call is serialized
/// through one async lock.
#[derive(Clone)]
pub struct ServiceSupervisor {
    inner: Arc<Mutex<SupervisorInner>>,
    deps: ServiceDeps,
    permissions: Arc<dyn PermissionChecker>,
    live: StepBroadcaster,
}

impl ServiceSupervisor {
    pub fn new(deps: ServiceDeps, permissions: Arc<dyn PermissionChecker>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SupervisorInner {
                state: ServiceState::Stopped,
                service: None,
                handle: None,
                power_state: PowerState::Normal,
                unsaved: Vec::new(),
                last_error: None,
                last_health: None,
                restart_failures: 0,
                escalated: false,
                transitions: 0,
                restarts: 0,
            })),
            deps,
            permissions,
            live: StepBroadcaster::new(),
        }
    }

    pub async fn state(&self) -> ServiceState {
        self.inner.lock().await.state
    }

    /// Live step state. The channel outlives service restarts.
    pub fn subscribe(&self) -> watch::Receiver<StepSnapshot> {
        self.live.subscribe()
    }

    pub async fn handle(&self) -> Option<StepServiceHandle> {
        self.inner.lock().await.handle.clone()
    }

    /// Check permissions, start the service and bind to it. Missing
    /// permissions fail immediately and leave the supervisor stopped.
    pub async fn start(&self) -> TrackerResult<()> {
        let mut inner = self.inner.lock().await;
        self.start_locked(&mut inner).await
    }

    pub async fn bind(&self) -> TrackerResult<StepServiceHandle> {
        let mut inner = self.inner.lock().await;
        self.bind_locked(&mut inner)
    }

    pub async fn unbind(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == ServiceState::RunningBound {
            inner.handle = None;
            inner.transition(ServiceState::RunningUnbound);
        }
    }

    pub async fn stop(&self) -> TrackerResult<()> {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await
    }

    pub async fn restart(&self) -> TrackerResult<()> {
        let mut inner = self.inner.lock().await;
        self.restart_locked(&mut inner).await
    }

    /// Healthy means running and bound (re-binding once if needed). An
    /// unhealthy service that should be running is restarted before returning.
    pub async fn check_health(&self) -> ServiceHealth {
        let mut inner = self.inner.lock().await;
        let health = self.assess_health_locked(&mut inner);

        if !health.healthy && inner.state != ServiceState::Stopped {
            warn!(
                "step service unhealthy (running={}, bound={}); restarting",
                health.running, health.bound
            );
            inner.transition(ServiceState::Unhealthy);
            if let Err(err) = self.restart_locked(&mut inner).await {
                warn!("restart after failed health check did not succeed: {err}");
            }
        }
        health
    }

    /// Idempotent: does nothing when already running, bound and healthy,
    /// otherwise the smallest fix (start, bind or restart).
    pub async fn ensure_running(&self) -> TrackerResult<()> {
        let mut inner = self.inner.lock().await;
        let running = inner.service_running();
        let state = inner.state;
        match state {
            ServiceState::Stopped => self.start_locked(&mut inner).await,
            ServiceState::RunningBound if running => Ok(()),
            ServiceState::RunningUnbound if running => self.bind_locked(&mut inner).map(|_| ()),
            _ => {
                inner.transition(ServiceState::Unhealthy);
                self.restart_locked(&mut inner).await
            }
        }
    }

    /// Forward an idle-mode change. Remembered for future service instances.
    pub async fn on_power_state(&self, power_state: PowerState) {
        let mut inner = self.inner.lock().await;
        inner.power_state = power_state;
        if let Some(service) = &inner.service {
            service.apply_power_state(power_state).await;
        }
    }

    pub async fn get_diagnostics(&self) -> Diagnostics {
        let inner = self.inner.lock().await;
        let service = inner.service.as_ref();
        let running = inner.service_running();
        let bound = inner.state == ServiceState::RunningBound && inner.handle.is_some();
        let last_error = service
            .and_then(StepService::last_error)
            .or_else(|| inner.last_error.clone());

        Diagnostics {
            state: inner.state,
            running,
            bound,
            healthy: running && bound,
            has_permissions: self.permissions.check().granted(),
            snapshot: self.live.current(),
            active_tier: service
                .map(StepService::active_tier)
                .unwrap_or(ActiveTier::Unavailable),
            power_state: inner.power_state,
            last_error,
            restart_failures: inner.restart_failures,
            escalated: inner.escalated,
            transitions: inner.transitions,
            restarts: inner.restarts,
            sensor_registrations: service.map(StepService::sensor_registrations).unwrap_or(0),
            unsaved_observations: inner.unsaved.len(),
            batch: service.map(StepService::batch_stats),
            last_health: inner.last_health.clone(),
        }
    }

    /// Periodic health checks until `cancel_token` fires.
    pub fn spawn_health_monitor(&self, cancel_token: CancellationToken) -> JoinHandle<()> {
        let supervisor = self.clone();
        let period = self
            .deps
            .settings
            .current()
            .health_check_interval()
            .max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        info!("health monitor shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let health = supervisor.check_health().await;
                        if !health.healthy {
                            warn!("health check failed: {:?}", health.last_error);
                        }
                    }
                }
            }
        })
    }

    async fn start_locked(&self, inner: &mut SupervisorInner) -> TrackerResult<()> {
        if inner.state.is_running() && inner.service_running() {
            return Ok(());
        }

        let permissions = self.permissions.check();
        if !permissions.granted() {
            let err = TrackerError::PermissionDenied {
                missing: permissions.missing(),
            };
            warn!("not starting step service: {err}");
            inner.last_error = Some(err.to_string());
            return Err(err);
        }

        inner.transition(ServiceState::Starting);
        let started = StepService::start(
            &self.deps,
            self.live.clone(),
            inner.power_state,
            &inner.unsaved,
        )
        .await;
        match started {
            Ok(service) => {
                if !inner.unsaved.is_empty() {
                    info!(
                        "handed {} unsaved observation(s) to the new service",
                        inner.unsaved.len()
                    );
                    inner.unsaved.clear();
                }
                inner.last_error = service.last_error();
                inner.service = Some(service);
                inner.transition(ServiceState::RunningUnbound);
                self.bind_locked(inner)?;
                Ok(())
            }
            Err(err) => {
                error!("step service failed to start: {err}");
                inner.last_error = Some(err.to_string());
                inner.transition(ServiceState::Unhealthy);
                Err(err)
            }
        }
    }

    fn bind_locked(&self, inner: &mut SupervisorInner) -> TrackerResult<StepServiceHandle> {
        let handle = match &inner.service {
            Some(service) if service.is_running() => service.bind(),
            _ => return Err(TrackerError::NotRunning),
        };
        inner.handle = Some(handle.clone());
        inner.transition(ServiceState::RunningBound);
        Ok(handle)
    }

    /// A failed final flush keeps its observations for the next start.
    async fn stop_locked(&self, inner: &mut SupervisorInner) -> TrackerResult<()> {
        inner.handle = None;
        let result = match inner.service.take() {
            Some(service) => service.stop().await,
            None => Ok(()),
        };
        let result = result.map_err(|unsaved| {
            warn!("final flush on stop failed: {unsaved}");
            inner.last_error = Some(unsaved.to_string());
            inner.unsaved.extend(unsaved.pending);
            unsaved.error
        });
        inner.last_health = None;
        inner.transition(ServiceState::Stopped);
        result
    }

    async fn restart_locked(&self, inner: &mut SupervisorInner) -> TrackerResult<()> {
        let settings = self.deps.settings.current();
        inner.restarts += 1;

        if let Err(err) = self.stop_locked(inner).await {
            warn!(
                "restarting despite failed stop ({err}); {} observation(s) carried over",
                inner.unsaved.len()
            );
        }
        time::sleep(settings.restart_delay()).await;

        match self.start_locked(inner).await {
            Ok(()) => {
                inner.restart_failures = 0;
                inner.escalated = false;
                Ok(())
            }
            Err(err) => {
                inner.restart_failures += 1;
                if inner.restart_failures >= settings.supervisor.max_restart_failures
                    && !inner.escalated
                {
                    inner.escalated = true;
                    error!(
                        "step service failed to restart {} times in a row",
                        inner.restart_failures
                    );
                }
                Err(err)
            }
        }
    }

    fn assess_health_locked(&self, inner: &mut SupervisorInner) -> ServiceHealth {
        let running = inner.service_running();
        let mut bound = inner.state == ServiceState::RunningBound
            && inner
                .handle
                .as_ref()
                .map(StepServiceHandle::is_connected)
                .unwrap_or(false);
        if running && !bound {
            bound = self.bind_locked(inner).is_ok();
        }

        let healthy = running && bound;
        if !healthy {
            let reason = if running {
                "service could not be bound"
            } else {
                "service is not running"
            };
            inner.last_error = Some(TrackerError::ServiceUnhealthy(reason.into()).to_string());
        }

        let health = ServiceHealth {
            running,
            bound,
            healthy,
            last_error: inner.last_error.clone(),
            checked_at: Utc::now(),
        };
        inner.last_health = Some(health.clone());
        health
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{DailyStepRecord, Database},
        sensing::{SensorReading, SensorSource, SensorTier, SimulatedSource},
        settings::{SettingsStore, TrackerSettings},
        supervisor::permissions::{Permissions, StaticPermissions},
        tracking::{LogNotifier, StepStore},
    };
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Delegates to the database but can be told to fail reads or writes.
    struct FlakyStore {
        db: Database,
        failing: AtomicBool,
        failing_writes: AtomicBool,
    }

    #[async_trait]
    impl StepStore for FlakyStore {
        async fn upsert_daily_record(&self, record: &DailyStepRecord) -> Result<()> {
            if self.failing_writes.load(Ordering::SeqCst) {
                return Err(anyhow!("disk I/O error"));
            }
            self.db.upsert_daily_record(record).await
        }

        async fn get_record_for_date(
            &self,
            user_id: &str,
            date: NaiveDate,
        ) -> Result<Option<DailyStepRecord>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(anyhow!("database is locked"));
            }
            self.db.get_record_for_date(user_id, date).await
        }

        async fn get_records_in_range(
            &self,
            user_id: &str,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<DailyStepRecord>> {
            self.db.get_records_in_range(user_id, start, end).await
        }

        async fn reset_daily_record(
            &self,
            user_id: &str,
            date: NaiveDate,
            goal: u32,
            at: DateTime<Utc>,
        ) -> Result<()> {
            self.db.reset_daily_record(user_id, date, goal, at).await
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        db: Database,
        counter: Arc<SimulatedSource>,
        store: Arc<FlakyStore>,
        permissions: Arc<StaticPermissions>,
        supervisor: ServiceSupervisor,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("steps.sqlite3")).unwrap();
        let mut settings = TrackerSettings::default();
        settings.supervisor.restart_delay_ms = 10;
        let settings =
            Arc::new(SettingsStore::create(dir.path().join("settings.json"), settings).unwrap());

        let counter = Arc::new(SimulatedSource::new(SensorTier::Counter));
        let store = Arc::new(FlakyStore {
            db: db.clone(),
            failing: AtomicBool::new(false),
            failing_writes: AtomicBool::new(false),
        });
        let permissions = Arc::new(StaticPermissions::granted());
        let sources: Vec<Arc<dyn SensorSource>> = vec![counter.clone()];
        let mut deps =
            ServiceDeps::with_database(db.clone(), sources, settings, Arc::new(LogNotifier));
        deps.store = store.clone();

        let supervisor = ServiceSupervisor::new(deps, permissions.clone());
        Fixture {
            _dir: dir,
            db,
            counter,
            store,
            permissions,
            supervisor,
        }
    }

    async fn stored_today(db: &Database) -> Option<u64> {
        db.get_record_for_date("local", crate::models::local_day(Utc::now()))
            .await
            .unwrap()
            .map(|record| record.steps)
    }

    #[tokio::test]
    async fn start_runs_and_binds() {
        let f = fixture();
        f.supervisor.start().await.unwrap();

        assert_eq!(f.supervisor.state().await, ServiceState::RunningBound);
        assert!(f.counter.is_registered());
        let diagnostics = f.supervisor.get_diagnostics().await;
        assert!(diagnostics.healthy);
        assert_eq!(diagnostics.active_tier, ActiveTier::Counter);
        assert_eq!(diagnostics.transitions, 3);

        f.supervisor.stop().await.unwrap();
        assert!(!f.counter.is_registered());
        assert_eq!(f.supervisor.state().await, ServiceState::Stopped);
    }

    #[tokio::test]
    async fn ensure_running_on_healthy_service_is_a_no_op() {
        let f = fixture();
        f.supervisor.start().await.unwrap();
        let before = f.supervisor.get_diagnostics().await.transitions;

        f.supervisor.ensure_running().await.unwrap();
        f.supervisor.ensure_running().await.unwrap();

        let after = f.supervisor.get_diagnostics().await;
        assert_eq!(after.transitions, before);
        assert_eq!(after.restarts, 0);
        assert_eq!(f.counter.registrations(), 1);
    }

    #[tokio::test]
    async fn ensure_running_rebinds_unbound_service() {
        let f = fixture();
        f.supervisor.start().await.unwrap();
        f.supervisor.unbind().await;
        assert_eq!(f.supervisor.state().await, ServiceState::RunningUnbound);

        f.supervisor.ensure_running().await.unwrap();
        assert_eq!(f.supervisor.state().await, ServiceState::RunningBound);
        assert_eq!(f.counter.registrations(), 1);
    }

    #[tokio::test]
    async fn missing_permissions_leave_supervisor_stopped() {
        let f = fixture();
        f.permissions.set(Permissions {
            motion_sensor: false,
            notifications: true,
        });

        let err = f.supervisor.start().await.unwrap_err();
        assert!(matches!(err, TrackerError::PermissionDenied { ref missing } if missing == &vec!["motion_sensor"]));
        assert_eq!(f.supervisor.state().await, ServiceState::Stopped);
        assert_eq!(f.counter.registrations(), 0);
        assert!(!f.supervisor.get_diagnostics().await.has_permissions);
    }

    #[tokio::test]
    async fn dead_worker_is_restarted_by_health_check() {
        let f = fixture();
        f.supervisor.start().await.unwrap();
        {
            let inner = f.supervisor.inner.lock().await;
            inner.service.as_ref().unwrap().abort_worker();
        }
        time::sleep(Duration::from_millis(20)).await;

        let health = f.supervisor.check_health().await;
        assert!(!health.healthy);
        assert!(!health.running);

        let diagnostics = f.supervisor.get_diagnostics().await;
        assert_eq!(diagnostics.state, ServiceState::RunningBound);
        assert!(diagnostics.healthy);
        assert_eq!(diagnostics.restarts, 1);
        assert_eq!(f.counter.registrations(), 2);
        assert!(f.supervisor.check_health().await.healthy);
    }

    #[tokio::test]
    async fn repeated_restart_failures_escalate() {
        let f = fixture();
        f.store.failing.store(true, Ordering::SeqCst);

        assert!(matches!(
            f.supervisor.start().await,
            Err(TrackerError::Persistence(_))
        ));
        assert_eq!(f.supervisor.state().await, ServiceState::Unhealthy);

        for _ in 0..3 {
            assert!(!f.supervisor.check_health().await.healthy);
        }
        let diagnostics = f.supervisor.get_diagnostics().await;
        assert_eq!(diagnostics.restart_failures, 3);
        assert!(diagnostics.escalated);

        f.store.failing.store(false, Ordering::SeqCst);
        f.supervisor.check_health().await;
        let diagnostics = f.supervisor.get_diagnostics().await;
        assert_eq!(diagnostics.state, ServiceState::RunningBound);
        assert_eq!(diagnostics.restart_failures, 0);
        assert!(!diagnostics.escalated);
    }

    #[tokio::test]
    async fn stopped_supervisor_reports_unhealthy_without_restarting() {
        let f = fixture();
        let health = f.supervisor.check_health().await;
        assert!(!health.healthy);
        assert_eq!(f.supervisor.state().await, ServiceState::Stopped);
        assert_eq!(f.supervisor.get_diagnostics().await.restarts, 0);
    }

    #[tokio::test]
    async fn power_state_survives_restart() {
        let f = fixture();
        f.supervisor.start().await.unwrap();
        f.supervisor.on_power_state(PowerState::Idle).await;
        f.supervisor.restart().await.unwrap();

        let diagnostics = f.supervisor.get_diagnostics().await;
        assert_eq!(diagnostics.power_state, PowerState::Idle);
        let params = f.counter.current_params().unwrap();
        assert_eq!(params.sampling_delay, Duration::from_millis(200));
    }

    #[tokio::test]
    async fn unsaved_steps_survive_a_restart() {
        let f = fixture();
        f.supervisor.start().await.unwrap();

        let now = Utc::now();
        f.counter.emit(SensorReading::cumulative(now, 1_000));
        f.counter.emit(SensorReading::cumulative(now, 1_005));
        f.store.failing_writes.store(true, Ordering::SeqCst);

        f.supervisor.restart().await.unwrap();
        let diagnostics = f.supervisor.get_diagnostics().await;
        assert_eq!(diagnostics.unsaved_observations, 0);
        assert_eq!(diagnostics.batch.unwrap().pending, 1);
        assert_eq!(diagnostics.snapshot.count, 5);
        assert_eq!(stored_today(&f.db).await, None);

        // The counter re-baselines on the new registration.
        f.store.failing_writes.store(false, Ordering::SeqCst);
        f.counter.emit(SensorReading::cumulative(now, 1_006));
        f.counter.emit(SensorReading::cumulative(now, 1_007));
        f.supervisor.stop().await.unwrap();
        assert_eq!(stored_today(&f.db).await, Some(6));
    }

    #[tokio::test]
    async fn failed_stop_keeps_steps_for_the_next_start() {
        let f = fixture();
        f.supervisor.start().await.unwrap();
        let now = Utc::now();
        f.counter.emit(SensorReading::cumulative(now, 200));
        f.counter.emit(SensorReading::cumulative(now, 203));

        f.store.failing_writes.store(true, Ordering::SeqCst);
        assert!(matches!(
            f.supervisor.stop().await,
            Err(TrackerError::Persistence(_))
        ));
        assert_eq!(f.supervisor.get_diagnostics().await.unsaved_observations, 1);

        f.store.failing_writes.store(false, Ordering::SeqCst);
        f.supervisor.start().await.unwrap();
        assert_eq!(f.supervisor.get_diagnostics().await.unsaved_observations, 0);
        f.supervisor.stop().await.unwrap();
        assert_eq!(stored_today(&f.db).await, Some(3));
    }
}
