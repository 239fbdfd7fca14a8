#![allow(dead_code)]

use std::{
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{NaiveDate, Utc};
use stepwarden_lib::{
    models::local_day,
    sensing::SimulatedSource,
    supervisor::StaticPermissions,
    tracking::ServiceDeps,
    AchievementEvent, Database, Notifier, SensorSource, SensorTier, ServiceSupervisor,
    SettingsStore, StepSnapshot, TrackerSettings,
};
use tempfile::TempDir;

#[derive(Default)]
pub struct RecordingNotifier {
    pub progress: Mutex<Vec<u64>>,
    pub achievements: Mutex<Vec<AchievementEvent>>,
}

impl RecordingNotifier {
    pub fn achievements(&self) -> Vec<AchievementEvent> {
        self.achievements.lock().unwrap().clone()
    }

    pub fn last_progress(&self) -> Option<u64> {
        self.progress.lock().unwrap().last().copied()
    }
}

impl Notifier for RecordingNotifier {
    fn show_progress(&self, snapshot: &StepSnapshot) {
        self.progress.lock().unwrap().push(snapshot.count);
    }

    fn show_achievement(&self, event: &AchievementEvent) {
        self.achievements.lock().unwrap().push(event.clone());
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub db: Database,
    pub settings: Arc<SettingsStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub permissions: Arc<StaticPermissions>,
    pub counter: Arc<SimulatedSource>,
    pub detector: Arc<SimulatedSource>,
    pub accelerometer: Arc<SimulatedSource>,
    pub supervisor: ServiceSupervisor,
}

impl Harness {
    /// A device whose best sensor is `best`; better tiers are absent.
    pub fn new(best: SensorTier, configure: impl FnOnce(&mut TrackerSettings)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("steps.sqlite3")).unwrap();

        let mut settings = TrackerSettings::default();
        settings.supervisor.restart_delay_ms = 10;
        configure(&mut settings);
        let settings =
            Arc::new(SettingsStore::create(dir.path().join("settings.json"), settings).unwrap());

        let source = |tier: SensorTier| {
            let source = SimulatedSource::new(tier).with_batching(tier == SensorTier::Counter);
            source.set_present(tier >= best);
            Arc::new(source)
        };
        let counter = source(SensorTier::Counter);
        let detector = source(SensorTier::Detector);
        let accelerometer = source(SensorTier::Accelerometer);
        let sources: Vec<Arc<dyn SensorSource>> =
            vec![counter.clone(), detector.clone(), accelerometer.clone()];

        let notifier = Arc::new(RecordingNotifier::default());
        let permissions = Arc::new(StaticPermissions::granted());
        let deps = ServiceDeps::with_database(db.clone(), sources, settings.clone(), notifier.clone());
        let supervisor = ServiceSupervisor::new(deps, permissions.clone());

        Self {
            dir,
            db,
            settings,
            notifier,
            permissions,
            counter,
            detector,
            accelerometer,
            supervisor,
        }
    }

    pub fn pulses(&self, n: usize) {
        for _ in 0..n {
            assert!(self.detector.emit(stepwarden_lib::sensing::SensorReading::pulse(Utc::now())));
        }
    }

    pub async fn stored_steps(&self) -> Option<u64> {
        self.db
            .get_record_for_date("local", today())
            .await
            .unwrap()
            .map(|record| record.steps)
    }
}

pub fn today() -> NaiveDate {
    local_day(Utc::now())
}

/// Poll `check` until it yields true or two seconds pass.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
