pub mod db;
pub mod error;
pub mod models;
pub mod sensing;
pub mod settings;
pub mod supervisor;
pub mod tracking;
pub mod utils;

use std::{path::Path, sync::Arc};

use anyhow::Context;

pub use db::Database;
pub use error::{TrackerError, TrackerResult, UnsavedSteps};
pub use models::{AchievementEvent, StepSnapshot};
pub use sensing::{ActiveTier, PowerState, SensorSource, SensorTier};
pub use settings::{SettingsStore, TrackerSettings};
pub use supervisor::{Diagnostics, PermissionChecker, ServiceState, ServiceSupervisor};
pub use tracking::{Notifier, ServiceDeps, StepServiceHandle, StepTracking};
pub use utils::init_logging;

pub const DATABASE_FILE: &str = "stepwarden.sqlite3";
pub const SETTINGS_FILE: &str = "settings.json";

/// Everything a host keeps alive for the lifetime of the process.
pub struct TrackerApp {
    pub db: Database,
    pub settings: Arc<SettingsStore>,
    pub supervisor: ServiceSupervisor,
}

impl TrackerApp {
    /// Open (or create) the database and settings under `data_dir` and wire a
    /// supervisor around them. Nothing is started yet.
    pub fn open(
        data_dir: &Path,
        sources: Vec<Arc<dyn SensorSource>>,
        permissions: Arc<dyn PermissionChecker>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let db = Database::new(data_dir.join(DATABASE_FILE))?;
        let settings = Arc::new(SettingsStore::new(data_dir.join(SETTINGS_FILE))?);
        let deps = ServiceDeps::with_database(db.clone(), sources, settings.clone(), notifier);

        log::info!("stepwarden data at {}", data_dir.display());
        Ok(Self {
            db,
            settings,
            supervisor: ServiceSupervisor::new(deps, permissions),
        })
    }
}
