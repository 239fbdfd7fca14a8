use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{PoisonError, RwLock},
    time::Duration,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PedometerSettings {
    pub threshold: f64,
    pub min_step_interval_ms: u64,
    /// Applied to the threshold while the accelerometer reports unreliable accuracy.
    pub unreliable_threshold_factor: f64,
}

impl Default for PedometerSettings {
    fn default() -> Self {
        Self {
            threshold: 11.0,
            min_step_interval_ms: 300,
            unreliable_threshold_factor: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct BatchSettings {
    pub max_batch_size: usize,
    pub max_batch_age_secs: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            max_batch_age_secs: 180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PowerSettings {
    pub normal_sampling_delay_ms: u64,
    pub idle_sampling_delay_ms: u64,
    pub idle_batch_latency_ms: u64,
    pub normal_flush_interval_secs: u64,
    pub idle_flush_interval_secs: u64,
}

impl Default for PowerSettings {
    fn default() -> Self {
        Self {
            normal_sampling_delay_ms: 60,
            idle_sampling_delay_ms: 200,
            idle_batch_latency_ms: 5_000,
            normal_flush_interval_secs: 60,
            idle_flush_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SupervisorSettings {
    pub restart_delay_ms: u64,
    pub health_check_interval_secs: u64,
    /// Consecutive failed restarts before diagnostics report escalation.
    pub max_restart_failures: u32,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            restart_delay_ms: 500,
            health_check_interval_secs: 30,
            max_restart_failures: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackerSettings {
    pub user_id: String,
    pub daily_goal: u32,
    /// Personal step length; the population average is used when unset.
    pub step_length_m: Option<f64>,
    pub pedometer: PedometerSettings,
    pub batch: BatchSettings,
    pub power: PowerSettings,
    pub supervisor: SupervisorSettings,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            user_id: "local".into(),
            daily_goal: 10_000,
            step_length_m: None,
            pedometer: PedometerSettings::default(),
            batch: BatchSettings::default(),
            power: PowerSettings::default(),
            supervisor: SupervisorSettings::default(),
        }
    }
}

impl TrackerSettings {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.supervisor.restart_delay_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.supervisor.health_check_interval_secs)
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<TrackerSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(settings) => settings,
                Err(err) => {
                    log::warn!(
                        "Ignoring unreadable settings at {}: {err}",
                        path.display()
                    );
                    TrackerSettings::default()
                }
            }
        } else {
            TrackerSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Create a store seeded with `settings` and write it out immediately.
    pub fn create(path: PathBuf, settings: TrackerSettings) -> Result<Self> {
        let store = Self {
            path,
            data: RwLock::new(settings),
        };
        {
            let guard = store.data.read().unwrap_or_else(PoisonError::into_inner);
            store.persist(&guard)?;
        }
        Ok(store)
    }

    pub fn current(&self) -> TrackerSettings {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update_daily_goal(&self, goal: u32) -> Result<()> {
        self.update(|settings| settings.daily_goal = goal)
    }

    pub fn update<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut TrackerSettings),
    {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        apply(&mut guard);
        self.persist(&guard)
    }

    fn persist(&self, data: &TrackerSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: TrackerSettings = serde_json::from_str(&contents)?;
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        *guard = data;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        assert_eq!(store.current(), TrackerSettings::default());
    }

    #[test]
    fn goal_update_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();
        store.update_daily_goal(8_000).unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.current().daily_goal, 8_000);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"userId":"alice","batch":{"maxBatchSize":4}}"#).unwrap();

        let settings = SettingsStore::new(path).unwrap().current();
        assert_eq!(settings.user_id, "alice");
        assert_eq!(settings.batch.max_batch_size, 4);
        assert_eq!(settings.batch.max_batch_age_secs, 180);
        assert_eq!(settings.daily_goal, 10_000);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();

        let store = SettingsStore::new(path).unwrap();
        assert_eq!(store.current(), TrackerSettings::default());
    }
}
