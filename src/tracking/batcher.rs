//! Buffers accepted daily counts and writes them out in batches.
//!
//! The buffer is touched from the sensor callback, so it sits behind a plain
//! mutex that is never held across an await. Writers take the async flush
//! gate, which keeps flushes (and resets) strictly one at a time.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::{TrackerError, TrackerResult};
use crate::models::StepObservation;
use crate::settings::BatchSettings;

use super::ports::StepStore;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    pub max_batch_age: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::from(&BatchSettings::default())
    }
}

impl From<&BatchSettings> for BatchConfig {
    fn from(settings: &BatchSettings) -> Self {
        Self {
            max_batch_size: settings.max_batch_size.max(1),
            max_batch_age: Duration::from_secs(settings.max_batch_age_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FlushReason {
    Threshold,
    Periodic,
    EnteredIdle,
    Shutdown,
    Manual,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushOutcome {
    /// Daily records written, one per calendar day in the batch.
    pub records_written: usize,
    pub observations_flushed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub pending: usize,
    pub flushes: u64,
    pub failures: u64,
    pub last_flush_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct BatchBuffer {
    pending: Vec<StepObservation>,
    next_seq: u64,
    flushes: u64,
    failures: u64,
    last_flush_at: Option<DateTime<Utc>>,
}

pub struct StepBatcher {
    config: BatchConfig,
    user_id: String,
    store: Arc<dyn StepStore>,
    buffer: Mutex<BatchBuffer>,
    gate: tokio::sync::Mutex<()>,
}

impl StepBatcher {
    pub fn new(config: BatchConfig, user_id: impl Into<String>, store: Arc<dyn StepStore>) -> Self {
        Self {
            config,
            user_id: user_id.into(),
            store,
            buffer: Mutex::new(BatchBuffer::default()),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BatchBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Append an observation. Returns true when the batch is due for a flush.
    pub fn record(&self, mut observation: StepObservation) -> bool {
        let mut buffer = self.lock();
        buffer.next_seq += 1;
        observation.seq = buffer.next_seq;
        buffer.pending.push(observation);
        self.is_due_locked(&buffer)
    }

    pub fn is_due(&self) -> bool {
        self.is_due_locked(&self.lock())
    }

    fn is_due_locked(&self, buffer: &BatchBuffer) -> bool {
        let (Some(oldest), Some(newest)) = (buffer.pending.first(), buffer.pending.last()) else {
            return false;
        };
        if buffer.pending.len() >= self.config.max_batch_size {
            return true;
        }
        let age = newest.timestamp - oldest.timestamp;
        age.to_std()
            .map(|age| age >= self.config.max_batch_age)
            .unwrap_or(false)
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Latest pending count per day, oldest day first.
    pub fn pending_snapshot(&self) -> Vec<StepObservation> {
        latest_per_day(&self.lock().pending)
    }

    pub fn stats(&self) -> BatchStats {
        let buffer = self.lock();
        BatchStats {
            pending: buffer.pending.len(),
            flushes: buffer.flushes,
            failures: buffer.failures,
            last_flush_at: buffer.last_flush_at,
        }
    }

    /// Remove and return everything still pending, oldest first.
    pub fn take_pending(&self) -> Vec<StepObservation> {
        std::mem::take(&mut self.lock().pending)
    }

    /// Queue observations an earlier instance could not write. They keep
    /// their order and are renumbered after anything already pending.
    pub fn restore(&self, carried: &[StepObservation]) {
        if carried.is_empty() {
            return;
        }
        let mut buffer = self.lock();
        for observation in carried {
            buffer.next_seq += 1;
            let mut observation = observation.clone();
            observation.seq = buffer.next_seq;
            buffer.pending.push(observation);
        }
        log_info!("restored {} unsaved observation(s)", carried.len());
    }

    /// Drop pending observations for `day`. Used by an explicit reset, which
    /// writes its own zero record.
    pub fn discard_day(&self, day: NaiveDate) -> usize {
        let mut buffer = self.lock();
        let before = buffer.pending.len();
        buffer.pending.retain(|observation| observation.day != day);
        before - buffer.pending.len()
    }

    /// Persist the latest observation of every day in the batch. On failure
    /// the batch is kept for the next attempt.
    pub async fn flush(&self, reason: FlushReason) -> TrackerResult<FlushOutcome> {
        let _gate = self.gate.lock().await;

        let (records, high_seq, observations) = {
            let buffer = self.lock();
            let Some(high_seq) = buffer.pending.last().map(|observation| observation.seq) else {
                return Ok(FlushOutcome::default());
            };
            (latest_per_day(&buffer.pending), high_seq, buffer.pending.len())
        };

        for observation in &records {
            let record = observation.to_record(&self.user_id);
            if let Err(err) = self.store.upsert_daily_record(&record).await {
                self.lock().failures += 1;
                log_warn!(
                    "{:?} flush failed, keeping {} pending observation(s): {err:#}",
                    reason,
                    observations
                );
                return Err(TrackerError::persistence(err));
            }
        }

        let mut buffer = self.lock();
        // Anything recorded while the write was in flight stays pending.
        buffer.pending.retain(|observation| observation.seq > high_seq);
        buffer.flushes += 1;
        buffer.last_flush_at = Some(Utc::now());
        log_debug!(
            "{:?} flush wrote {} day(s) from {} observation(s), {} still pending",
            reason,
            records.len(),
            observations,
            buffer.pending.len()
        );

        Ok(FlushOutcome {
            records_written: records.len(),
            observations_flushed: observations,
        })
    }

    /// Run `reset` and write the zero record while no flush can interleave.
    /// `reset` must zero the in-memory state and return the (day, goal) to write.
    pub async fn reset_day<F>(&self, at: DateTime<Utc>, reset: F) -> TrackerResult<NaiveDate>
    where
        F: FnOnce() -> (NaiveDate, u32) + Send,
    {
        let _gate = self.gate.lock().await;
        let (day, goal) = reset();
        self.discard_day(day);
        self.store
            .reset_daily_record(&self.user_id, day, goal, at)
            .await
            .map_err(TrackerError::persistence)?;
        log_info!("daily steps reset for {} on {}", self.user_id, day);
        Ok(day)
    }
}

fn latest_per_day(pending: &[StepObservation]) -> Vec<StepObservation> {
    let mut latest: BTreeMap<NaiveDate, &StepObservation> = BTreeMap::new();
    for observation in pending {
        latest.insert(observation.day, observation);
    }
    latest.into_values().cloned().collect()
}
