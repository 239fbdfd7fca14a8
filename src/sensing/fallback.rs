//! Picks the best sensor tier that will register.

use std::sync::Arc;

use log::{error, info, warn};

use crate::error::{TrackerError, TrackerResult};

use super::power::SamplingPlan;
use super::source::{ActiveTier, SensorListener, SensorSource};

pub struct FallbackSelector {
    sources: Vec<Arc<dyn SensorSource>>,
    active: Option<usize>,
    registrations: u64,
    unavailable_reported: bool,
}

impl FallbackSelector {
    /// Sources are tried best tier first regardless of the order given.
    pub fn new(mut sources: Vec<Arc<dyn SensorSource>>) -> Self {
        sources.sort_by_key(|source| source.tier());
        Self {
            sources,
            active: None,
            registrations: 0,
            unavailable_reported: false,
        }
    }

    /// Register the first tier that accepts `plan`. Any active registration is
    /// released first, so at most one source is ever registered.
    pub fn select(
        &mut self,
        plan: SamplingPlan,
        listener: Arc<dyn SensorListener>,
    ) -> TrackerResult<ActiveTier> {
        self.release();

        for (index, source) in self.sources.iter().enumerate() {
            let tier = source.tier();
            if !source.is_present() {
                info!("{} sensor not present, falling back", tier.as_str());
                continue;
            }

            let params = plan.params_for(source.supports_batching());
            match source.register(params, Arc::clone(&listener)) {
                Ok(()) => {
                    info!(
                        "Registered {} sensor (delay {:?}, latency {:?})",
                        tier.as_str(),
                        params.sampling_delay,
                        params.max_report_latency
                    );
                    self.active = Some(index);
                    self.registrations += 1;
                    self.unavailable_reported = false;
                    return Ok(ActiveTier::from(tier));
                }
                Err(err) => warn!("{err}; trying next tier"),
            }
        }

        if !self.unavailable_reported {
            error!("No step sensor could be registered; step tracking disabled");
            self.unavailable_reported = true;
        }
        Err(TrackerError::SensorUnavailable)
    }

    pub fn release(&mut self) {
        if let Some(index) = self.active.take() {
            let source = &self.sources[index];
            source.unregister();
            info!("Unregistered {} sensor", source.tier().as_str());
        }
    }

    /// The platform dropped the active registration on its own.
    pub fn mark_lost(&mut self) {
        self.release();
    }

    pub fn active_tier(&self) -> ActiveTier {
        self.active
            .map(|index| ActiveTier::from(self.sources[index].tier()))
            .unwrap_or(ActiveTier::Unavailable)
    }

    pub fn registrations(&self) -> u64 {
        self.registrations
    }
}

impl Drop for FallbackSelector {
    fn drop(&mut self) {
        self.release();
    }
}
