//! In-process sensor used by the headless runner and by tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::source::{
    RegistrationError, SamplingParams, SensorAccuracy, SensorListener, SensorReading,
    SensorSource, SensorTier,
};

struct SimState {
    present: bool,
    rejecting: bool,
    listener: Option<Arc<dyn SensorListener>>,
    params: Option<SamplingParams>,
    registrations: u32,
    unregistrations: u32,
    param_history: Vec<SamplingParams>,
}

pub struct SimulatedSource {
    tier: SensorTier,
    batching: bool,
    state: Mutex<SimState>,
}

impl SimulatedSource {
    pub fn new(tier: SensorTier) -> Self {
        Self {
            tier,
            batching: false,
            state: Mutex::new(SimState {
                present: true,
                rejecting: false,
                listener: None,
                params: None,
                registrations: 0,
                unregistrations: 0,
                param_history: Vec::new(),
            }),
        }
    }

    /// A sensor the device does not have.
    pub fn absent(tier: SensorTier) -> Self {
        let source = Self::new(tier);
        source.set_present(false);
        source
    }

    pub fn with_batching(mut self, batching: bool) -> Self {
        self.batching = batching;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_present(&self, present: bool) {
        self.lock().present = present;
    }

    /// Make subsequent `register` calls fail while the hardware stays present.
    pub fn set_rejecting(&self, rejecting: bool) {
        self.lock().rejecting = rejecting;
    }

    /// Deliver a reading to the registered listener. Returns false when unregistered.
    pub fn emit(&self, reading: SensorReading) -> bool {
        let listener = self.lock().listener.clone();
        match listener {
            Some(listener) => {
                listener.on_reading(reading);
                true
            }
            None => false,
        }
    }

    pub fn emit_accuracy(&self, accuracy: SensorAccuracy) -> bool {
        let listener = self.lock().listener.clone();
        match listener {
            Some(listener) => {
                listener.on_accuracy_changed(self.tier, accuracy);
                true
            }
            None => false,
        }
    }

    /// Simulate the platform silently dropping the registration.
    pub fn drop_registration(&self) -> bool {
        let listener = {
            let mut state = self.lock();
            state.params = None;
            state.listener.take()
        };
        match listener {
            Some(listener) => {
                listener.on_registration_lost(self.tier);
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.lock().listener.is_some()
    }

    pub fn registrations(&self) -> u32 {
        self.lock().registrations
    }

    pub fn unregistrations(&self) -> u32 {
        self.lock().unregistrations
    }

    pub fn current_params(&self) -> Option<SamplingParams> {
        self.lock().params
    }

    pub fn param_history(&self) -> Vec<SamplingParams> {
        self.lock().param_history.clone()
    }
}

impl SensorSource for SimulatedSource {
    fn tier(&self) -> SensorTier {
        self.tier
    }

    fn is_present(&self) -> bool {
        self.lock().present
    }

    fn supports_batching(&self) -> bool {
        self.batching
    }

    fn register(
        &self,
        params: SamplingParams,
        listener: Arc<dyn SensorListener>,
    ) -> Result<(), RegistrationError> {
        let mut state = self.lock();
        if !state.present {
            return Err(RegistrationError::NotPresent(self.tier.as_str()));
        }
        if state.rejecting {
            return Err(RegistrationError::Rejected {
                tier: self.tier.as_str(),
                reason: "simulated rejection".into(),
            });
        }
        state.listener = Some(listener);
        state.params = Some(params);
        state.registrations += 1;
        state.param_history.push(params);
        Ok(())
    }

    fn unregister(&self) {
        let mut state = self.lock();
        if state.listener.take().is_some() {
            state.params = None;
            state.unregistrations += 1;
        }
    }
}
