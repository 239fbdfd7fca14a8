//! Power-state driven sampling and persistence cadence.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::settings::PowerSettings;

use super::source::SamplingParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerState {
    #[default]
    Normal,
    /// Device idle / power-saving mode.
    Idle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PowerProfile {
    pub normal_sampling_delay: Duration,
    pub idle_sampling_delay: Duration,
    pub idle_batch_latency: Duration,
    pub normal_flush_interval: Duration,
    pub idle_flush_interval: Duration,
}

impl Default for PowerProfile {
    fn default() -> Self {
        Self::from(&PowerSettings::default())
    }
}

impl From<&PowerSettings> for PowerProfile {
    fn from(settings: &PowerSettings) -> Self {
        let normal_delay = Duration::from_millis(settings.normal_sampling_delay_ms);
        // Idle sampling is never finer than normal sampling.
        let idle_delay = Duration::from_millis(settings.idle_sampling_delay_ms).max(normal_delay);
        Self {
            normal_sampling_delay: normal_delay,
            idle_sampling_delay: idle_delay,
            idle_batch_latency: Duration::from_millis(settings.idle_batch_latency_ms),
            normal_flush_interval: Duration::from_secs(settings.normal_flush_interval_secs.max(1)),
            idle_flush_interval: Duration::from_secs(settings.idle_flush_interval_secs.max(1)),
        }
    }
}

/// What to ask of whichever sensor ends up registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingPlan {
    pub sampling_delay: Duration,
    /// Only honoured by sensors with hardware buffering.
    pub batch_latency: Duration,
}

impl SamplingPlan {
    pub fn params_for(&self, supports_batching: bool) -> SamplingParams {
        SamplingParams {
            sampling_delay: self.sampling_delay,
            max_report_latency: if supports_batching {
                self.batch_latency
            } else {
                Duration::ZERO
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PowerTransition {
    pub from: PowerState,
    pub to: PowerState,
    pub plan: SamplingPlan,
    pub flush_interval: Duration,
    /// Entering idle flushes immediately.
    pub flush_now: bool,
}

pub struct PowerStateController {
    profile: PowerProfile,
    state: PowerState,
}

impl PowerStateController {
    pub fn new(profile: PowerProfile, initial: PowerState) -> Self {
        Self {
            profile,
            state: initial,
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn plan(&self) -> SamplingPlan {
        match self.state {
            PowerState::Normal => SamplingPlan {
                sampling_delay: self.profile.normal_sampling_delay,
                batch_latency: Duration::ZERO,
            },
            PowerState::Idle => SamplingPlan {
                sampling_delay: self.profile.idle_sampling_delay,
                batch_latency: self.profile.idle_batch_latency,
            },
        }
    }

    pub fn flush_interval(&self) -> Duration {
        match self.state {
            PowerState::Normal => self.profile.normal_flush_interval,
            PowerState::Idle => self.profile.idle_flush_interval,
        }
    }

    /// Level-triggered: reporting the current level again yields no transition.
    pub fn on_power_state(&mut self, next: PowerState) -> Option<PowerTransition> {
        if next == self.state {
            return None;
        }
        let from = self.state;
        self.state = next;
        Some(PowerTransition {
            from,
            to: next,
            plan: self.plan(),
            flush_interval: self.flush_interval(),
            flush_now: next == PowerState::Idle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_level_is_ignored() {
        let mut controller = PowerStateController::new(PowerProfile::default(), PowerState::Normal);
        assert!(controller.on_power_state(PowerState::Normal).is_none());
        assert!(controller.on_power_state(PowerState::Idle).is_some());
        assert!(controller.on_power_state(PowerState::Idle).is_none());
    }

    #[test]
    fn idle_is_coarser_and_batched() {
        let mut controller = PowerStateController::new(PowerProfile::default(), PowerState::Normal);
        let normal = controller.plan();
        assert_eq!(normal.batch_latency, Duration::ZERO);
        assert_eq!(controller.flush_interval(), Duration::from_secs(60));

        let transition = controller.on_power_state(PowerState::Idle).unwrap();
        assert!(transition.flush_now);
        assert!(transition.plan.sampling_delay > normal.sampling_delay);
        assert_eq!(transition.plan.batch_latency, Duration::from_secs(5));
        assert_eq!(transition.flush_interval, Duration::from_secs(300));
    }

    #[test]
    fn waking_restores_normal_cadence() {
        let mut controller = PowerStateController::new(PowerProfile::default(), PowerState::Idle);
        let idle_delay = controller.plan().sampling_delay;

        let transition = controller.on_power_state(PowerState::Normal).unwrap();
        assert!(!transition.flush_now);
        assert!(transition.plan.sampling_delay <= idle_delay);
        assert_eq!(transition.flush_interval, Duration::from_secs(60));
    }

    #[test]
    fn batching_only_for_capable_sensors() {
        let controller = PowerStateController::new(PowerProfile::default(), PowerState::Idle);
        let plan = controller.plan();
        assert_eq!(plan.params_for(true).max_report_latency, Duration::from_secs(5));
        assert_eq!(plan.params_for(false).max_report_latency, Duration::ZERO);
    }

    #[test]
    fn idle_delay_never_finer_than_normal() {
        let settings = PowerSettings {
            normal_sampling_delay_ms: 200,
            idle_sampling_delay_ms: 20,
            ..PowerSettings::default()
        };
        let profile = PowerProfile::from(&settings);
        assert_eq!(profile.idle_sampling_delay, Duration::from_millis(200));
    }
}
