pub mod fallback;
pub mod pedometer;
pub mod power;
pub mod simulated;
pub mod source;

pub use fallback::FallbackSelector;
pub use pedometer::{PedometerAlgorithm, PedometerConfig};
pub use power::{PowerProfile, PowerState, PowerStateController, PowerTransition, SamplingPlan};
pub use simulated::SimulatedSource;
pub use source::{
    ActiveTier, RegistrationError, SamplingParams, SensorAccuracy, SensorListener, SensorReading,
    SensorSource, SensorTier, SensorValue,
};
