pub mod batcher;
pub mod commands;
pub mod live;
pub mod pipeline;
pub mod ports;
pub mod service;
pub mod state;
pub mod sync_bridge;
mod worker;

pub use batcher::{BatchConfig, BatchStats, FlushOutcome, FlushReason, StepBatcher};
pub use commands::{StepServiceHandle, StepTracking};
pub use live::StepBroadcaster;
pub use pipeline::{StepPipeline, WorkerCommand};
pub use ports::{GoalTracker, LogNotifier, Notifier, NoopWorkoutSink, StepStore, WorkoutSink};
pub use service::{ServiceDeps, StepService};
pub use state::{StepUpdate, TrackerState};
pub use sync_bridge::{StepMetrics, StepModel, SyncBridge, SyncUpdate};
