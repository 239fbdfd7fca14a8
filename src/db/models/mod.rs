pub mod daily_step_record;
pub mod goal;

pub use daily_step_record::{active_minutes_for, DailyStepRecord, STEPS_PER_ACTIVE_MINUTE};
pub use goal::{GoalProgress, WorkoutProgress, DAILY_STEPS_GOAL_KIND};
