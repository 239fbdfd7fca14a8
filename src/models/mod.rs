mod observation;
mod snapshot;

use chrono::{DateTime, Local, NaiveDate, Utc};

pub use observation::StepObservation;
pub use snapshot::{AchievementEvent, StepSnapshot};

/// Calendar day a timestamp falls on, in the device's local time zone.
pub fn local_day(timestamp: DateTime<Utc>) -> NaiveDate {
    timestamp.with_timezone(&Local).date_naive()
}
