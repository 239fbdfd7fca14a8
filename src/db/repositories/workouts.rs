use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime, to_i64, to_u64},
    models::WorkoutProgress,
};

fn row_to_workout(row: &Row) -> Result<WorkoutProgress> {
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let start_steps: Option<i64> = row.get("start_steps")?;
    let steps: i64 = row.get("steps")?;

    Ok(WorkoutProgress {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
        start_steps: start_steps
            .map(|value| to_u64(value, "start_steps"))
            .transpose()?,
        steps: to_u64(steps, "steps")?,
    })
}

impl Database {
    pub async fn start_workout(&self, user_id: &str, at: DateTime<Utc>) -> Result<WorkoutProgress> {
        let workout = WorkoutProgress {
            id: format!("wo_{}", uuid::Uuid::new_v4()),
            user_id: user_id.to_string(),
            started_at: at,
            ended_at: None,
            start_steps: None,
            steps: 0,
        };
        let record = workout.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO workouts (id, user_id, started_at, steps, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?3)",
                params![record.id, record.user_id, record.started_at.to_rfc3339()],
            )?;
            Ok(())
        })
        .await?;
        Ok(workout)
    }

    pub async fn end_workout(&self, workout_id: &str, at: DateTime<Utc>) -> Result<()> {
        let workout_id = workout_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE workouts SET ended_at = ?1, updated_at = ?1 WHERE id = ?2",
                params![at.to_rfc3339(), workout_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_workout(&self, workout_id: &str) -> Result<Option<WorkoutProgress>> {
        let workout_id = workout_id.to_string();
        self.execute(move |conn| {
            let workout = conn
                .query_row(
                    "SELECT id, user_id, started_at, ended_at, start_steps, steps
                     FROM workouts WHERE id = ?1",
                    params![workout_id],
                    |row| Ok(row_to_workout(row)),
                )
                .optional()?
                .transpose()?;
            Ok(workout)
        })
        .await
    }

    /// Credit in-progress workouts with the steps taken since each one first
    /// saw a daily count. Returns the number of workouts touched.
    pub async fn push_workout_steps(
        &self,
        user_id: &str,
        daily_steps: u64,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let daily = to_i64(daily_steps)?;
            let touched = conn.execute(
                "UPDATE workouts
                 SET start_steps = COALESCE(start_steps, ?2),
                     steps = MAX(0, ?2 - COALESCE(start_steps, ?2)),
                     updated_at = ?3
                 WHERE user_id = ?1 AND ended_at IS NULL",
                params![user_id, daily, at.to_rfc3339()],
            )?;
            Ok(touched)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 7, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn workout_counts_steps_since_first_update() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("workouts.sqlite3")).unwrap();
        let workout = db.start_workout("u1", at(0)).await.unwrap();

        assert_eq!(db.push_workout_steps("u1", 2_000, at(1)).await.unwrap(), 1);
        db.push_workout_steps("u1", 2_750, at(10)).await.unwrap();

        let stored = db.get_workout(&workout.id).await.unwrap().unwrap();
        assert_eq!(stored.start_steps, Some(2_000));
        assert_eq!(stored.steps, 750);

        db.end_workout(&workout.id, at(20)).await.unwrap();
        assert_eq!(db.push_workout_steps("u1", 3_000, at(21)).await.unwrap(), 0);
        let stored = db.get_workout(&workout.id).await.unwrap().unwrap();
        assert_eq!(stored.steps, 750);
        assert_eq!(stored.ended_at, Some(at(20)));
    }
}
