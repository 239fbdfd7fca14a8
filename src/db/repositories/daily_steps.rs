use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{format_date, parse_date, parse_datetime, to_i64, to_u32, to_u64},
    models::DailyStepRecord,
};

const RECORD_COLUMNS: &str =
    "id, user_id, date, steps, goal, calories, distance_m, active_minutes, created_at, updated_at";

fn row_to_record(row: &Row) -> Result<DailyStepRecord> {
    let date: String = row.get("date")?;
    let steps: i64 = row.get("steps")?;
    let goal: i64 = row.get("goal")?;
    let active_minutes: i64 = row.get("active_minutes")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(DailyStepRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        date: parse_date(&date, "date")?,
        steps: to_u64(steps, "steps")?,
        goal: to_u32(goal, "goal")?,
        calories: row.get("calories")?,
        distance_m: row.get("distance_m")?,
        active_minutes: to_u32(active_minutes, "active_minutes")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    /// Insert the day's record or overwrite the existing one for the same
    /// (user, date). The original id and `created_at` survive the overwrite.
    pub async fn upsert_daily_record(&self, record: &DailyStepRecord) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO daily_steps (id, user_id, date, steps, goal, calories, distance_m, active_minutes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(user_id, date) DO UPDATE SET
                     steps = excluded.steps,
                     goal = excluded.goal,
                     calories = excluded.calories,
                     distance_m = excluded.distance_m,
                     active_minutes = excluded.active_minutes,
                     updated_at = excluded.updated_at",
                params![
                    record.id,
                    record.user_id,
                    format_date(record.date),
                    to_i64(record.steps)?,
                    record.goal,
                    record.calories,
                    record.distance_m,
                    record.active_minutes,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_record_for_date(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyStepRecord>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS}
                 FROM daily_steps
                 WHERE user_id = ?1 AND date = ?2"
            ))?;

            let mut rows = stmt.query(params![user_id, format_date(date)])?;
            let record = match rows.next()? {
                Some(row) => Some(row_to_record(row)?),
                None => None,
            };
            Ok(record)
        })
        .await
    }

    /// Records between `start` and `end`, both inclusive, oldest first.
    pub async fn get_records_in_range(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyStepRecord>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS}
                 FROM daily_steps
                 WHERE user_id = ?1 AND date >= ?2 AND date <= ?3
                 ORDER BY date ASC"
            ))?;

            let mut rows = stmt.query(params![user_id, format_date(start), format_date(end)])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_record(row)?);
            }

            Ok(records)
        })
        .await
    }

    /// Explicit user reset: the only path that lowers a day's count.
    pub async fn reset_daily_record(
        &self,
        user_id: &str,
        date: NaiveDate,
        goal: u32,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let record = DailyStepRecord::new(user_id, date, 0, goal, 0.0, 0.0, at);
        self.upsert_daily_record(&record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("steps.sqlite3")).unwrap();
        (dir, db)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn upsert_keeps_one_row_per_day() {
        let (_dir, db) = open();
        let first = DailyStepRecord::new("u1", day(10), 1_200, 10_000, 48.0, 914.4, at(9));
        db.upsert_daily_record(&first).await.unwrap();

        let second = DailyStepRecord::new("u1", day(10), 3_400, 10_000, 136.0, 2590.8, at(12));
        db.upsert_daily_record(&second).await.unwrap();

        let stored = db.get_record_for_date("u1", day(10)).await.unwrap().unwrap();
        assert_eq!(stored.steps, 3_400);
        assert_eq!(stored.id, first.id);
        assert_eq!(stored.created_at, at(9));
        assert_eq!(stored.updated_at, at(12));
        assert_eq!(stored.active_minutes, 34);

        let all = db.get_records_in_range("u1", day(1), day(31)).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn range_query_is_inclusive_and_ordered() {
        let (_dir, db) = open();
        for d in [12, 10, 11, 14] {
            let record = DailyStepRecord::new("u1", day(d), u64::from(d) * 100, 10_000, 0.0, 0.0, at(8));
            db.upsert_daily_record(&record).await.unwrap();
        }
        let other_user = DailyStepRecord::new("u2", day(11), 5, 10_000, 0.0, 0.0, at(8));
        db.upsert_daily_record(&other_user).await.unwrap();

        let records = db.get_records_in_range("u1", day(10), day(12)).await.unwrap();
        let dates: Vec<_> = records.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day(10), day(11), day(12)]);
    }

    #[tokio::test]
    async fn missing_day_is_absent() {
        let (_dir, db) = open();
        assert!(db.get_record_for_date("u1", day(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reset_zeroes_the_day() {
        let (_dir, db) = open();
        let record = DailyStepRecord::new("u1", day(10), 7_000, 10_000, 280.0, 5334.0, at(9));
        db.upsert_daily_record(&record).await.unwrap();

        db.reset_daily_record("u1", day(10), 10_000, at(15)).await.unwrap();

        let stored = db.get_record_for_date("u1", day(10)).await.unwrap().unwrap();
        assert_eq!(stored.steps, 0);
        assert_eq!(stored.calories, 0.0);
        assert_eq!(stored.id, record.id);
    }
}
