use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{format_date, parse_datetime, to_i64, to_u64},
    models::{GoalProgress, DAILY_STEPS_GOAL_KIND},
};

fn row_to_goal(row: &Row) -> Result<GoalProgress> {
    let target_value: i64 = row.get("target_value")?;
    let current_value: i64 = row.get("current_value")?;
    let completed: i64 = row.get("completed")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(GoalProgress {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        target_value: to_u64(target_value, "target_value")?,
        current_value: to_u64(current_value, "current_value")?,
        completed: completed != 0,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn insert_daily_step_goal(
        &self,
        user_id: &str,
        target_value: u64,
        at: DateTime<Utc>,
    ) -> Result<GoalProgress> {
        let goal = GoalProgress {
            id: format!("goal_{}", uuid::Uuid::new_v4()),
            user_id: user_id.to_string(),
            target_value,
            current_value: 0,
            completed: false,
            updated_at: at,
        };
        let record = goal.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO goals (id, user_id, kind, target_value, current_value, completed, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 0, 0, ?5, ?5)",
                params![
                    record.id,
                    record.user_id,
                    DAILY_STEPS_GOAL_KIND,
                    to_i64(record.target_value)?,
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(goal)
    }

    /// The most recently created daily-steps goal for the user.
    pub async fn get_daily_step_goal(&self, user_id: &str) -> Result<Option<GoalProgress>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, target_value, current_value, completed, updated_at
                 FROM goals
                 WHERE user_id = ?1 AND kind = ?2
                 ORDER BY created_at DESC
                 LIMIT 1",
            )?;

            let mut rows = stmt.query(params![user_id, DAILY_STEPS_GOAL_KIND])?;
            let goal = match rows.next()? {
                Some(row) => Some(row_to_goal(row)?),
                None => None,
            };
            Ok(goal)
        })
        .await
    }

    /// Write the current value; completion latches once the target is reached.
    pub async fn update_goal_progress(
        &self,
        goal_id: &str,
        current_value: u64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let goal_id = goal_id.to_string();
        self.execute(move |conn| {
            let current = to_i64(current_value)?;
            let rows_affected = conn.execute(
                "UPDATE goals
                 SET current_value = ?1,
                     completed_at = CASE
                         WHEN completed = 0 AND ?1 >= target_value THEN ?2
                         ELSE completed_at
                     END,
                     completed = CASE WHEN ?1 >= target_value THEN 1 ELSE completed END,
                     updated_at = ?2
                 WHERE id = ?3",
                params![current, at.to_rfc3339(), goal_id],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("Goal {goal_id} not found"));
            }
            Ok(())
        })
        .await
    }

    pub async fn get_goal(&self, goal_id: &str) -> Result<Option<GoalProgress>> {
        let goal_id = goal_id.to_string();
        self.execute(move |conn| {
            let goal = conn
                .query_row(
                    "SELECT id, user_id, target_value, current_value, completed, updated_at
                     FROM goals WHERE id = ?1",
                    params![goal_id],
                    |row| Ok(row_to_goal(row)),
                )
                .optional()?
                .transpose()?;
            Ok(goal)
        })
        .await
    }

    /// Remember that the goal for `date` was reached. Returns false when the
    /// day was already recorded; the first record is kept.
    pub async fn record_daily_achievement(
        &self,
        user_id: &str,
        date: NaiveDate,
        steps: u64,
        goal: u32,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO daily_achievements (user_id, date, steps, goal, achieved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user_id,
                    format_date(date),
                    to_i64(steps)?,
                    goal,
                    at.to_rfc3339()
                ],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    /// Whether the goal for `date` was already celebrated, or the stored
    /// record meets the goal it carries.
    pub async fn is_daily_goal_met(&self, user_id: &str, date: NaiveDate) -> Result<bool> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let met: i64 = conn.query_row(
                "SELECT EXISTS (
                     SELECT 1 FROM daily_achievements WHERE user_id = ?1 AND date = ?2
                 ) OR EXISTS (
                     SELECT 1 FROM daily_steps
                     WHERE user_id = ?1 AND date = ?2 AND goal > 0 AND steps >= goal
                 )",
                params![user_id, format_date(date)],
                |row| row.get(0),
            )?;
            Ok(met != 0)
        })
        .await
    }
}
