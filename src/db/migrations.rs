use anyhow::{bail, Context, Result};
use log::info;
use rusqlite::Connection;

/// Schema scripts in order; `user_version` N means the first N have run.
const MIGRATIONS: &[&str] = &[
    include_str!("schemas/schema_v1.sql"),
    include_str!("schemas/schema_v2.sql"),
    include_str!("schemas/schema_v3.sql"),
];

fn latest_version() -> i32 {
    MIGRATIONS.len() as i32
}

pub fn schema_version(conn: &Connection) -> Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")
}

/// Bring the schema up to date in a single transaction.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let current = schema_version(conn)?;
    let latest = latest_version();

    if current < 0 || current > latest {
        bail!("step database schema v{current} is not supported by this build (v{latest})");
    }
    if current == latest {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;
    for (index, script) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = index + 1;
        tx.execute_batch(script)
            .with_context(|| format!("schema_v{version}.sql failed"))?;
    }
    tx.pragma_update(None, "user_version", latest)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    info!("step database migrated from v{current} to v{latest}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn partial_schema_is_completed() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0]).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();

        run_migrations(&mut conn).unwrap();
        let goals: i64 = conn
            .query_row("SELECT COUNT(*) FROM goals", [], |row| row.get(0))
            .unwrap();
        assert_eq!(goals, 0);
        let achievements: i64 = conn
            .query_row("SELECT COUNT(*) FROM daily_achievements", [], |row| row.get(0))
            .unwrap();
        assert_eq!(achievements, 0);
        assert_eq!(schema_version(&conn).unwrap(), 3);
    }

    #[test]
    fn newer_database_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", latest_version() + 1)
            .unwrap();
        assert!(run_migrations(&mut conn).is_err());
    }
}
