//! SQLite access for the step core.
//!
//! `rusqlite::Connection` is not `Sync`, so one thread owns it and every
//! query is shipped to that thread as a closure. Callers await the reply on
//! a oneshot channel, which keeps the sensor path and the async worker free
//! of blocking I/O.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Message {
    Run(Job),
    Close,
}

struct DbThread {
    jobs: mpsc::Sender<Message>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DbThread {
    fn close(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };
        if self.jobs.send(Message::Close).is_err() {
            warn!("database thread already gone at close");
        }
        if let Err(err) = handle.join() {
            error!("database thread panicked: {err:?}");
        }
    }
}

impl Drop for DbThread {
    fn drop(&mut self) {
        self.close();
    }
}

/// Cloneable handle; all clones share the one database thread, which exits
/// when the last clone is dropped.
#[derive(Clone)]
pub struct Database {
    thread: Arc<DbThread>,
    path: Arc<PathBuf>,
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open step database {}", path.display()))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;
    // Batched writes from a phone: WAL with relaxed fsync is plenty.
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!("WAL journal mode unavailable: {err}");
    }
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous mode")?;
    run_migrations(&mut conn).context("failed to migrate step database")?;
    Ok(conn)
}

impl Database {
    /// Open (creating if needed) and migrate the database at `path`. Returns
    /// once the schema is current.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let (jobs_tx, jobs_rx) = mpsc::channel::<Message>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let thread_path = path.clone();

        let handle = thread::Builder::new()
            .name("stepwarden-db".into())
            .spawn(move || {
                let mut conn = match open_connection(&thread_path) {
                    Ok(conn) => {
                        let _ = ready_tx.send(Ok(()));
                        conn
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                while let Ok(Message::Run(job)) = jobs_rx.recv() {
                    job(&mut conn);
                }
                info!("database thread for {} closed", thread_path.display());
            })
            .context("failed to spawn database thread")?;

        ready_rx
            .recv()
            .context("database thread exited during startup")??;
        info!("step database ready at {}", path.display());

        Ok(Self {
            thread: Arc::new(DbThread {
                jobs: jobs_tx,
                handle: Mutex::new(Some(handle)),
            }),
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Run `task` on the database thread and wait for its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn: &mut Connection| {
            // The caller may have been cancelled; the result is dropped then.
            let _ = reply_tx.send(task(conn));
        });

        self.thread
            .jobs
            .send(Message::Run(job))
            .map_err(|_| anyhow!("database thread is not running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread dropped the request"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_one_connection() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("nested").join("steps.sqlite3")).unwrap();
        let other = db.clone();

        db.execute(|conn| {
            conn.execute_batch("CREATE TEMP TABLE scratch (n INTEGER); INSERT INTO scratch VALUES (7);")?;
            Ok(())
        })
        .await
        .unwrap();

        // Temp tables are per connection, so this only works on the same one.
        let n: i64 = other
            .execute(|conn| Ok(conn.query_row("SELECT n FROM scratch", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(n, 7);
        assert!(db.path().ends_with("steps.sqlite3"));
    }

    #[tokio::test]
    async fn task_errors_reach_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("steps.sqlite3")).unwrap();
        let result: Result<()> = db
            .execute(|conn| {
                conn.execute("INSERT INTO no_such_table VALUES (1)", [])?;
                Ok(())
            })
            .await;
        assert!(result.is_err());
    }
}
