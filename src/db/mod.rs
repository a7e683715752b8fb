use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::oneshot;

mod migrations;

use migrations::run_migrations;

use crate::models::{SessionSnapshot, Severity, Violation, ViolationKind};

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

fn kind_from_str(value: &str) -> Result<ViolationKind> {
    ViolationKind::from_str(value).ok_or_else(|| anyhow!("unknown violation type '{value}'"))
}

fn severity_from_str(value: &str) -> Result<Severity> {
    Severity::from_str(value).ok_or_else(|| anyhow!("unknown severity '{value}'"))
}

/// Handle to the local durable store for violations and session snapshots.
///
/// All SQLite access runs on one dedicated worker thread; callers submit
/// closures and await the result, so the async side never blocks on disk.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("invigil-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .with_context(|| "failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        info!("Database initialized at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }

    /// Append a violation and return it with its assigned row id.
    pub async fn insert_violation(&self, violation: &Violation) -> Result<Violation> {
        let mut record = violation.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO violations (student_id, assignment_id, violation_type, severity,
                                         description, detected_at, time_away_seconds,
                                         content_added_during_absence, ai_similarity_score,
                                         paste_content_length)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.student_id,
                    record.assignment_id,
                    record.violation_type.as_str(),
                    record.severity.as_str(),
                    record.description,
                    record.detected_at.to_rfc3339(),
                    record.time_away_seconds,
                    record.content_added_during_absence,
                    record.ai_similarity_score,
                    record.paste_content_length,
                ],
            )
            .with_context(|| "failed to insert violation")?;
            record.id = Some(conn.last_insert_rowid());
            Ok(record)
        })
        .await
    }

    pub async fn get_violations(&self, assignment_id: i64) -> Result<Vec<Violation>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, student_id, assignment_id, violation_type, severity, description,
                        detected_at, time_away_seconds, content_added_during_absence,
                        ai_similarity_score, paste_content_length
                 FROM violations
                 WHERE assignment_id = ?1
                 ORDER BY detected_at ASC, id ASC",
            )?;

            let mut rows = stmt.query(params![assignment_id])?;
            let mut violations = Vec::new();
            while let Some(row) = rows.next()? {
                violations.push(Violation {
                    id: Some(row.get(0)?),
                    student_id: row.get(1)?,
                    assignment_id: row.get(2)?,
                    violation_type: kind_from_str(&row.get::<_, String>(3)?)?,
                    severity: severity_from_str(&row.get::<_, String>(4)?)?,
                    description: row.get(5)?,
                    detected_at: parse_datetime(&row.get::<_, String>(6)?)?,
                    time_away_seconds: row.get(7)?,
                    content_added_during_absence: row.get(8)?,
                    ai_similarity_score: row.get(9)?,
                    paste_content_length: row.get(10)?,
                });
            }

            Ok(violations)
        })
        .await
    }

    /// Remove the violation log for an assignment (successful submission or
    /// explicit unsubmit).
    pub async fn clear_violations(&self, assignment_id: i64) -> Result<usize> {
        self.execute(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM violations WHERE assignment_id = ?1",
                    params![assignment_id],
                )
                .with_context(|| "failed to clear violations")?;
            Ok(removed)
        })
        .await
    }

    /// Last-writer-wins checkpoint write; one row per assignment.
    pub async fn upsert_snapshot(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let record = snapshot.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO snapshots (assignment_id, route_path, active_minutes, last_update,
                                        strict_mode, has_typed, keystroke_count,
                                        content_snapshot, content_length)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(assignment_id) DO UPDATE SET
                     route_path = excluded.route_path,
                     active_minutes = excluded.active_minutes,
                     last_update = excluded.last_update,
                     strict_mode = excluded.strict_mode,
                     has_typed = excluded.has_typed,
                     keystroke_count = excluded.keystroke_count,
                     content_snapshot = excluded.content_snapshot,
                     content_length = excluded.content_length",
                params![
                    record.assignment_id,
                    record.route_path,
                    record.active_minutes,
                    record.last_update.to_rfc3339(),
                    record.strict_mode,
                    record.has_typed,
                    record.keystroke_count as i64,
                    record.content_snapshot,
                    record.content_length as i64,
                ],
            )
            .with_context(|| "failed to upsert snapshot")?;
            Ok(())
        })
        .await
    }

    pub async fn get_snapshot(&self, assignment_id: i64) -> Result<Option<SessionSnapshot>> {
        self.execute(move |conn| {
            conn.query_row(
                "SELECT assignment_id, route_path, active_minutes, last_update, strict_mode,
                        has_typed, keystroke_count, content_snapshot, content_length
                 FROM snapshots
                 WHERE assignment_id = ?1",
                params![assignment_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, bool>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, i64>(8)?,
                    ))
                },
            )
            .optional()
            .with_context(|| "failed to read snapshot")?
            .map(
                |(
                    assignment_id,
                    route_path,
                    active_minutes,
                    last_update,
                    strict_mode,
                    has_typed,
                    keystroke_count,
                    content_snapshot,
                    content_length,
                )| {
                    Ok(SessionSnapshot {
                        assignment_id,
                        route_path,
                        active_minutes,
                        last_update: parse_datetime(&last_update)?,
                        strict_mode,
                        has_typed,
                        keystroke_count: keystroke_count.max(0) as u64,
                        content_snapshot,
                        content_length: content_length.max(0) as usize,
                    })
                },
            )
            .transpose()
        })
        .await
    }

    pub async fn delete_snapshot(&self, assignment_id: i64) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM snapshots WHERE assignment_id = ?1",
                params![assignment_id],
            )
            .with_context(|| "failed to delete snapshot")?;
            Ok(())
        })
        .await
    }
}
