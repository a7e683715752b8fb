use anyhow::{bail, Context, Result};
use rusqlite::{Connection, Transaction};

const CURRENT_SCHEMA_VERSION: i32 = 2;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS violations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id INTEGER NOT NULL,
    assignment_id INTEGER NOT NULL,
    violation_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    description TEXT NOT NULL,
    detected_at TEXT NOT NULL,
    time_away_seconds INTEGER NOT NULL DEFAULT 0,
    content_added_during_absence INTEGER,
    ai_similarity_score REAL,
    paste_content_length INTEGER
);

CREATE INDEX IF NOT EXISTS idx_violations_assignment
    ON violations(assignment_id, detected_at);
";

const SCHEMA_V2: &str = "
CREATE TABLE IF NOT EXISTS snapshots (
    assignment_id INTEGER PRIMARY KEY,
    route_path TEXT NOT NULL,
    active_minutes REAL NOT NULL,
    last_update TEXT NOT NULL,
    strict_mode INTEGER NOT NULL DEFAULT 0,
    has_typed INTEGER NOT NULL DEFAULT 0,
    keystroke_count INTEGER NOT NULL DEFAULT 0,
    content_snapshot TEXT NOT NULL DEFAULT '',
    content_length INTEGER NOT NULL DEFAULT 0
);
";

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let mut version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > CURRENT_SCHEMA_VERSION {
        bail!(
            "database version ({}) is newer than supported schema ({})",
            version,
            CURRENT_SCHEMA_VERSION
        );
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;

    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)
            .with_context(|| format!("migration to version {next_version} failed"))?;
        version = next_version;
    }

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<()> {
    match version {
        1 => tx
            .execute_batch(SCHEMA_V1)
            .context("failed to create violations table"),
        2 => tx
            .execute_batch(SCHEMA_V2)
            .context("failed to create snapshots table"),
        _ => bail!("unknown migration target version: {version}"),
    }
}
