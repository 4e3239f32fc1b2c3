// src/store/sqlite.rs

//! `SQLite` implementation of [`StepStore`].
//!
//! # Schema
//!
//! `workflow` holds one row per run: `workflow_id`, `name`, `home_dir`,
//! `created_at`.
//!
//! `workflow_step` holds one row per step per run: `step_id`, `workflow_id`,
//! `name`, `state`, `state_handled`, `off_line`, `process_id`, `last_change`.
//!
//! All statements bind their inputs as parameters. Conditional updates are
//! assembled from the closed set of columns in [`Assignment`] and
//! [`Precondition`]; no caller-provided text is ever spliced into SQL.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::{debug, info, warn};

use super::{Assignment, ConditionalUpdate, Precondition, StepRecord, StepStore, WriteOutcome};
use crate::errors::{Result, StepflowError};
use crate::types::StepState;

/// How long a statement waits on a lock held by another writer (typically a
/// worker wrapper reporting completion) before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS workflow (
    workflow_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    home_dir    TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE TABLE IF NOT EXISTS workflow_step (
    step_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    workflow_id   INTEGER NOT NULL REFERENCES workflow(workflow_id),
    name          TEXT NOT NULL,
    state         TEXT NOT NULL
                  CHECK (state IN ('READY', 'ON_DECK', 'RUNNING', 'DONE', 'FAILED')),
    state_handled INTEGER NOT NULL DEFAULT 1 CHECK (state_handled IN (0, 1)),
    off_line      INTEGER NOT NULL DEFAULT 0 CHECK (off_line IN (0, 1)),
    process_id    INTEGER,
    last_change   TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (workflow_id, name)
);
";

const STEP_COLUMNS: &str =
    "step_id, name, state, state_handled, off_line, process_id";

impl ToSql for StepState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for StepState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// Step store backed by a single `SQLite` connection.
///
/// Cloning is cheap and shares the connection; separate processes open their
/// own connection to the same file.
#[derive(Clone)]
pub struct SqliteStepStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStepStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStepStore").finish_non_exhaustive()
    }
}

impl SqliteStepStore {
    /// Open (and create if needed) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL lets the controller keep reading while a worker commits.
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened step store");

        Self::from_connection(conn)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an existing connection, creating the schema if missing.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StepflowError::Other(anyhow::anyhow!("step store connection lock poisoned")))
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<StepRecord> {
    let pid: Option<i64> = row.get(5)?;
    let process_id = pid
        .map(|p| {
            u32::try_from(p).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Integer, e.into())
            })
        })
        .transpose()?;

    Ok(StepRecord {
        step_id: row.get(0)?,
        name: row.get(1)?,
        state: row.get(2)?,
        handled: row.get(3)?,
        offline: row.get(4)?,
        process_id,
    })
}

/// Render a conditional update as SQL plus its bound values.
fn build_update(update: &ConditionalUpdate) -> (String, Vec<Value>) {
    let ConditionalUpdate { step_id, set, expect } = update;
    let Assignment {
        state,
        handled,
        offline,
        process_id,
    } = set;
    let Precondition {
        state: expect_state,
        offline: expect_offline,
        no_process,
    } = expect;

    let mut sets: Vec<&'static str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(state) = state {
        sets.push("state = ?");
        values.push(Value::Text(state.as_str().to_string()));
    }
    if let Some(handled) = handled {
        sets.push("state_handled = ?");
        values.push(Value::Integer(i64::from(*handled)));
    }
    if let Some(offline) = offline {
        sets.push("off_line = ?");
        values.push(Value::Integer(i64::from(*offline)));
    }
    match process_id {
        Some(Some(pid)) => {
            sets.push("process_id = ?");
            values.push(Value::Integer(i64::from(*pid)));
        }
        Some(None) => sets.push("process_id = NULL"),
        None => {}
    }
    sets.push("last_change = datetime('now')");

    let mut wheres: Vec<&'static str> = vec!["step_id = ?"];
    values.push(Value::Integer(*step_id));

    if let Some(state) = expect_state {
        wheres.push("state = ?");
        values.push(Value::Text(state.as_str().to_string()));
    }
    if let Some(offline) = expect_offline {
        wheres.push("off_line = ?");
        values.push(Value::Integer(i64::from(*offline)));
    }
    if *no_process {
        wheres.push("process_id IS NULL");
    }

    let sql = format!(
        "UPDATE workflow_step SET {} WHERE {}",
        sets.join(", "),
        wheres.join(" AND ")
    );
    (sql, values)
}

impl StepStore for SqliteStepStore {
    fn materialize(&self, workflow: &str, home_dir: &Path, steps: &[&str]) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO workflow (name, home_dir) VALUES (?1, ?2) ON CONFLICT(name) DO NOTHING",
            params![workflow, home_dir.to_string_lossy().into_owned()],
        )?;
        let run_id: i64 = tx.query_row(
            "SELECT workflow_id FROM workflow WHERE name = ?1",
            params![workflow],
            |row| row.get(0),
        )?;

        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO workflow_step (workflow_id, name, state, state_handled, off_line)
                 VALUES (?1, ?2, ?3, 1, 0)",
            )?;
            for name in steps {
                inserted += stmt.execute(params![run_id, name, StepState::Ready])?;
            }
        }

        let known: i64 = tx.query_row(
            "SELECT COUNT(*) FROM workflow_step WHERE workflow_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        tx.commit()?;

        if usize::try_from(known).unwrap_or(usize::MAX) > steps.len() {
            warn!(
                workflow,
                run_id,
                stored = known,
                defined = steps.len(),
                "store holds steps that are no longer defined; they will be ignored"
            );
        }
        info!(workflow, run_id, inserted, "materialized workflow run");
        Ok(run_id)
    }

    fn find_run(&self, workflow: &str) -> Result<Option<i64>> {
        let conn = self.lock()?;
        let run_id = conn
            .query_row(
                "SELECT workflow_id FROM workflow WHERE name = ?1",
                params![workflow],
                |row| row.get(0),
            )
            .optional()?;
        Ok(run_id)
    }

    fn load_steps(&self, run_id: i64) -> Result<Vec<StepRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {STEP_COLUMNS} FROM workflow_step WHERE workflow_id = ?1 ORDER BY step_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![run_id], row_to_record)?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn find_step(&self, run_id: i64, name: &str) -> Result<StepRecord> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {STEP_COLUMNS} FROM workflow_step WHERE workflow_id = ?1 AND name = ?2"
        );
        conn.query_row(&sql, params![run_id, name], row_to_record)
            .optional()?
            .ok_or_else(|| StepflowError::StepNotFound(name.to_string()))
    }

    fn fetch_state(&self, step_id: i64) -> Result<StepState> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT state FROM workflow_step WHERE step_id = ?1",
            params![step_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StepflowError::StepNotFound(format!("step_id {step_id}")))
    }

    fn apply(&self, update: &ConditionalUpdate) -> Result<WriteOutcome> {
        let (sql, values) = build_update(update);
        let conn = self.lock()?;
        let rows = conn.execute(&sql, params_from_iter(values.iter()))?;
        debug!(step_id = update.step_id, rows, "conditional update");

        Ok(if rows == 0 {
            WriteOutcome::Lost
        } else {
            WriteOutcome::Applied
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_binds_every_value() {
        let update = ConditionalUpdate::for_step(7)
            .set_state(StepState::Failed)
            .set_handled(true)
            .clear_process_id()
            .expect_state(StepState::Running);

        let (sql, values) = build_update(&update);

        assert_eq!(
            sql,
            "UPDATE workflow_step SET state = ?, state_handled = ?, process_id = NULL, \
             last_change = datetime('now') WHERE step_id = ? AND state = ?"
        );
        assert_eq!(
            values,
            vec![
                Value::Text("FAILED".into()),
                Value::Integer(1),
                Value::Integer(7),
                Value::Text("RUNNING".into()),
            ]
        );
    }

    #[test]
    fn materialize_is_idempotent() {
        let store = SqliteStepStore::open_in_memory().unwrap();
        let first = store.materialize("wf", Path::new("/wf"), &["a", "b"]).unwrap();
        store
            .apply(&ConditionalUpdate::for_step(1).set_state(StepState::OnDeck))
            .unwrap();

        let second = store.materialize("wf", Path::new("/wf"), &["a", "b", "c"]).unwrap();
        assert_eq!(first, second);

        let records = store.load_steps(first).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].state, StepState::OnDeck);
        assert!(records.iter().skip(1).all(|r| r.state == StepState::Ready && r.handled));
    }

    #[test]
    fn mismatched_precondition_is_lost() {
        let store = SqliteStepStore::open_in_memory().unwrap();
        let run = store.materialize("wf", Path::new("/wf"), &["a"]).unwrap();
        let step = store.find_step(run, "a").unwrap();

        let outcome = store
            .apply(
                &ConditionalUpdate::for_step(step.step_id)
                    .set_state(StepState::Failed)
                    .expect_state(StepState::Running),
            )
            .unwrap();

        assert_eq!(outcome, WriteOutcome::Lost);
        assert_eq!(store.fetch_state(step.step_id).unwrap(), StepState::Ready);
    }
}
