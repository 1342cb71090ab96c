//! SQLite-backed trace storage.

use crate::query::TraceQuery;
use crate::TraceError;
use chrono::{DateTime, Utc};
use nf_core::trace::{RunStatus, RunSummary, TraceEntry, TraceSink};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Trace store backed by a single SQLite database.
/// Uses Mutex<Connection> for thread safety (rusqlite::Connection is !Sync).
pub struct TraceStore {
    conn: Mutex<Connection>,
}

impl TraceStore {
    /// Open (or create) the trace database at the given path.
    pub fn open(path: &Path) -> Result<Self, TraceError> {
        let conn = Connection::open(path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.initialize_schema()?;
        tracing::info!(path = %path.display(), "trace store opened");
        Ok(store)
    }

    /// Create an in-memory trace store (useful for testing).
    pub fn in_memory() -> Result<Self, TraceError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.initialize_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, TraceError> {
        self.conn
            .lock()
            .map_err(|e| TraceError::Database(e.to_string()))
    }

    fn initialize_schema(&self) -> Result<(), TraceError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS trace_entries (
                execution_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                node_id TEXT NOT NULL,
                node_type TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                entry_json TEXT NOT NULL,
                PRIMARY KEY (execution_id, seq)
            );

            CREATE INDEX IF NOT EXISTS idx_entries_node
                ON trace_entries(node_id);

            CREATE TABLE IF NOT EXISTS runs (
                execution_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                nodes_executed INTEGER NOT NULL,
                error TEXT,
                failed_at_node TEXT
            );",
        )?;
        Ok(())
    }

    /// Append an entry to a run's trace, after any already stored.
    pub fn insert_entry(&self, execution_id: Uuid, entry: &TraceEntry) -> Result<(), TraceError> {
        let entry_json =
            serde_json::to_string(entry).map_err(|e| TraceError::Database(e.to_string()))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO trace_entries (
                execution_id, seq, node_id, node_type, status, started_at, entry_json
            ) VALUES (
                ?1,
                (SELECT COALESCE(MAX(seq) + 1, 0) FROM trace_entries WHERE execution_id = ?1),
                ?2, ?3, ?4, ?5, ?6
            )",
            params![
                execution_id.to_string(),
                entry.node_id,
                entry.node_type.as_str(),
                status_str(entry),
                entry.started_at.to_rfc3339(),
                entry_json,
            ],
        )?;
        Ok(())
    }

    /// Insert or replace a run summary.
    pub fn upsert_run(&self, summary: &RunSummary) -> Result<(), TraceError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO runs (
                execution_id, status, started_at, completed_at,
                nodes_executed, error, failed_at_node
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                summary.execution_id.to_string(),
                run_status_str(summary.status),
                summary.started_at.to_rfc3339(),
                summary.completed_at.to_rfc3339(),
                summary.nodes_executed as i64,
                summary.error,
                summary.failed_at_node,
            ],
        )?;
        tracing::debug!(
            execution_id = %summary.execution_id,
            status = run_status_str(summary.status),
            nodes = summary.nodes_executed,
            "run summary stored"
        );
        Ok(())
    }

    /// All entries of a run, in execution order.
    pub fn entries_for_run(&self, execution_id: Uuid) -> Result<Vec<TraceEntry>, TraceError> {
        self.query(&TraceQuery::for_run(execution_id))
    }

    /// Entries matching a filter, ordered by run then execution order.
    pub fn query(&self, query: &TraceQuery) -> Result<Vec<TraceEntry>, TraceError> {
        let (sql, args) = query.to_sql();
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            row.get::<_, String>(0)
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let json = row?;
            let entry = serde_json::from_str(&json)
                .map_err(|e| TraceError::Database(format!("entry_json: {e}")))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn get_run(&self, execution_id: Uuid) -> Result<Option<RunSummary>, TraceError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT execution_id, status, started_at, completed_at,
                        nodes_executed, error, failed_at_node
                 FROM runs WHERE execution_id = ?1",
                params![execution_id.to_string()],
                |row| {
                    Ok(RawRunRow {
                        execution_id: row.get(0)?,
                        status: row.get(1)?,
                        started_at: row.get(2)?,
                        completed_at: row.get(3)?,
                        nodes_executed: row.get(4)?,
                        error: row.get(5)?,
                        failed_at_node: row.get(6)?,
                    })
                },
            )
            .optional()?;
        raw.map(raw_to_summary).transpose()
    }

    /// Most recent runs first.
    pub fn recent_runs(&self, limit: u32) -> Result<Vec<RunSummary>, TraceError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT execution_id, status, started_at, completed_at,
                    nodes_executed, error, failed_at_node
             FROM runs ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(RawRunRow {
                execution_id: row.get(0)?,
                status: row.get(1)?,
                started_at: row.get(2)?,
                completed_at: row.get(3)?,
                nodes_executed: row.get(4)?,
                error: row.get(5)?,
                failed_at_node: row.get(6)?,
            })
        })?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(raw_to_summary(row?)?);
        }
        Ok(runs)
    }
}

impl TraceSink for TraceStore {
    fn record_entry(&self, execution_id: Uuid, entry: &TraceEntry) -> anyhow::Result<()> {
        self.insert_entry(execution_id, entry)?;
        Ok(())
    }

    fn record_run(&self, summary: &RunSummary) -> anyhow::Result<()> {
        self.upsert_run(summary)?;
        Ok(())
    }
}

fn status_str(entry: &TraceEntry) -> &'static str {
    match entry.status {
        nf_core::trace::TraceStatus::Success => "success",
        nf_core::trace::TraceStatus::Failed => "failed",
    }
}

fn run_status_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Success => "success",
        RunStatus::Failed => "failed",
    }
}

/// Internal row struct for SQLite queries.
struct RawRunRow {
    execution_id: String,
    status: String,
    started_at: String,
    completed_at: String,
    nodes_executed: i64,
    error: Option<String>,
    failed_at_node: Option<String>,
}

fn raw_to_summary(raw: RawRunRow) -> Result<RunSummary, TraceError> {
    let parse_err = |field: &str, e: String| TraceError::Database(format!("{field}: {e}"));
    let parse_time = |field: &str, s: &str| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| parse_err(field, e.to_string()))
    };

    Ok(RunSummary {
        execution_id: raw
            .execution_id
            .parse()
            .map_err(|e: uuid::Error| parse_err("execution_id", e.to_string()))?,
        status: match raw.status.as_str() {
            "success" => RunStatus::Success,
            "failed" => RunStatus::Failed,
            other => return Err(parse_err("status", format!("unknown status {other}"))),
        },
        started_at: parse_time("started_at", &raw.started_at)?,
        completed_at: parse_time("completed_at", &raw.completed_at)?,
        nodes_executed: raw.nodes_executed.max(0) as usize,
        error: raw.error,
        failed_at_node: raw.failed_at_node,
    })
}
