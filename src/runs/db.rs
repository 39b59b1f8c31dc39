use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use super::models::{Run, RunStatus, RunUpdate};
use super::state::{self, PhaseOutcome};
use super::store::ResetOutcome;
use crate::analyzer::{AnalyzerOutput, AnalyzerResult};
use crate::gateway::cache::AiCache;
use crate::scorer::{ScorerOutput, ScorerResult};

const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

const RUN_COLUMNS: &str = "id, email, github_url, status, commit_hash, branch_name, \
     analyzer_md, analyzer_json, analyzer_ai_cache, analyzer_tool_version, \
     scorer_md, scorer_json, scorer_ai_cache, scorer_tool_version, \
     overall_score, error_message, created_at, updated_at";

/// Async-safe handle to the run database.
///
/// Wraps `RunDb` behind `Arc<Mutex>` and runs every statement on tokio's
/// blocking pool so SQLite I/O never stalls a worker loop.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<RunDb>>,
}

impl DbHandle {
    pub fn new(db: RunDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(RunDb::new(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(RunDb::new_in_memory()?))
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&RunDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct RunDb {
    conn: Connection,
}

impl RunDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        self.run_migrations().context("Failed to run migrations")
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS analysis_runs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email TEXT NOT NULL,
                    github_url TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'PENDING',
                    commit_hash TEXT,
                    branch_name TEXT,
                    analyzer_md TEXT,
                    analyzer_json TEXT,
                    analyzer_ai_cache TEXT NOT NULL DEFAULT '{}',
                    analyzer_tool_version TEXT,
                    scorer_md TEXT,
                    scorer_json TEXT,
                    scorer_ai_cache TEXT NOT NULL DEFAULT '{}',
                    scorer_tool_version TEXT,
                    overall_score REAL,
                    error_message TEXT,
                    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
                );

                CREATE INDEX IF NOT EXISTS idx_analysis_runs_status ON analysis_runs(status);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Runs ──────────────────────────────────────────────────────────

    pub fn create_run(&self, email: &str, github_url: &str) -> Result<Run> {
        self.conn
            .execute(
                "INSERT INTO analysis_runs (email, github_url) VALUES (?1, ?2)",
                params![email, github_url],
            )
            .context("Failed to insert run")?;
        let id = self.conn.last_insert_rowid();
        self.get_run(id)?.context("Run not found after insert")
    }

    pub fn get_run(&self, id: i64) -> Result<Option<Run>> {
        let sql = format!("SELECT {} FROM analysis_runs WHERE id = ?1", RUN_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], RunRow::from_row)
            .optional()
            .context("Failed to query run")?;
        row.map(RunRow::into_run).transpose()
    }

    /// Most recent runs first, optionally filtered by status.
    pub fn list_runs(&self, status: Option<RunStatus>, limit: u32) -> Result<Vec<Run>> {
        let sql = format!(
            "SELECT {} FROM analysis_runs WHERE (?1 IS NULL OR status = ?1) ORDER BY id DESC LIMIT ?2",
            RUN_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare list_runs")?;
        let rows = stmt
            .query_map(params![status.map(|s| s.as_str()), limit], RunRow::from_row)
            .context("Failed to query runs")?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row.context("Failed to read run row")?.into_run()?);
        }
        Ok(runs)
    }

    /// Apply a partial update in a single statement. `updated_at` is always bumped.
    pub fn update_run(&self, id: i64, update: &RunUpdate) -> Result<()> {
        let mut sets: Vec<&'static str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        let mut set = |column: &'static str, value: Value| {
            sets.push(column);
            values.push(value);
        };

        if let Some(status) = update.status {
            set("status", Value::Text(status.as_str().to_string()));
        }
        if let Some(commit) = &update.commit_hash {
            set("commit_hash", Value::Text(commit.clone()));
        }
        if let Some(branch) = &update.branch_name {
            set("branch_name", Value::Text(branch.clone()));
        }
        if let Some(output) = &update.analyzer_output {
            set("analyzer_md", Value::Text(output.markdown.clone()));
            set(
                "analyzer_json",
                Value::Text(
                    serde_json::to_string(&output.result)
                        .context("Failed to serialize analyzer result")?,
                ),
            );
        }
        if let Some(version) = &update.analyzer_tool_version {
            set("analyzer_tool_version", Value::Text(version.clone()));
        }
        if let Some(cache) = &update.analyzer_ai_cache {
            set(
                "analyzer_ai_cache",
                Value::Text(cache.to_json().context("Failed to serialize analyzer cache")?),
            );
        }
        if let Some(output) = &update.scorer_output {
            set("scorer_md", Value::Text(output.markdown.clone()));
            set(
                "scorer_json",
                Value::Text(
                    serde_json::to_string(&output.result)
                        .context("Failed to serialize scorer result")?,
                ),
            );
        }
        if let Some(version) = &update.scorer_tool_version {
            set("scorer_tool_version", Value::Text(version.clone()));
        }
        if let Some(cache) = &update.scorer_ai_cache {
            set(
                "scorer_ai_cache",
                Value::Text(cache.to_json().context("Failed to serialize scorer cache")?),
            );
        }
        if let Some(score) = update.overall_score {
            set("overall_score", Value::Real(score));
        }
        if let Some(message) = &update.error_message {
            set(
                "error_message",
                message.clone().map(Value::Text).unwrap_or(Value::Null),
            );
        }

        let mut assignments: Vec<String> = sets
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{} = ?{}", column, i + 1))
            .collect();
        assignments.push(format!("updated_at = {}", NOW));
        let sql = format!(
            "UPDATE analysis_runs SET {} WHERE id = ?{}",
            assignments.join(", "),
            values.len() + 1
        );
        values.push(Value::Integer(id));

        let changed = self
            .conn
            .execute(&sql, params_from_iter(values))
            .context("Failed to update run")?;
        if changed == 0 {
            bail!("Run {} not found", id);
        }
        Ok(())
    }

    /// Explicit reset to `PENDING`. Derived fields are nulled; AI caches are kept.
    pub fn reset_run(&self, id: i64) -> Result<ResetOutcome> {
        let Some(run) = self.get_run(id)? else {
            return Ok(ResetOutcome::NotFound);
        };
        if state::transition(run.status, PhaseOutcome::Reset).is_err() {
            return Ok(ResetOutcome::Refused(run.status));
        }
        let sql = format!(
            "UPDATE analysis_runs SET status = 'PENDING', commit_hash = NULL, branch_name = NULL,
                 analyzer_md = NULL, analyzer_json = NULL, analyzer_tool_version = NULL,
                 scorer_md = NULL, scorer_json = NULL, scorer_tool_version = NULL,
                 overall_score = NULL, error_message = NULL, updated_at = {}
             WHERE id = ?1 AND status != 'RUNNING'",
            NOW
        );
        self.conn
            .execute(&sql, params![id])
            .context("Failed to reset run")?;
        let run = self.get_run(id)?.context("Run not found after reset")?;
        Ok(ResetOutcome::Reset(Box::new(run)))
    }

    /// Mark runs left mid-pipeline by a previous process as `ERROR` so they can
    /// be re-enqueued. Returns the affected run ids.
    pub fn recover_interrupted(&self, message: &str) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM analysis_runs WHERE status IN ('RUNNING', 'ANALYZED') ORDER BY id")
            .context("Failed to prepare recover_interrupted")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .context("Failed to query interrupted runs")?
            .collect::<rusqlite::Result<Vec<i64>>>()
            .context("Failed to read interrupted run ids")?;
        for id in &ids {
            self.update_run(*id, &RunUpdate::failed(message.to_string()))?;
        }
        Ok(ids)
    }
}

/// Intermediate row struct for analysis_runs.
struct RunRow {
    id: i64,
    email: String,
    github_url: String,
    status: String,
    commit_hash: Option<String>,
    branch_name: Option<String>,
    analyzer_md: Option<String>,
    analyzer_json: Option<String>,
    analyzer_ai_cache: String,
    analyzer_tool_version: Option<String>,
    scorer_md: Option<String>,
    scorer_json: Option<String>,
    scorer_ai_cache: String,
    scorer_tool_version: Option<String>,
    overall_score: Option<f64>,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RunRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            github_url: row.get(2)?,
            status: row.get(3)?,
            commit_hash: row.get(4)?,
            branch_name: row.get(5)?,
            analyzer_md: row.get(6)?,
            analyzer_json: row.get(7)?,
            analyzer_ai_cache: row.get(8)?,
            analyzer_tool_version: row.get(9)?,
            scorer_md: row.get(10)?,
            scorer_json: row.get(11)?,
            scorer_ai_cache: row.get(12)?,
            scorer_tool_version: row.get(13)?,
            overall_score: row.get(14)?,
            error_message: row.get(15)?,
            created_at: row.get(16)?,
            updated_at: row.get(17)?,
        })
    }

    fn into_run(self) -> Result<Run> {
        let status = RunStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse run status")?;

        let analyzer_output = match (self.analyzer_md, self.analyzer_json) {
            (Some(markdown), Some(json)) => {
                let result: AnalyzerResult =
                    serde_json::from_str(&json).context("Failed to parse analyzer_json")?;
                Some(AnalyzerOutput { markdown, result })
            }
            _ => None,
        };
        let scorer_output = match (self.scorer_md, self.scorer_json) {
            (Some(markdown), Some(json)) => {
                let result: ScorerResult =
                    serde_json::from_str(&json).context("Failed to parse scorer_json")?;
                Some(ScorerOutput { markdown, result })
            }
            _ => None,
        };

        Ok(Run {
            id: self.id,
            email: self.email,
            github_url: self.github_url,
            status,
            commit_hash: self.commit_hash,
            branch_name: self.branch_name,
            analyzer_output,
            analyzer_tool_version: self.analyzer_tool_version,
            scorer_output,
            scorer_tool_version: self.scorer_tool_version,
            overall_score: self.overall_score,
            analyzer_ai_cache: AiCache::from_json(&self.analyzer_ai_cache)
                .context("Failed to parse analyzer_ai_cache")?,
            scorer_ai_cache: AiCache::from_json(&self.scorer_ai_cache)
                .context("Failed to parse scorer_ai_cache")?,
            error_message: self.error_message,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
