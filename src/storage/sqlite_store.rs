//! SQLite-backed definition and run history store.
//!
//! Every run-record write is a single statement against the pool and is
//! committed before the call returns, so partial progress of a workflow run
//! is visible to the recovery sweep after a crash. Schema is created on
//! connect; migration tooling is out of scope.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::engine::types::*;
use crate::storage::{DefinitionStore, RunStore, StoreError, StoreResult};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS workflow (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        description TEXT,
        default_config TEXT
    )",
    "CREATE TABLE IF NOT EXISTS job (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        workflow_id INTEGER NOT NULL REFERENCES workflow(id),
        name TEXT NOT NULL,
        description TEXT,
        execution_order INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS task (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id INTEGER NOT NULL REFERENCES job(id),
        name TEXT NOT NULL,
        task_type TEXT NOT NULL,
        execution_order INTEGER,
        parameters TEXT
    )",
    "CREATE TABLE IF NOT EXISTS workflow_run (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        workflow_id INTEGER NOT NULL,
        trace_id TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        duration_ms INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_workflow_run_status ON workflow_run(status)",
    "CREATE TABLE IF NOT EXISTS job_run (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        workflow_run_id INTEGER NOT NULL REFERENCES workflow_run(id),
        job_id INTEGER NOT NULL,
        execution_order INTEGER,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        duration_ms INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_job_run_workflow_run ON job_run(workflow_run_id)",
    "CREATE TABLE IF NOT EXISTS task_run (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_run_id INTEGER NOT NULL REFERENCES job_run(id),
        task_id INTEGER NOT NULL,
        task_name TEXT NOT NULL,
        execution_order INTEGER,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        duration_ms INTEGER,
        result_message TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_task_run_lookup ON task_run(job_run_id, task_name, status)",
    "CREATE TABLE IF NOT EXISTS task_io_data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_run_id INTEGER NOT NULL REFERENCES task_run(id),
        io_type TEXT NOT NULL,
        name TEXT NOT NULL,
        data_type TEXT NOT NULL,
        data_value TEXT NOT NULL,
        data_size INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_task_io_data_run ON task_io_data(task_run_id, io_type)",
];

const TASK_RUN_COLUMNS: &str = "tr.id, tr.job_run_id, tr.task_id, tr.task_name, tr.execution_order, \
     tr.status, tr.started_at, tr.finished_at, tr.duration_ms, tr.result_message";

/// Store backed by a SQLite database in WAL mode.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` with at most
    /// `max_connections` pooled connections, and ensure the schema exists.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(*statement).execute(&pool).await?;
        }

        Ok(Self { pool })
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn decode_status(raw: String) -> StoreResult<RunStatus> {
    raw.parse().map_err(StoreError::Decode)
}

fn decode_json(raw: Option<String>, column: &str) -> StoreResult<Option<serde_json::Value>> {
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| StoreError::Decode(format!("invalid {} JSON: {}", column, e)))
    })
    .transpose()
}

fn timing_from_row(row: &SqliteRow) -> StoreResult<RunTiming> {
    Ok(RunTiming {
        status: decode_status(row.try_get("status")?)?,
        started_at: row.try_get::<DateTime<Utc>, _>("started_at")?,
        finished_at: row.try_get::<Option<DateTime<Utc>>, _>("finished_at")?,
        duration_ms: row.try_get("duration_ms")?,
    })
}

fn workflow_run_from_row(row: &SqliteRow) -> StoreResult<WorkflowRun> {
    Ok(WorkflowRun {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        trace_id: row.try_get("trace_id")?,
        timing: timing_from_row(row)?,
    })
}

fn job_run_from_row(row: &SqliteRow) -> StoreResult<JobRun> {
    Ok(JobRun {
        id: row.try_get("id")?,
        workflow_run_id: row.try_get("workflow_run_id")?,
        job_id: row.try_get("job_id")?,
        execution_order: row.try_get("execution_order")?,
        timing: timing_from_row(row)?,
    })
}

fn task_run_from_row(row: &SqliteRow) -> StoreResult<TaskRun> {
    Ok(TaskRun {
        id: row.try_get("id")?,
        job_run_id: row.try_get("job_run_id")?,
        task_id: row.try_get("task_id")?,
        task_name: row.try_get("task_name")?,
        execution_order: row.try_get("execution_order")?,
        timing: timing_from_row(row)?,
        result_message: row.try_get("result_message")?,
    })
}

fn io_data_from_row(row: &SqliteRow) -> StoreResult<TaskIoData> {
    let io_type: String = row.try_get("io_type")?;
    Ok(TaskIoData {
        id: row.try_get("id")?,
        task_run_id: row.try_get("task_run_id")?,
        io_type: io_type.parse().map_err(StoreError::Decode)?,
        name: row.try_get("name")?,
        data_type: row.try_get("data_type")?,
        data_value: row.try_get("data_value")?,
        data_size: row.try_get("data_size")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl DefinitionStore for SqliteStore {
    async fn select_workflow_detail(&self, workflow_id: i64) -> StoreResult<Option<WorkflowDetail>> {
        let row = sqlx::query("SELECT id, name, description, default_config FROM workflow WHERE id = ?")
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> StoreResult<WorkflowDetail> {
            Ok(WorkflowDetail {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                default_config: row.try_get("default_config")?,
            })
        })
        .transpose()
    }

    async fn find_jobs_by_workflow_id(&self, workflow_id: i64) -> StoreResult<Vec<JobDefinition>> {
        let rows = sqlx::query(
            "SELECT id, workflow_id, name, description, execution_order FROM job WHERE workflow_id = ?",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<JobDefinition> {
                Ok(JobDefinition {
                    id: row.try_get("id")?,
                    workflow_id: row.try_get("workflow_id")?,
                    name: row.try_get("name")?,
                    description: row.try_get("description")?,
                    execution_order: row.try_get("execution_order")?,
                })
            })
            .collect()
    }

    async fn find_tasks_by_job_id(&self, job_id: i64) -> StoreResult<Vec<TaskDefinition>> {
        let rows = sqlx::query(
            "SELECT id, job_id, name, task_type, execution_order, parameters FROM task WHERE job_id = ?",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<TaskDefinition> {
                Ok(TaskDefinition {
                    id: row.try_get("id")?,
                    job_id: row.try_get("job_id")?,
                    name: row.try_get("name")?,
                    task_type: row.try_get("task_type")?,
                    execution_order: row.try_get("execution_order")?,
                    parameters: decode_json(row.try_get("parameters")?, "parameters")?,
                    settings: None,
                })
            })
            .collect()
    }

    async fn import_workflow(&self, spec: &WorkflowSpec) -> StoreResult<i64> {
        let mut tx = self.pool.begin().await?;

        let workflow_id = sqlx::query("INSERT INTO workflow (name, description) VALUES (?, ?)")
            .bind(&spec.name)
            .bind(&spec.description)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        let mut config = serde_json::Map::new();
        for job in &spec.jobs {
            let job_id = sqlx::query(
                "INSERT INTO job (workflow_id, name, description, execution_order) VALUES (?, ?, ?, ?)",
            )
            .bind(workflow_id)
            .bind(&job.name)
            .bind(&job.description)
            .bind(job.execution_order)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            for task in &job.tasks {
                let parameters = task.parameters.as_ref().map(|p| p.to_string());
                let task_id = sqlx::query(
                    "INSERT INTO task (job_id, name, task_type, execution_order, parameters) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(job_id)
                .bind(&task.name)
                .bind(&task.task_type)
                .bind(task.execution_order)
                .bind(parameters)
                .execute(&mut *tx)
                .await?
                .last_insert_rowid();

                if let Some(settings) = &task.settings {
                    config.insert(task_id.to_string(), settings.clone());
                }
            }
        }

        sqlx::query("UPDATE workflow SET default_config = ? WHERE id = ?")
            .bind(serde_json::Value::Object(config).to_string())
            .bind(workflow_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(workflow_id)
    }
}

#[async_trait]
impl RunStore for SqliteStore {
    async fn insert_workflow_run(&self, run: &WorkflowRun) -> StoreResult<i64> {
        let result = sqlx::query(
            "INSERT INTO workflow_run (workflow_id, trace_id, status, started_at, finished_at, duration_ms)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(run.workflow_id)
        .bind(&run.trace_id)
        .bind(run.timing.status.as_str())
        .bind(run.timing.started_at)
        .bind(run.timing.finished_at)
        .bind(run.timing.duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn update_workflow_run(&self, run: &WorkflowRun) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE workflow_run SET status = ?, finished_at = ?, duration_ms = ? WHERE id = ?",
        )
        .bind(run.timing.status.as_str())
        .bind(run.timing.finished_at)
        .bind(run.timing.duration_ms)
        .bind(run.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("workflow_run {}", run.id)));
        }
        Ok(())
    }

    async fn insert_job_run(&self, run: &JobRun) -> StoreResult<i64> {
        let result = sqlx::query(
            "INSERT INTO job_run (workflow_run_id, job_id, execution_order, status, started_at, finished_at, duration_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run.workflow_run_id)
        .bind(run.job_id)
        .bind(run.execution_order)
        .bind(run.timing.status.as_str())
        .bind(run.timing.started_at)
        .bind(run.timing.finished_at)
        .bind(run.timing.duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn update_job_run(&self, run: &JobRun) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE job_run SET status = ?, finished_at = ?, duration_ms = ? WHERE id = ?",
        )
        .bind(run.timing.status.as_str())
        .bind(run.timing.finished_at)
        .bind(run.timing.duration_ms)
        .bind(run.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("job_run {}", run.id)));
        }
        Ok(())
    }

    async fn insert_task_run(&self, run: &TaskRun) -> StoreResult<i64> {
        let result = sqlx::query(
            "INSERT INTO task_run (job_run_id, task_id, task_name, execution_order, status, started_at, finished_at, duration_ms, result_message)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run.job_run_id)
        .bind(run.task_id)
        .bind(&run.task_name)
        .bind(run.execution_order)
        .bind(run.timing.status.as_str())
        .bind(run.timing.started_at)
        .bind(run.timing.finished_at)
        .bind(run.timing.duration_ms)
        .bind(&run.result_message)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn update_task_run(&self, run: &TaskRun) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE task_run SET status = ?, finished_at = ?, duration_ms = ?, result_message = ? WHERE id = ?",
        )
        .bind(run.timing.status.as_str())
        .bind(run.timing.finished_at)
        .bind(run.timing.duration_ms)
        .bind(&run.result_message)
        .bind(run.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("task_run {}", run.id)));
        }
        Ok(())
    }

    async fn insert_task_io_data(&self, data: &TaskIoData) -> StoreResult<i64> {
        let result = sqlx::query(
            "INSERT INTO task_io_data (task_run_id, io_type, name, data_type, data_value, data_size, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(data.task_run_id)
        .bind(data.io_type.as_str())
        .bind(&data.name)
        .bind(&data.data_type)
        .bind(&data.data_value)
        .bind(data.data_size)
        .bind(data.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_workflow_runs(&self, status: Option<RunStatus>) -> StoreResult<Vec<WorkflowRun>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT id, workflow_id, trace_id, status, started_at, finished_at, duration_ms FROM workflow_run",
        );
        if let Some(status) = status {
            query.push(" WHERE status = ").push_bind(status.as_str());
        }
        query.push(" ORDER BY id DESC");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(workflow_run_from_row).collect()
    }

    async fn get_workflow_run(&self, id: i64) -> StoreResult<WorkflowRun> {
        let row = sqlx::query(
            "SELECT id, workflow_id, trace_id, status, started_at, finished_at, duration_ms
             FROM workflow_run WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("workflow_run {}", id)))?;
        workflow_run_from_row(&row)
    }

    async fn find_job_runs(&self, workflow_run_id: i64) -> StoreResult<Vec<JobRun>> {
        let rows = sqlx::query(
            "SELECT id, workflow_run_id, job_id, execution_order, status, started_at, finished_at, duration_ms
             FROM job_run WHERE workflow_run_id = ? ORDER BY id",
        )
        .bind(workflow_run_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_run_from_row).collect()
    }

    async fn find_task_runs(&self, job_run_id: i64) -> StoreResult<Vec<TaskRun>> {
        let sql = format!(
            "SELECT {} FROM task_run tr WHERE tr.job_run_id = ? ORDER BY tr.id",
            TASK_RUN_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(job_run_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(task_run_from_row).collect()
    }

    async fn find_latest_success_task_run(
        &self,
        workflow_run_id: i64,
        task_name: &str,
    ) -> StoreResult<Option<TaskRun>> {
        let sql = format!(
            "SELECT {} FROM task_run tr
             JOIN job_run jr ON jr.id = tr.job_run_id
             WHERE jr.workflow_run_id = ? AND tr.task_name = ? AND tr.status = ?
             ORDER BY tr.id DESC LIMIT 1",
            TASK_RUN_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(workflow_run_id)
            .bind(task_name)
            .bind(RunStatus::Success.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_run_from_row).transpose()
    }

    async fn find_output_by_task_run_id(&self, task_run_id: i64) -> StoreResult<Option<TaskIoData>> {
        let row = sqlx::query(
            "SELECT id, task_run_id, io_type, name, data_type, data_value, data_size, created_at
             FROM task_io_data WHERE task_run_id = ? AND io_type = ?
             ORDER BY id DESC LIMIT 1",
        )
        .bind(task_run_id)
        .bind(IoType::Output.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(io_data_from_row).transpose()
    }

    async fn find_task_io_data(
        &self,
        task_run_ids: &[i64],
        io_type: Option<IoType>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<TaskIoData>> {
        if task_run_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT id, task_run_id, io_type, name, data_type, data_value, data_size, created_at
             FROM task_io_data WHERE task_run_id IN (",
        );
        let mut ids = query.separated(", ");
        for id in task_run_ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated(")");

        if let Some(io_type) = io_type {
            query.push(" AND io_type = ").push_bind(io_type.as_str());
        }
        query.push(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = limit {
            query.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(io_data_from_row).collect()
    }
}
