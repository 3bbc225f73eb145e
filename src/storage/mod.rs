pub mod memory_store;
pub mod sqlite_store;

use async_trait::async_trait;
use thiserror::Error;

use crate::engine::types::*;

/// Errors surfaced by the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("invalid stored data: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            other => StoreError::Query(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Read access to workflow/job/task definitions, plus YAML import.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Workflow header and default config, or `None` if the workflow does not exist.
    async fn select_workflow_detail(&self, workflow_id: i64) -> StoreResult<Option<WorkflowDetail>>;

    /// Jobs belonging to a workflow (unsorted).
    async fn find_jobs_by_workflow_id(&self, workflow_id: i64) -> StoreResult<Vec<JobDefinition>>;

    /// Tasks belonging to a job (unsorted, settings not merged).
    async fn find_tasks_by_job_id(&self, job_id: i64) -> StoreResult<Vec<TaskDefinition>>;

    /// Persist a workflow definition and return its id. Task settings are
    /// folded into the workflow default config, keyed by the new task ids.
    async fn import_workflow(&self, spec: &WorkflowSpec) -> StoreResult<i64>;
}

/// Durable execution history. Every write is applied before the call returns.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert_workflow_run(&self, run: &WorkflowRun) -> StoreResult<i64>;
    async fn update_workflow_run(&self, run: &WorkflowRun) -> StoreResult<()>;

    async fn insert_job_run(&self, run: &JobRun) -> StoreResult<i64>;
    async fn update_job_run(&self, run: &JobRun) -> StoreResult<()>;

    async fn insert_task_run(&self, run: &TaskRun) -> StoreResult<i64>;
    async fn update_task_run(&self, run: &TaskRun) -> StoreResult<()>;

    /// TaskIoData rows are never updated or deleted.
    async fn insert_task_io_data(&self, data: &TaskIoData) -> StoreResult<i64>;

    /// Workflow runs, newest first, optionally filtered by status.
    async fn list_workflow_runs(&self, status: Option<RunStatus>) -> StoreResult<Vec<WorkflowRun>>;

    async fn find_workflow_runs_by_status(&self, status: RunStatus) -> StoreResult<Vec<WorkflowRun>> {
        self.list_workflow_runs(Some(status)).await
    }

    async fn get_workflow_run(&self, id: i64) -> StoreResult<WorkflowRun>;

    /// Job runs of a workflow run, in insertion order.
    async fn find_job_runs(&self, workflow_run_id: i64) -> StoreResult<Vec<JobRun>>;

    /// Task runs of a job run, in insertion order.
    async fn find_task_runs(&self, job_run_id: i64) -> StoreResult<Vec<TaskRun>>;

    /// Most recent successful task run with the given name anywhere in the workflow run.
    async fn find_latest_success_task_run(
        &self,
        workflow_run_id: i64,
        task_name: &str,
    ) -> StoreResult<Option<TaskRun>>;

    /// Most recent OUTPUT row of a task run.
    async fn find_output_by_task_run_id(&self, task_run_id: i64) -> StoreResult<Option<TaskIoData>>;

    /// IO rows for a set of task runs, newest first.
    async fn find_task_io_data(
        &self,
        task_run_ids: &[i64],
        io_type: Option<IoType>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<TaskIoData>>;
}

/// A job run together with its task runs.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobRunDetail {
    #[serde(flatten)]
    pub job_run: JobRun,
    pub task_runs: Vec<TaskRun>,
}

/// Full execution history of one workflow run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkflowRunDetail {
    pub trace_id: String,
    pub workflow_run: WorkflowRun,
    pub job_runs: Vec<JobRunDetail>,
}

/// Load a workflow run with its job runs and their task runs.
pub async fn load_workflow_run_detail(
    store: &dyn RunStore,
    workflow_run_id: i64,
) -> StoreResult<WorkflowRunDetail> {
    let workflow_run = store.get_workflow_run(workflow_run_id).await?;

    let mut job_runs = Vec::new();
    for job_run in store.find_job_runs(workflow_run_id).await? {
        let task_runs = store.find_task_runs(job_run.id).await?;
        job_runs.push(JobRunDetail { job_run, task_runs });
    }

    Ok(WorkflowRunDetail {
        trace_id: workflow_run.trace_id.clone(),
        workflow_run,
        job_runs,
    })
}
