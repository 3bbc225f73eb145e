use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::engine::types::*;
use crate::storage::{DefinitionStore, RunStore, StoreError, StoreResult};

#[derive(Default)]
struct Tables {
    next_id: i64,
    workflows: HashMap<i64, WorkflowDetail>,
    jobs: Vec<JobDefinition>,
    tasks: Vec<TaskDefinition>,
    workflow_runs: Vec<WorkflowRun>,
    job_runs: Vec<JobRun>,
    task_runs: Vec<TaskRun>,
    io_data: Vec<TaskIoData>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process store for tests and `--database memory`.
/// Holds definitions and history only for the lifetime of the instance.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow header directly (tests).
    pub async fn put_workflow(&self, detail: WorkflowDetail) {
        self.tables.lock().await.workflows.insert(detail.id, detail);
    }

    /// Register a job definition directly (tests).
    pub async fn put_job(&self, job: JobDefinition) {
        self.tables.lock().await.jobs.push(job);
    }

    /// Register a task definition directly (tests).
    pub async fn put_task(&self, task: TaskDefinition) {
        self.tables.lock().await.tasks.push(task);
    }

    /// Every IO row of a task run, oldest first.
    pub async fn io_data_for(&self, task_run_id: i64) -> Vec<TaskIoData> {
        self.tables
            .lock()
            .await
            .io_data
            .iter()
            .filter(|io| io.task_run_id == task_run_id)
            .cloned()
            .collect()
    }
}

fn replace<T: Clone>(
    rows: &mut [T],
    id: i64,
    row: &T,
    id_of: impl Fn(&T) -> i64,
    kind: &str,
) -> StoreResult<()> {
    let slot = rows
        .iter_mut()
        .find(|r| id_of(r) == id)
        .ok_or_else(|| StoreError::NotFound(format!("{} {}", kind, id)))?;
    *slot = row.clone();
    Ok(())
}

#[async_trait]
impl DefinitionStore for MemoryStore {
    async fn select_workflow_detail(&self, workflow_id: i64) -> StoreResult<Option<WorkflowDetail>> {
        Ok(self.tables.lock().await.workflows.get(&workflow_id).cloned())
    }

    async fn find_jobs_by_workflow_id(&self, workflow_id: i64) -> StoreResult<Vec<JobDefinition>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .jobs
            .iter()
            .filter(|j| j.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn find_tasks_by_job_id(&self, job_id: i64) -> StoreResult<Vec<TaskDefinition>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .tasks
            .iter()
            .filter(|t| t.job_id == job_id)
            .map(|t| TaskDefinition {
                settings: None,
                ..t.clone()
            })
            .collect())
    }

    async fn import_workflow(&self, spec: &WorkflowSpec) -> StoreResult<i64> {
        let mut tables = self.tables.lock().await;
        let workflow_id = tables.allocate_id();
        let mut config = serde_json::Map::new();

        for job_spec in &spec.jobs {
            let job_id = tables.allocate_id();
            tables.jobs.push(JobDefinition {
                id: job_id,
                workflow_id,
                name: job_spec.name.clone(),
                description: job_spec.description.clone(),
                execution_order: job_spec.execution_order,
            });

            for task_spec in &job_spec.tasks {
                let task_id = tables.allocate_id();
                if let Some(settings) = &task_spec.settings {
                    config.insert(task_id.to_string(), settings.clone());
                }
                tables.tasks.push(TaskDefinition {
                    id: task_id,
                    job_id,
                    name: task_spec.name.clone(),
                    task_type: task_spec.task_type.clone(),
                    execution_order: task_spec.execution_order,
                    parameters: task_spec.parameters.clone(),
                    settings: None,
                });
            }
        }

        tables.workflows.insert(
            workflow_id,
            WorkflowDetail {
                id: workflow_id,
                name: spec.name.clone(),
                description: spec.description.clone(),
                default_config: Some(serde_json::Value::Object(config).to_string()),
            },
        );
        Ok(workflow_id)
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn insert_workflow_run(&self, run: &WorkflowRun) -> StoreResult<i64> {
        let mut tables = self.tables.lock().await;
        let id = tables.allocate_id();
        tables.workflow_runs.push(WorkflowRun { id, ..run.clone() });
        Ok(id)
    }

    async fn update_workflow_run(&self, run: &WorkflowRun) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        replace(&mut tables.workflow_runs, run.id, run, |r| r.id, "workflow_run")
    }

    async fn insert_job_run(&self, run: &JobRun) -> StoreResult<i64> {
        let mut tables = self.tables.lock().await;
        let id = tables.allocate_id();
        tables.job_runs.push(JobRun { id, ..run.clone() });
        Ok(id)
    }

    async fn update_job_run(&self, run: &JobRun) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        replace(&mut tables.job_runs, run.id, run, |r| r.id, "job_run")
    }

    async fn insert_task_run(&self, run: &TaskRun) -> StoreResult<i64> {
        let mut tables = self.tables.lock().await;
        let id = tables.allocate_id();
        tables.task_runs.push(TaskRun { id, ..run.clone() });
        Ok(id)
    }

    async fn update_task_run(&self, run: &TaskRun) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        replace(&mut tables.task_runs, run.id, run, |r| r.id, "task_run")
    }

    async fn insert_task_io_data(&self, data: &TaskIoData) -> StoreResult<i64> {
        let mut tables = self.tables.lock().await;
        let id = tables.allocate_id();
        tables.io_data.push(TaskIoData { id, ..data.clone() });
        Ok(id)
    }

    async fn list_workflow_runs(&self, status: Option<RunStatus>) -> StoreResult<Vec<WorkflowRun>> {
        let tables = self.tables.lock().await;
        let mut runs: Vec<WorkflowRun> = tables
            .workflow_runs
            .iter()
            .filter(|r| status.is_none_or(|s| r.status() == s))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(runs)
    }

    async fn get_workflow_run(&self, id: i64) -> StoreResult<WorkflowRun> {
        let tables = self.tables.lock().await;
        tables
            .workflow_runs
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("workflow_run {}", id)))
    }

    async fn find_job_runs(&self, workflow_run_id: i64) -> StoreResult<Vec<JobRun>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .job_runs
            .iter()
            .filter(|r| r.workflow_run_id == workflow_run_id)
            .cloned()
            .collect())
    }

    async fn find_task_runs(&self, job_run_id: i64) -> StoreResult<Vec<TaskRun>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .task_runs
            .iter()
            .filter(|r| r.job_run_id == job_run_id)
            .cloned()
            .collect())
    }

    async fn find_latest_success_task_run(
        &self,
        workflow_run_id: i64,
        task_name: &str,
    ) -> StoreResult<Option<TaskRun>> {
        let tables = self.tables.lock().await;
        let job_run_ids: Vec<i64> = tables
            .job_runs
            .iter()
            .filter(|r| r.workflow_run_id == workflow_run_id)
            .map(|r| r.id)
            .collect();

        Ok(tables
            .task_runs
            .iter()
            .filter(|r| {
                job_run_ids.contains(&r.job_run_id)
                    && r.task_name == task_name
                    && r.status() == RunStatus::Success
            })
            .max_by_key(|r| r.id)
            .cloned())
    }

    async fn find_output_by_task_run_id(&self, task_run_id: i64) -> StoreResult<Option<TaskIoData>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .io_data
            .iter()
            .filter(|io| io.task_run_id == task_run_id && io.io_type == IoType::Output)
            .max_by_key(|io| io.id)
            .cloned())
    }

    async fn find_task_io_data(
        &self,
        task_run_ids: &[i64],
        io_type: Option<IoType>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<TaskIoData>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<TaskIoData> = tables
            .io_data
            .iter()
            .filter(|io| task_run_ids.contains(&io.task_run_id))
            .filter(|io| io_type.is_none_or(|t| io.io_type == t))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}
