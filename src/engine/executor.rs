use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use futures_util::FutureExt;
use tracing::{Instrument, error, info, warn};

use crate::builders::BuilderRegistry;
use crate::engine::runner::{RetryConfig, TaskRunner, execute_with_retry};
use crate::engine::scope::ExecutionScope;
use crate::engine::types::*;
use crate::storage::{DefinitionStore, RunStore};

/// Per-task settings keyed by task id, taken from the workflow default config.
type TaskSettings = serde_json::Map<String, serde_json::Value>;

/// The workflow execution engine.
///
/// Runs jobs in order and tasks within each job in order, persisting every
/// run record as it starts and as it finishes. A failing task never stops
/// its siblings; failures roll up to the job and then to the workflow run.
pub struct WorkflowEngine {
    definitions: Arc<dyn DefinitionStore>,
    runs: Arc<dyn RunStore>,
    builders: Arc<BuilderRegistry>,
    runner: Arc<dyn TaskRunner>,
    retry: RetryConfig,
}

impl WorkflowEngine {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        runs: Arc<dyn RunStore>,
        builders: Arc<BuilderRegistry>,
        runner: Arc<dyn TaskRunner>,
    ) -> Self {
        Self {
            definitions,
            runs,
            builders,
            runner,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn runs(&self) -> &Arc<dyn RunStore> {
        &self.runs
    }

    /// Execute a workflow to completion and return the id of the workflow
    /// run it recorded, or `None` if the run record could not be created.
    pub async fn execute_workflow(&self, workflow_id: i64, request: RequestContext) -> Option<i64> {
        let scope = ExecutionScope::for_workflow(workflow_id, request);
        let span = scope.workflow_span();
        self.run_workflow(scope).instrument(span).await
    }

    async fn run_workflow(&self, scope: ExecutionScope) -> Option<i64> {
        info!("Starting workflow execution");

        let mut workflow_run = WorkflowRun::start(scope.workflow_id, scope.trace_id());
        match self.runs.insert_workflow_run(&workflow_run).await {
            Ok(id) => workflow_run.id = id,
            Err(e) => {
                error!(error = %e, "Failed to record workflow run");
                return None;
            }
        }
        let scope = scope.with_workflow_run(workflow_run.id);

        let outcome = AssertUnwindSafe(self.execute_jobs(&scope))
            .catch_unwind()
            .await;

        let status = match outcome {
            Ok(Ok(any_job_failed)) => RunStatus::from_failure(any_job_failed),
            Ok(Err(e)) => {
                error!(workflow_run_id = workflow_run.id, error = %format!("{:#}", e), "Workflow execution aborted");
                RunStatus::Failed
            }
            Err(panic) => {
                error!(
                    workflow_run_id = workflow_run.id,
                    error = %panic_message(panic),
                    "Workflow execution panicked"
                );
                RunStatus::Failed
            }
        };

        workflow_run.finish(status);
        if let Err(e) = self.runs.update_workflow_run(&workflow_run).await {
            error!(workflow_run_id = workflow_run.id, error = %e, "Failed to finish workflow run");
        }

        info!(
            workflow_run_id = workflow_run.id,
            status = %status,
            duration_ms = workflow_run.timing.duration_ms,
            "Workflow execution complete"
        );
        Some(workflow_run.id)
    }

    /// Run every job of the workflow. Returns whether any job failed.
    async fn execute_jobs(&self, scope: &ExecutionScope) -> Result<bool> {
        let workflow_id = scope.workflow_id;
        let detail = self
            .definitions
            .select_workflow_detail(workflow_id)
            .await?
            .ok_or_else(|| anyhow!("Workflow not found: {}", workflow_id))?;
        let settings = parse_default_config(detail.default_config.as_deref())
            .with_context(|| format!("Invalid default config for workflow {}", workflow_id))?;

        let mut jobs = self.definitions.find_jobs_by_workflow_id(workflow_id).await?;
        sort_by_execution_order(&mut jobs);
        info!(workflow = %detail.name, jobs = jobs.len(), "Loaded workflow definition");

        let mut any_job_failed = false;
        for job in &jobs {
            if !self.execute_job(scope, job, &settings).await? {
                any_job_failed = true;
            }
        }
        Ok(any_job_failed)
    }

    /// Run one job's tasks in order. Returns whether the job succeeded.
    async fn execute_job(
        &self,
        scope: &ExecutionScope,
        job: &JobDefinition,
        settings: &TaskSettings,
    ) -> Result<bool> {
        let workflow_run_id = scope.workflow_run_id.unwrap_or_default();
        let mut job_run = JobRun::start(workflow_run_id, job.id, job.execution_order);
        job_run.id = self.runs.insert_job_run(&job_run).await?;

        let scope = scope.with_job_run(job_run.id);
        let span = scope.job_span();

        async {
            info!(job_id = job.id, job = %job.name, "Job started");

            let outcome = self.execute_tasks(&scope, &job_run, job, settings).await;
            let succeeded = matches!(outcome, Ok(true));

            job_run.finish(RunStatus::from_failure(!succeeded));
            let persisted = self.runs.update_job_run(&job_run).await;
            info!(job_id = job.id, status = %job_run.status(), "Job finished");

            outcome?;
            persisted?;
            anyhow::Ok(succeeded)
        }
        .instrument(span)
        .await
    }

    async fn execute_tasks(
        &self,
        scope: &ExecutionScope,
        job_run: &JobRun,
        job: &JobDefinition,
        settings: &TaskSettings,
    ) -> Result<bool> {
        let mut tasks = self.definitions.find_tasks_by_job_id(job.id).await?;
        for task in &mut tasks {
            if let Some(task_settings) = settings.get(&task.id.to_string()) {
                task.settings = Some(task_settings.clone());
            }
        }
        sort_by_execution_order(&mut tasks);

        let mut any_task_failed = false;
        for task in &tasks {
            if self.execute_task(scope, job_run, task).await == RunStatus::Failed {
                any_task_failed = true;
            }
        }
        Ok(!any_task_failed)
    }

    /// Run one task. Any failure, including a panic, is captured on the task
    /// run and reported as `Failed`; it never propagates to the job.
    async fn execute_task(
        &self,
        scope: &ExecutionScope,
        job_run: &JobRun,
        task: &TaskDefinition,
    ) -> RunStatus {
        let mut task_run = TaskRun::start(job_run.id, task);
        match self.runs.insert_task_run(&task_run).await {
            Ok(id) => task_run.id = id,
            Err(e) => {
                error!(task_id = task.id, task = %task.name, error = %e, "Failed to record task run");
                return RunStatus::Failed;
            }
        }

        let scope = scope.with_task_run(task_run.id);
        let span = scope.task_span();

        let processed = AssertUnwindSafe(self.process_task(task, &mut task_run, job_run))
            .catch_unwind()
            .instrument(span.clone())
            .await;

        if let Err(panic) = processed {
            let message = panic_message(panic);
            span.in_scope(|| {
                error!(job_run_id = job_run.id, task = %task.name, error = %message, "Task processing failed");
            });
            task_run.finish(RunStatus::Failed, Some(message));
        }

        if let Err(e) = self.runs.update_task_run(&task_run).await {
            error!(task_run_id = task_run.id, error = %e, "Failed to finish task run");
        }
        task_run.status()
    }

    async fn process_task(&self, task: &TaskDefinition, task_run: &mut TaskRun, job_run: &JobRun) {
        info!(task_id = task.id, task = %task.name, "Task started");

        let request = self.builders.build(task, job_run).await;
        self.save_io_data(task_run.id, IoType::Input, "request_body", &request)
            .await;

        let result =
            execute_with_retry(self.runner.as_ref(), task, task_run, &request, &self.retry).await;
        task_run.finish(result.status, Some(result.message.clone()));

        if result.is_failure() {
            warn!(task = %task.name, error = %result.message, "Task failed");
            let message = serde_json::Value::String(result.message);
            self.save_io_data(task_run.id, IoType::Output, "error_message", &message)
                .await;
        } else {
            info!(task = %task.name, duration_ms = task_run.timing.duration_ms, "Task completed");
            let response = serde_json::from_str(&result.message)
                .unwrap_or(serde_json::Value::String(result.message));
            self.save_io_data(task_run.id, IoType::Output, "response_body", &response)
                .await;
        }
    }

    /// Bookkeeping only: a failed write is logged and does not affect the task.
    async fn save_io_data(&self, task_run_id: i64, io_type: IoType, name: &str, value: &serde_json::Value) {
        let io_data = TaskIoData::new(task_run_id, io_type, name, value);
        if let Err(e) = self.runs.insert_task_io_data(&io_data).await {
            error!(task_run_id, io_type = %io_type, error = %e, "Failed to save task IO data");
        }
    }
}

fn parse_default_config(raw: Option<&str>) -> Result<TaskSettings> {
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return Ok(TaskSettings::new());
    };
    match serde_json::from_str::<serde_json::Value>(raw)? {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Null => Ok(TaskSettings::new()),
        _ => Err(anyhow!("default config must be a JSON object")),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_default_config_yields_no_settings() {
        assert!(parse_default_config(None).unwrap().is_empty());
        assert!(parse_default_config(Some("  ")).unwrap().is_empty());
        assert!(parse_default_config(Some("null")).unwrap().is_empty());
    }

    #[test]
    fn default_config_keyed_by_task_id() {
        let settings = parse_default_config(Some(r#"{"12": {"tag": "google"}}"#)).unwrap();
        assert_eq!(settings["12"]["tag"], "google");
    }

    #[test]
    fn non_object_default_config_is_rejected() {
        assert!(parse_default_config(Some("[1, 2]")).is_err());
        assert!(parse_default_config(Some("{broken")).is_err());
    }

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bad state"))), "bad state");
        assert_eq!(panic_message(Box::new(42)), "task panicked");
    }
}
