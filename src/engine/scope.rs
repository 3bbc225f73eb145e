use tracing::{Span, info_span};

use crate::engine::types::RequestContext;

/// Diagnostic identity of the unit currently executing.
///
/// Passed by value through the engine instead of living in ambient state, so
/// concurrent runs never see each other's fields. Each level opens a
/// `tracing` span carrying the fields; nested spans inherit the outer ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionScope {
    pub request: RequestContext,
    pub workflow_id: i64,
    pub workflow_run_id: Option<i64>,
    pub job_run_id: Option<i64>,
    pub task_run_id: Option<i64>,
}

impl ExecutionScope {
    pub fn for_workflow(workflow_id: i64, request: RequestContext) -> Self {
        Self {
            request,
            workflow_id,
            workflow_run_id: None,
            job_run_id: None,
            task_run_id: None,
        }
    }

    pub fn with_workflow_run(&self, workflow_run_id: i64) -> Self {
        Self {
            workflow_run_id: Some(workflow_run_id),
            ..self.clone()
        }
    }

    pub fn with_job_run(&self, job_run_id: i64) -> Self {
        Self {
            job_run_id: Some(job_run_id),
            task_run_id: None,
            ..self.clone()
        }
    }

    pub fn with_task_run(&self, task_run_id: i64) -> Self {
        Self {
            task_run_id: Some(task_run_id),
            ..self.clone()
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.request.trace_id
    }

    /// Kind of unit this scope points at.
    pub fn execution_type(&self) -> &'static str {
        if self.task_run_id.is_some() {
            "TASK"
        } else if self.job_run_id.is_some() {
            "JOB"
        } else {
            "WORKFLOW"
        }
    }

    pub fn workflow_span(&self) -> Span {
        info_span!(
            "workflow",
            trace_id = %self.request.trace_id,
            client_ip = self.request.client_ip.as_deref().unwrap_or("-"),
            user_agent = self.request.user_agent.as_deref().unwrap_or("-"),
            workflow_id = self.workflow_id,
        )
    }

    pub fn job_span(&self) -> Span {
        info_span!(
            "job",
            workflow_run_id = self.workflow_run_id,
            job_run_id = self.job_run_id,
            execution_type = self.execution_type(),
        )
    }

    pub fn task_span(&self) -> Span {
        info_span!(
            "task",
            task_run_id = self.task_run_id,
            execution_type = self.execution_type(),
        )
    }
}
