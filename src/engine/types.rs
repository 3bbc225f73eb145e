use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a workflow, job or task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Success => "SUCCESS",
            RunStatus::Failed => "FAILED",
        }
    }

    /// Terminal status for a unit of work, given whether anything inside it failed.
    pub fn from_failure(failed: bool) -> Self {
        if failed {
            RunStatus::Failed
        } else {
            RunStatus::Success
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RUNNING" => Ok(RunStatus::Running),
            "SUCCESS" => Ok(RunStatus::Success),
            "FAILED" => Ok(RunStatus::Failed),
            _ => Err(format!(
                "Invalid status '{}'. Use: running, success, failed",
                s
            )),
        }
    }
}

/// Direction of a persisted task artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IoType {
    Input,
    Output,
}

impl IoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IoType::Input => "INPUT",
            IoType::Output => "OUTPUT",
        }
    }
}

impl std::fmt::Display for IoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IoType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INPUT" => Ok(IoType::Input),
            "OUTPUT" => Ok(IoType::Output),
            _ => Err(format!("Invalid io type '{}'. Use: INPUT, OUTPUT", s)),
        }
    }
}

/// Start/finish bookkeeping shared by every run record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTiming {
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl RunTiming {
    fn start() -> Self {
        Self {
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
        }
    }

    fn finish(&mut self, status: RunStatus) {
        let finished_at = Utc::now();
        self.status = status;
        self.duration_ms = Some((finished_at - self.started_at).num_milliseconds());
        self.finished_at = Some(finished_at);
    }
}

/// One execution of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: i64,
    pub workflow_id: i64,
    pub trace_id: String,
    #[serde(flatten)]
    pub timing: RunTiming,
}

impl WorkflowRun {
    pub fn start(workflow_id: i64, trace_id: impl Into<String>) -> Self {
        Self {
            id: 0,
            workflow_id,
            trace_id: trace_id.into(),
            timing: RunTiming::start(),
        }
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.timing.finish(status);
    }

    pub fn status(&self) -> RunStatus {
        self.timing.status
    }
}

/// One execution of a job inside a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub id: i64,
    pub workflow_run_id: i64,
    pub job_id: i64,
    pub execution_order: Option<i32>,
    #[serde(flatten)]
    pub timing: RunTiming,
}

impl JobRun {
    pub fn start(workflow_run_id: i64, job_id: i64, execution_order: Option<i32>) -> Self {
        Self {
            id: 0,
            workflow_run_id,
            job_id,
            execution_order,
            timing: RunTiming::start(),
        }
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.timing.finish(status);
    }

    pub fn status(&self) -> RunStatus {
        self.timing.status
    }
}

/// One execution of a task inside a job run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: i64,
    pub job_run_id: i64,
    pub task_id: i64,
    pub task_name: String,
    pub execution_order: Option<i32>,
    #[serde(flatten)]
    pub timing: RunTiming,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_message: Option<String>,
}

impl TaskRun {
    pub fn start(job_run_id: i64, task: &TaskDefinition) -> Self {
        Self {
            id: 0,
            job_run_id,
            task_id: task.id,
            task_name: task.name.clone(),
            execution_order: task.execution_order,
            timing: RunTiming::start(),
            result_message: None,
        }
    }

    pub fn finish(&mut self, status: RunStatus, message: Option<String>) {
        self.timing.finish(status);
        self.result_message = message;
    }

    pub fn status(&self) -> RunStatus {
        self.timing.status
    }
}

/// Append-only input/output artifact of a task run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskIoData {
    pub id: i64,
    pub task_run_id: i64,
    pub io_type: IoType,
    pub name: String,
    pub data_type: String,
    pub data_value: String,
    pub data_size: i64,
    pub created_at: DateTime<Utc>,
}

impl TaskIoData {
    pub fn new(task_run_id: i64, io_type: IoType, name: &str, value: &serde_json::Value) -> Self {
        let data_value = value.to_string();
        Self {
            id: 0,
            task_run_id,
            io_type,
            name: name.to_string(),
            data_type: "JSON".to_string(),
            data_size: data_value.len() as i64,
            data_value,
            created_at: Utc::now(),
        }
    }
}

/// Trace identity and caller details carried by every execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub trace_id: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new(
        trace_id: Option<String>,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.unwrap_or_else(new_trace_id),
            client_ip,
            user_agent,
        }
    }

    /// Context for cron-triggered runs, which have no HTTP caller.
    pub fn for_scheduler(trace_id: Option<String>) -> Self {
        Self {
            trace_id: trace_id.unwrap_or_else(new_trace_id),
            client_ip: Some("scheduler".to_string()),
            user_agent: Some("quartz-scheduler".to_string()),
        }
    }

    /// Context for runs relaunched at startup; keeps the interrupted run's trace id.
    pub fn for_recovery(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            client_ip: Some("recovery".to_string()),
            user_agent: Some("workflow-recovery".to_string()),
        }
    }
}

pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// --- Definitions (read-only to the engine) ---

/// Workflow header plus its default configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDetail {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON object keyed by task id (as a string) holding per-task settings.
    #[serde(default)]
    pub default_config: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: i64,
    pub workflow_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub execution_order: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: i64,
    pub job_id: i64,
    pub name: String,
    pub task_type: String,
    #[serde(default)]
    pub execution_order: Option<i32>,
    /// Transport details (`endpoint`, `method`).
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
    /// User settings merged in from the workflow default config.
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
}

/// Anything ordered by `(execution_order asc, nulls last, id asc)`.
pub trait Ordered {
    fn execution_order(&self) -> Option<i32>;
    fn id(&self) -> i64;
}

impl Ordered for JobDefinition {
    fn execution_order(&self) -> Option<i32> {
        self.execution_order
    }

    fn id(&self) -> i64 {
        self.id
    }
}

impl Ordered for TaskDefinition {
    fn execution_order(&self) -> Option<i32> {
        self.execution_order
    }

    fn id(&self) -> i64 {
        self.id
    }
}

/// Sort definitions into execution order. Entries without an explicit order
/// run last, in id (creation) order.
pub fn sort_by_execution_order<T: Ordered>(items: &mut [T]) {
    items.sort_by(|a, b| {
        let by_order = match (a.execution_order(), b.execution_order()) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_order.then_with(|| a.id().cmp(&b.id()))
    });
}

// --- Import format ---

/// Workflow definition as written in a YAML import file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub jobs: Vec<JobSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub execution_order: Option<i32>,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    #[serde(default = "default_task_type")]
    pub task_type: String,
    #[serde(default)]
    pub execution_order: Option<i32>,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
    /// Stored in the workflow default config under the task's assigned id.
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
}

fn default_task_type() -> String {
    "http".to_string()
}

impl WorkflowSpec {
    pub fn from_yaml(source: &str) -> anyhow::Result<Self> {
        let spec: WorkflowSpec = serde_yml::from_str(source)?;
        Ok(spec)
    }

    /// Structural checks run before import. Task names are lookup keys for
    /// cross-task references, so they must be unique within the workflow.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push("Workflow name must not be empty".to_string());
        }

        let mut seen = HashSet::new();
        for job in &self.jobs {
            if job.name.trim().is_empty() {
                errors.push("Job name must not be empty".to_string());
            }
            for task in &job.tasks {
                if task.name.trim().is_empty() {
                    errors.push(format!("Job '{}' has a task with an empty name", job.name));
                } else if !seen.insert(task.name.as_str()) {
                    errors.push(format!(
                        "Task name '{}' is used more than once in workflow '{}'",
                        task.name, self.name
                    ));
                }
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item(i64, Option<i32>);

    impl Ordered for Item {
        fn execution_order(&self) -> Option<i32> {
            self.1
        }

        fn id(&self) -> i64 {
            self.0
        }
    }

    #[test]
    fn nulls_sort_last_then_by_id() {
        let mut items = vec![Item(1, Some(2)), Item(2, None), Item(3, Some(1)), Item(0, None)];
        sort_by_execution_order(&mut items);
        let ids: Vec<i64> = items.iter().map(|i| i.0).collect();
        assert_eq!(ids, vec![3, 1, 0, 2]);
    }

    #[test]
    fn equal_orders_fall_back_to_id() {
        let mut items = vec![Item(9, Some(1)), Item(4, Some(1))];
        sort_by_execution_order(&mut items);
        assert_eq!(items[0].0, 4);
    }

    #[test]
    fn finish_sets_duration_from_timestamps() {
        let mut run = WorkflowRun::start(7, "trace");
        assert_eq!(run.status(), RunStatus::Running);
        assert!(run.timing.finished_at.is_none());

        run.finish(RunStatus::Success);

        let finished = run.timing.finished_at.unwrap();
        assert_eq!(run.status(), RunStatus::Success);
        assert_eq!(
            run.timing.duration_ms,
            Some((finished - run.timing.started_at).num_milliseconds())
        );
    }

    #[test]
    fn io_data_size_is_byte_length() {
        let value = serde_json::json!({ "keyword": "폰케이스" });
        let io = TaskIoData::new(1, IoType::Output, "response_body", &value);
        assert_eq!(io.data_value, value.to_string());
        assert_eq!(io.data_size, io.data_value.len() as i64);
        assert!(io.data_size > io.data_value.chars().count() as i64);
        assert_eq!(io.data_type, "JSON");
    }

    #[test]
    fn status_round_trips_through_strings() {
        assert_eq!("running".parse::<RunStatus>().unwrap(), RunStatus::Running);
        assert_eq!(RunStatus::Failed.to_string(), "FAILED");
        assert!("stalled".parse::<RunStatus>().is_err());
    }

    #[test]
    fn spec_rejects_duplicate_task_names() {
        let spec = WorkflowSpec::from_yaml(
            r#"
name: dup
jobs:
  - name: first
    tasks:
      - name: keyword_search
  - name: second
    tasks:
      - name: keyword_search
"#,
        )
        .unwrap();
        let errors = spec.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("keyword_search"));
    }

    #[test]
    fn scheduler_context_uses_sentinels() {
        let ctx = RequestContext::for_scheduler(None);
        assert!(!ctx.trace_id.is_empty());
        assert_eq!(ctx.client_ip.as_deref(), Some("scheduler"));
        assert_eq!(ctx.user_agent.as_deref(), Some("quartz-scheduler"));
    }
}
