pub mod builtin;

use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::context::WorkflowContext;
use crate::engine::types::{JobRun, TaskDefinition};

/// Outbound request body under construction.
pub type Body = serde_json::Map<String, serde_json::Value>;

/// Strategy that builds the request body for one kind of task.
///
/// Builders only read: static task settings and upstream outputs resolved
/// through [`WorkflowContext`]. Missing upstream data leaves the matching
/// field out of the body.
#[async_trait]
pub trait BodyBuilder: Send + Sync {
    /// Task name this builder serves (e.g., "keyword_search").
    fn task_name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Whether this builder handles a task with the given name.
    fn supports(&self, task_name: &str) -> bool {
        self.task_name() == task_name
    }

    /// Build the request body for `task`, resolving upstream data in the
    /// workflow run that owns `job_run`.
    async fn build(&self, task: &TaskDefinition, job_run: &JobRun) -> Body;
}

/// Ordered table of builders. The first builder whose `supports` matches wins.
#[derive(Default)]
pub struct BuilderRegistry {
    builders: Vec<Arc<dyn BodyBuilder>>,
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with all built-in builders registered.
    pub fn with_builtins(context: Arc<WorkflowContext>) -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry, context);
        registry
    }

    /// Append a builder. Earlier registrations take precedence.
    pub fn register(&mut self, builder: Arc<dyn BodyBuilder>) {
        self.builders.push(builder);
    }

    /// First builder that supports the task name.
    pub fn find(&self, task_name: &str) -> Option<Arc<dyn BodyBuilder>> {
        self.builders
            .iter()
            .find(|b| b.supports(task_name))
            .cloned()
    }

    /// Build the request body for a task, or `{}` if no builder matches.
    pub async fn build(&self, task: &TaskDefinition, job_run: &JobRun) -> serde_json::Value {
        match self.find(&task.name) {
            Some(builder) => serde_json::Value::Object(builder.build(task, job_run).await),
            None => serde_json::Value::Object(Body::new()),
        }
    }

    /// List all registered builders with descriptions, in registration order.
    pub fn list(&self) -> Vec<(&str, &str)> {
        self.builders
            .iter()
            .map(|b| (b.task_name(), b.description()))
            .collect()
    }
}
