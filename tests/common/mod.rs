//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use chainflow::builders::BuilderRegistry;
use chainflow::engine::WorkflowEngine;
use chainflow::engine::context::WorkflowContext;
use chainflow::engine::runner::{RetryConfig, TaskRunner};
use chainflow::engine::types::*;
use chainflow::storage::memory_store::MemoryStore;

/// What the scripted runner does for a task name.
#[derive(Clone)]
pub enum Reply {
    Json(Value),
    Fail(String),
    Panic(String),
}

/// Task runner that answers from a script and records every call.
#[derive(Default)]
pub struct ScriptedRunner {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, task_name: &str, body: Value) -> Self {
        self.set(task_name, Reply::Json(body));
        self
    }

    pub fn fail(self, task_name: &str, message: &str) -> Self {
        self.set(task_name, Reply::Fail(message.to_string()));
        self
    }

    pub fn panic(self, task_name: &str, message: &str) -> Self {
        self.set(task_name, Reply::Panic(message.to_string()));
        self
    }

    pub fn set(&self, task_name: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .insert(task_name.to_string(), reply);
    }

    /// (task name, request body) for every call, in call order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|(name, _)| name).collect()
    }

    pub fn request_for(&self, task_name: &str) -> Option<Value> {
        self.calls()
            .into_iter()
            .rev()
            .find(|(name, _)| name == task_name)
            .map(|(_, body)| body)
    }
}

#[async_trait]
impl TaskRunner for ScriptedRunner {
    async fn execute(&self, task: &TaskDefinition, request: &Value) -> anyhow::Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((task.name.clone(), request.clone()));

        let reply = self.replies.lock().unwrap().get(&task.name).cloned();
        match reply {
            Some(Reply::Json(body)) => Ok(body),
            Some(Reply::Fail(message)) => Err(anyhow::anyhow!(message)),
            Some(Reply::Panic(message)) => panic!("{}", message),
            None => Ok(json!({ "data": {} })),
        }
    }
}

pub fn workflow(id: i64, default_config: Option<Value>) -> WorkflowDetail {
    WorkflowDetail {
        id,
        name: format!("workflow-{}", id),
        description: None,
        default_config: default_config.map(|c| c.to_string()),
    }
}

pub fn job(id: i64, workflow_id: i64, execution_order: Option<i32>) -> JobDefinition {
    JobDefinition {
        id,
        workflow_id,
        name: format!("job-{}", id),
        description: None,
        execution_order,
    }
}

pub fn task(id: i64, job_id: i64, name: &str, execution_order: Option<i32>) -> TaskDefinition {
    TaskDefinition {
        id,
        job_id,
        name: name.to_string(),
        task_type: "http".to_string(),
        execution_order,
        parameters: Some(json!({ "endpoint": format!("/{}", name) })),
        settings: None,
    }
}

/// Store a workflow with jobs `(job_id, order, [(task_id, name, order)])`.
pub async fn seed(
    store: &MemoryStore,
    workflow_id: i64,
    default_config: Option<Value>,
    jobs: &[(i64, Option<i32>, &[(i64, &str, Option<i32>)])],
) {
    store.put_workflow(workflow(workflow_id, default_config)).await;
    for (job_id, job_order, tasks) in jobs {
        store.put_job(job(*job_id, workflow_id, *job_order)).await;
        for (task_id, name, task_order) in tasks.iter() {
            store.put_task(task(*task_id, *job_id, name, *task_order)).await;
        }
    }
}

pub fn no_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 0,
        backoff_s: 0.0,
    }
}

/// Engine over a memory store with the built-in builders and no retries.
pub fn engine(store: Arc<MemoryStore>, runner: Arc<ScriptedRunner>) -> WorkflowEngine {
    let context = Arc::new(WorkflowContext::new(store.clone()));
    let builders = Arc::new(BuilderRegistry::with_builtins(context));
    engine_with(store, runner, builders)
}

pub fn engine_with(
    store: Arc<MemoryStore>,
    runner: Arc<ScriptedRunner>,
    builders: Arc<BuilderRegistry>,
) -> WorkflowEngine {
    WorkflowEngine::new(store.clone(), store, builders, runner).with_retry(no_retry())
}

pub fn http_request(trace_id: &str) -> RequestContext {
    RequestContext::new(
        Some(trace_id.to_string()),
        Some("127.0.0.1".to_string()),
        Some("test-agent".to_string()),
    )
}
