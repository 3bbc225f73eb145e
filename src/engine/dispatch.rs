use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::WorkflowEngine;
use crate::engine::types::RequestContext;

/// Sizing for the execution worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Connections available in the persistent store pool.
    pub db_pool_size: usize,
    /// Connections held back for queries outside workflow execution.
    pub reserved_connections: usize,
    /// Pending executions allowed before `submit` waits.
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            db_pool_size: 10,
            reserved_connections: 5,
            queue_capacity: 100,
        }
    }
}

impl DispatchConfig {
    /// Concurrent executions allowed: the pool minus the reserve, at least one.
    pub fn worker_count(&self) -> usize {
        self.db_pool_size
            .saturating_sub(self.reserved_connections)
            .max(1)
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("execution queue is full")]
    QueueFull,
    #[error("dispatcher has been shut down")]
    Closed,
}

/// Acknowledgment returned to a trigger once its execution is queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    pub trace_id: String,
}

/// Something that can start a workflow execution for a trigger.
#[async_trait]
pub trait WorkflowLauncher: Send + Sync {
    async fn launch(&self, workflow_id: i64, request: RequestContext) -> Result<Accepted>;
}

/// Runs the execution inline; the call returns once the run has finished.
#[async_trait]
impl WorkflowLauncher for WorkflowEngine {
    async fn launch(&self, workflow_id: i64, request: RequestContext) -> Result<Accepted> {
        let trace_id = request.trace_id.clone();
        self.execute_workflow(workflow_id, request)
            .await
            .ok_or_else(|| anyhow::anyhow!("Workflow {} could not be started", workflow_id))?;
        Ok(Accepted { trace_id })
    }
}

struct ExecutionRequest {
    workflow_id: i64,
    request: RequestContext,
}

/// Bounded pool of workers that execute queued workflow runs.
///
/// Triggers enqueue and return immediately. Workers pull from a shared
/// bounded channel, so at most `worker_count` runs execute at once and the
/// rest wait in the queue.
pub struct WorkflowDispatcher {
    sender: Mutex<Option<mpsc::Sender<ExecutionRequest>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl WorkflowDispatcher {
    /// Spawn the workers. Must be called from within a tokio runtime.
    pub fn start(engine: Arc<WorkflowEngine>, config: DispatchConfig) -> Self {
        let worker_count = config.worker_count();
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..worker_count)
            .map(|worker| tokio::spawn(worker_loop(worker, engine.clone(), receiver.clone())))
            .collect();

        info!(
            workers = worker_count,
            queue_capacity = config.queue_capacity,
            "Workflow dispatcher started"
        );

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            worker_count,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    async fn sender(&self) -> Result<mpsc::Sender<ExecutionRequest>, DispatchError> {
        self.sender.lock().await.clone().ok_or(DispatchError::Closed)
    }

    /// Queue an execution, waiting for queue space if necessary.
    pub async fn submit(&self, workflow_id: i64, request: RequestContext) -> Result<Accepted, DispatchError> {
        let trace_id = request.trace_id.clone();
        self.sender()
            .await?
            .send(ExecutionRequest { workflow_id, request })
            .await
            .map_err(|_| DispatchError::Closed)?;

        debug!(workflow_id, trace_id = %trace_id, "Workflow execution queued");
        Ok(Accepted { trace_id })
    }

    /// Queue an execution without waiting; fails when the queue is full.
    pub async fn try_submit(&self, workflow_id: i64, request: RequestContext) -> Result<Accepted, DispatchError> {
        let trace_id = request.trace_id.clone();
        self.sender()
            .await?
            .try_send(ExecutionRequest { workflow_id, request })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
            })?;

        debug!(workflow_id, trace_id = %trace_id, "Workflow execution queued");
        Ok(Accepted { trace_id })
    }

    /// Stop accepting work, let the workers drain the queue, and wait for them.
    pub async fn shutdown(&self) {
        self.sender.lock().await.take();

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Dispatcher worker ended abnormally");
            }
        }
        info!("Workflow dispatcher stopped");
    }
}

#[async_trait]
impl WorkflowLauncher for WorkflowDispatcher {
    async fn launch(&self, workflow_id: i64, request: RequestContext) -> Result<Accepted> {
        Ok(self.submit(workflow_id, request).await?)
    }
}

async fn worker_loop(
    worker: usize,
    engine: Arc<WorkflowEngine>,
    queue: Arc<Mutex<mpsc::Receiver<ExecutionRequest>>>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(ExecutionRequest { workflow_id, request }) = next else {
            break;
        };

        debug!(worker, workflow_id, trace_id = %request.trace_id, "Worker picked up execution");
        engine.execute_workflow(workflow_id, request).await;
    }
    debug!(worker, "Dispatcher worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_reserves_connections() {
        assert_eq!(DispatchConfig::default().worker_count(), 5);

        let config = DispatchConfig {
            db_pool_size: 20,
            reserved_connections: 4,
            queue_capacity: 1,
        };
        assert_eq!(config.worker_count(), 16);
    }

    #[test]
    fn worker_count_never_drops_to_zero() {
        let config = DispatchConfig {
            db_pool_size: 3,
            reserved_connections: 5,
            queue_capacity: 1,
        };
        assert_eq!(config.worker_count(), 1);
    }
}
