use std::sync::Arc;

use tracing::{debug, error};

use crate::engine::types::JobRun;
use crate::storage::RunStore;

/// Looks up outputs of tasks that already succeeded in the current workflow run.
///
/// The search covers the whole workflow run that owns the given job run, so a
/// task can read the output of any upstream task, including ones in earlier
/// jobs. Lookup and parse failures are logged and reported as "no data".
pub struct WorkflowContext {
    store: Arc<dyn RunStore>,
}

impl WorkflowContext {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// Parsed OUTPUT payload of the most recent successful run of
    /// `source_task_name` within `job_run`'s workflow run.
    pub async fn previous_task_output(
        &self,
        job_run: &JobRun,
        source_task_name: &str,
    ) -> Option<serde_json::Value> {
        let workflow_run_id = job_run.workflow_run_id;

        let task_run = match self
            .store
            .find_latest_success_task_run(workflow_run_id, source_task_name)
            .await
        {
            Ok(Some(task_run)) => task_run,
            Ok(None) => {
                debug!(workflow_run_id, task = %source_task_name, "No successful upstream run");
                return None;
            }
            Err(e) => {
                error!(
                    workflow_run_id,
                    task = %source_task_name,
                    error = %e,
                    "Failed to look up previous task run"
                );
                return None;
            }
        };

        let io_data = match self.store.find_output_by_task_run_id(task_run.id).await {
            Ok(Some(io_data)) => io_data,
            Ok(None) => {
                debug!(task_run_id = task_run.id, "Upstream run has no output row");
                return None;
            }
            Err(e) => {
                error!(task_run_id = task_run.id, error = %e, "Failed to load task output");
                return None;
            }
        };

        match serde_json::from_str(&io_data.data_value) {
            Ok(value) => Some(value),
            Err(e) => {
                error!(task_io_data_id = io_data.id, error = %e, "Failed to parse task output");
                None
            }
        }
    }
}
