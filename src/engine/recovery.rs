use serde::Serialize;
use tracing::{error, info, warn};

use crate::engine::dispatch::WorkflowLauncher;
use crate::engine::types::{RequestContext, RunStatus, WorkflowRun};
use crate::storage::RunStore;

/// Outcome of the startup recovery sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryResult {
    /// Runs found in RUNNING state.
    pub found: usize,
    /// Runs closed out and relaunched.
    pub relaunched: usize,
    /// Runs whose recovery failed; see the logs for each one.
    pub failed: usize,
}

/// Close out runs interrupted by a crash and start each workflow again.
///
/// Call once at startup, before any trigger can create new runs. Every
/// interrupted run is finished FAILED and its workflow relaunched from the
/// first job with the original trace id. The relaunch is a new workflow run,
/// so nothing the interrupted attempt produced is reused.
pub async fn recover_interrupted_runs(
    runs: &dyn RunStore,
    launcher: &dyn WorkflowLauncher,
) -> RecoveryResult {
    let interrupted = match runs.find_workflow_runs_by_status(RunStatus::Running).await {
        Ok(interrupted) => interrupted,
        Err(e) => {
            error!(error = %e, "Failed to query interrupted workflow runs");
            return RecoveryResult::default();
        }
    };

    let mut result = RecoveryResult {
        found: interrupted.len(),
        ..Default::default()
    };
    if interrupted.is_empty() {
        info!("No interrupted workflow runs to recover");
        return result;
    }
    warn!(count = interrupted.len(), "Recovering interrupted workflow runs");

    for run in interrupted {
        let workflow_run_id = run.id;
        match recover_run(runs, launcher, run).await {
            Ok(()) => result.relaunched += 1,
            Err(e) => {
                result.failed += 1;
                error!(workflow_run_id, error = %format!("{:#}", e), "Failed to recover workflow run");
            }
        }
    }

    info!(
        found = result.found,
        relaunched = result.relaunched,
        failed = result.failed,
        "Recovery sweep complete"
    );
    result
}

async fn recover_run(
    runs: &dyn RunStore,
    launcher: &dyn WorkflowLauncher,
    mut run: WorkflowRun,
) -> anyhow::Result<()> {
    run.finish(RunStatus::Failed);
    runs.update_workflow_run(&run).await?;
    info!(
        workflow_run_id = run.id,
        workflow_id = run.workflow_id,
        trace_id = %run.trace_id,
        "Interrupted run marked FAILED, relaunching workflow"
    );

    launcher
        .launch(run.workflow_id, RequestContext::for_recovery(run.trace_id.clone()))
        .await?;
    Ok(())
}
