//! Tests for upstream output resolution across a workflow run.

use std::sync::Arc;

use serde_json::{Value, json};

use chainflow::engine::context::WorkflowContext;
use chainflow::engine::types::*;
use chainflow::storage::RunStore;
use chainflow::storage::memory_store::MemoryStore;

async fn start_workflow_run(store: &MemoryStore, trace_id: &str) -> i64 {
    store
        .insert_workflow_run(&WorkflowRun::start(1, trace_id))
        .await
        .unwrap()
}

async fn start_job_run(store: &MemoryStore, workflow_run_id: i64, job_id: i64) -> JobRun {
    let mut job_run = JobRun::start(workflow_run_id, job_id, Some(job_id as i32));
    job_run.id = store.insert_job_run(&job_run).await.unwrap();
    job_run
}

/// Record a finished task run with the given status and, if any, its output.
async fn record_task(
    store: &MemoryStore,
    job_run: &JobRun,
    name: &str,
    status: RunStatus,
    output: Option<Value>,
) -> i64 {
    let definition = TaskDefinition {
        id: 1,
        job_id: job_run.job_id,
        name: name.to_string(),
        task_type: "http".to_string(),
        execution_order: None,
        parameters: None,
        settings: None,
    };
    let mut task_run = TaskRun::start(job_run.id, &definition);
    task_run.id = store.insert_task_run(&task_run).await.unwrap();
    task_run.finish(status, None);
    store.update_task_run(&task_run).await.unwrap();

    if let Some(output) = output {
        store
            .insert_task_io_data(&TaskIoData::new(
                task_run.id,
                IoType::Output,
                "response_body",
                &output,
            ))
            .await
            .unwrap();
    }
    task_run.id
}

#[tokio::test]
async fn later_job_reads_output_from_earlier_job() {
    let store = Arc::new(MemoryStore::new());
    let context = WorkflowContext::new(store.clone());

    let run = start_workflow_run(&store, "t1").await;
    let job1 = start_job_run(&store, run, 1).await;
    let output = json!({ "data": { "keyword": "desk lamp" } });
    record_task(&store, &job1, "keyword_search", RunStatus::Success, Some(output.clone())).await;

    let job2 = start_job_run(&store, run, 2).await;
    let resolved = context.previous_task_output(&job2, "keyword_search").await;
    assert_eq!(resolved, Some(output));
}

#[tokio::test]
async fn output_from_another_workflow_run_is_invisible() {
    let store = Arc::new(MemoryStore::new());
    let context = WorkflowContext::new(store.clone());

    let first = start_workflow_run(&store, "t1").await;
    let first_job = start_job_run(&store, first, 1).await;
    record_task(
        &store,
        &first_job,
        "keyword_search",
        RunStatus::Success,
        Some(json!({ "data": { "keyword": "old" } })),
    )
    .await;

    let second = start_workflow_run(&store, "t2").await;
    let second_job = start_job_run(&store, second, 1).await;
    assert_eq!(
        context.previous_task_output(&second_job, "keyword_search").await,
        None
    );
}

#[tokio::test]
async fn most_recent_successful_run_wins() {
    let store = Arc::new(MemoryStore::new());
    let context = WorkflowContext::new(store.clone());

    let run = start_workflow_run(&store, "t1").await;
    let job = start_job_run(&store, run, 1).await;
    record_task(&store, &job, "x", RunStatus::Success, Some(json!({ "v": 1 }))).await;
    record_task(&store, &job, "x", RunStatus::Success, Some(json!({ "v": 2 }))).await;
    record_task(&store, &job, "x", RunStatus::Failed, Some(json!({ "v": 3 }))).await;

    assert_eq!(
        context.previous_task_output(&job, "x").await,
        Some(json!({ "v": 2 }))
    );
}

#[tokio::test]
async fn failed_or_unknown_upstream_yields_nothing() {
    let store = Arc::new(MemoryStore::new());
    let context = WorkflowContext::new(store.clone());

    let run = start_workflow_run(&store, "t1").await;
    let job = start_job_run(&store, run, 1).await;
    record_task(&store, &job, "broken", RunStatus::Failed, Some(json!("boom"))).await;

    assert_eq!(context.previous_task_output(&job, "broken").await, None);
    assert_eq!(context.previous_task_output(&job, "never_ran").await, None);
}

#[tokio::test]
async fn successful_run_without_output_row_yields_nothing() {
    let store = Arc::new(MemoryStore::new());
    let context = WorkflowContext::new(store.clone());

    let run = start_workflow_run(&store, "t1").await;
    let job = start_job_run(&store, run, 1).await;
    record_task(&store, &job, "silent", RunStatus::Success, None).await;

    assert_eq!(context.previous_task_output(&job, "silent").await, None);
}

#[tokio::test]
async fn unparseable_output_yields_nothing() {
    let store = Arc::new(MemoryStore::new());
    let context = WorkflowContext::new(store.clone());

    let run = start_workflow_run(&store, "t1").await;
    let job = start_job_run(&store, run, 1).await;
    let task_run_id = record_task(&store, &job, "garbled", RunStatus::Success, None).await;

    let mut row = TaskIoData::new(task_run_id, IoType::Output, "response_body", &json!({}));
    row.data_value = "{truncated".to_string();
    store.insert_task_io_data(&row).await.unwrap();

    assert_eq!(context.previous_task_output(&job, "garbled").await, None);
}
