//! Tests for REST API endpoints, driven through the router with `oneshot`.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use chainflow::api::{AppState, router};
use chainflow::builders::BuilderRegistry;
use chainflow::engine::context::WorkflowContext;
use chainflow::engine::types::RunStatus;
use chainflow::storage::RunStore;
use chainflow::storage::memory_store::MemoryStore;

use common::{ScriptedRunner, engine, seed};

struct TestApp {
    store: Arc<MemoryStore>,
    state: Arc<AppState>,
}

/// App whose launcher runs workflows inline, so history is complete on response.
async fn app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    seed(
        &store,
        1,
        None,
        &[(
            10,
            None,
            &[(100, "keyword_search", Some(1)), (101, "product_search", Some(2))],
        )],
    )
    .await;
    let runner = Arc::new(
        ScriptedRunner::new()
            .reply("keyword_search", json!({ "data": { "keyword": "phone case" } }))
            .fail("product_search", "search backend down"),
    );
    let context = Arc::new(WorkflowContext::new(store.clone()));

    let state = Arc::new(AppState {
        launcher: Arc::new(engine(store.clone(), runner)),
        runs: store.clone(),
        builders: Arc::new(BuilderRegistry::with_builtins(context)),
    });
    TestApp { store, state }
}

async fn send(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
    let response = router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn trigger(state: &Arc<AppState>, trace_id: &str) -> Value {
    let request = Request::builder()
        .method("POST")
        .uri("/v0/workflows/1/run")
        .header("X-Trace-Id", trace_id)
        .header("X-Forwarded-For", "198.51.100.4")
        .header("User-Agent", "api-test")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(state, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    body
}

#[tokio::test]
async fn run_returns_accepted_with_trace_id() {
    let app = app().await;

    let body = trigger(&app.state, "trace-api").await;
    assert_eq!(body, json!({ "trace_id": "trace-api" }));

    let runs = app.store.list_workflow_runs(None).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].trace_id, "trace-api");
}

#[tokio::test]
async fn run_without_trace_header_generates_one() {
    let app = app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/v0/workflows/1/run")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&app.state, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let trace_id = body["trace_id"].as_str().unwrap();
    assert_eq!(trace_id.len(), 36);
}

#[tokio::test]
async fn workflow_run_detail_nests_jobs_and_tasks() {
    let app = app().await;
    trigger(&app.state, "trace-detail").await;
    let run_id = app.store.list_workflow_runs(None).await.unwrap()[0].id;

    let (status, body) = send(&app.state, get(&format!("/v0/workflow-runs/{}", run_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["trace_id"], "trace-detail");
    assert_eq!(body["workflow_run"]["status"], "FAILED");

    let job_runs = body["job_runs"].as_array().unwrap();
    assert_eq!(job_runs.len(), 1);
    assert_eq!(job_runs[0]["job_id"], 10);
    assert_eq!(job_runs[0]["status"], "FAILED");

    let task_runs = job_runs[0]["task_runs"].as_array().unwrap();
    assert_eq!(task_runs[0]["task_name"], "keyword_search");
    assert_eq!(task_runs[0]["status"], "SUCCESS");
    assert_eq!(task_runs[1]["task_name"], "product_search");
    assert_eq!(task_runs[1]["status"], "FAILED");
}

#[tokio::test]
async fn missing_workflow_run_is_not_found() {
    let app = app().await;
    let (status, body) = send(&app.state, get("/v0/workflow-runs/999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Workflow run '999' not found");
}

#[tokio::test]
async fn list_runs_filters_by_status() {
    let app = app().await;
    trigger(&app.state, "trace-a").await;

    let (status, body) = send(&app.state, get("/v0/workflow-runs?status=failed")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let (_, body) = send(&app.state, get("/v0/workflow-runs?status=SUCCESS")).await;
    assert_eq!(body["total"], 0);

    let (status, body) = send(&app.state, get("/v0/workflow-runs?status=stalled")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Invalid status"));
}

#[tokio::test]
async fn io_data_query_returns_rows_for_task_runs() {
    let app = app().await;
    trigger(&app.state, "trace-io").await;
    let run_id = app.store.list_workflow_runs(None).await.unwrap()[0].id;
    let job_run = app.store.find_job_runs(run_id).await.unwrap().remove(0);
    let task_run_ids: Vec<String> = app
        .store
        .find_task_runs(job_run.id)
        .await
        .unwrap()
        .iter()
        .map(|t| t.id.to_string())
        .collect();

    let uri = format!(
        "/v0/tasks/io-data?task_run_ids={}&io_type=OUTPUT",
        task_run_ids.join(",")
    );
    let (status, body) = send(&app.state, get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    let names: Vec<&str> = body["io_data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"response_body"));
    assert!(names.contains(&"error_message"));

    let uri = format!("/v0/tasks/io-data?task_run_ids={}&limit=1", task_run_ids.join(","));
    let (_, body) = send(&app.state, get(&uri)).await;
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn io_data_query_rejects_bad_ids() {
    let app = app().await;
    let (status, body) = send(&app.state, get("/v0/tasks/io-data?task_run_ids=1,abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid task run id 'abc'");
}

#[tokio::test]
async fn builders_and_health() {
    let app = app().await;

    let (status, body) = send(&app.state, get("/v0/builders")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 10);
    assert_eq!(body["builders"][0]["task_name"], "keyword_search");

    let (status, body) = send(&app.state, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn run_list_reports_terminal_status() {
    let app = app().await;
    trigger(&app.state, "trace-json").await;
    let (_, body) = send(&app.state, get("/v0/workflow-runs")).await;
    let status: RunStatus = serde_json::from_value(body["runs"][0]["status"].clone()).unwrap();
    assert_eq!(status, RunStatus::Failed);
}
