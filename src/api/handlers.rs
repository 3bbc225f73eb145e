use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};

use crate::engine::dispatch::Accepted;
use crate::engine::types::{IoType, RequestContext, RunStatus};
use crate::storage::{WorkflowRunDetail, load_workflow_run_detail};

use super::AppState;
use super::errors::AppError;

const TRACE_ID_HEADER: &str = "x-trace-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const UNKNOWN_CLIENT: &str = "unknown";

// --- Request/Response types ---

#[derive(Deserialize)]
pub struct ListRunsQuery {
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct IoDataQuery {
    /// Comma-separated task run ids.
    pub task_run_ids: String,
    pub io_type: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct BuilderInfo {
    pub task_name: String,
    pub description: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// --- Handlers ---

/// POST /v0/workflows/:id/run
///
/// Queues the execution and acknowledges immediately; the outcome is only
/// visible through the run history endpoints.
pub async fn run_workflow(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<i64>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<Accepted>), AppError> {
    let request = request_context(&headers);
    let accepted = state.launcher.launch(workflow_id, request).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// GET /v0/workflow-runs
pub async fn list_workflow_runs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListRunsQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<RunStatus>)
        .transpose()
        .map_err(AppError::BadRequest)?;

    let runs = state.runs.list_workflow_runs(status).await?;
    let total = runs.len();

    Ok(Json(serde_json::json!({
        "runs": runs,
        "total": total,
    })))
}

/// GET /v0/workflow-runs/:id
pub async fn get_workflow_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<WorkflowRunDetail>, AppError> {
    let detail = load_workflow_run_detail(state.runs.as_ref(), id)
        .await
        .map_err(|e| match AppError::from(e) {
            AppError::NotFound(_) => AppError::NotFound(format!("Workflow run '{}' not found", id)),
            other => other,
        })?;
    Ok(Json(detail))
}

/// GET /v0/tasks/io-data
pub async fn get_task_io_data(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IoDataQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let task_run_ids = parse_id_list(&params.task_run_ids).map_err(AppError::BadRequest)?;
    let io_type = params
        .io_type
        .as_deref()
        .map(str::parse::<IoType>)
        .transpose()
        .map_err(AppError::BadRequest)?;

    let rows = state
        .runs
        .find_task_io_data(&task_run_ids, io_type, params.limit)
        .await?;
    let total = rows.len();

    Ok(Json(serde_json::json!({
        "io_data": rows,
        "total": total,
    })))
}

/// GET /v0/builders
pub async fn list_builders(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let builders: Vec<BuilderInfo> = state
        .builders
        .list()
        .iter()
        .map(|(name, desc)| BuilderInfo {
            task_name: name.to_string(),
            description: desc.to_string(),
        })
        .collect();

    let total = builders.len();
    Json(serde_json::json!({
        "builders": builders,
        "total": total,
    }))
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// --- Helpers ---

/// Diagnostic context of an HTTP trigger.
pub fn request_context(headers: &HeaderMap) -> RequestContext {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let trace_id = header(TRACE_ID_HEADER).map(str::to_string);
    let client_ip = header(FORWARDED_FOR_HEADER)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string();
    let user_agent = header("user-agent").map(str::to_string);

    RequestContext::new(trace_id, Some(client_ip), user_agent)
}

fn parse_id_list(raw: &str) -> Result<Vec<i64>, String> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| format!("Invalid task run id '{}'", s))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if ids.is_empty() {
        return Err("task_run_ids must list at least one id".to_string());
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn request_context_reads_forwarding_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-trace-id", HeaderValue::from_static("trace-abc"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("user-agent", HeaderValue::from_static("curl/8.0"));

        let ctx = request_context(&headers);
        assert_eq!(ctx.trace_id, "trace-abc");
        assert_eq!(ctx.client_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(ctx.user_agent.as_deref(), Some("curl/8.0"));
    }

    #[test]
    fn request_context_defaults_without_headers() {
        let ctx = request_context(&HeaderMap::new());
        assert!(!ctx.trace_id.is_empty());
        assert_eq!(ctx.client_ip.as_deref(), Some("unknown"));
        assert_eq!(ctx.user_agent, None);
    }

    #[test]
    fn id_list_parsing() {
        assert_eq!(parse_id_list("1, 2,3").unwrap(), vec![1, 2, 3]);
        assert!(parse_id_list("").is_err());
        assert!(parse_id_list("1,x").is_err());
    }
}
