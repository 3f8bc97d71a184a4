//! Axum JSON API for sheet sync status and workflow administration.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use leadsync_core::{Timeframe, WorkflowSettingsInput};
use leadsync_sync::{Services, WorkflowError};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "leadsync-web";

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

/// Window and optional worker filter, read from a query string or a JSON body.
#[derive(Debug, Deserialize, Default)]
struct TimeframeParams {
    #[serde(default)]
    timeframe: Timeframe,
    #[serde(default, rename = "employeeId")]
    employee_id: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/sheets/status", get(sync_status_handler))
        .route("/api/sheets/sync-now", post(sync_now_handler))
        .route(
            "/api/workflow",
            get(get_workflow_handler).post(save_workflow_handler),
        )
        .route(
            "/api/workflow/discovered-sheets",
            get(discovered_sheets_handler),
        )
        .route("/api/workflow/bulk-assign", post(bulk_assign_handler))
        .route(
            "/api/workflow/unassigned-count",
            get(unassigned_count_handler),
        )
        .route("/api/workflow/revoke", post(revoke_handler))
        .route("/api/workflow/assigned-count", get(assigned_count_handler))
        .route("/api/workflow/purge-old-leads", post(purge_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving leadsync api");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub fn port_from_env() -> u16 {
    std::env::var("LEADSYNC_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000)
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "success": true, "status": "ok" }))
}

async fn sync_status_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let status = state.services.sync.status().await;
    Json(json!({ "success": true, "data": status }))
}

async fn sync_now_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let _ = state.services.sync.trigger();
    Json(json!({ "success": true, "message": "Sync started" }))
}

async fn get_workflow_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.services.workflow.get_settings().await {
        Ok(settings) => ok_data(settings),
        Err(err) => workflow_error(err),
    }
}

async fn save_workflow_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<WorkflowSettingsInput>, JsonRejection>,
) -> Response {
    let Json(input) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    match state.services.workflow.save_settings(input).await {
        Ok(saved) => ok_data(saved),
        Err(err) => workflow_error(err),
    }
}

async fn discovered_sheets_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.services.workflow.discovered_sheets().await {
        Ok(sheets) => ok_data(sheets),
        Err(err) => workflow_error(err),
    }
}

async fn bulk_assign_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<TimeframeParams>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    count_response(state.services.workflow.bulk_assign(body.timeframe).await)
}

async fn unassigned_count_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<TimeframeParams>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    count_response(state.services.workflow.unassigned_count(query.timeframe).await)
}

async fn revoke_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<TimeframeParams>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    count_response(
        state
            .services
            .workflow
            .revoke(body.timeframe, body.employee_id.as_deref())
            .await,
    )
}

async fn assigned_count_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<TimeframeParams>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    count_response(
        state
            .services
            .workflow
            .assigned_count(query.timeframe, query.employee_id.as_deref())
            .await,
    )
}

async fn purge_handler(State(state): State<Arc<AppState>>) -> Response {
    count_response(state.services.workflow.purge_old_leads().await)
}

fn ok_data(data: impl serde::Serialize) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

fn count_response(result: Result<u64, WorkflowError>) -> Response {
    match result {
        Ok(count) => Json(json!({ "success": true, "count": count })).into_response(),
        Err(err) => workflow_error(err),
    }
}

fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": message })),
    )
        .into_response()
}

fn workflow_error(err: WorkflowError) -> Response {
    error!(error = %err, "workflow request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": err.to_string() })),
    )
        .into_response()
}
