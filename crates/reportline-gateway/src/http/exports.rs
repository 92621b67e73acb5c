//! Export definition endpoints under `/exports` and `/exports/{id}/...`.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use reportline_scheduler::{DefinitionInput, ExportDefinition, RunState};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::error::{parse_body, ApiError};
use crate::app::AppState;

const DEFAULT_RUNS_LIMIT: usize = 20;
const MAX_RUNS_LIMIT: usize = 200;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/exports", get(list_exports).post(create_export))
        .route(
            "/exports/{id}",
            get(get_export).put(update_export).delete(delete_export),
        )
        .route("/exports/{id}/toggle", post(toggle_export))
        .route("/exports/{id}/run", post(run_export))
        .route("/exports/{id}/runs", get(list_runs))
}

/// A definition together with its live execution state.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportView {
    #[serde(flatten)]
    definition: ExportDefinition,
    run_state: RunState,
}

fn view(state: &AppState, definition: ExportDefinition) -> ExportView {
    let run_state = state.engine.state(&definition.id);
    ExportView {
        definition,
        run_state,
    }
}

#[derive(Debug, Deserialize)]
struct RunsQuery {
    limit: Option<usize>,
}

/// GET /exports
async fn list_exports(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let exports: Vec<_> = state
        .engine
        .store()
        .list()?
        .into_iter()
        .map(|d| view(&state, d))
        .collect();
    Ok(Json(json!({ "exports": exports })))
}

/// POST /exports: 201 with the stored definition.
async fn create_export(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<ExportView>), ApiError> {
    let input: DefinitionInput = parse_body(&body)?;
    let def = state.engine.create_definition(input)?;
    Ok((StatusCode::CREATED, Json(view(&state, def))))
}

/// GET /exports/{id}
async fn get_export(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ExportView>, ApiError> {
    let def = state.engine.store().get(&id)?;
    Ok(Json(view(&state, def)))
}

/// PUT /exports/{id}: engine-owned fields in the body are ignored.
async fn update_export(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<ExportView>, ApiError> {
    let input: DefinitionInput = parse_body(&body)?;
    let def = state.engine.update_definition(&id, input)?;
    Ok(Json(view(&state, def)))
}

/// DELETE /exports/{id}: 204, or 409 while a run is in flight.
async fn delete_export(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.delete_definition(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /exports/{id}/toggle
async fn toggle_export(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ExportView>, ApiError> {
    let def = state.engine.toggle_definition(&id)?;
    Ok(Json(view(&state, def)))
}

/// POST /exports/{id}/run: 202 once the run is admitted. The run continues
/// in the background.
async fn run_export(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let handle = state.engine.run_now(&id)?;
    info!(definition_id = %handle.definition_id(), "run-now requested via API");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "definitionId": handle.definition_id() })),
    ))
}

/// GET /exports/{id}/runs?limit=N: newest first.
async fn list_runs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<RunsQuery>,
) -> Result<Json<Value>, ApiError> {
    // 404 for unknown ids rather than an empty list.
    state.engine.store().get(&id)?;
    let limit = q.limit.unwrap_or(DEFAULT_RUNS_LIMIT).clamp(1, MAX_RUNS_LIMIT);
    let runs = state.engine.store().runs_for(&id, limit)?;
    Ok(Json(json!({ "runs": runs })))
}
