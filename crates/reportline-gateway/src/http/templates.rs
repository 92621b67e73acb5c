//! Report template endpoints.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use reportline_scheduler::{ReportTemplate, TemplateInput};
use serde_json::{json, Value};
use std::sync::Arc;

use super::error::{parse_body, ApiError};
use crate::app::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/templates", get(list_templates).post(create_template))
        .route("/templates/{id}", get(get_template))
}

/// GET /templates: defaults first.
async fn list_templates(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let templates = state.engine.templates().list()?;
    Ok(Json(json!({ "templates": templates })))
}

/// POST /templates
async fn create_template(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<ReportTemplate>), ApiError> {
    let input: TemplateInput = parse_body(&body)?;
    let template = state
        .engine
        .templates()
        .create(input, state.engine.clock().now())?;
    Ok((StatusCode::CREATED, Json(template)))
}

/// GET /templates/{id}
async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ReportTemplate>, ApiError> {
    Ok(Json(state.engine.templates().get(&id)?))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{body_json, request, TestApp};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn created_template_drives_export_format() {
        let app = TestApp::new();
        let res = app
            .send(request(
                "POST",
                "/templates",
                Some(json!({
                    "name": "Budget workbook",
                    "type": "budget",
                    "format": "EXCEL",
                    "sections": ["summary", "variance"],
                })),
            ))
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let template = body_json(res).await;
        let template_id = template["id"].as_str().unwrap().to_string();
        assert_eq!(template["usageCount"], 0);

        let res = app
            .send(request(
                "POST",
                "/exports",
                Some(json!({
                    "name": "Budget weekly",
                    "templateId": template_id,
                    "frequency": "WEEKLY",
                    "destination": "budget@example.com",
                })),
            ))
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let export = body_json(res).await;
        assert_eq!(export["format"], "EXCEL");
        assert_eq!(export["reportType"], "budget");

        let id = export["id"].as_str().unwrap().to_string();
        app.send(request("POST", &format!("/exports/{id}/run"), None))
            .await;
        app.wait_idle(&id).await;

        let res = app
            .send(request("GET", &format!("/templates/{template_id}"), None))
            .await;
        assert_eq!(body_json(res).await["usageCount"], 1);
    }

    #[tokio::test]
    async fn missing_template_is_not_found() {
        let app = TestApp::new();
        let res = app.send(request("GET", "/templates/absent", None)).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(res).await["code"], "TEMPLATE_NOT_FOUND");
    }

    #[tokio::test]
    async fn list_is_empty_initially() {
        let app = TestApp::new();
        let res = app.send(request("GET", "/templates", None)).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await, json!({ "templates": [] }));
    }
}
