use axum::{routing::get, Router};
use reportline_core::config::ReportlineConfig;
use reportline_scheduler::ExecutionEngine;
use std::sync::Arc;

/// Central shared state: passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ReportlineConfig,
    pub engine: Arc<ExecutionEngine>,
}

impl AppState {
    pub fn new(config: ReportlineConfig, engine: Arc<ExecutionEngine>) -> Self {
        Self { config, engine }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .merge(crate::http::exports::routes())
        .merge(crate::http::templates::routes())
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
