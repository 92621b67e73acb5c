//! In-memory app fixture shared by the handler tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use chrono::{TimeZone, Utc};
use reportline_core::{config::ReportlineConfig, Artifact};
use reportline_delivery::{DeliveryDispatcher, LocalFileSink, LogTransport, RetryPolicy};
use reportline_scheduler::{
    open_shared, EngineSettings, ExecutionEngine, GenerationRequest, GeneratorError, ManualClock,
    ReportGenerator, RunState,
};
use tower::ServiceExt;

use crate::app::{build_router, AppState};

struct EchoGenerator;

#[async_trait]
impl ReportGenerator for EchoGenerator {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Artifact, GeneratorError> {
        Ok(Artifact::new(
            format!("{}.{}", request.definition_id, request.format.extension()),
            request.format,
            request.name.as_bytes().to_vec(),
            request.trigger_at,
        ))
    }
}

pub struct TestApp {
    pub engine: Arc<ExecutionEngine>,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let conn = open_shared(rusqlite::Connection::open_in_memory().unwrap()).unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap(),
        ));
        let dispatcher =
            DeliveryDispatcher::new(Arc::new(LogTransport), Arc::new(LocalFileSink::new()))
                .with_retry(RetryPolicy::none());
        let engine = Arc::new(ExecutionEngine::new(
            conn,
            Arc::new(EchoGenerator),
            Arc::new(dispatcher),
            clock,
            EngineSettings::default(),
        ));
        let state = Arc::new(AppState::new(ReportlineConfig::default(), engine.clone()));
        Self {
            engine,
            router: build_router(state),
        }
    }

    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.unwrap()
    }

    pub async fn wait_idle(&self, id: &str) {
        for _ in 0..200 {
            if self.engine.state(id) == RunState::Idle {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("export {id} did not finish");
    }
}

pub fn request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_json(res: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
