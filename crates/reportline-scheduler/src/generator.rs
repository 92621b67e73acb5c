use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reportline_core::{Artifact, ExportFormat, ReportType};
use serde::Serialize;
use thiserror::Error;

/// Parameters for one report rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub definition_id: String,
    pub name: String,
    pub report_type: ReportType,
    pub format: ExportFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<String>>,
    pub trigger_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    /// The generator answered but refused the request.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The generator could not be reached or returned garbage.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Renders a report into an [`Artifact`].
///
/// Implementations only need to be async; the engine applies the timeout.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<Artifact, GeneratorError>;
}
