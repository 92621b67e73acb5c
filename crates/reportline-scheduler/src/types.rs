use chrono::{DateTime, Utc};
use reportline_core::{Artifact, ExportFormat, Frequency, ReportType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SchedulerError;

/// A persisted recurring-export configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDefinition {
    /// UUIDv7 primary key.
    pub id: String,
    /// Human-readable label, never empty.
    pub name: String,
    /// Cached preview when `template_id` is set; the template is authoritative.
    pub report_type: ReportType,
    pub frequency: Frequency,
    /// Cached preview when `template_id` is set; the template is authoritative.
    pub format: ExportFormat,
    /// Email address or absolute filesystem path.
    pub destination: String,
    /// Extra email recipients, in the order they were entered.
    pub recipients: Vec<String>,
    pub template_id: Option<String>,
    /// Inactive definitions are skipped by ticks but still accept run-now.
    pub is_active: bool,
    /// Trigger time of the most recent completed attempt.
    pub last_run: Option<DateTime<Utc>>,
    /// Next scheduled trigger; always strictly after `last_run`.
    pub next_run: DateTime<Utc>,
    /// Successful runs only.
    pub run_count: u32,
    /// Failed runs since the last success.
    pub consecutive_failures: u32,
    /// Failure reason of the most recent run, cleared on success.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExportDefinition {
    /// Timestamp the next trigger is computed from.
    pub fn anchor(&self) -> DateTime<Utc> {
        self.last_run.unwrap_or(self.created_at)
    }
}

/// Create/update payload for a definition.
///
/// Every field is optional at the type level so validation can report all
/// missing fields at once. Engine-owned fields (`lastRun`, `nextRun`,
/// `runCount`) are not part of this type and are ignored if sent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionInput {
    pub name: Option<String>,
    pub report_type: Option<ReportType>,
    pub template_id: Option<String>,
    pub frequency: Option<Frequency>,
    pub format: Option<ExportFormat>,
    pub destination: Option<String>,
    #[serde(default)]
    pub recipients: Vec<String>,
    /// Defaults to `true` on create; `None` keeps the current value on update.
    pub is_active: Option<bool>,
}

/// A report layout the portal offers when creating a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTemplate {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub report_type: ReportType,
    pub format: ExportFormat,
    /// Ordered section identifiers passed through to the generator.
    pub sections: Vec<String>,
    pub is_default: bool,
    /// Successful generations that used this template.
    pub usage_count: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInput {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub report_type: Option<ReportType>,
    pub format: Option<ExportFormat>,
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default)]
    pub is_default: bool,
}

/// Generator parameters after template resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedParams {
    pub report_type: ReportType,
    pub format: ExportFormat,
    /// `None` lets the generator use the report type's default layout.
    pub sections: Option<Vec<String>>,
    /// Template whose usage counter a successful generation bumps.
    pub template_id: Option<String>,
}

/// Execution state of a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
}

/// Lifecycle state of a logged run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failure,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown run status: {0}")]
pub struct UnknownRunStatus(String);

impl std::str::FromStr for RunStatus {
    type Err = UnknownRunStatus;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failure" => Ok(RunStatus::Failure),
            other => Err(UnknownRunStatus(other.to_string())),
        }
    }
}

/// Size and digest of a generated artifact, kept on the run record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSummary {
    pub file_name: String,
    pub size: u64,
    pub sha256: String,
}

impl ArtifactSummary {
    pub fn of(artifact: &Artifact) -> Self {
        Self {
            file_name: artifact.file_name.clone(),
            size: artifact.bytes.len() as u64,
            sha256: hex::encode(Sha256::digest(&artifact.bytes)),
        }
    }
}

/// Terminal result of one execution, as handed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// `CODE: message` on failure.
    pub error: Option<String>,
    /// Delivery summary on success.
    pub delivery: Option<String>,
    /// Present whenever generation produced an artifact, even if delivery
    /// then failed.
    pub artifact: Option<ArtifactSummary>,
}

impl RunOutcome {
    pub fn success(artifact: ArtifactSummary, delivery: String) -> Self {
        Self {
            status: RunStatus::Success,
            error: None,
            delivery: Some(delivery),
            artifact: Some(artifact),
        }
    }

    pub fn failure(err: &SchedulerError, artifact: Option<ArtifactSummary>) -> Self {
        Self {
            status: RunStatus::Failure,
            error: Some(format!("{}: {}", err.code(), err)),
            delivery: None,
            artifact,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// One logged execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: String,
    pub definition_id: String,
    pub trigger_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub error: Option<String>,
    pub delivery: Option<String>,
    pub artifact_size: Option<u64>,
    pub artifact_sha256: Option<String>,
}

/// What a finished run left behind: the updated definition and its log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RunCompletion {
    pub definition: ExportDefinition,
    pub run: RunRecord,
}
