use thiserror::Error;

/// One rejected input field of a create/update request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub reason: String,
}

impl FieldError {
    pub fn missing(field: &'static str) -> Self {
        Self {
            field,
            reason: "is required".to_string(),
        }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors that can occur within the scheduled export engine.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored JSON column could not be (de)serialised.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Request rejected before any state change.
    #[error("Validation failed: {}", describe(.fields))]
    Validation { fields: Vec<FieldError> },

    /// No definition with the given ID exists in the store.
    #[error("Export definition not found: {id}")]
    DefinitionNotFound { id: String },

    /// The referenced report template does not exist.
    #[error("Report template not found: {id}")]
    TemplateNotFound { id: String },

    /// The recurrence calculator could not advance past the anchor.
    #[error("Invalid anchor: {anchor}")]
    InvalidAnchor { anchor: String },

    /// A run for this definition is already in flight.
    #[error("Export {id} is already running")]
    AlreadyRunning { id: String },

    /// The definition cannot be deleted while a run is in flight.
    #[error("Export {id} has a run in progress")]
    RunInProgress { id: String },

    /// The external report generator reported an error.
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// The artifact was generated but could not be delivered.
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    /// Lock poisoning or another invariant breach inside the engine.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// Short error code string returned to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Database(_) => "DATABASE_ERROR",
            SchedulerError::Serialization(_) => "SERIALIZATION_ERROR",
            SchedulerError::Validation { .. } => "VALIDATION_ERROR",
            SchedulerError::DefinitionNotFound { .. } => "NOT_FOUND",
            SchedulerError::TemplateNotFound { .. } => "TEMPLATE_NOT_FOUND",
            SchedulerError::InvalidAnchor { .. } => "INVALID_ANCHOR",
            SchedulerError::AlreadyRunning { .. } => "ALREADY_RUNNING",
            SchedulerError::RunInProgress { .. } => "RUN_IN_PROGRESS",
            SchedulerError::GenerationFailed(_) => "GENERATION_FAILED",
            SchedulerError::DeliveryFailed(_) => "DELIVERY_FAILED",
            SchedulerError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

fn describe(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{} {}", f.field, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
