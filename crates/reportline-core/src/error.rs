use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportlineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, ReportlineError>;
