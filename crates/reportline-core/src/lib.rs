pub mod artifact;
pub mod config;
pub mod error;
pub mod types;

pub use artifact::Artifact;
pub use config::ReportlineConfig;
pub use error::{ReportlineError, Result};
pub use types::{ExportFormat, Frequency, ReportType};
