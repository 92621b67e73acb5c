//! Generated report payload, shared between the execution engine, the report
//! generator implementations, and the delivery dispatcher.

use chrono::{DateTime, Utc};

use crate::types::ExportFormat;

/// Output of one successful report generation.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Suggested file name, e.g. `monthly-summary-2025-02-15.pdf`.
    pub file_name: String,
    pub format: ExportFormat,
    pub bytes: Vec<u8>,
    pub generated_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(
        file_name: impl Into<String>,
        format: ExportFormat,
        bytes: Vec<u8>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            format,
            bytes,
            generated_at,
        }
    }

    /// Build a file name from a display label: lowercase, non-alphanumerics
    /// collapsed to `-`, suffixed with the date and the format extension.
    pub fn default_file_name(label: &str, format: ExportFormat, at: DateTime<Utc>) -> String {
        let mut slug = String::with_capacity(label.len());
        for c in label.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
            } else if !slug.ends_with('-') {
                slug.push('-');
            }
        }
        let slug = slug.trim_matches('-');
        let slug = if slug.is_empty() { "report" } else { slug };
        format!("{}-{}.{}", slug, at.format("%Y-%m-%d"), format.extension())
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}
