use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ReportlineError;

/// How often a definition regenerates its report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

impl Frequency {
    pub const ALL: [Frequency; 4] = [
        Frequency::Daily,
        Frequency::Weekly,
        Frequency::Monthly,
        Frequency::Quarterly,
    ];
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Quarterly => "QUARTERLY",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Frequency {
    type Err = ReportlineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "DAILY" => Ok(Frequency::Daily),
            "WEEKLY" => Ok(Frequency::Weekly),
            "MONTHLY" => Ok(Frequency::Monthly),
            "QUARTERLY" => Ok(Frequency::Quarterly),
            other => Err(ReportlineError::UnknownVariant {
                kind: "frequency",
                value: other.to_string(),
            }),
        }
    }
}

/// Output encoding of a generated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportFormat {
    Pdf,
    Excel,
    Csv,
}

impl ExportFormat {
    /// File extension used when a path destination names a directory.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Excel => "xlsx",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Excel => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ExportFormat::Csv => "text/csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExportFormat::Pdf => "PDF",
            ExportFormat::Excel => "EXCEL",
            ExportFormat::Csv => "CSV",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = ReportlineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PDF" => Ok(ExportFormat::Pdf),
            "EXCEL" => Ok(ExportFormat::Excel),
            "CSV" => Ok(ExportFormat::Csv),
            other => Err(ReportlineError::UnknownVariant {
                kind: "format",
                value: other.to_string(),
            }),
        }
    }
}

/// Report category understood by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportType {
    Monthly,
    Quarterly,
    Annual,
    Custom,
    Portfolio,
    Framework,
    FormSubmissions,
    Compliance,
    Budget,
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReportType::Monthly => "monthly",
            ReportType::Quarterly => "quarterly",
            ReportType::Annual => "annual",
            ReportType::Custom => "custom",
            ReportType::Portfolio => "portfolio",
            ReportType::Framework => "framework",
            ReportType::FormSubmissions => "form-submissions",
            ReportType::Compliance => "compliance",
            ReportType::Budget => "budget",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ReportType {
    type Err = ReportlineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(ReportType::Monthly),
            "quarterly" => Ok(ReportType::Quarterly),
            "annual" => Ok(ReportType::Annual),
            "custom" => Ok(ReportType::Custom),
            "portfolio" => Ok(ReportType::Portfolio),
            "framework" => Ok(ReportType::Framework),
            "form-submissions" => Ok(ReportType::FormSubmissions),
            "compliance" => Ok(ReportType::Compliance),
            "budget" => Ok(ReportType::Budget),
            other => Err(ReportlineError::UnknownVariant {
                kind: "report type",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_wire_names() {
        for f in Frequency::ALL {
            let wire = serde_json::to_string(&f).unwrap();
            assert_eq!(wire, format!("\"{f}\""));
            assert_eq!(f.to_string().parse::<Frequency>().unwrap(), f);
        }
        let wire = serde_json::to_string(&ReportType::FormSubmissions).unwrap();
        assert_eq!(wire, r#""form-submissions""#);
        assert_eq!(serde_json::to_string(&ExportFormat::Excel).unwrap(), r#""EXCEL""#);
    }

    #[test]
    fn unknown_values_are_rejected() {
        assert!("HOURLY".parse::<Frequency>().is_err());
        assert!("pdf".parse::<ExportFormat>().is_err());
        assert!("weekly".parse::<ReportType>().is_err());
    }
}
