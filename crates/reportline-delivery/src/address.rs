use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use lettre::Address;

use crate::error::{DeliveryError, Result};

/// Primary delivery target of a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Email(String),
    Path(PathBuf),
}

impl Destination {
    /// Classify and validate a raw destination string.
    ///
    /// Absolute paths are filesystem destinations (even when they contain an
    /// `@`); anything else must be a syntactically valid email address.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DeliveryError::InvalidDestination(
                "destination is empty".to_string(),
            ));
        }

        if Path::new(raw).is_absolute() {
            validate_path(raw)?;
            return Ok(Destination::Path(PathBuf::from(raw)));
        }

        if raw.contains('@') {
            if is_valid_email(raw) {
                return Ok(Destination::Email(raw.to_string()));
            }
            return Err(DeliveryError::InvalidDestination(format!(
                "not a valid email address: {raw}"
            )));
        }

        Err(DeliveryError::InvalidDestination(format!(
            "expected an email address or an absolute path: {raw}"
        )))
    }
}

fn validate_path(raw: &str) -> Result<()> {
    if raw.contains('\0') {
        return Err(DeliveryError::InvalidDestination(
            "path contains a NUL byte".to_string(),
        ));
    }
    if Path::new(raw)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(DeliveryError::InvalidDestination(format!(
            "path must not contain '..': {raw}"
        )));
    }
    Ok(())
}

/// Whether `addr` parses as a bare mailbox the SMTP transport will accept.
pub fn is_valid_email(addr: &str) -> bool {
    addr.parse::<Address>().is_ok()
}

/// Merge addresses into one list, dropping case-insensitive duplicates and
/// keeping first-seen order.
pub fn merge_recipients<'a, I>(addresses: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for addr in addresses {
        let addr = addr.trim();
        if addr.is_empty() {
            continue;
        }
        if seen.insert(addr.to_ascii_lowercase()) {
            out.push(addr.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_email_and_path() {
        assert_eq!(
            Destination::parse("finance@example.com").unwrap(),
            Destination::Email("finance@example.com".to_string())
        );
        assert_eq!(
            Destination::parse("/srv/exports/monthly/").unwrap(),
            Destination::Path(PathBuf::from("/srv/exports/monthly/"))
        );
        // Absolute paths win over the '@' heuristic.
        assert!(matches!(
            Destination::parse("/srv/exports/team@eu/report.pdf").unwrap(),
            Destination::Path(_)
        ));
    }

    #[test]
    fn rejects_bad_destinations() {
        for raw in [
            "",
            "   ",
            "reports/monthly.pdf",
            "finance@",
            "@example.com",
            "fin ance@example.com",
            "Finance <finance@example.com>",
            "/srv/../etc/passwd",
        ] {
            assert!(Destination::parse(raw).is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn email_edge_cases() {
        assert!(is_valid_email("first.last+tag@sub.example.co.uk"));
        assert!(!is_valid_email("two@@example.com"));
        assert!(!is_valid_email("finance@exa mple.com"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn merge_dedups_case_insensitively_in_order() {
        let merged = merge_recipients([
            "Ops@example.com",
            "cfo@example.com",
            "ops@example.com",
            "",
            "audit@example.com",
            "CFO@EXAMPLE.COM",
        ]);
        assert_eq!(
            merged,
            vec!["Ops@example.com", "cfo@example.com", "audit@example.com"]
        );
    }
}
