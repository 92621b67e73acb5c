use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::{error::DeliveryError, types::OutboundMail};

/// Outbound mail channel (SMTP relay, log sink, test double, …).
///
/// Implementations must be `Send + Sync` so a single transport can be shared
/// by every run the engine has in flight.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Stable lowercase identifier for this transport (e.g. `"smtp"`).
    fn name(&self) -> &str;

    /// Deliver a single message to every address in `mail.to`.
    ///
    /// `&self` so concurrent runs can send without a mutable borrow.
    async fn send(&self, mail: &OutboundMail) -> Result<(), DeliveryError>;
}

/// Destination for path-addressed artifacts.
#[async_trait]
pub trait FileSink: Send + Sync {
    /// Write `bytes` to `path`, creating parent directories as needed.
    /// Returns the final location written.
    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<PathBuf, DeliveryError>;
}

/// Writes to the local filesystem, optionally confined under a root directory.
///
/// The artifact is written to a sibling `.part` file first and renamed into
/// place so readers never observe a half-written report.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSink {
    root: Option<PathBuf>,
}

impl LocalFileSink {
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Reject any destination that does not live under `root`.
    pub fn confined_to(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

#[async_trait]
impl FileSink for LocalFileSink {
    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<PathBuf, DeliveryError> {
        if let Some(ref root) = self.root {
            if !path.starts_with(root) {
                return Err(DeliveryError::WriteFailed(format!(
                    "{} is outside the output root {}",
                    path.display(),
                    root.display()
                )));
            }
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DeliveryError::WriteFailed(format!("create {}: {e}", parent.display()))
            })?;
        }

        let mut part = path.as_os_str().to_owned();
        part.push(".part");
        let part = PathBuf::from(part);

        tokio::fs::write(&part, bytes)
            .await
            .map_err(|e| DeliveryError::WriteFailed(format!("write {}: {e}", part.display())))?;
        if let Err(e) = tokio::fs::rename(&part, path).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(DeliveryError::WriteFailed(format!(
                "rename into {}: {e}",
                path.display()
            )));
        }

        info!(path = %path.display(), bytes = bytes.len(), "artifact written");
        Ok(path.to_path_buf())
    }
}

/// Mail transport that only logs. Used when no SMTP relay is configured.
#[derive(Debug, Clone, Default)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, mail: &OutboundMail) -> Result<(), DeliveryError> {
        info!(
            to = %mail.to.join(", "),
            subject = %mail.subject,
            attachment = mail.attachment.as_ref().map(|a| a.file_name.as_str()).unwrap_or("-"),
            "mail not sent (no SMTP relay configured)"
        );
        Ok(())
    }
}
