use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A file carried by an outbound mail.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A message handed to a [`MailTransport`](crate::channel::MailTransport).
#[derive(Debug, Clone)]
pub struct OutboundMail {
    /// Deduplicated recipient list; never empty.
    pub to: Vec<String>,
    pub subject: String,
    /// Plain text body.
    pub body: String,
    /// `None` for notification-only mail.
    pub attachment: Option<Attachment>,
}

/// Where an artifact ended up after a successful delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    /// Addresses that received the artifact as an attachment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mailed_to: Vec<String>,

    /// Filesystem location the artifact was written to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub written_to: Option<PathBuf>,

    /// Addresses that received a notification-only mail.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notified: Vec<String>,
}

impl DeliveryResult {
    /// One-line description stored on the run record.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.mailed_to.is_empty() {
            parts.push(format!("mailed to {}", self.mailed_to.join(", ")));
        }
        if let Some(ref path) = self.written_to {
            parts.push(format!("written to {}", path.display()));
        }
        if !self.notified.is_empty() {
            parts.push(format!("notified {}", self.notified.join(", ")));
        }
        if parts.is_empty() {
            "nothing delivered".to_string()
        } else {
            parts.join("; ")
        }
    }
}
