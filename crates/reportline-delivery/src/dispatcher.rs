use std::path::{Path, PathBuf};
use std::sync::Arc;

use reportline_core::Artifact;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::{
    address::{merge_recipients, Destination},
    channel::{FileSink, MailTransport},
    error::{DeliveryError, Result},
    types::{Attachment, DeliveryResult, OutboundMail},
};

/// Bounded exponential backoff for mail sends.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total tries including the first one. Zero is treated as one.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

/// Routes a finished artifact to its destination.
///
/// Email destinations get one mail with the artifact attached, addressed to
/// the destination plus all extra recipients. Path destinations get a file
/// write, and extra recipients (if any) get a notification-only mail naming
/// the written path.
pub struct DeliveryDispatcher {
    mail: Arc<dyn MailTransport>,
    files: Arc<dyn FileSink>,
    retry: RetryPolicy,
}

impl DeliveryDispatcher {
    pub fn new(mail: Arc<dyn MailTransport>, files: Arc<dyn FileSink>) -> Self {
        Self {
            mail,
            files,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Deliver `artifact` to `destination` and `recipients`.
    ///
    /// Any transport error fails the whole delivery; the caller records it as
    /// the run's outcome.
    pub async fn deliver(
        &self,
        artifact: &Artifact,
        destination: &str,
        recipients: &[String],
    ) -> Result<DeliveryResult> {
        match Destination::parse(destination)? {
            Destination::Email(primary) => {
                let to = merge_recipients(
                    std::iter::once(primary.as_str()).chain(recipients.iter().map(String::as_str)),
                );
                let mail = OutboundMail {
                    to: to.clone(),
                    subject: format!("Scheduled report: {}", artifact.file_name),
                    body: format!(
                        "Your scheduled report {} is attached ({} bytes, generated {}).",
                        artifact.file_name,
                        artifact.size(),
                        artifact.generated_at.format("%Y-%m-%d %H:%M UTC"),
                    ),
                    attachment: Some(Attachment {
                        file_name: artifact.file_name.clone(),
                        content_type: artifact.format.mime_type().to_string(),
                        bytes: artifact.bytes.clone(),
                    }),
                };
                self.send_with_retry(&mail).await?;
                info!(file = %artifact.file_name, recipients = to.len(), "artifact mailed");
                Ok(DeliveryResult {
                    mailed_to: to,
                    ..Default::default()
                })
            }
            Destination::Path(path) => {
                let target = resolve_target(&path, &artifact.file_name).await;
                let written = self.files.write(&target, &artifact.bytes).await?;

                let notify = merge_recipients(recipients.iter().map(String::as_str));
                if !notify.is_empty() {
                    let mail = OutboundMail {
                        to: notify.clone(),
                        subject: format!("Scheduled report ready: {}", artifact.file_name),
                        body: format!(
                            "The scheduled report {} was written to {}.",
                            artifact.file_name,
                            written.display()
                        ),
                        attachment: None,
                    };
                    self.send_with_retry(&mail).await?;
                }

                Ok(DeliveryResult {
                    mailed_to: Vec::new(),
                    written_to: Some(written),
                    notified: notify,
                })
            }
        }
    }

    async fn send_with_retry(&self, mail: &OutboundMail) -> Result<()> {
        let attempts = self.retry.attempts.max(1);
        let mut delay = self.retry.base_delay.min(self.retry.max_delay);
        let mut attempt = 1;

        loop {
            let err = match self.mail.send(mail).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if attempt >= attempts {
                return Err(DeliveryError::SendFailed(format!(
                    "{} after {attempt} attempt(s): {err}",
                    self.mail.name()
                )));
            }
            warn!(
                transport = %self.mail.name(),
                attempt,
                max = attempts,
                error = %err,
                retry_after_ms = delay.as_millis() as u64,
                "mail send failed, retrying with backoff"
            );
            sleep(delay).await;
            delay = delay.saturating_mul(2).min(self.retry.max_delay);
            attempt += 1;
        }
    }
}

/// A path ending in a separator, or naming an existing directory, receives
/// the artifact under its own file name.
async fn resolve_target(path: &Path, file_name: &str) -> PathBuf {
    let names_dir = path.as_os_str().to_string_lossy().ends_with('/')
        || tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
    if names_dir {
        path.join(file_name)
    } else {
        path.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LocalFileSink;
    use async_trait::async_trait;
    use chrono::Utc;
    use reportline_core::ExportFormat;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<OutboundMail>>,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        fn name(&self) -> &str {
            "recording"
        }
        async fn send(&self, mail: &OutboundMail) -> std::result::Result<(), DeliveryError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DeliveryError::SendFailed("relay unavailable".to_string()));
            }
            self.sent.lock().unwrap().push(mail.clone());
            Ok(())
        }
    }

    fn artifact() -> Artifact {
        Artifact::new("q1-summary.pdf", ExportFormat::Pdf, b"%PDF-1.7".to_vec(), Utc::now())
    }

    fn dispatcher(transport: Arc<RecordingTransport>) -> DeliveryDispatcher {
        DeliveryDispatcher::new(transport, Arc::new(LocalFileSink::new())).with_retry(RetryPolicy {
            attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        })
    }

    #[tokio::test]
    async fn email_destination_sends_one_mail_to_merged_list() {
        let transport = Arc::new(RecordingTransport::default());
        let recipients = vec![
            "cfo@example.com".to_string(),
            "FINANCE@example.com".to_string(),
            "audit@example.com".to_string(),
        ];

        let result = dispatcher(transport.clone())
            .deliver(&artifact(), "finance@example.com", &recipients)
            .await
            .unwrap();

        assert_eq!(
            result.mailed_to,
            vec!["finance@example.com", "cfo@example.com", "audit@example.com"]
        );
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let attachment = sent[0].attachment.as_ref().expect("attachment");
        assert_eq!(attachment.content_type, "application/pdf");
        assert_eq!(attachment.bytes, b"%PDF-1.7");
    }

    #[tokio::test]
    async fn path_destination_writes_file_and_notifies_recipients() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let destination = format!("{}/", dir.path().join("exports").display());

        let result = dispatcher(transport.clone())
            .deliver(&artifact(), &destination, &["ops@example.com".to_string()])
            .await
            .unwrap();

        let written = result.written_to.clone().expect("written path");
        assert_eq!(written, dir.path().join("exports").join("q1-summary.pdf"));
        assert_eq!(std::fs::read(&written).unwrap(), b"%PDF-1.7");
        assert_eq!(result.notified, vec!["ops@example.com"]);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].attachment.is_none());
        assert!(sent[0].body.contains("q1-summary.pdf"));
    }

    #[tokio::test]
    async fn path_destination_without_recipients_sends_no_mail() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let target = dir.path().join("latest.pdf");

        let result = dispatcher(transport.clone())
            .deliver(&artifact(), target.to_str().unwrap(), &[])
            .await
            .unwrap();

        assert_eq!(result.written_to, Some(target));
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_send_failures_are_retried() {
        let transport = Arc::new(RecordingTransport::default());
        transport.failures_left.store(2, Ordering::SeqCst);

        dispatcher(transport.clone())
            .deliver(&artifact(), "finance@example.com", &[])
            .await
            .unwrap();
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_delivery() {
        let transport = Arc::new(RecordingTransport::default());
        transport.failures_left.store(10, Ordering::SeqCst);

        let err = dispatcher(transport)
            .deliver(&artifact(), "finance@example.com", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::SendFailed(_)));
        assert!(err.to_string().contains("after 3 attempt(s)"));
    }

    #[tokio::test]
    async fn invalid_destination_is_rejected_before_any_io() {
        let transport = Arc::new(RecordingTransport::default());
        let err = dispatcher(transport.clone())
            .deliver(&artifact(), "not-a-destination", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidDestination(_)));
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_never_waits_longer_than_max_delay() {
        let transport = Arc::new(RecordingTransport::default());
        transport.failures_left.store(2, Ordering::SeqCst);
        let dispatcher = DeliveryDispatcher::new(transport.clone(), Arc::new(LocalFileSink::new()))
            .with_retry(RetryPolicy {
                attempts: 3,
                base_delay: Duration::from_secs(10),
                max_delay: Duration::from_secs(1),
            });

        let started = tokio::time::Instant::now();
        dispatcher
            .deliver(&artifact(), "finance@example.com", &[])
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }
}
