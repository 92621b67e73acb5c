//! SMTP mail transport (async lettre over STARTTLS).

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment as MailAttachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use reportline_core::config::SmtpConfig;
use tracing::info;

use crate::{channel::MailTransport, error::DeliveryError, types::OutboundMail};

pub struct SmtpTransport {
    from: Mailbox,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    /// Build a relay client. No connection is opened until the first send.
    pub fn new(config: &SmtpConfig, from_address: &str) -> Result<Self, DeliveryError> {
        let from: Mailbox = from_address
            .parse()
            .map_err(|e| DeliveryError::Config(format!("invalid from address: {e}")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| DeliveryError::Config(format!("SMTP relay {}: {e}", config.host)))?
            .port(config.port);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            from,
            mailer: builder.build(),
        })
    }

    fn build_message(&self, mail: &OutboundMail) -> Result<Message, DeliveryError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(mail.subject.clone());
        for addr in &mail.to {
            let to: Mailbox = addr
                .parse()
                .map_err(|e| DeliveryError::SendFailed(format!("invalid recipient {addr}: {e}")))?;
            builder = builder.to(to);
        }

        let message = match mail.attachment {
            Some(ref a) => {
                let content_type = ContentType::parse(&a.content_type)
                    .map_err(|e| DeliveryError::SendFailed(format!("content type: {e}")))?;
                builder.multipart(
                    MultiPart::mixed()
                        .singlepart(SinglePart::plain(mail.body.clone()))
                        .singlepart(
                            MailAttachment::new(a.file_name.clone())
                                .body(a.bytes.clone(), content_type),
                        ),
                )
            }
            None => builder
                .header(ContentType::TEXT_PLAIN)
                .body(mail.body.clone()),
        };

        message.map_err(|e| DeliveryError::SendFailed(format!("build email: {e}")))
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, mail: &OutboundMail) -> Result<(), DeliveryError> {
        let message = self.build_message(mail)?;
        self.mailer
            .send(message)
            .await
            .map_err(|e| DeliveryError::SendFailed(format!("SMTP send: {e}")))?;
        info!(recipients = mail.to.len(), subject = %mail.subject, "mail sent");
        Ok(())
    }
}
