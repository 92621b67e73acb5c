//! `reportline-delivery`: routes generated report artifacts to email
//! recipients and filesystem destinations.

pub mod address;
pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod smtp;
pub mod types;

pub use address::{is_valid_email, merge_recipients, Destination};
pub use channel::{FileSink, LocalFileSink, LogTransport, MailTransport};
pub use dispatcher::{DeliveryDispatcher, RetryPolicy};
pub use error::DeliveryError;
pub use smtp::SmtpTransport;
pub use types::{Attachment, DeliveryResult, OutboundMail};
