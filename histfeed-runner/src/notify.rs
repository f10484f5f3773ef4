//! Run-report delivery.
//!
//! [`Message`] is the delivery-agnostic envelope; [`Notifier`] is the seam
//! the orchestrator sends through. The default [`ConsoleNotifier`] prints to
//! stdout, which keeps local runs observable without mail credentials.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no recipients given")]
    NoRecipients,

    #[error("report delivery failed: {0}")]
    Send(String),
}

/// A file referenced by a message. Constructing one requires both the
/// payload path and the name shown to recipients, so a message can never
/// carry one without the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub path: PathBuf,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: Option<Attachment>,
}

impl Message {
    /// Build a message from a comma-delimited recipient list. Whitespace
    /// around entries is trimmed and empty entries dropped; an effectively
    /// empty list is an error.
    pub fn new(recipients: &str, subject: &str, body: &str) -> Result<Self, NotifyError> {
        let recipients: Vec<String> = recipients
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }
        Ok(Self {
            recipients,
            subject: subject.to_string(),
            body: body.to_string(),
            attachment: None,
        })
    }

    pub fn with_attachment(mut self, path: PathBuf, display_name: &str) -> Self {
        self.attachment = Some(Attachment {
            path,
            display_name: display_name.to_string(),
        });
        self
    }
}

/// Delivery seam for run reports.
pub trait Notifier: Send + Sync {
    fn send(&self, message: &Message) -> Result<(), NotifyError>;
}

/// Prints messages to stdout.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn send(&self, message: &Message) -> Result<(), NotifyError> {
        println!("to:      {}", message.recipients.join(", "));
        println!("subject: {}", message.subject);
        if let Some(attachment) = &message.attachment {
            println!(
                "attach:  {} ({})",
                attachment.display_name,
                attachment.path.display()
            );
        }
        println!("{}", message.body);
        Ok(())
    }
}
