use crate::chart::ChartArtifact;
use crate::config::SmtpConfig;
use async_trait::async_trait;
use chrono::NaiveDate;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

pub const SUBJECT: &str = "Plot of Departure Time vs. Trip Duration";
const ATTACHMENT_CONTENT_TYPE: &str = "application/octet-stream";

/// An outgoing email carrying the chart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment_name: String,
    pub attachment: Vec<u8>,
}

pub fn body_text(date: NaiveDate) -> String {
    format!(
        "Here is your plot of departure time vs. trip duration for data taken on {}.",
        date.format("%Y-%m-%d")
    )
}

/// Read the chart back from disk and wrap it in a message
pub fn compose(
    smtp: &SmtpConfig,
    artifact: &ChartArtifact,
    date: NaiveDate,
) -> Result<Notification, NotifyError> {
    let attachment = std::fs::read(&artifact.path).map_err(|e| NotifyError::AttachmentError {
        path: artifact.path.display().to_string(),
        reason: e.to_string(),
    })?;
    let attachment_name = artifact
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "chart".to_string());

    Ok(Notification {
        from: smtp.sender_address().to_string(),
        to: smtp.recipient.address(),
        subject: SUBJECT.to_string(),
        body: body_text(date),
        attachment_name,
        attachment,
    })
}

impl Notification {
    /// MIME message: a plain-text part followed by the attachment,
    /// which lettre base64-encodes for transport
    pub fn to_message(&self) -> Result<Message, NotifyError> {
        let from: Mailbox = self
            .from
            .parse()
            .map_err(|e| NotifyError::AddressError(format!("{}: {}", self.from, e)))?;
        let to: Mailbox = self
            .to
            .parse()
            .map_err(|e| NotifyError::AddressError(format!("{}: {}", self.to, e)))?;
        let content_type = ContentType::parse(ATTACHMENT_CONTENT_TYPE)
            .map_err(|e| NotifyError::BuildError(e.to_string()))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(self.subject.clone())
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(self.body.clone()))
                    .singlepart(
                        Attachment::new(self.attachment_name.clone())
                            .body(self.attachment.clone(), content_type),
                    ),
            )
            .map_err(|e| NotifyError::BuildError(e.to_string()))
    }
}

/// Delivers a notification, once
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// SMTP submission over STARTTLS with username/password authentication.
///
/// Each delivery opens a session, sends one message and closes it.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| NotifyError::TransportError(e.to_string()))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(config.timeout()))
            .build();

        Ok(Self { transport })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let message = notification.to_message()?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::TransportError(e.to_string()))?;

        info!(recipient = %notification.to, "Email sent");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to read attachment {path}: {reason}")]
    AttachmentError { path: String, reason: String },
    #[error("Invalid address {0}")]
    AddressError(String),
    #[error("Failed to build message: {0}")]
    BuildError(String),
    #[error("SMTP delivery failed: {0}")]
    TransportError(String),
}
