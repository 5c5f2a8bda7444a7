//! Notification relay: signature requests and contact-form mail.

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address {0}")]
    Address(String),
    #[error("failed to build message: {0}")]
    Build(String),
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Html(String),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: Body,
}

impl Email {
    /// Mail sent to a client when a document is ready to sign.
    pub fn signature_request(from: &str, to: &str, sign_url: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            subject: "Document Ready for Signature".to_string(),
            body: Body::Html(format!(
                "<p>You have a document to sign from Solidified Tax Group.</p>\n\
                 <p><a href=\"{}\">Click here to sign digitally</a></p>\n\
                 <p>Or download, print, sign, and upload it back through your client portal.</p>",
                sign_url
            )),
        }
    }

    /// Contact form relay; the submitter is the sender.
    pub fn contact(name: &str, email: &str, message: &str, destination: &str) -> Self {
        Self {
            from: email.to_string(),
            to: destination.to_string(),
            subject: format!("Contact form from {}", name),
            body: Body::Text(message.to_string()),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// STARTTLS relay with login credentials.
    pub fn new(host: &str, port: u16, user: &str, pass: &str) -> Result<Self, MailError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| MailError::Transport(e.to_string()))?
            .port(port)
            .credentials(Credentials::new(user.to_string(), pass.to_string()))
            .build();
        Ok(Self { transport })
    }
}

fn mailbox(addr: &str) -> Result<Mailbox, MailError> {
    addr.parse().map_err(|_| MailError::Address(addr.to_string()))
}

/// Build the wire message. Fails on unparseable addresses.
pub fn build_message(email: &Email) -> Result<Message, MailError> {
    let builder = Message::builder()
        .from(mailbox(&email.from)?)
        .to(mailbox(&email.to)?)
        .subject(email.subject.clone());
    let message = match &email.body {
        Body::Html(html) => builder.header(ContentType::TEXT_HTML).body(html.clone()),
        Body::Text(text) => builder.header(ContentType::TEXT_PLAIN).body(text.clone()),
    };
    message.map_err(|e| MailError::Build(e.to_string()))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        let message = build_message(&email)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        info!(to = %email.to, subject = %email.subject, "mail sent");
        Ok(())
    }
}

/// Used when no SMTP host is configured: validates and logs instead of
/// delivering.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        build_message(&email)?;
        warn!(to = %email.to, subject = %email.subject, "SMTP not configured, mail not delivered");
        Ok(())
    }
}
