//! Outbound mail transport

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use mailcast_common::config::SmtpConfig;
use mailcast_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;
use thiserror::Error as ThisError;
use tracing::debug;

/// Why a delivery attempt was classified as failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The server refused the message permanently
    Rejected,
    /// Connection, TLS, timeout or transient server error
    Unreachable,
    /// The sender or recipient address could not be used
    InvalidAddress,
    /// The transport returned without error but did not accept exactly one message
    UnexpectedCount,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Rejected => "rejected",
            FailureReason::Unreachable => "unreachable",
            FailureReason::InvalidAddress => "invalid_address",
            FailureReason::UnexpectedCount => "unexpected_count",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message addressed to a single recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub subject: String,
    pub body: String,
    pub from_address: String,
    pub to_address: String,
}

/// Transport-level send failure
#[derive(Debug, ThisError)]
pub enum TransportError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("rejected by server: {0}")]
    Rejected(String),

    #[error("server unreachable: {0}")]
    Unreachable(String),
}

impl TransportError {
    pub fn reason(&self) -> FailureReason {
        match self {
            TransportError::InvalidAddress(_) | TransportError::Build(_) => {
                FailureReason::InvalidAddress
            }
            TransportError::Rejected(_) => FailureReason::Rejected,
            TransportError::Unreachable(_) => FailureReason::Unreachable,
        }
    }
}

/// Delivers one message and reports how many messages were accepted
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> std::result::Result<usize, TransportError>;
}

/// SMTP relay transport
pub struct SmtpMailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailTransport {
    /// Build the relay connection settings from configuration.
    ///
    /// No connection is opened until the first send.
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let mut builder = match config.tls.as_str() {
            "tls" => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| Error::Transport(format!("Failed to create SMTP transport: {}", e)))?,
            "starttls" => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| Error::Transport(format!("Failed to create SMTP transport: {}", e)))?,
            "none" => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host),
            other => {
                return Err(Error::Config(format!("Unsupported smtp.tls mode: {}", other)));
            }
        }
        .port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let mailer = builder
            .timeout(Some(StdDuration::from_secs(config.timeout_secs)))
            .build();

        Ok(Self { mailer })
    }

    fn build_message(mail: &OutgoingMail) -> std::result::Result<Message, TransportError> {
        let from: Mailbox = mail
            .from_address
            .parse()
            .map_err(|e| TransportError::InvalidAddress(format!("{}: {}", mail.from_address, e)))?;
        let to: Mailbox = mail
            .to_address
            .parse()
            .map_err(|e| TransportError::InvalidAddress(format!("{}: {}", mail.to_address, e)))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())
            .map_err(|e| TransportError::Build(e.to_string()))
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(&self, mail: &OutgoingMail) -> std::result::Result<usize, TransportError> {
        let message = Self::build_message(mail)?;

        match self.mailer.send(message).await {
            Ok(response) if response.is_positive() => {
                debug!(to = %mail.to_address, code = %response.code(), "SMTP accepted message");
                Ok(1)
            }
            Ok(response) => {
                debug!(to = %mail.to_address, code = %response.code(), "SMTP did not accept message");
                Ok(0)
            }
            Err(e) if e.is_permanent() => Err(TransportError::Rejected(e.to_string())),
            Err(e) => Err(TransportError::Unreachable(e.to_string())),
        }
    }
}
