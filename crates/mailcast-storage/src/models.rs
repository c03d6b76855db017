//! Database models

use chrono::{DateTime, Utc};
use mailcast_common::types::{AttemptLogId, ClientId, MailingId, MessageId, UserId};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Client model (a mailing recipient)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub owner_id: UserId,
    pub email: String,
    pub name: String,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

/// Create client input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClient {
    pub owner_id: UserId,
    pub email: String,
    pub name: String,
    pub comment: Option<String>,
}

/// Message template model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub owner_id: UserId,
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Create message input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessage {
    pub owner_id: UserId,
    pub subject: String,
    pub body: String,
}

/// Mailing status, derived from the mailing window and the current time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailingStatus {
    Created,
    Started,
    Finished,
}

impl MailingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MailingStatus::Created => "created",
            MailingStatus::Started => "started",
            MailingStatus::Finished => "finished",
        }
    }
}

impl std::fmt::Display for MailingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MailingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(MailingStatus::Created),
            "started" => Ok(MailingStatus::Started),
            "finished" => Ok(MailingStatus::Finished),
            _ => Err(format!("Invalid mailing status: {}", s)),
        }
    }
}

/// Mailing model
///
/// `status` is a stored memo of the window evaluation and may lag behind
/// the clock until it is refreshed.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Mailing {
    pub id: MailingId,
    pub owner_id: UserId,
    pub message_id: MessageId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Mailing {
    /// Get status enum
    pub fn status_enum(&self) -> Option<MailingStatus> {
        self.status.parse().ok()
    }

    /// Replace the in-memory status
    pub fn set_status(&mut self, status: MailingStatus) {
        self.status = status.to_string();
    }
}

/// Create mailing input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMailing {
    pub owner_id: UserId,
    pub message_id: MessageId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub client_ids: Vec<ClientId>,
}

/// Outcome of one delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AttemptStatus::Success),
            "failed" => Ok(AttemptStatus::Failed),
            _ => Err(format!("Invalid attempt status: {}", s)),
        }
    }
}

/// Attempt log entry, one per recipient per dispatch run
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct AttemptLog {
    pub id: AttemptLogId,
    pub mailing_id: MailingId,
    pub client_id: Option<ClientId>,
    pub status: String,
    pub server_response: String,
    pub failure_reason: Option<String>,
    pub attempt_time: DateTime<Utc>,
}

impl AttemptLog {
    /// Get status enum
    pub fn status_enum(&self) -> Option<AttemptStatus> {
        self.status.parse().ok()
    }

    pub fn is_success(&self) -> bool {
        self.status_enum() == Some(AttemptStatus::Success)
    }
}

/// Append input for the attempt log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAttemptLog {
    pub mailing_id: MailingId,
    pub client_id: Option<ClientId>,
    pub status: AttemptStatus,
    pub server_response: String,
    pub failure_reason: Option<String>,
    pub attempt_time: DateTime<Utc>,
}

/// Attempt totals over a scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptCounts {
    pub total: i64,
    pub success: i64,
    pub failed: i64,
}

/// Attempt totals for one mailing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailingAttemptCounts {
    pub mailing_id: MailingId,
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub last_attempt_time: DateTime<Utc>,
}
