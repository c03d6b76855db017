//! Common types for Mailcast

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for users (owners and managers)
pub type UserId = Uuid;

/// Unique identifier for clients (mailing recipients)
pub type ClientId = Uuid;

/// Unique identifier for message templates
pub type MessageId = Uuid;

/// Unique identifier for mailings
pub type MailingId = Uuid;

/// Unique identifier for attempt log entries
pub type AttemptLogId = Uuid;

/// Visibility scope over owned records.
///
/// `All` is what a manager sees; `Owner` restricts to one user's records.
/// Deciding which scope a caller is entitled to happens before the core is
/// called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "user_id")]
pub enum Scope {
    All,
    Owner(UserId),
}

impl Scope {
    /// Whether a record owned by `owner_id` is visible in this scope
    pub fn includes(&self, owner_id: UserId) -> bool {
        match self {
            Scope::All => true,
            Scope::Owner(id) => *id == owner_id,
        }
    }

    /// Owner filter, `None` when unrestricted
    pub fn owner(&self) -> Option<UserId> {
        match self {
            Scope::All => None,
            Scope::Owner(id) => Some(*id),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::All => write!(f, "all"),
            Scope::Owner(id) => write!(f, "user:{}", id),
        }
    }
}

/// Email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an email address from a string
    pub fn parse(s: &str) -> Option<Self> {
        let (local, domain) = s.trim().split_once('@')?;
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return None;
        }
        Some(Self::new(local, domain))
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::Validation(format!("Invalid email address: {}", s)))
    }
}
