//! In-memory store implementing every repository trait.
//!
//! Used for development and testing. Not durable: everything is lost when
//! the store is dropped. Column writes to mailings are counted so callers
//! can observe write amplification.

use crate::models::{
    AttemptCounts, AttemptLog, Client, CreateClient, CreateMailing, CreateMessage, Mailing,
    MailingAttemptCounts, MailingStatus, Message, NewAttemptLog,
};
use crate::repository::{
    AttemptLogRepository, ClientRepository, MailingRepository, MessageRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailcast_common::types::{ClientId, MailingId, MessageId, Scope};
use mailcast_common::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    clients: Vec<Client>,
    messages: Vec<Message>,
    mailings: Vec<Mailing>,
    mailing_clients: HashMap<MailingId, Vec<ClientId>>,
    logs: Vec<AttemptLog>,
    status_writes: usize,
    end_time_writes: usize,
}

/// In-memory implementation of the Mailcast repositories
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of single-column status writes performed so far
    pub async fn status_writes(&self) -> usize {
        self.state.lock().await.status_writes
    }

    /// Number of single-column end_time writes performed so far
    pub async fn end_time_writes(&self) -> usize {
        self.state.lock().await.end_time_writes
    }

    /// Total number of attempt log entries
    pub async fn log_count(&self) -> usize {
        self.state.lock().await.logs.len()
    }
}

impl MemoryState {
    fn visible_logs(&self, scope: Scope) -> impl Iterator<Item = &AttemptLog> {
        let visible: Vec<MailingId> = self
            .mailings
            .iter()
            .filter(|m| scope.includes(m.owner_id))
            .map(|m| m.id)
            .collect();
        self.logs
            .iter()
            .filter(move |l| visible.contains(&l.mailing_id))
    }
}

fn newest_first(logs: impl DoubleEndedIterator<Item = AttemptLog>) -> Vec<AttemptLog> {
    // Reverse insertion order first so that the stable sort keeps later
    // appends ahead of earlier ones with the same timestamp.
    let mut logs: Vec<AttemptLog> = logs.rev().collect();
    logs.sort_by(|a, b| b.attempt_time.cmp(&a.attempt_time));
    logs
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn create(&self, input: CreateMessage) -> Result<Message> {
        let message = Message {
            id: Uuid::now_v7(),
            owner_id: input.owner_id,
            subject: input.subject,
            body: input.body,
            created_at: Utc::now(),
        };
        self.state.lock().await.messages.push(message.clone());
        Ok(message)
    }

    async fn get(&self, id: MessageId) -> Result<Option<Message>> {
        let state = self.state.lock().await;
        Ok(state.messages.iter().find(|m| m.id == id).cloned())
    }
}

#[async_trait]
impl ClientRepository for MemoryStore {
    async fn create(&self, input: CreateClient) -> Result<Client> {
        let mut state = self.state.lock().await;

        if state
            .clients
            .iter()
            .any(|c| c.owner_id == input.owner_id && c.email == input.email)
        {
            return Err(Error::Validation(format!(
                "Client {} already exists",
                input.email
            )));
        }

        let client = Client {
            id: Uuid::now_v7(),
            owner_id: input.owner_id,
            email: input.email,
            name: input.name,
            comment: input.comment.unwrap_or_default(),
            created_at: Utc::now(),
        };
        state.clients.push(client.clone());
        Ok(client)
    }

    async fn get(&self, id: ClientId) -> Result<Option<Client>> {
        let state = self.state.lock().await;
        Ok(state.clients.iter().find(|c| c.id == id).cloned())
    }

    async fn count(&self, scope: Scope) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state
            .clients
            .iter()
            .filter(|c| scope.includes(c.owner_id))
            .count() as i64)
    }
}

#[async_trait]
impl MailingRepository for MemoryStore {
    async fn create(&self, input: CreateMailing) -> Result<Mailing> {
        let mut state = self.state.lock().await;

        let mailing = Mailing {
            id: Uuid::now_v7(),
            owner_id: input.owner_id,
            message_id: input.message_id,
            start_time: input.start_time,
            end_time: input.end_time,
            status: MailingStatus::Created.to_string(),
            created_at: Utc::now(),
        };

        let mut client_ids: Vec<ClientId> = Vec::with_capacity(input.client_ids.len());
        for id in input.client_ids {
            if !client_ids.contains(&id) {
                client_ids.push(id);
            }
        }

        state.mailing_clients.insert(mailing.id, client_ids);
        state.mailings.push(mailing.clone());
        Ok(mailing)
    }

    async fn get(&self, id: MailingId) -> Result<Option<Mailing>> {
        let state = self.state.lock().await;
        Ok(state.mailings.iter().find(|m| m.id == id).cloned())
    }

    async fn list(&self, scope: Scope) -> Result<Vec<Mailing>> {
        let state = self.state.lock().await;
        Ok(state
            .mailings
            .iter()
            .rev()
            .filter(|m| scope.includes(m.owner_id))
            .cloned()
            .collect())
    }

    async fn count(&self, scope: Scope) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state
            .mailings
            .iter()
            .filter(|m| scope.includes(m.owner_id))
            .count() as i64)
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Mailing>> {
        let state = self.state.lock().await;
        let mut due: Vec<Mailing> = state
            .mailings
            .iter()
            .filter(|m| {
                m.start_time <= now
                    && now <= m.end_time
                    && m.status_enum() != Some(MailingStatus::Finished)
            })
            .cloned()
            .collect();
        due.sort_by_key(|m| m.start_time);
        Ok(due)
    }

    async fn recipients(&self, id: MailingId) -> Result<Vec<Client>> {
        let state = self.state.lock().await;
        let Some(ids) = state.mailing_clients.get(&id) else {
            return Ok(Vec::new());
        };

        let mut clients: Vec<Client> = state
            .clients
            .iter()
            .filter(|c| ids.contains(&c.id))
            .cloned()
            .collect();
        clients.sort_by(|a, b| a.email.cmp(&b.email).then(a.id.cmp(&b.id)));
        Ok(clients)
    }

    async fn update_status(&self, id: MailingId, status: MailingStatus) -> Result<()> {
        let mut state = self.state.lock().await;
        let mailing = state
            .mailings
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| Error::NotFound(format!("mailing {}", id)))?;
        mailing.set_status(status);
        state.status_writes += 1;
        Ok(())
    }

    async fn update_end_time(&self, id: MailingId, end_time: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let mailing = state
            .mailings
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| Error::NotFound(format!("mailing {}", id)))?;
        mailing.end_time = end_time;
        state.end_time_writes += 1;
        Ok(())
    }
}

#[async_trait]
impl AttemptLogRepository for MemoryStore {
    async fn append(&self, input: NewAttemptLog) -> Result<AttemptLog> {
        let log = AttemptLog {
            id: Uuid::now_v7(),
            mailing_id: input.mailing_id,
            client_id: input.client_id,
            status: input.status.to_string(),
            server_response: input.server_response,
            failure_reason: input.failure_reason,
            attempt_time: input.attempt_time,
        };
        self.state.lock().await.logs.push(log.clone());
        Ok(log)
    }

    async fn list_by_mailing(&self, mailing_id: MailingId) -> Result<Vec<AttemptLog>> {
        let state = self.state.lock().await;
        Ok(newest_first(
            state
                .logs
                .iter()
                .filter(|l| l.mailing_id == mailing_id)
                .cloned()
                .collect::<Vec<_>>()
                .into_iter(),
        ))
    }

    async fn recent(&self, scope: Scope, limit: i64) -> Result<Vec<AttemptLog>> {
        let state = self.state.lock().await;
        let mut logs = newest_first(
            state
                .visible_logs(scope)
                .cloned()
                .collect::<Vec<_>>()
                .into_iter(),
        );
        logs.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(logs)
    }

    async fn counts(&self, scope: Scope) -> Result<AttemptCounts> {
        let state = self.state.lock().await;
        let mut counts = AttemptCounts::default();
        for log in state.visible_logs(scope) {
            counts.total += 1;
            if log.is_success() {
                counts.success += 1;
            } else {
                counts.failed += 1;
            }
        }
        Ok(counts)
    }

    async fn counts_by_mailing(&self, scope: Scope) -> Result<Vec<MailingAttemptCounts>> {
        let state = self.state.lock().await;
        let mut by_mailing: HashMap<MailingId, MailingAttemptCounts> = HashMap::new();
        for log in state.visible_logs(scope) {
            let entry = by_mailing
                .entry(log.mailing_id)
                .or_insert_with(|| MailingAttemptCounts {
                    mailing_id: log.mailing_id,
                    total: 0,
                    success: 0,
                    failed: 0,
                    last_attempt_time: log.attempt_time,
                });
            entry.total += 1;
            if log.is_success() {
                entry.success += 1;
            } else {
                entry.failed += 1;
            }
            entry.last_attempt_time = entry.last_attempt_time.max(log.attempt_time);
        }

        let mut rows: Vec<MailingAttemptCounts> = by_mailing.into_values().collect();
        rows.sort_by(|a, b| {
            b.last_attempt_time
                .cmp(&a.last_attempt_time)
                .then(a.mailing_id.cmp(&b.mailing_id))
        });
        Ok(rows)
    }
}
