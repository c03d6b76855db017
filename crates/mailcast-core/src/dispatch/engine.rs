//! Dispatch Engine - Sends a mailing to each recipient and records every attempt

use super::transport::{FailureReason, MailTransport, OutgoingMail};
use crate::clock::Clock;
use crate::mailing::{check_window, MailingLifecycle, WindowCheck};
use chrono::{DateTime, Utc};
use mailcast_common::{Error, Result};
use mailcast_storage::models::{AttemptStatus, Mailing, NewAttemptLog};
use mailcast_storage::repository::{AttemptLogRepository, MailingRepository, MessageRepository};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error as ThisError;
use tracing::{error, info, warn};

const DATE_FORMAT: &str = "%d.%m.%Y %H:%M";

fn fmt_time(t: &DateTime<Utc>) -> String {
    t.format(DATE_FORMAT).to_string()
}

/// Reasons a run is refused before any recipient is contacted
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum DispatchError {
    #[error(
        "Invalid mailing window: the end must be later than the start. Start: {}, end: {}.",
        fmt_time(.start),
        fmt_time(.end)
    )]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error(
        "The current time is outside the mailing window. Now: {}, window: from {} to {}.",
        fmt_time(.now),
        fmt_time(.start),
        fmt_time(.end)
    )]
    OutsideWindow {
        now: DateTime<Utc>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Outcome of one dispatch run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub ok: bool,
    pub error: Option<String>,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
}

impl RunResult {
    fn refused(err: &DispatchError) -> Self {
        Self {
            ok: false,
            error: Some(err.to_string()),
            total: 0,
            success: 0,
            failed: 0,
        }
    }
}

/// Dispatch engine
pub struct DispatchEngine {
    mailings: Arc<dyn MailingRepository>,
    messages: Arc<dyn MessageRepository>,
    logs: Arc<dyn AttemptLogRepository>,
    transport: Arc<dyn MailTransport>,
    clock: Arc<dyn Clock>,
    lifecycle: MailingLifecycle,
    from_address: String,
}

impl DispatchEngine {
    pub fn new(
        mailings: Arc<dyn MailingRepository>,
        messages: Arc<dyn MessageRepository>,
        logs: Arc<dyn AttemptLogRepository>,
        transport: Arc<dyn MailTransport>,
        clock: Arc<dyn Clock>,
        from_address: impl Into<String>,
    ) -> Self {
        let lifecycle = MailingLifecycle::new(mailings.clone(), clock.clone());
        Self {
            mailings,
            messages,
            logs,
            transport,
            clock,
            lifecycle,
            from_address: from_address.into(),
        }
    }

    pub fn lifecycle(&self) -> &MailingLifecycle {
        &self.lifecycle
    }

    /// Send `mailing` to every recipient.
    ///
    /// A window that is invalid or not open at the current instant yields
    /// `ok = false` without contacting anyone or writing a log entry.
    /// Per-recipient transport failures are logged and counted, never
    /// returned. `Err` is reserved for storage failures and a missing
    /// message, which the caller reports.
    pub async fn run_mailing(&self, mailing: &mut Mailing) -> Result<RunResult> {
        info!(mailing_id = %mailing.id, "Starting mailing run");
        let now = self.clock.now();

        let refusal = match check_window(mailing.start_time, mailing.end_time, now) {
            WindowCheck::Open => None,
            WindowCheck::InvalidInterval => Some(DispatchError::InvalidWindow {
                start: mailing.start_time,
                end: mailing.end_time,
            }),
            WindowCheck::NotYetOpen | WindowCheck::Closed => Some(DispatchError::OutsideWindow {
                now,
                start: mailing.start_time,
                end: mailing.end_time,
            }),
        };

        if let Some(err) = refusal {
            warn!(mailing_id = %mailing.id, error = %err, "Mailing run refused");
            return Ok(RunResult::refused(&err));
        }

        self.lifecycle.update_status_at(mailing, now, true).await?;

        let message = self
            .messages
            .get(mailing.message_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("message {}", mailing.message_id)))?;
        let recipients = self.mailings.recipients(mailing.id).await?;
        info!(
            mailing_id = %mailing.id,
            recipients = recipients.len(),
            "Recipients loaded"
        );

        let mut success = 0;
        let mut failed = 0;

        for client in &recipients {
            let mail = OutgoingMail {
                subject: message.subject.clone(),
                body: message.body.clone(),
                from_address: self.from_address.clone(),
                to_address: client.email.clone(),
            };

            let (status, server_response, reason) = match self.transport.send(&mail).await {
                Ok(1) => {
                    info!(mailing_id = %mailing.id, client_id = %client.id, "Message sent");
                    (
                        AttemptStatus::Success,
                        "transport accepted 1 message".to_string(),
                        None,
                    )
                }
                Ok(count) => {
                    warn!(
                        mailing_id = %mailing.id,
                        client_id = %client.id,
                        count,
                        "Transport accepted an unexpected number of messages"
                    );
                    (
                        AttemptStatus::Failed,
                        format!("transport accepted {} messages", count),
                        Some(FailureReason::UnexpectedCount),
                    )
                }
                Err(e) => {
                    error!(
                        mailing_id = %mailing.id,
                        client_id = %client.id,
                        error = %e,
                        "Failed to send message"
                    );
                    (AttemptStatus::Failed, e.to_string(), Some(e.reason()))
                }
            };

            match status {
                AttemptStatus::Success => success += 1,
                AttemptStatus::Failed => failed += 1,
            }

            self.logs
                .append(NewAttemptLog {
                    mailing_id: mailing.id,
                    client_id: Some(client.id),
                    status,
                    server_response,
                    failure_reason: reason.map(|r| r.to_string()),
                    attempt_time: self.clock.now(),
                })
                .await?;
        }

        self.lifecycle.update_status(mailing, true).await?;

        info!(
            mailing_id = %mailing.id,
            total = recipients.len(),
            success,
            failed,
            "Mailing run completed"
        );

        Ok(RunResult {
            ok: true,
            error: None,
            total: recipients.len(),
            success,
            failed,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::dispatch::transport::TransportError;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use mailcast_storage::models::{CreateClient, CreateMailing, CreateMessage, MailingStatus};
    use mailcast_storage::repository::ClientRepository;
    use mailcast_storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    /// Transport with a scripted outcome per recipient; anything not
    /// scripted is accepted.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        script: HashMap<String, std::result::Result<usize, String>>,
        pub(crate) sent: Mutex<Vec<OutgoingMail>>,
    }

    impl ScriptedTransport {
        pub(crate) fn raising(mut self, to: &str, error: &str) -> Self {
            self.script.insert(to.to_string(), Err(error.to_string()));
            self
        }

        pub(crate) fn returning(mut self, to: &str, count: usize) -> Self {
            self.script.insert(to.to_string(), Ok(count));
            self
        }
    }

    #[async_trait]
    impl MailTransport for ScriptedTransport {
        async fn send(&self, mail: &OutgoingMail) -> std::result::Result<usize, TransportError> {
            self.sent.lock().await.push(mail.clone());
            match self.script.get(&mail.to_address) {
                Some(Ok(count)) => Ok(*count),
                Some(Err(e)) => Err(TransportError::Unreachable(e.clone())),
                None => Ok(1),
            }
        }
    }

    pub(crate) fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    pub(crate) async fn seed(
        store: &MemoryStore,
        owner: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        emails: &[&str],
    ) -> Mailing {
        let message = MessageRepository::create(
            store,
            CreateMessage {
                owner_id: owner,
                subject: "Spring sale".to_string(),
                body: "Everything must go".to_string(),
            },
        )
        .await
        .unwrap();

        let mut client_ids = Vec::new();
        for email in emails {
            let client = ClientRepository::create(
                store,
                CreateClient {
                    owner_id: owner,
                    email: email.to_string(),
                    name: email.to_string(),
                    comment: None,
                },
            )
            .await
            .unwrap();
            client_ids.push(client.id);
        }

        MailingRepository::create(
            store,
            CreateMailing {
                owner_id: owner,
                message_id: message.id,
                start_time: start,
                end_time: end,
                client_ids,
            },
        )
        .await
        .unwrap()
    }

    fn engine(
        store: &MemoryStore,
        transport: Arc<ScriptedTransport>,
        clock: Arc<ManualClock>,
    ) -> DispatchEngine {
        DispatchEngine::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            transport,
            clock,
            "news@example.com",
        )
    }

    #[tokio::test]
    async fn test_run_mailing_counts_each_recipient() {
        let store = MemoryStore::new();
        let start = t0();
        let mut mailing = seed(
            &store,
            Uuid::new_v4(),
            start,
            start + Duration::hours(1),
            &["a@example.com", "b@example.com", "c@example.com"],
        )
        .await;

        let transport =
            Arc::new(ScriptedTransport::default().raising("b@example.com", "connection refused"));
        let clock = Arc::new(ManualClock::new(start + Duration::minutes(30)));
        let engine = engine(&store, transport.clone(), clock);

        let result = engine.run_mailing(&mut mailing).await.unwrap();
        assert_eq!(
            result,
            RunResult {
                ok: true,
                error: None,
                total: 3,
                success: 2,
                failed: 1,
            }
        );
        assert_eq!(mailing.status_enum(), Some(MailingStatus::Started));

        let logs = AttemptLogRepository::list_by_mailing(&store, mailing.id)
            .await
            .unwrap();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs.iter().filter(|l| l.is_success()).count(), 2);

        let failed: Vec<_> = logs.iter().filter(|l| !l.is_success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].server_response, "server unreachable: connection refused");
        assert_eq!(failed[0].failure_reason.as_deref(), Some("unreachable"));

        let sent = transport.sent.lock().await;
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].from_address, "news@example.com");
        assert_eq!(sent[0].subject, "Spring sale");
    }

    #[tokio::test]
    async fn test_run_mailing_refused_after_window() {
        let store = MemoryStore::new();
        let start = t0();
        let mut mailing = seed(
            &store,
            Uuid::new_v4(),
            start,
            start + Duration::hours(1),
            &["a@example.com", "b@example.com", "c@example.com"],
        )
        .await;

        let transport = Arc::new(ScriptedTransport::default());
        let clock = Arc::new(ManualClock::new(start + Duration::hours(2)));
        let engine = engine(&store, transport.clone(), clock);

        let result = engine.run_mailing(&mut mailing).await.unwrap();
        assert!(!result.ok);
        assert_eq!((result.total, result.success, result.failed), (0, 0, 0));
        assert_eq!(
            result.error.as_deref(),
            Some(
                "The current time is outside the mailing window. Now: 01.03.2024 14:00, \
                 window: from 01.03.2024 12:00 to 01.03.2024 13:00."
            )
        );
        assert_eq!(store.log_count().await, 0);
        assert!(transport.sent.lock().await.is_empty());

        let reloaded = engine.lifecycle().load(mailing.id, false).await.unwrap();
        assert_eq!(reloaded.status_enum(), Some(MailingStatus::Finished));
    }

    #[tokio::test]
    async fn test_run_mailing_refused_before_window() {
        let store = MemoryStore::new();
        let start = t0();
        let mut mailing = seed(
            &store,
            Uuid::new_v4(),
            start,
            start + Duration::hours(1),
            &["a@example.com"],
        )
        .await;

        let clock = Arc::new(ManualClock::new(start - Duration::minutes(1)));
        let engine = engine(&store, Arc::new(ScriptedTransport::default()), clock);

        let result = engine.run_mailing(&mut mailing).await.unwrap();
        assert!(!result.ok);
        assert_eq!(store.log_count().await, 0);
        assert_eq!(store.status_writes().await, 0);
    }

    #[tokio::test]
    async fn test_run_mailing_rejects_empty_window_at_any_time() {
        let store = MemoryStore::new();
        let start = t0();
        let mut mailing = seed(
            &store,
            Uuid::new_v4(),
            start,
            start,
            &["a@example.com", "b@example.com"],
        )
        .await;

        let clock = Arc::new(ManualClock::new(start - Duration::hours(1)));
        let engine = engine(&store, Arc::new(ScriptedTransport::default()), clock.clone());

        for now in [start - Duration::hours(1), start, start + Duration::hours(1)] {
            clock.set(now);
            let result = engine.run_mailing(&mut mailing).await.unwrap();
            assert!(!result.ok);
            assert!(result
                .error
                .as_deref()
                .unwrap()
                .starts_with("Invalid mailing window"));
        }
        assert_eq!(store.log_count().await, 0);
    }

    #[tokio::test]
    async fn test_run_mailing_without_recipients() {
        let store = MemoryStore::new();
        let start = t0();
        let mut mailing = seed(&store, Uuid::new_v4(), start, start + Duration::hours(1), &[]).await;

        let clock = Arc::new(ManualClock::new(start));
        let engine = engine(&store, Arc::new(ScriptedTransport::default()), clock);

        let result = engine.run_mailing(&mut mailing).await.unwrap();
        assert_eq!(
            result,
            RunResult {
                ok: true,
                error: None,
                total: 0,
                success: 0,
                failed: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_unexpected_accepted_count_is_failure() {
        let store = MemoryStore::new();
        let start = t0();
        let mut mailing = seed(
            &store,
            Uuid::new_v4(),
            start,
            start + Duration::hours(1),
            &["a@example.com", "b@example.com"],
        )
        .await;

        let transport = Arc::new(ScriptedTransport::default().returning("a@example.com", 0));
        let clock = Arc::new(ManualClock::new(start + Duration::minutes(5)));
        let engine = engine(&store, transport, clock);

        let result = engine.run_mailing(&mut mailing).await.unwrap();
        assert_eq!((result.success, result.failed), (1, 1));

        let logs = AttemptLogRepository::list_by_mailing(&store, mailing.id)
            .await
            .unwrap();
        let failed = logs.iter().find(|l| !l.is_success()).unwrap();
        assert_eq!(failed.server_response, "transport accepted 0 messages");
        assert_eq!(failed.failure_reason.as_deref(), Some("unexpected_count"));

        let ok = logs.iter().find(|l| l.is_success()).unwrap();
        assert_eq!(ok.server_response, "transport accepted 1 message");
        assert_eq!(ok.failure_reason, None);
    }

    #[tokio::test]
    async fn test_started_mailing_is_sent_again_on_each_run() {
        let store = MemoryStore::new();
        let start = t0();
        let mut mailing = seed(
            &store,
            Uuid::new_v4(),
            start,
            start + Duration::hours(1),
            &["a@example.com", "b@example.com"],
        )
        .await;

        let transport = Arc::new(ScriptedTransport::default());
        let clock = Arc::new(ManualClock::new(start + Duration::minutes(5)));
        let engine = engine(&store, transport.clone(), clock.clone());

        engine.run_mailing(&mut mailing).await.unwrap();
        clock.advance(Duration::minutes(10));
        let second = engine.run_mailing(&mut mailing).await.unwrap();

        assert_eq!(second.total, 2);
        assert_eq!(store.log_count().await, 4);
        assert_eq!(transport.sent.lock().await.len(), 4);
        // created -> started once; the second run finds nothing to persist
        assert_eq!(store.status_writes().await, 1);
    }

    /// Accepts every message and moves the clock forward while doing so
    struct SlowClockTransport {
        clock: Arc<ManualClock>,
        per_send: Duration,
    }

    #[async_trait]
    impl MailTransport for SlowClockTransport {
        async fn send(&self, _mail: &OutgoingMail) -> std::result::Result<usize, TransportError> {
            self.clock.advance(self.per_send);
            Ok(1)
        }
    }

    #[tokio::test]
    async fn test_mailing_closing_during_run_is_finished() {
        let store = MemoryStore::new();
        let start = t0();
        let end = start + Duration::hours(1);
        let mut mailing = seed(
            &store,
            Uuid::new_v4(),
            start,
            end,
            &["a@example.com", "b@example.com"],
        )
        .await;

        let clock = Arc::new(ManualClock::new(end - Duration::minutes(1)));
        let transport = Arc::new(SlowClockTransport {
            clock: clock.clone(),
            per_send: Duration::minutes(2),
        });
        let engine = DispatchEngine::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            transport,
            clock,
            "news@example.com",
        );

        let result = engine.run_mailing(&mut mailing).await.unwrap();
        assert_eq!((result.ok, result.success), (true, 2));
        assert_eq!(mailing.status_enum(), Some(MailingStatus::Finished));

        let stored = MailingRepository::get(&store, mailing.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, "finished");
        // created -> started before sending, started -> finished after
        assert_eq!(store.status_writes().await, 2);
        assert_eq!(store.end_time_writes().await, 0);
    }

    #[tokio::test]
    async fn test_missing_message_is_an_error() {
        let store = MemoryStore::new();
        let start = t0();
        let owner = Uuid::new_v4();
        let mut mailing = MailingRepository::create(
            &store,
            CreateMailing {
                owner_id: owner,
                message_id: Uuid::new_v4(),
                start_time: start,
                end_time: start + Duration::hours(1),
                client_ids: vec![],
            },
        )
        .await
        .unwrap();

        let clock = Arc::new(ManualClock::new(start));
        let engine = engine(&store, Arc::new(ScriptedTransport::default()), clock);

        let err = engine.run_mailing(&mut mailing).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
