//! Dispatch Trigger - Periodically runs every mailing whose window is open

use super::engine::{DispatchEngine, RunResult};
use crate::clock::Clock;
use mailcast_common::types::MailingId;
use mailcast_common::Result;
use mailcast_storage::repository::MailingRepository;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// What happened to one mailing during a trigger pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MailingOutcome {
    Dispatched {
        mailing_id: MailingId,
        total: usize,
        success: usize,
        failed: usize,
    },
    Rejected {
        mailing_id: MailingId,
        error: String,
    },
    Errored {
        mailing_id: MailingId,
        error: String,
    },
}

impl std::fmt::Display for MailingOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailingOutcome::Dispatched {
                mailing_id,
                total,
                success,
                failed,
            } => write!(
                f,
                "Mailing {} sent: total {}, success {}, failed {}.",
                mailing_id, total, success, failed
            ),
            MailingOutcome::Rejected { mailing_id, error } => {
                write!(f, "Mailing {} not started: {}", mailing_id, error)
            }
            MailingOutcome::Errored { mailing_id, error } => {
                write!(f, "Mailing {} failed with an execution error: {}", mailing_id, error)
            }
        }
    }
}

/// Summary of one trigger pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TriggerReport {
    pub dispatched: usize,
    pub rejected: usize,
    pub errored: usize,
    pub outcomes: Vec<MailingOutcome>,
}

impl TriggerReport {
    fn record(&mut self, outcome: MailingOutcome) {
        match outcome {
            MailingOutcome::Dispatched { .. } => self.dispatched += 1,
            MailingOutcome::Rejected { .. } => self.rejected += 1,
            MailingOutcome::Errored { .. } => self.errored += 1,
        }
        self.outcomes.push(outcome);
    }
}

/// Dispatch trigger
pub struct DispatchTrigger {
    mailings: Arc<dyn MailingRepository>,
    engine: Arc<DispatchEngine>,
    clock: Arc<dyn Clock>,
    poll_interval_secs: u64,
}

impl DispatchTrigger {
    pub fn new(
        mailings: Arc<dyn MailingRepository>,
        engine: Arc<DispatchEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            mailings,
            engine,
            clock,
            poll_interval_secs: 60,
        }
    }

    /// Set poll interval
    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs.max(1);
        self
    }

    /// Run every mailing that is due now.
    ///
    /// A failing mailing is reported in its outcome and does not stop the
    /// rest of the batch. Only a failure to list due mailings is returned.
    pub async fn run_due(&self) -> Result<TriggerReport> {
        let now = self.clock.now();
        let due = self.mailings.list_due(now).await?;
        let mut report = TriggerReport::default();

        if due.is_empty() {
            info!("No mailings available for sending");
            return Ok(report);
        }

        info!(count = due.len(), "Running due mailings");

        for mut mailing in due {
            let mailing_id = mailing.id;
            let result = match self.engine.lifecycle().update_status(&mut mailing, true).await {
                Ok(_) => self.engine.run_mailing(&mut mailing).await,
                Err(e) => Err(e),
            };

            let outcome = match result {
                Ok(RunResult {
                    ok: true,
                    total,
                    success,
                    failed,
                    ..
                }) => MailingOutcome::Dispatched {
                    mailing_id,
                    total,
                    success,
                    failed,
                },
                Ok(RunResult { error, .. }) => {
                    let error = error.unwrap_or_else(|| "Unknown error".to_string());
                    warn!(mailing_id = %mailing_id, error = %error, "Mailing not started");
                    MailingOutcome::Rejected { mailing_id, error }
                }
                Err(e) => {
                    error!(mailing_id = %mailing_id, error = %e, "Mailing run failed");
                    MailingOutcome::Errored {
                        mailing_id,
                        error: e.to_string(),
                    }
                }
            };

            report.record(outcome);
        }

        info!(
            dispatched = report.dispatched,
            rejected = report.rejected,
            errored = report.errored,
            "Trigger pass completed"
        );

        Ok(report)
    }

    /// Run trigger passes forever.
    ///
    /// Passes never overlap or catch up: the next pass starts one full
    /// interval after the previous one completed.
    pub async fn run(&self) {
        let mut ticker = interval(StdDuration::from_secs(self.poll_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Dispatch trigger started (interval: {}s)",
            self.poll_interval_secs
        );

        loop {
            ticker.tick().await;

            if let Err(e) = self.run_due().await {
                error!("Error running due mailings: {}", e);
            }

            ticker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::dispatch::engine::tests::{seed, t0, ScriptedTransport};
    use crate::dispatch::transport::{MailTransport, OutgoingMail, TransportError};
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use mailcast_storage::models::MailingStatus;
    use mailcast_storage::repository::AttemptLogRepository;
    use mailcast_storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn trigger(
        store: &MemoryStore,
        transport: Arc<ScriptedTransport>,
        clock: Arc<ManualClock>,
    ) -> DispatchTrigger {
        let engine = Arc::new(DispatchEngine::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            transport,
            clock.clone(),
            "news@example.com",
        ));
        DispatchTrigger::new(Arc::new(store.clone()), engine, clock)
    }

    #[tokio::test]
    async fn test_run_due_only_runs_open_mailings() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let now = t0();

        let open = seed(
            &store,
            owner,
            now - Duration::minutes(10),
            now + Duration::hours(1),
            &["a@example.com", "b@example.com"],
        )
        .await;
        seed(
            &store,
            owner,
            now + Duration::hours(1),
            now + Duration::hours(2),
            &["c@example.com"],
        )
        .await;
        seed(
            &store,
            owner,
            now - Duration::hours(2),
            now - Duration::hours(1),
            &["d@example.com"],
        )
        .await;

        let clock = Arc::new(ManualClock::new(now));
        let trigger = trigger(&store, Arc::new(ScriptedTransport::default()), clock);

        let report = trigger.run_due().await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.rejected + report.errored, 0);
        assert_eq!(
            report.outcomes,
            vec![MailingOutcome::Dispatched {
                mailing_id: open.id,
                total: 2,
                success: 2,
                failed: 0,
            }]
        );

        let stored = MailingRepository::get(&store, open.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status_enum(), Some(MailingStatus::Started));
        assert_eq!(store.log_count().await, 2);
    }

    #[tokio::test]
    async fn test_run_due_skips_finished_mailings() {
        let store = MemoryStore::new();
        let now = t0();
        let mailing = seed(
            &store,
            Uuid::new_v4(),
            now - Duration::minutes(10),
            now + Duration::hours(1),
            &["a@example.com"],
        )
        .await;
        MailingRepository::update_status(&store, mailing.id, MailingStatus::Finished)
            .await
            .unwrap();

        let clock = Arc::new(ManualClock::new(now));
        let report = trigger(&store, Arc::new(ScriptedTransport::default()), clock)
            .run_due()
            .await
            .unwrap();

        assert_eq!(report, TriggerReport::default());
        assert_eq!(store.log_count().await, 0);
    }

    #[tokio::test]
    async fn test_failing_mailing_does_not_stop_batch() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let now = t0();

        let broken = MailingRepository::create(
            &store,
            mailcast_storage::models::CreateMailing {
                owner_id: owner,
                message_id: Uuid::new_v4(),
                start_time: now - Duration::hours(1),
                end_time: now + Duration::hours(1),
                client_ids: vec![],
            },
        )
        .await
        .unwrap();
        let healthy = seed(
            &store,
            owner,
            now - Duration::minutes(30),
            now + Duration::hours(1),
            &["a@example.com", "b@example.com"],
        )
        .await;

        let transport =
            Arc::new(ScriptedTransport::default().raising("b@example.com", "timed out"));
        let clock = Arc::new(ManualClock::new(now));
        let report = trigger(&store, transport, clock).run_due().await.unwrap();

        assert_eq!((report.dispatched, report.errored), (1, 1));
        assert!(matches!(
            &report.outcomes[0],
            MailingOutcome::Errored { mailing_id, .. } if *mailing_id == broken.id
        ));
        assert_eq!(
            report.outcomes[1],
            MailingOutcome::Dispatched {
                mailing_id: healthy.id,
                total: 2,
                success: 1,
                failed: 1,
            }
        );

        let logs = AttemptLogRepository::list_by_mailing(&store, healthy.id)
            .await
            .unwrap();
        assert_eq!(logs.len(), 2);
    }

    /// Accepts every message after a long wait on the tokio clock
    #[derive(Default)]
    struct SlowTransport {
        sends: AtomicUsize,
    }

    #[async_trait]
    impl MailTransport for SlowTransport {
        async fn send(&self, _mail: &OutgoingMail) -> std::result::Result<usize, TransportError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(StdDuration::from_secs(200)).await;
            Ok(1)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_pass_does_not_trigger_catch_up_passes() {
        let store = MemoryStore::new();
        let now = t0();
        seed(
            &store,
            Uuid::new_v4(),
            now - Duration::minutes(10),
            now + Duration::hours(1),
            &["a@example.com"],
        )
        .await;

        let clock = Arc::new(ManualClock::new(now));
        let transport = Arc::new(SlowTransport::default());
        let engine = Arc::new(DispatchEngine::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            transport.clone(),
            clock.clone(),
            "news@example.com",
        ));
        let trigger =
            DispatchTrigger::new(Arc::new(store.clone()), engine, clock).with_poll_interval(60);

        // passes start at 0s and 260s; the second is still sending at 450s
        let _ = tokio::time::timeout(StdDuration::from_secs(450), trigger.run()).await;

        assert_eq!(transport.sends.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_outcome_display() {
        let id = Uuid::nil();
        let outcome = MailingOutcome::Dispatched {
            mailing_id: id,
            total: 3,
            success: 2,
            failed: 1,
        };
        assert_eq!(
            outcome.to_string(),
            format!("Mailing {} sent: total 3, success 2, failed 1.", id)
        );
    }
}
