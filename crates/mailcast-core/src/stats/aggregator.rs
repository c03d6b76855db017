//! Stats Aggregator - Cached per-scope statistics over the attempt log

use super::cache::StatsCache;
use super::compute::{compute_stats, StatsSnapshot};
use crate::clock::Clock;
use crate::mailing::{refresh_status, MailingLifecycle, WindowFlags};
use chrono::Duration;
use mailcast_common::config::{DispatchConfig, MAX_CACHE_TTL_SECS};
use mailcast_common::types::{MailingId, Scope};
use mailcast_common::Result;
use mailcast_storage::models::{AttemptLog, Mailing, MailingStatus};
use mailcast_storage::repository::{AttemptLogRepository, ClientRepository, MailingRepository};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailing counts for one scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailingSummary {
    pub total_mailings: u64,
    pub created: u64,
    pub started: u64,
    pub finished: u64,
    /// Started and inside the window right now
    pub active: u64,
    pub unique_clients: u64,
}

/// One mailing with its full attempt history
#[derive(Debug, Clone, Serialize)]
pub struct MailingDetail {
    pub mailing: Mailing,
    /// Newest first
    pub logs: Vec<AttemptLog>,
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub flags: WindowFlags,
}

fn cache_ttl(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_CACHE_TTL_SECS) as i64)
}

/// Stats aggregator
pub struct StatsAggregator {
    mailings: Arc<dyn MailingRepository>,
    clients: Arc<dyn ClientRepository>,
    logs: Arc<dyn AttemptLogRepository>,
    cache: Arc<dyn StatsCache>,
    clock: Arc<dyn Clock>,
    lifecycle: MailingLifecycle,
    stats_ttl: Duration,
    summary_ttl: Duration,
    recent_limit: i64,
}

impl StatsAggregator {
    pub fn new(
        mailings: Arc<dyn MailingRepository>,
        clients: Arc<dyn ClientRepository>,
        logs: Arc<dyn AttemptLogRepository>,
        cache: Arc<dyn StatsCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_config(mailings, clients, logs, cache, clock, &DispatchConfig::default())
    }

    pub fn with_config(
        mailings: Arc<dyn MailingRepository>,
        clients: Arc<dyn ClientRepository>,
        logs: Arc<dyn AttemptLogRepository>,
        cache: Arc<dyn StatsCache>,
        clock: Arc<dyn Clock>,
        config: &DispatchConfig,
    ) -> Self {
        let lifecycle = MailingLifecycle::new(mailings.clone(), clock.clone());
        Self {
            mailings,
            clients,
            logs,
            cache,
            clock,
            lifecycle,
            stats_ttl: cache_ttl(config.stats_cache_ttl_secs),
            summary_ttl: cache_ttl(config.summary_cache_ttl_secs),
            recent_limit: i64::try_from(config.recent_attempts_limit).unwrap_or(i64::MAX),
        }
    }

    fn stats_key(scope: Scope) -> String {
        format!("mailinglogs:{}", scope)
    }

    fn summary_key(scope: Scope) -> String {
        format!("mailings:summary:{}", scope)
    }

    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.cache.get(key).await?;
        match serde_json::from_value(value) {
            Ok(v) => {
                debug!(key, "Stats cache hit");
                Some(v)
            }
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache entry");
                self.cache.invalidate(key).await;
                None
            }
        }
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_value(value) {
            Ok(v) => self.cache.set(key, v, ttl).await,
            Err(e) => warn!(key, error = %e, "Failed to encode cache entry"),
        }
    }

    /// Attempt statistics for a scope.
    ///
    /// Served from the cache while the entry lives; a miss recomputes from
    /// aggregate queries over the log and repopulates it.
    pub async fn get_stats(&self, scope: Scope) -> Result<StatsSnapshot> {
        let key = Self::stats_key(scope);
        if let Some(snapshot) = self.cached(&key).await {
            return Ok(snapshot);
        }

        let total_mailings = u64::try_from(self.mailings.count(scope).await?).unwrap_or(0);
        let counts = self.logs.counts(scope).await?;
        let per_mailing = self.logs.counts_by_mailing(scope).await?;
        let recent = self.logs.recent(scope, self.recent_limit).await?;
        let snapshot = compute_stats(total_mailings, counts, per_mailing, recent);

        debug!(key = %key, attempts = counts.total, "Stats recomputed");
        self.store(&key, &snapshot, self.stats_ttl).await;
        Ok(snapshot)
    }

    /// Mailings in a scope with their status refreshed in memory only
    pub async fn list_mailings(&self, scope: Scope) -> Result<Vec<Mailing>> {
        let now = self.clock.now();
        let mut mailings = self.mailings.list(scope).await?;
        for mailing in &mut mailings {
            refresh_status(mailing, now);
        }
        Ok(mailings)
    }

    /// Mailing counts by status for a scope, cached like [`get_stats`](Self::get_stats)
    pub async fn get_summary(&self, scope: Scope) -> Result<MailingSummary> {
        let key = Self::summary_key(scope);
        if let Some(summary) = self.cached(&key).await {
            return Ok(summary);
        }

        let now = self.clock.now();
        let mailings = self.list_mailings(scope).await?;
        let mut summary = MailingSummary {
            total_mailings: mailings.len() as u64,
            unique_clients: self.clients.count(scope).await?.max(0) as u64,
            ..MailingSummary::default()
        };

        for mailing in &mailings {
            match mailing.status_enum() {
                Some(MailingStatus::Created) => summary.created += 1,
                Some(MailingStatus::Started) => {
                    summary.started += 1;
                    if mailing.start_time <= now && now <= mailing.end_time {
                        summary.active += 1;
                    }
                }
                Some(MailingStatus::Finished) => summary.finished += 1,
                None => {}
            }
        }

        self.store(&key, &summary, self.summary_ttl).await;
        Ok(summary)
    }

    /// One mailing with its status persisted and its log read fresh
    pub async fn mailing_detail(&self, id: MailingId) -> Result<MailingDetail> {
        let mailing = self.lifecycle.load(id, true).await?;
        let logs = self.logs.list_by_mailing(id).await?;

        let total = logs.len() as u64;
        let success = logs.iter().filter(|l| l.is_success()).count() as u64;
        let flags = WindowFlags::evaluate(&mailing, self.clock.now());

        Ok(MailingDetail {
            mailing,
            logs,
            total,
            success,
            failed: total - success,
            flags,
        })
    }
}
