//! Pure statistics over aggregated attempt counts

use chrono::{DateTime, Utc};
use mailcast_common::types::MailingId;
use mailcast_storage::models::{AttemptCounts, AttemptLog, MailingAttemptCounts};
use serde::{Deserialize, Serialize};

/// Percentage of `success` in `total`, rounded half to even.
///
/// Returns 0 when `total` is 0.
pub fn success_rate(success: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }

    let scaled = success * 100;
    let quotient = scaled / total;
    let remainder = scaled % total;

    match (remainder * 2).cmp(&total) {
        std::cmp::Ordering::Greater => quotient + 1,
        std::cmp::Ordering::Equal => quotient + quotient % 2,
        std::cmp::Ordering::Less => quotient,
    }
}

/// Scope-wide attempt counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptCounters {
    pub total_mailings: u64,
    pub total_attempts: u64,
    pub success_count: u64,
    pub failed_count: u64,
    pub success_rate: u64,
    pub failed_rate: u64,
}

/// Attempt breakdown for one mailing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailingAttemptStats {
    pub mailing_id: MailingId,
    pub total_attempts: u64,
    pub success_count: u64,
    pub failed_count: u64,
    pub last_attempt_time: DateTime<Utc>,
    pub success_rate: u64,
}

/// Statistics snapshot for one scope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub counters: AttemptCounters,
    /// Mailings with at least one attempt, most recently attempted first
    pub per_mailing: Vec<MailingAttemptStats>,
    /// Most recent attempts, newest first
    pub recent: Vec<AttemptLog>,
}

fn to_u64(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

/// Build a snapshot from counts aggregated by the log repository.
///
/// `per_mailing` and `recent` keep the order they are given in: most
/// recently attempted mailing first and newest entry first.
pub fn compute_stats(
    total_mailings: u64,
    counts: AttemptCounts,
    per_mailing: Vec<MailingAttemptCounts>,
    recent: Vec<AttemptLog>,
) -> StatsSnapshot {
    let mut counters = AttemptCounters {
        total_mailings,
        total_attempts: to_u64(counts.total),
        success_count: to_u64(counts.success),
        failed_count: to_u64(counts.failed),
        ..AttemptCounters::default()
    };

    if counters.total_attempts > 0 {
        counters.success_rate = success_rate(counters.success_count, counters.total_attempts);
        counters.failed_rate = 100 - counters.success_rate;
    }

    let per_mailing = per_mailing
        .into_iter()
        .map(|row| {
            let total_attempts = to_u64(row.total);
            let success_count = to_u64(row.success);
            MailingAttemptStats {
                mailing_id: row.mailing_id,
                total_attempts,
                success_count,
                failed_count: to_u64(row.failed),
                last_attempt_time: row.last_attempt_time,
                success_rate: success_rate(success_count, total_attempts),
            }
        })
        .collect();

    StatsSnapshot {
        counters,
        per_mailing,
        recent,
    }
}
