//! Attempt statistics - pure computation, cache and aggregator

mod aggregator;
mod cache;
mod compute;

pub use aggregator::{MailingDetail, MailingSummary, StatsAggregator};
pub use cache::{MemoryStatsCache, NoopStatsCache, StatsCache};
pub use compute::{compute_stats, success_rate, AttemptCounters, MailingAttemptStats, StatsSnapshot};
