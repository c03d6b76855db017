//! Mailcast Core - Mailing dispatch, status lifecycle and statistics
//!
//! This crate provides the mailing window evaluator, the dispatch engine
//! that sends a mailing to each recipient and records every attempt, the
//! statistics aggregator over the attempt log, and the periodic trigger.

pub mod clock;
pub mod dispatch;
pub mod mailing;
pub mod stats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{
    DispatchEngine, DispatchError, DispatchTrigger, FailureReason, MailTransport, MailingOutcome,
    OutgoingMail, RunResult, SmtpMailTransport, TransportError, TriggerReport,
};
pub use mailing::{
    check_window, recompute_status, refresh_status, MailingLifecycle, WindowCheck, WindowFlags,
};
pub use stats::{
    MailingDetail, MailingSummary, MemoryStatsCache, NoopStatsCache, StatsAggregator, StatsCache,
    StatsSnapshot,
};
