//! Mailing window evaluation
//!
//! Everything here is a pure function of `(start_time, end_time, now)`.

use chrono::{DateTime, Utc};
use mailcast_storage::models::{Mailing, MailingStatus};
use serde::{Deserialize, Serialize};

/// Status of a mailing at `now`.
///
/// Before the window the mailing is `Created`, inside the closed interval
/// `[start, end]` it is `Started`, and after it `Finished`. The end bound is
/// checked first, so an inverted window (a forced finish before the start)
/// still reads as `Finished` once `end` has passed.
pub fn recompute_status(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> MailingStatus {
    if now > end {
        MailingStatus::Finished
    } else if now >= start {
        MailingStatus::Started
    } else {
        MailingStatus::Created
    }
}

/// Recompute the in-memory status of `mailing`; returns whether it changed
pub fn refresh_status(mailing: &mut Mailing, now: DateTime<Utc>) -> bool {
    let status = recompute_status(mailing.start_time, mailing.end_time, now);
    if mailing.status_enum() == Some(status) {
        return false;
    }
    mailing.set_status(status);
    true
}

/// Dispatch eligibility of a window at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowCheck {
    /// `start_time >= end_time`
    InvalidInterval,
    NotYetOpen,
    Open,
    Closed,
}

/// Classify `now` against the window, checking the interval itself first
pub fn check_window(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> WindowCheck {
    if start >= end {
        WindowCheck::InvalidInterval
    } else if now < start {
        WindowCheck::NotYetOpen
    } else if now > end {
        WindowCheck::Closed
    } else {
        WindowCheck::Open
    }
}

/// Window flags shown next to a single mailing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowFlags {
    pub interval_invalid: bool,
    pub before_window: bool,
    pub after_window: bool,
    pub can_run: bool,
}

impl WindowFlags {
    pub fn evaluate(mailing: &Mailing, now: DateTime<Utc>) -> Self {
        let interval_invalid = mailing.start_time >= mailing.end_time;
        let before_window = mailing.start_time > now;
        let after_window = mailing.end_time < now;
        let can_run = !interval_invalid
            && !before_window
            && !after_window
            && mailing.status_enum() != Some(MailingStatus::Finished);

        Self {
            interval_invalid,
            before_window,
            after_window,
            can_run,
        }
    }
}
