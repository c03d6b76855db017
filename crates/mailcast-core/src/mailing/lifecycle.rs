//! Mailing lifecycle - status persistence checkpoints and force finish

use super::window::refresh_status;
use crate::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use mailcast_common::types::MailingId;
use mailcast_common::{Error, Result};
use mailcast_storage::models::{Mailing, MailingStatus};
use mailcast_storage::repository::MailingRepository;
use std::sync::Arc;
use tracing::{debug, info};

/// Persists derived mailing status at the defined checkpoints: on read,
/// around each dispatch, and after a force finish.
#[derive(Clone)]
pub struct MailingLifecycle {
    mailings: Arc<dyn MailingRepository>,
    clock: Arc<dyn Clock>,
}

impl MailingLifecycle {
    pub fn new(mailings: Arc<dyn MailingRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { mailings, clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Refresh the status against the current instant.
    ///
    /// When `persist` is set and the status changed, only the status column
    /// is written. Returns whether the status changed.
    pub async fn update_status(&self, mailing: &mut Mailing, persist: bool) -> Result<bool> {
        let now = self.clock.now();
        self.update_status_at(mailing, now, persist).await
    }

    /// Same as [`update_status`](Self::update_status) for an explicit instant
    pub async fn update_status_at(
        &self,
        mailing: &mut Mailing,
        now: DateTime<Utc>,
        persist: bool,
    ) -> Result<bool> {
        if !refresh_status(mailing, now) {
            return Ok(false);
        }

        debug!(
            mailing_id = %mailing.id,
            status = %mailing.status,
            persist,
            "Mailing status changed"
        );

        if persist {
            let status = mailing
                .status_enum()
                .ok_or_else(|| Error::Internal(format!("unknown status {}", mailing.status)))?;
            self.mailings.update_status(mailing.id, status).await?;
        }

        Ok(true)
    }

    /// Load a mailing and refresh its status
    pub async fn load(&self, id: MailingId, persist: bool) -> Result<Mailing> {
        let mut mailing = self
            .mailings
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("mailing {}", id)))?;
        self.update_status(&mut mailing, persist).await?;
        Ok(mailing)
    }

    /// Close the window of a mailing now.
    ///
    /// `end_time` becomes the last representable instant before now (the
    /// store keeps microsecond precision), so the recomputed status is
    /// `Finished` whatever the previous status was. `start_time`, the
    /// recipients and the attempt log are left untouched.
    pub async fn force_finish(&self, mailing: &mut Mailing) -> Result<()> {
        let now = self.clock.now();
        let end_time = now - Duration::microseconds(1);

        self.mailings.update_end_time(mailing.id, end_time).await?;
        mailing.end_time = end_time;
        self.update_status_at(mailing, now, true).await?;

        info!(mailing_id = %mailing.id, end_time = %end_time, "Mailing force finished");
        debug_assert_eq!(mailing.status_enum(), Some(MailingStatus::Finished));
        Ok(())
    }
}
