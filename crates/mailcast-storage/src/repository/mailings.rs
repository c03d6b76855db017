//! Mailing repository

use crate::db::DatabasePool;
use crate::models::{Client, CreateMailing, Mailing, MailingStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailcast_common::types::{MailingId, Scope};
use mailcast_common::{Error, Result};
use uuid::Uuid;

/// Mailing repository trait
///
/// `update_status` and `update_end_time` each write a single column so that
/// they never clobber concurrent edits of the other fields.
#[async_trait]
pub trait MailingRepository: Send + Sync {
    async fn create(&self, input: CreateMailing) -> Result<Mailing>;
    async fn get(&self, id: MailingId) -> Result<Option<Mailing>>;
    async fn list(&self, scope: Scope) -> Result<Vec<Mailing>>;
    async fn count(&self, scope: Scope) -> Result<i64>;
    /// Mailings whose window contains `now` and whose stored status is not finished
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Mailing>>;
    /// Recipients of a mailing in a stable order
    async fn recipients(&self, id: MailingId) -> Result<Vec<Client>>;
    async fn update_status(&self, id: MailingId, status: MailingStatus) -> Result<()>;
    async fn update_end_time(&self, id: MailingId, end_time: DateTime<Utc>) -> Result<()>;
}

/// Database mailing repository
#[derive(Clone)]
pub struct DbMailingRepository {
    pool: DatabasePool,
}

impl DbMailingRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MailingRepository for DbMailingRepository {
    async fn create(&self, input: CreateMailing) -> Result<Mailing> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let mailing = sqlx::query_as::<_, Mailing>(
            r#"
            INSERT INTO mailings (id, owner_id, message_id, start_time, end_time, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.owner_id)
        .bind(input.message_id)
        .bind(input.start_time)
        .bind(input.end_time)
        .bind(MailingStatus::Created.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        for client_id in &input.client_ids {
            sqlx::query(
                "INSERT INTO mailing_clients (mailing_id, client_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(mailing.id)
            .bind(client_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(mailing)
    }

    async fn get(&self, id: MailingId) -> Result<Option<Mailing>> {
        sqlx::query_as::<_, Mailing>("SELECT * FROM mailings WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list(&self, scope: Scope) -> Result<Vec<Mailing>> {
        sqlx::query_as::<_, Mailing>(
            r#"
            SELECT * FROM mailings
            WHERE ($1::uuid IS NULL OR owner_id = $1)
            ORDER BY created_at DESC
            "#,
        )
        .bind(scope.owner())
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn count(&self, scope: Scope) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM mailings WHERE ($1::uuid IS NULL OR owner_id = $1)",
        )
        .bind(scope.owner())
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count.0)
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Mailing>> {
        sqlx::query_as::<_, Mailing>(
            r#"
            SELECT * FROM mailings
            WHERE start_time <= $1
              AND end_time >= $1
              AND status <> 'finished'
            ORDER BY start_time ASC
            "#,
        )
        .bind(now)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn recipients(&self, id: MailingId) -> Result<Vec<Client>> {
        sqlx::query_as::<_, Client>(
            r#"
            SELECT c.* FROM clients c
            JOIN mailing_clients mc ON mc.client_id = c.id
            WHERE mc.mailing_id = $1
            ORDER BY c.email ASC, c.id ASC
            "#,
        )
        .bind(id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn update_status(&self, id: MailingId, status: MailingStatus) -> Result<()> {
        let result = sqlx::query("UPDATE mailings SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("mailing {}", id)));
        }
        Ok(())
    }

    async fn update_end_time(&self, id: MailingId, end_time: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE mailings SET end_time = $2 WHERE id = $1")
            .bind(id)
            .bind(end_time)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("mailing {}", id)));
        }
        Ok(())
    }
}
