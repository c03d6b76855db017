//! Attempt log repository
//!
//! The log is append-only: the trait exposes no update or delete.

use crate::db::DatabasePool;
use crate::models::{AttemptCounts, AttemptLog, MailingAttemptCounts, NewAttemptLog};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailcast_common::types::{MailingId, Scope};
use mailcast_common::{Error, Result};
use sqlx::Row;
use uuid::Uuid;

/// Attempt log repository trait
#[async_trait]
pub trait AttemptLogRepository: Send + Sync {
    async fn append(&self, input: NewAttemptLog) -> Result<AttemptLog>;
    /// Entries for one mailing, newest first
    async fn list_by_mailing(&self, mailing_id: MailingId) -> Result<Vec<AttemptLog>>;
    /// The `limit` newest entries of all mailings visible in `scope`
    async fn recent(&self, scope: Scope, limit: i64) -> Result<Vec<AttemptLog>>;
    /// Totals over every entry visible in `scope`
    async fn counts(&self, scope: Scope) -> Result<AttemptCounts>;
    /// Totals per mailing with at least one entry in `scope`, most recently
    /// attempted first
    async fn counts_by_mailing(&self, scope: Scope) -> Result<Vec<MailingAttemptCounts>>;
}

/// Database attempt log repository
#[derive(Clone)]
pub struct DbAttemptLogRepository {
    pool: DatabasePool,
}

impl DbAttemptLogRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptLogRepository for DbAttemptLogRepository {
    async fn append(&self, input: NewAttemptLog) -> Result<AttemptLog> {
        sqlx::query_as::<_, AttemptLog>(
            r#"
            INSERT INTO mailing_logs (
                id, mailing_id, client_id, status, server_response, failure_reason, attempt_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.mailing_id)
        .bind(input.client_id)
        .bind(input.status.as_str())
        .bind(&input.server_response)
        .bind(&input.failure_reason)
        .bind(input.attempt_time)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_by_mailing(&self, mailing_id: MailingId) -> Result<Vec<AttemptLog>> {
        sqlx::query_as::<_, AttemptLog>(
            r#"
            SELECT * FROM mailing_logs
            WHERE mailing_id = $1
            ORDER BY attempt_time DESC, id DESC
            "#,
        )
        .bind(mailing_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn recent(&self, scope: Scope, limit: i64) -> Result<Vec<AttemptLog>> {
        sqlx::query_as::<_, AttemptLog>(
            r#"
            SELECT l.* FROM mailing_logs l
            JOIN mailings m ON m.id = l.mailing_id
            WHERE ($1::uuid IS NULL OR m.owner_id = $1)
            ORDER BY l.attempt_time DESC, l.id DESC
            LIMIT $2
            "#,
        )
        .bind(scope.owner())
        .bind(limit.max(0))
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn counts(&self, scope: Scope) -> Result<AttemptCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as total,
                COUNT(*) FILTER (WHERE l.status = 'success') as success,
                COUNT(*) FILTER (WHERE l.status = 'failed') as failed
            FROM mailing_logs l
            JOIN mailings m ON m.id = l.mailing_id
            WHERE ($1::uuid IS NULL OR m.owner_id = $1)
            "#,
        )
        .bind(scope.owner())
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(AttemptCounts {
            total: row.get::<Option<i64>, _>("total").unwrap_or(0),
            success: row.get::<Option<i64>, _>("success").unwrap_or(0),
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0),
        })
    }

    async fn counts_by_mailing(&self, scope: Scope) -> Result<Vec<MailingAttemptCounts>> {
        let rows = sqlx::query(
            r#"
            SELECT
                l.mailing_id,
                COUNT(*) as total,
                COUNT(*) FILTER (WHERE l.status = 'success') as success,
                COUNT(*) FILTER (WHERE l.status = 'failed') as failed,
                MAX(l.attempt_time) as last_attempt_time
            FROM mailing_logs l
            JOIN mailings m ON m.id = l.mailing_id
            WHERE ($1::uuid IS NULL OR m.owner_id = $1)
            GROUP BY l.mailing_id
            ORDER BY last_attempt_time DESC, l.mailing_id
            "#,
        )
        .bind(scope.owner())
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| MailingAttemptCounts {
                mailing_id: row.get("mailing_id"),
                total: row.get::<Option<i64>, _>("total").unwrap_or(0),
                success: row.get::<Option<i64>, _>("success").unwrap_or(0),
                failed: row.get::<Option<i64>, _>("failed").unwrap_or(0),
                last_attempt_time: row.get::<DateTime<Utc>, _>("last_attempt_time"),
            })
            .collect())
    }
}
