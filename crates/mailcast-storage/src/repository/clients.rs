//! Client (recipient) repository

use crate::db::DatabasePool;
use crate::models::{Client, CreateClient};
use async_trait::async_trait;
use mailcast_common::types::{ClientId, Scope};
use mailcast_common::{Error, Result};
use uuid::Uuid;

/// Client repository trait
#[async_trait]
pub trait ClientRepository: Send + Sync {
    async fn create(&self, input: CreateClient) -> Result<Client>;
    async fn get(&self, id: ClientId) -> Result<Option<Client>>;
    async fn count(&self, scope: Scope) -> Result<i64>;
}

/// Database client repository
#[derive(Clone)]
pub struct DbClientRepository {
    pool: DatabasePool,
}

impl DbClientRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClientRepository for DbClientRepository {
    async fn create(&self, input: CreateClient) -> Result<Client> {
        sqlx::query_as::<_, Client>(
            r#"
            INSERT INTO clients (id, owner_id, email, name, comment)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.owner_id)
        .bind(&input.email)
        .bind(&input.name)
        .bind(input.comment.unwrap_or_default())
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Error::Validation(format!("Client {} already exists", input.email))
            }
            e => Error::Database(e.to_string()),
        })
    }

    async fn get(&self, id: ClientId) -> Result<Option<Client>> {
        sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn count(&self, scope: Scope) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM clients WHERE ($1::uuid IS NULL OR owner_id = $1)",
        )
        .bind(scope.owner())
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count.0)
    }
}
