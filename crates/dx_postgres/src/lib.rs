//! Postgres implementation of the core `SubscriptionStore` port.
//!
//! A newtype wrapping PgPool. All SQL is runtime-checked (sqlx::query, not
//! sqlx::query!) to avoid a compile-time DB requirement. One row per
//! subscription keyed `(owner_id, alias)`; the schema lives in
//! `migrations/0001_subscriptions.sql`.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use dx_core::ports::SubscriptionStore;
use dx_core::subscription::{DeliveryKind, Subscription, SubscriptionStatus};
use dx_core::{DxError, Result};

pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_db_err(e: sqlx::Error) -> DxError {
        DxError::Upstream(format!("database: {e}"))
    }

    fn row_to_subscription(row: &sqlx::postgres::PgRow) -> Result<Subscription> {
        let delivery: String = row.try_get("delivery_kind").map_err(Self::map_db_err)?;
        let status: String = row.try_get("status").map_err(Self::map_db_err)?;
        Ok(Subscription {
            owner_id: row.try_get("owner_id").map_err(Self::map_db_err)?,
            alias: row.try_get("alias").map_err(Self::map_db_err)?,
            entities: row.try_get("entities").map_err(Self::map_db_err)?,
            delivery: DeliveryKind::from_kind(&delivery).ok_or_else(|| {
                DxError::Internal(anyhow::anyhow!("corrupt delivery_kind {delivery}"))
            })?,
            instance_id: row.try_get("instance_id").map_err(Self::map_db_err)?,
            display_name: row.try_get("display_name").map_err(Self::map_db_err)?,
            status: SubscriptionStatus::from_status(&status).ok_or_else(|| {
                DxError::Internal(anyhow::anyhow!("corrupt status {status}"))
            })?,
        })
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn insert_if_absent(&self, sub: &Subscription) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions
                (owner_id, alias, entities, delivery_kind, instance_id, display_name, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (owner_id, alias) DO NOTHING
            "#,
        )
        .bind(&sub.owner_id)
        .bind(&sub.alias)
        .bind(&sub.entities)
        .bind(sub.delivery.as_str())
        .bind(&sub.instance_id)
        .bind(&sub.display_name)
        .bind(sub.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(Self::map_db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn fetch(&self, owner_id: &str, alias: &str) -> Result<Option<Subscription>> {
        let row = sqlx::query(
            r#"
            SELECT owner_id, alias, entities, delivery_kind, instance_id, display_name, status
            FROM subscriptions
            WHERE owner_id = $1 AND alias = $2
            "#,
        )
        .bind(owner_id)
        .bind(alias)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::map_db_err)?;
        row.map(|r| Self::row_to_subscription(&r)).transpose()
    }

    async fn list_for_user(&self, owner_id: &str) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(
            r#"
            SELECT owner_id, alias, entities, delivery_kind, instance_id, display_name, status
            FROM subscriptions
            WHERE owner_id = $1
            ORDER BY alias
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_db_err)?;
        rows.iter().map(Self::row_to_subscription).collect()
    }

    async fn replace_entities(
        &self,
        owner_id: &str,
        alias: &str,
        entities: &[String],
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET entities = $3, updated_at = now()
            WHERE owner_id = $1 AND alias = $2
            "#,
        )
        .bind(owner_id)
        .bind(alias)
        .bind(entities)
        .execute(&self.pool)
        .await
        .map_err(Self::map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(DxError::NotFound(format!(
                "subscription {owner_id}/{alias}"
            )));
        }
        Ok(())
    }

    async fn delete(&self, owner_id: &str, alias: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"DELETE FROM subscriptions WHERE owner_id = $1 AND alias = $2"#,
        )
        .bind(owner_id)
        .bind(alias)
        .execute(&self.pool)
        .await
        .map_err(Self::map_db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_orphaned(&self, owner_id: &str, alias: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'orphaned', updated_at = now()
            WHERE owner_id = $1 AND alias = $2
            "#,
        )
        .bind(owner_id)
        .bind(alias)
        .execute(&self.pool)
        .await
        .map_err(Self::map_db_err)?;
        tracing::warn!(owner_id, alias, "subscription flagged orphaned");
        Ok(())
    }
}
