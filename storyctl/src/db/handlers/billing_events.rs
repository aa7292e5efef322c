//! Ledger of fulfilled checkout sessions.
//!
//! The unique `source_id` makes fulfilment idempotent: a second insert for the same session fails
//! with a unique violation, which callers treat as "already processed".

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection};
use tracing::instrument;
use uuid::Uuid;

use crate::db::{errors::Result, models::subscriptions::BillingEventCreateDBRequest};
use crate::types::{UserId, abbrev_uuid};

#[derive(Debug, Clone, FromRow)]
pub struct BillingEvent {
    pub id: Uuid,
    pub user_id: UserId,
    pub source_id: String,
    pub kind: String,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

pub struct BillingEvents<'c> {
    db: &'c mut PgConnection,
}

impl<'c> BillingEvents<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id), kind = %request.kind), err)]
    pub async fn create(&mut self, request: &BillingEventCreateDBRequest) -> Result<BillingEvent> {
        let event = sqlx::query_as::<_, BillingEvent>(
            r#"
            INSERT INTO billing_events (id, user_id, source_id, kind, amount)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(&request.source_id)
        .bind(&request.kind)
        .bind(request.amount)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(event)
    }

    #[instrument(skip(self, source_id), err)]
    pub async fn exists(&mut self, source_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM billing_events WHERE source_id = $1)")
            .bind(source_id)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(exists)
    }
}
