//! Payment provider abstraction layer
//!
//! This module defines the `PaymentProvider` trait which abstracts checkout handling across
//! payment processors. Fulfilment of a paid session is shared by every provider: it writes a
//! billing ledger row and applies the purchase to the account's subscription in one transaction.

use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::sync::Arc;

use crate::api::models::subscriptions::{PlanId, Purchase};
use crate::api::models::users::CurrentUser;
use crate::config::PaymentConfig;
use crate::db::errors::DbError;
use crate::db::handlers::{BillingEvents, Subscriptions};
use crate::db::models::subscriptions::{BillingEventCreateDBRequest, PlanActivationDBRequest, SubscriptionDBResponse};
use crate::metering::period::add_months;
use crate::metering::plans;
use crate::types::{UserId, abbrev_uuid};

pub mod dummy;

/// Create a payment provider from configuration
///
/// This is the single point where we convert config into provider instances.
pub fn create_provider(config: PaymentConfig) -> Arc<dyn PaymentProvider> {
    match config {
        PaymentConfig::Dummy(dummy_config) => Arc::new(dummy::DummyProvider::from(dummy_config)),
    }
}

/// Result type for payment provider operations
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Errors that can occur during payment processing
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment provider API error: {0}")]
    ProviderApi(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Payment not completed yet")]
    PaymentNotCompleted,

    #[error("Invalid payment data: {0}")]
    InvalidData(String),

    #[error("Checkout session not found")]
    SessionNotFound,

    #[error("No payment provider configured")]
    NotConfigured,
}

impl PaymentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::PaymentNotCompleted => StatusCode::PAYMENT_REQUIRED,
            PaymentError::InvalidData(_) => StatusCode::BAD_REQUEST,
            PaymentError::SessionNotFound => StatusCode::NOT_FOUND,
            PaymentError::NotConfigured => StatusCode::NOT_IMPLEMENTED,
            PaymentError::ProviderApi(_) | PaymentError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for PaymentError {
    fn from(err: sqlx::Error) -> Self {
        PaymentError::Database(err.into())
    }
}

/// A checkout session as reported by the provider
#[derive(Debug, Clone)]
pub struct PaymentSession {
    /// Account the purchase applies to
    pub user_id: UserId,
    pub purchase: Purchase,
    /// Amount paid (in dollars)
    pub amount: Decimal,
    /// Whether the payment has been completed
    pub is_paid: bool,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
}

/// Abstract payment provider interface
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create a new checkout session
    ///
    /// Returns a URL that the user should be redirected to for payment. `{CHECKOUT_SESSION_ID}`
    /// in `success_url` is replaced with the session id.
    async fn create_checkout_session(
        &self,
        user: &CurrentUser,
        purchase: Purchase,
        cancel_url: &str,
        success_url: &str,
    ) -> Result<String>;

    /// Retrieve and validate a payment session
    async fn get_payment_session(&self, session_id: &str) -> Result<PaymentSession>;

    /// Process a completed payment session
    ///
    /// This is idempotent - calling multiple times with the same session_id applies the purchase
    /// once.
    async fn process_payment_session(&self, db_pool: &PgPool, session_id: &str) -> Result<()>;
}

/// Amount charged for a purchase
pub fn purchase_price(purchase: Purchase) -> Result<Decimal> {
    match purchase {
        Purchase::Plan(PlanId::Free) => Err(PaymentError::InvalidData("The free plan cannot be purchased".to_string())),
        Purchase::Plan(id) => Ok(plans::plan(id).price()),
        Purchase::StoryCredit => Ok(plans::story_credit_price()),
    }
}

/// Apply a paid session to the account, once.
///
/// Returns `None` when the session was already fulfilled.
pub async fn fulfil_session(
    db_pool: &PgPool,
    session_id: &str,
    session: &PaymentSession,
    now: DateTime<Utc>,
) -> Result<Option<SubscriptionDBResponse>> {
    if !session.is_paid {
        return Err(PaymentError::PaymentNotCompleted);
    }

    let mut tx = db_pool.begin().await?;

    let event = BillingEventCreateDBRequest {
        user_id: session.user_id,
        source_id: session_id.to_string(),
        kind: match session.purchase {
            Purchase::Plan(id) => format!("plan_{id}"),
            Purchase::StoryCredit => "story_credit".to_string(),
        },
        amount: session.amount,
    };
    match BillingEvents::new(&mut tx).create(&event).await {
        Ok(_) => {}
        Err(DbError::UniqueViolation { constraint, .. }) if constraint.as_deref() == Some("billing_events_source_id_unique") => {
            tracing::trace!("Checkout session {} already processed, skipping", session_id);
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    }

    let mut subscriptions = Subscriptions::new(&mut tx);
    let subscription = match session.purchase {
        Purchase::Plan(PlanId::Free) => {
            return Err(PaymentError::InvalidData("The free plan cannot be purchased".to_string()));
        }
        Purchase::Plan(id) => {
            let plan = plans::plan(id);
            let activation = PlanActivationDBRequest {
                tier: plan.tier,
                stories_per_month: plan.stories_per_month,
                profiles_limit: plan.profiles_limit,
                features: plan.features,
                provider_customer_id: session.provider_customer_id.clone(),
                provider_subscription_id: session.provider_subscription_id.clone(),
                period_start: now,
                period_end: add_months(now, 1),
            };
            subscriptions.activate_plan(session.user_id, &activation).await?
        }
        Purchase::StoryCredit => subscriptions.add_story_credits(session.user_id, 1).await?,
    };

    tx.commit().await?;

    tracing::info!(
        user_id = %abbrev_uuid(&session.user_id),
        kind = %event.kind,
        "Fulfilled checkout session {}",
        session_id
    );
    Ok(Some(subscription))
}
