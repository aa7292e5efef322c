//! Dummy payment provider implementation
//!
//! Checkouts complete instantly without an external processor: the checkout URL is the success
//! URL, and the session id itself carries the account and the purchase. Useful for development and
//! testing.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    api::models::subscriptions::{PlanId, Purchase},
    api::models::users::CurrentUser,
    config::DummyConfig,
    payment_providers::{PaymentError, PaymentProvider, PaymentSession, Result, fulfil_session, purchase_price},
    types::UserId,
};

const SESSION_PREFIX: &str = "dummy_session_";

/// Dummy payment provider
pub struct DummyProvider {
    paid: bool,
}

impl DummyProvider {
    pub fn new(paid: bool) -> Self {
        Self { paid }
    }
}

impl From<DummyConfig> for DummyProvider {
    fn from(config: DummyConfig) -> Self {
        Self::new(config.paid)
    }
}

fn purchase_token(purchase: Purchase) -> &'static str {
    match purchase {
        Purchase::Plan(PlanId::Free) => "free",
        Purchase::Plan(PlanId::Plus) => "plus",
        Purchase::Plan(PlanId::Unlimited) => "unlimited",
        Purchase::StoryCredit => "credit",
    }
}

fn parse_purchase_token(token: &str) -> Option<Purchase> {
    match token {
        "plus" => Some(Purchase::Plan(PlanId::Plus)),
        "unlimited" => Some(Purchase::Plan(PlanId::Unlimited)),
        "credit" => Some(Purchase::StoryCredit),
        _ => None,
    }
}

/// Format: `dummy_session_{user_id}_{purchase}_{uuid}`
pub fn session_id(user_id: UserId, purchase: Purchase) -> String {
    format!("{SESSION_PREFIX}{user_id}_{}_{}", purchase_token(purchase), Uuid::new_v4())
}

/// Recover the account and purchase from a dummy session id
pub fn parse_session_id(session_id: &str) -> Result<(UserId, Purchase)> {
    let invalid = || PaymentError::InvalidData("Invalid dummy session ID format".to_string());

    let rest = session_id.strip_prefix(SESSION_PREFIX).ok_or_else(invalid)?;
    // UUIDs contain hyphens, never underscores
    let parts: Vec<&str> = rest.split('_').collect();
    let [user_id, purchase, nonce] = parts.as_slice() else {
        return Err(invalid());
    };

    let user_id: UserId = user_id
        .parse()
        .map_err(|e| PaymentError::InvalidData(format!("Invalid user ID: {e}")))?;
    let purchase = parse_purchase_token(purchase).ok_or_else(invalid)?;
    Uuid::parse_str(nonce).map_err(|_| invalid())?;

    Ok((user_id, purchase))
}

#[async_trait]
impl PaymentProvider for DummyProvider {
    async fn create_checkout_session(
        &self,
        user: &CurrentUser,
        purchase: Purchase,
        _cancel_url: &str,
        success_url: &str,
    ) -> Result<String> {
        // Rejects the free plan
        purchase_price(purchase)?;

        let session_id = session_id(user.id, purchase);
        let redirect_url = success_url.replace("{CHECKOUT_SESSION_ID}", &session_id);

        tracing::info!("Dummy provider created checkout session {} for user {}", session_id, user.id);

        // Payment is instantly "complete" for the dummy provider
        Ok(redirect_url)
    }

    async fn get_payment_session(&self, session_id: &str) -> Result<PaymentSession> {
        let (user_id, purchase) = parse_session_id(session_id)?;

        Ok(PaymentSession {
            user_id,
            purchase,
            amount: purchase_price(purchase)?,
            is_paid: self.paid,
            provider_customer_id: Some(format!("dummy_customer_{user_id}")),
            provider_subscription_id: match purchase {
                Purchase::Plan(_) => Some(format!("dummy_subscription_{session_id}")),
                Purchase::StoryCredit => None,
            },
        })
    }

    async fn process_payment_session(&self, db_pool: &PgPool, session_id: &str) -> Result<()> {
        let session = self.get_payment_session(session_id).await?;

        if !session.is_paid {
            tracing::trace!("Session {} has not been paid, skipping.", session_id);
            return Err(PaymentError::PaymentNotCompleted);
        }

        fulfil_session(db_pool, session_id, &session, Utc::now()).await?;
        Ok(())
    }
}
