//! Database models for subscriptions and the billing ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::api::models::subscriptions::{FeatureSet, SubscriptionStatus, Tier};
use crate::types::{SubscriptionId, UserId};

/// Database response for a subscription
#[derive(Debug, Clone)]
pub struct SubscriptionDBResponse {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub tier: Tier,
    pub status: SubscriptionStatus,
    pub stories_per_month: i32,
    pub stories_used_this_period: i32,
    pub individual_story_credits: i32,
    pub profiles_limit: i32,
    pub features: FeatureSet,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub billing_anchor: DateTime<Utc>,
    pub usage_period_start: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Plan activation written when a checkout for a plan completes
#[derive(Debug, Clone)]
pub struct PlanActivationDBRequest {
    pub tier: Tier,
    pub stories_per_month: i32,
    pub profiles_limit: i32,
    pub features: FeatureSet,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// Ledger row recording a fulfilled checkout session
#[derive(Debug, Clone)]
pub struct BillingEventCreateDBRequest {
    pub user_id: UserId,
    pub source_id: String,
    pub kind: String,
    pub amount: Decimal,
}
