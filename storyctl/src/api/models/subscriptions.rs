//! API models for subscriptions, plans, usage and checkout.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use crate::db::models::subscriptions::SubscriptionDBResponse;
use crate::metering::UsageType;
use crate::metering::period::PeriodSource;
use crate::types::{SubscriptionId, UserId};

/// Subscription tier. Free and Basic are quota-limited; Premium and Enterprise are unlimited.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "subscription_tier", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Basic,
    Premium,
    Enterprise,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tier::Free => "free",
            Tier::Basic => "basic",
            Tier::Premium => "premium",
            Tier::Enterprise => "enterprise",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    PaymentFailed,
}

/// Plan-gated features
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    PdfExport,
    ImageGeneration,
    CustomIllustrations,
    MultiLanguage,
    ApiAccess,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Feature::PdfExport => "pdf_export",
            Feature::ImageGeneration => "image_generation",
            Feature::CustomIllustrations => "custom_illustrations",
            Feature::MultiLanguage => "multi_language",
            Feature::ApiAccess => "api_access",
        };
        f.write_str(s)
    }
}

/// Feature flags carried by a plan and copied onto the subscription when it activates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
pub struct FeatureSet {
    pub pdf_export: bool,
    pub image_generation: bool,
    pub custom_illustrations: bool,
    pub multi_language: bool,
    pub api_access: bool,
}

impl FeatureSet {
    pub fn has(&self, feature: Feature) -> bool {
        match feature {
            Feature::PdfExport => self.pdf_export,
            Feature::ImageGeneration => self.image_generation,
            Feature::CustomIllustrations => self.custom_illustrations,
            Feature::MultiLanguage => self.multi_language,
            Feature::ApiAccess => self.api_access,
        }
    }
}

/// Purchasable plans
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlanId {
    Free,
    Plus,
    Unlimited,
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanId::Free => "free",
            PlanId::Plus => "plus",
            PlanId::Unlimited => "unlimited",
        };
        f.write_str(s)
    }
}

/// What a checkout session buys
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(tag = "type", content = "plan", rename_all = "snake_case")]
pub enum Purchase {
    /// Monthly plan upgrade
    Plan(PlanId),
    /// A single story credit, usable on any tier
    StoryCredit,
}

/// A catalogue entry
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlanResponse {
    pub id: PlanId,
    pub name: String,
    pub description: String,
    #[schema(value_type = String)]
    pub price: Decimal,
    /// Billing interval; absent for one-off purchases and the free plan
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    pub tier: Tier,
    /// Stories per month, -1 for unlimited
    pub stories_per_month: i32,
    /// Active child profiles, -1 for unlimited
    pub profiles_limit: i32,
    pub features: FeatureSet,
}

/// Price of a single story credit
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StoryCreditOffer {
    #[schema(value_type = String)]
    pub price: Decimal,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlansResponse {
    pub plans: Vec<PlanResponse>,
    pub story_credit: StoryCreditOffer,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubscriptionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: SubscriptionId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub tier: Tier,
    pub status: SubscriptionStatus,
    pub stories_per_month: i32,
    pub stories_used_this_period: i32,
    pub individual_story_credits: i32,
    pub profiles_limit: i32,
    pub features: FeatureSet,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<SubscriptionDBResponse> for SubscriptionResponse {
    fn from(db: SubscriptionDBResponse) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            tier: db.tier,
            status: db.status,
            stories_per_month: db.stories_per_month,
            stories_used_this_period: db.stories_used_this_period,
            individual_story_credits: db.individual_story_credits,
            profiles_limit: db.profiles_limit,
            features: db.features,
            current_period_start: db.current_period_start,
            current_period_end: db.current_period_end,
            cancel_at_period_end: db.cancel_at_period_end,
            cancelled_at: db.cancelled_at,
            created_at: db.created_at,
        }
    }
}

/// Usage statistics for the current billing period
#[derive(Debug, Clone, Serialize, PartialEq, ToSchema)]
pub struct UsageStats {
    pub tier: Tier,
    pub stories_used: i32,
    /// Monthly quota, -1 for unlimited
    pub stories_limit: i32,
    /// Stories left this period, -1 for unlimited
    pub stories_remaining: i32,
    pub individual_credits: i32,
    pub can_generate: bool,
    /// How the next generation would be billed, if allowed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_usage_type: Option<UsageType>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Whether the period came from the payment provider or was derived locally
    pub period_source: PeriodSource,
    pub profiles_count: i64,
    /// Active child profiles allowed, -1 for unlimited
    pub profiles_limit: i32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FeatureAccessResponse {
    pub feature: Feature,
    pub tier: Tier,
    pub has_access: bool,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub purchase: Purchase,
    /// Redirect after a successful payment. `{CHECKOUT_SESSION_ID}` is replaced with the session id.
    pub success_url: String,
    /// Redirect after an abandoned payment
    pub cancel_url: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutProcessedResponse {
    pub message: String,
    pub subscription: SubscriptionResponse,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct CancelRequest {
    /// Cancel now instead of at the end of the current period
    #[serde(default)]
    pub immediate: bool,
}
