//! Usage metering: the gate consulted before a story is generated, plus plan limit checks.
//!
//! The gate is a pure function of the subscription row. It decides whether a generation may start
//! and how it will be billed ([`UsageType`]). After the story is persisted, exactly one counter is
//! changed to match that usage type: a credit is spent for [`UsageType::IndividualCredit`],
//! otherwise the period counter is incremented. Recording happens in
//! [`crate::db::handlers::subscriptions::Subscriptions::record_generation`] inside the same
//! transaction as the story insert.
//!
//! Decision table:
//!
//! | status          | tier                 | condition                     | outcome             |
//! |-----------------|----------------------|-------------------------------|---------------------|
//! | payment_failed  | any                  |                               | deny (402)          |
//! | cancelled       | any                  |                               | deny (403)          |
//! | active          | free                 | credits > 0                   | `individual_credit` |
//! | active          | free                 | used < quota                  | `free_tier`         |
//! | active          | basic                | quota == -1                   | `unlimited`         |
//! | active          | basic                | used < quota                  | `subscription`      |
//! | active          | premium, enterprise  |                               | `unlimited`         |
//! | active          | free, basic          | otherwise                     | deny, limit (402)   |

pub mod period;
pub mod plans;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::api::models::subscriptions::{Feature, SubscriptionStatus, Tier, UsageStats};
use crate::db::models::subscriptions::SubscriptionDBResponse;
use period::{PeriodSource, resolve_period};
use plans::UNLIMITED;

/// How an admitted generation is billed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UsageType {
    IndividualCredit,
    FreeTier,
    Subscription,
    Unlimited,
}

impl UsageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageType::IndividualCredit => "individual_credit",
            UsageType::FreeTier => "free_tier",
            UsageType::Subscription => "subscription",
            UsageType::Unlimited => "unlimited",
        }
    }

    /// Whether recording this usage spends a credit rather than counting against the period quota
    pub fn spends_credit(&self) -> bool {
        matches!(self, UsageType::IndividualCredit)
    }
}

/// Reasons the gate or a plan limit refused an action
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UsageDenied {
    #[error("No subscription found")]
    NoSubscription,

    #[error("Payment failed. Please update your payment method.")]
    PaymentFailed,

    #[error("Subscription cancelled. Please reactivate to continue.")]
    Cancelled,

    #[error("Monthly limit of {limit} stories reached")]
    LimitReached { limit: i32 },

    #[error("Profile limit of {limit} reached. Upgrade to add more.")]
    ProfileLimitReached { limit: i32 },

    #[error("Feature '{feature}' not available in {tier} tier")]
    FeatureUnavailable { feature: Feature, tier: Tier },
}

impl UsageDenied {
    /// Payment problems and exhausted quotas are 402; the rest are 403.
    pub fn status_code(&self) -> StatusCode {
        match self {
            UsageDenied::PaymentFailed | UsageDenied::LimitReached { .. } => StatusCode::PAYMENT_REQUIRED,
            UsageDenied::NoSubscription
            | UsageDenied::Cancelled
            | UsageDenied::ProfileLimitReached { .. }
            | UsageDenied::FeatureUnavailable { .. } => StatusCode::FORBIDDEN,
        }
    }

    /// Stable machine-readable reason code
    pub fn reason(&self) -> &'static str {
        match self {
            UsageDenied::NoSubscription => "no_subscription",
            UsageDenied::PaymentFailed => "payment_failed",
            UsageDenied::Cancelled => "cancelled",
            UsageDenied::LimitReached { .. } => "limit_reached",
            UsageDenied::ProfileLimitReached { .. } => "profile_limit_reached",
            UsageDenied::FeatureUnavailable { .. } => "feature_unavailable",
        }
    }
}

/// Decide whether a story may be generated, and how it will be billed.
///
/// Expects the period counter to already be rolled over for the current period.
pub fn check_generation(sub: &SubscriptionDBResponse) -> Result<UsageType, UsageDenied> {
    match sub.status {
        SubscriptionStatus::PaymentFailed => return Err(UsageDenied::PaymentFailed),
        SubscriptionStatus::Cancelled => return Err(UsageDenied::Cancelled),
        SubscriptionStatus::Active => {}
    }

    let under_quota = sub.stories_used_this_period < sub.stories_per_month;
    match sub.tier {
        Tier::Free => {
            if sub.individual_story_credits > 0 {
                Ok(UsageType::IndividualCredit)
            } else if under_quota {
                Ok(UsageType::FreeTier)
            } else {
                Err(UsageDenied::LimitReached {
                    limit: sub.stories_per_month,
                })
            }
        }
        Tier::Basic => {
            if sub.stories_per_month == UNLIMITED {
                Ok(UsageType::Unlimited)
            } else if under_quota {
                Ok(UsageType::Subscription)
            } else {
                Err(UsageDenied::LimitReached {
                    limit: sub.stories_per_month,
                })
            }
        }
        Tier::Premium | Tier::Enterprise => Ok(UsageType::Unlimited),
    }
}

/// Check whether another active child profile may be created
pub fn check_profile_limit(sub: &SubscriptionDBResponse, active_profiles: i64) -> Result<(), UsageDenied> {
    if sub.profiles_limit == UNLIMITED || active_profiles < i64::from(sub.profiles_limit) {
        Ok(())
    } else {
        Err(UsageDenied::ProfileLimitReached { limit: sub.profiles_limit })
    }
}

pub fn check_feature(sub: &SubscriptionDBResponse, feature: Feature) -> Result<(), UsageDenied> {
    if sub.features.has(feature) {
        Ok(())
    } else {
        Err(UsageDenied::FeatureUnavailable { feature, tier: sub.tier })
    }
}

/// Summarize usage for the period containing `now`
pub fn usage_stats(sub: &SubscriptionDBResponse, profiles_count: i64, now: DateTime<Utc>) -> UsageStats {
    let (period, period_source): (_, PeriodSource) =
        resolve_period(sub.current_period_start, sub.current_period_end, sub.billing_anchor, now);

    let unlimited = sub.stories_per_month == UNLIMITED || matches!(sub.tier, Tier::Premium | Tier::Enterprise);
    let (stories_limit, stories_remaining) = if unlimited {
        (UNLIMITED, UNLIMITED)
    } else {
        (
            sub.stories_per_month,
            (sub.stories_per_month - sub.stories_used_this_period).max(0),
        )
    };

    let decision = check_generation(sub);

    UsageStats {
        tier: sub.tier,
        stories_used: sub.stories_used_this_period,
        stories_limit,
        stories_remaining,
        individual_credits: sub.individual_story_credits,
        can_generate: decision.is_ok(),
        next_usage_type: decision.ok(),
        period_start: period.start,
        period_end: period.end,
        period_source,
        profiles_count,
        profiles_limit: sub.profiles_limit,
    }
}
