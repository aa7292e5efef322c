//! Plan catalogue.

use rust_decimal::Decimal;

use crate::api::models::subscriptions::{FeatureSet, PlanId, PlanResponse, StoryCreditOffer, Tier};

/// Quota value meaning "no limit"
pub const UNLIMITED: i32 = -1;

/// Price of one standalone story credit, in dollars
pub fn story_credit_price() -> Decimal {
    Decimal::new(500, 2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub id: PlanId,
    pub name: &'static str,
    pub description: &'static str,
    /// Monthly price in cents
    pub price_cents: i64,
    pub tier: Tier,
    pub stories_per_month: i32,
    pub profiles_limit: i32,
    pub features: FeatureSet,
}

impl Plan {
    pub fn price(&self) -> Decimal {
        Decimal::new(self.price_cents, 2)
    }
}

pub const FREE: Plan = Plan {
    id: PlanId::Free,
    name: "Free",
    description: "Try personalized stories with a small monthly allowance",
    price_cents: 0,
    tier: Tier::Free,
    stories_per_month: 3,
    profiles_limit: 1,
    features: FeatureSet {
        pdf_export: false,
        image_generation: true,
        custom_illustrations: false,
        multi_language: false,
        api_access: false,
    },
};

pub const PLUS: Plan = Plan {
    id: PlanId::Plus,
    name: "Plus",
    description: "Ten illustrated stories a month for up to three children",
    price_cents: 1000,
    tier: Tier::Basic,
    stories_per_month: 10,
    profiles_limit: 3,
    features: FeatureSet {
        pdf_export: true,
        image_generation: true,
        custom_illustrations: false,
        multi_language: true,
        api_access: false,
    },
};

pub const UNLIMITED_PLAN: Plan = Plan {
    id: PlanId::Unlimited,
    name: "Unlimited",
    description: "Unlimited stories and profiles with every feature",
    price_cents: 3000,
    tier: Tier::Premium,
    stories_per_month: UNLIMITED,
    profiles_limit: UNLIMITED,
    features: FeatureSet {
        pdf_export: true,
        image_generation: true,
        custom_illustrations: true,
        multi_language: true,
        api_access: true,
    },
};

pub fn plan(id: PlanId) -> &'static Plan {
    match id {
        PlanId::Free => &FREE,
        PlanId::Plus => &PLUS,
        PlanId::Unlimited => &UNLIMITED_PLAN,
    }
}

pub fn catalogue() -> Vec<PlanResponse> {
    [FREE, PLUS, UNLIMITED_PLAN]
        .into_iter()
        .map(|p| PlanResponse {
            id: p.id,
            name: p.name.to_string(),
            description: p.description.to_string(),
            price: p.price(),
            interval: (p.price_cents > 0).then(|| "month".to_string()),
            tier: p.tier,
            stories_per_month: p.stories_per_month,
            profiles_limit: p.profiles_limit,
            features: p.features,
        })
        .collect()
}

pub fn story_credit_offer() -> StoryCreditOffer {
    StoryCreditOffer {
        price: story_credit_price(),
        description: "One personalized story, usable on any plan".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_prices() {
        let plans = catalogue();
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[0].price, Decimal::ZERO);
        assert!(plans[0].interval.is_none());
        assert_eq!(plans[1].price, Decimal::new(10, 0));
        assert_eq!(plans[1].interval.as_deref(), Some("month"));
        assert_eq!(plans[2].price, Decimal::new(30, 0));
        assert_eq!(story_credit_price(), Decimal::new(5, 0));
    }

    #[test]
    fn test_unlimited_plan_has_no_quota() {
        let p = plan(PlanId::Unlimited);
        assert_eq!(p.tier, Tier::Premium);
        assert_eq!(p.stories_per_month, UNLIMITED);
        assert_eq!(p.profiles_limit, UNLIMITED);
    }

    #[test]
    fn test_plus_maps_to_basic_tier() {
        let p = plan(PlanId::Plus);
        assert_eq!(p.tier, Tier::Basic);
        assert_eq!(p.stories_per_month, 10);
        assert!(p.features.pdf_export);
        assert!(!p.features.api_access);
    }
}
