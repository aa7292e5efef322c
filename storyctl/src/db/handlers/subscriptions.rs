//! Database repository for subscriptions.
//!
//! One row per account. Counters are only ever changed with conditional updates so that two
//! concurrent generations cannot both spend the last credit or the last quota slot.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};
use tracing::instrument;
use uuid::Uuid;

use crate::api::models::subscriptions::{FeatureSet, SubscriptionStatus, Tier};
use crate::db::errors::{DbError, Result};
use crate::db::models::subscriptions::{PlanActivationDBRequest, SubscriptionDBResponse};
use crate::metering::UsageType;
use crate::metering::period::{needs_reset, resolve_period};
use crate::metering::plans;
use crate::types::{UserId, abbrev_uuid};

#[derive(Debug, Clone, FromRow)]
struct Subscription {
    id: Uuid,
    user_id: UserId,
    tier: Tier,
    status: SubscriptionStatus,
    stories_per_month: i32,
    stories_used_this_period: i32,
    individual_story_credits: i32,
    profiles_limit: i32,
    has_pdf_export: bool,
    has_image_generation: bool,
    has_custom_illustrations: bool,
    has_multi_language: bool,
    has_api_access: bool,
    provider_customer_id: Option<String>,
    provider_subscription_id: Option<String>,
    current_period_start: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    billing_anchor: DateTime<Utc>,
    usage_period_start: DateTime<Utc>,
    cancel_at_period_end: bool,
    cancelled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<Subscription> for SubscriptionDBResponse {
    fn from(s: Subscription) -> Self {
        Self {
            id: s.id,
            user_id: s.user_id,
            tier: s.tier,
            status: s.status,
            stories_per_month: s.stories_per_month,
            stories_used_this_period: s.stories_used_this_period,
            individual_story_credits: s.individual_story_credits,
            profiles_limit: s.profiles_limit,
            features: FeatureSet {
                pdf_export: s.has_pdf_export,
                image_generation: s.has_image_generation,
                custom_illustrations: s.has_custom_illustrations,
                multi_language: s.has_multi_language,
                api_access: s.has_api_access,
            },
            provider_customer_id: s.provider_customer_id,
            provider_subscription_id: s.provider_subscription_id,
            current_period_start: s.current_period_start,
            current_period_end: s.current_period_end,
            billing_anchor: s.billing_anchor,
            usage_period_start: s.usage_period_start,
            cancel_at_period_end: s.cancel_at_period_end,
            cancelled_at: s.cancelled_at,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

pub struct Subscriptions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Subscriptions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Create the free subscription every new account starts on
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn create_free(&mut self, user_id: UserId, now: DateTime<Utc>) -> Result<SubscriptionDBResponse> {
        let plan = &plans::FREE;
        let row = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (
                id, user_id, tier, status, stories_per_month, profiles_limit,
                has_pdf_export, has_image_generation, has_custom_illustrations, has_multi_language, has_api_access,
                billing_anchor, usage_period_start
            )
            VALUES ($1, $2, $3, 'active', $4, $5, $6, $7, $8, $9, $10, $11, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(plan.tier)
        .bind(plan.stories_per_month)
        .bind(plan.profiles_limit)
        .bind(plan.features.pdf_export)
        .bind(plan.features.image_generation)
        .bind(plan.features.custom_illustrations)
        .bind(plan.features.multi_language)
        .bind(plan.features.api_access)
        .bind(now)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(row.into())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn get_by_user(&mut self, user_id: UserId) -> Result<Option<SubscriptionDBResponse>> {
        let row = sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(row.map(Into::into))
    }

    /// Lock the account's subscription and bring it up to date for `now`.
    ///
    /// Applies a scheduled end-of-period cancellation once the provider period has lapsed, and
    /// resets the usage counter exactly once when a new period has begun. Must run inside a
    /// transaction; the row stays locked until it commits.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn current_for_update(&mut self, user_id: UserId, now: DateTime<Utc>) -> Result<Option<SubscriptionDBResponse>> {
        let Some(mut sub): Option<SubscriptionDBResponse> =
            sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *self.db)
                .await?
                .map(Into::into)
        else {
            return Ok(None);
        };

        if sub.cancel_at_period_end
            && let Some(end) = sub.current_period_end
            && end <= now
        {
            tracing::info!(user_id = %abbrev_uuid(&user_id), "Scheduled cancellation reached period end, downgrading to free");
            sub = self.downgrade_to_free(sub.id, SubscriptionStatus::Active, end).await?;
        }

        let (period, source) = resolve_period(sub.current_period_start, sub.current_period_end, sub.billing_anchor, now);
        if needs_reset(&period, sub.usage_period_start) {
            tracing::debug!(
                user_id = %abbrev_uuid(&user_id),
                ?source,
                period_start = %period.start,
                "New billing period, resetting usage counter"
            );
            let row = sqlx::query_as::<_, Subscription>(
                r#"
                UPDATE subscriptions
                SET stories_used_this_period = 0, usage_period_start = $2, updated_at = NOW()
                WHERE id = $1 AND usage_period_start < $2
                RETURNING *
                "#,
            )
            .bind(sub.id)
            .bind(period.start)
            .fetch_optional(&mut *self.db)
            .await?;
            if let Some(row) = row {
                sub = row.into();
            }
        }

        Ok(Some(sub))
    }

    /// Apply exactly one counter change matching `usage_type`.
    ///
    /// Returns false when the change is no longer allowed (credit already spent, quota filled by a
    /// concurrent request, or status changed), in which case nothing was modified.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), usage_type = usage_type.as_str()), err)]
    pub async fn record_generation(&mut self, user_id: UserId, usage_type: UsageType) -> Result<bool> {
        let result = if usage_type.spends_credit() {
            sqlx::query(
                r#"
                UPDATE subscriptions
                SET individual_story_credits = individual_story_credits - 1, updated_at = NOW()
                WHERE user_id = $1 AND status = 'active' AND individual_story_credits > 0
                "#,
            )
            .bind(user_id)
            .execute(&mut *self.db)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE subscriptions
                SET stories_used_this_period = stories_used_this_period + 1, updated_at = NOW()
                WHERE user_id = $1
                  AND status = 'active'
                  AND (
                    tier IN ('premium', 'enterprise')
                    OR stories_per_month = -1
                    OR stories_used_this_period < stories_per_month
                  )
                "#,
            )
            .bind(user_id)
            .execute(&mut *self.db)
            .await?
        };

        Ok(result.rows_affected() == 1)
    }

    /// Switch the account onto a paid plan starting a fresh provider period
    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&user_id), tier = %request.tier), err)]
    pub async fn activate_plan(&mut self, user_id: UserId, request: &PlanActivationDBRequest) -> Result<SubscriptionDBResponse> {
        let row = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET tier = $2,
                status = 'active',
                stories_per_month = $3,
                stories_used_this_period = 0,
                profiles_limit = $4,
                has_pdf_export = $5,
                has_image_generation = $6,
                has_custom_illustrations = $7,
                has_multi_language = $8,
                has_api_access = $9,
                provider_customer_id = COALESCE($10, provider_customer_id),
                provider_subscription_id = $11,
                current_period_start = $12,
                current_period_end = $13,
                billing_anchor = $12,
                usage_period_start = $12,
                cancel_at_period_end = FALSE,
                cancelled_at = NULL,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(request.tier)
        .bind(request.stories_per_month)
        .bind(request.profiles_limit)
        .bind(request.features.pdf_export)
        .bind(request.features.image_generation)
        .bind(request.features.custom_illustrations)
        .bind(request.features.multi_language)
        .bind(request.features.api_access)
        .bind(&request.provider_customer_id)
        .bind(&request.provider_subscription_id)
        .bind(request.period_start)
        .bind(request.period_end)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(row.into())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn add_story_credits(&mut self, user_id: UserId, credits: i32) -> Result<SubscriptionDBResponse> {
        let row = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET individual_story_credits = individual_story_credits + $2, updated_at = NOW()
            WHERE user_id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(credits)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(row.into())
    }

    /// End a paid plan now: back to free quotas and features with the given status
    #[instrument(skip(self), err)]
    pub async fn downgrade_to_free(
        &mut self,
        id: Uuid,
        status: SubscriptionStatus,
        anchor: DateTime<Utc>,
    ) -> Result<SubscriptionDBResponse> {
        let plan = &plans::FREE;
        let row = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET tier = $2,
                status = $3,
                stories_per_month = $4,
                profiles_limit = $5,
                has_pdf_export = $6,
                has_image_generation = $7,
                has_custom_illustrations = $8,
                has_multi_language = $9,
                has_api_access = $10,
                provider_subscription_id = NULL,
                current_period_start = NULL,
                current_period_end = NULL,
                billing_anchor = $11,
                cancel_at_period_end = FALSE,
                cancelled_at = CASE WHEN $3 = 'cancelled'::subscription_status THEN NOW() ELSE cancelled_at END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(plan.tier)
        .bind(status)
        .bind(plan.stories_per_month)
        .bind(plan.profiles_limit)
        .bind(plan.features.pdf_export)
        .bind(plan.features.image_generation)
        .bind(plan.features.custom_illustrations)
        .bind(plan.features.multi_language)
        .bind(plan.features.api_access)
        .bind(anchor)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(row.into())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn set_cancel_at_period_end(&mut self, user_id: UserId, cancel: bool) -> Result<SubscriptionDBResponse> {
        let row = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET cancel_at_period_end = $2, updated_at = NOW()
            WHERE user_id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(cancel)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(row.into())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn reactivate(&mut self, user_id: UserId) -> Result<SubscriptionDBResponse> {
        let row = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET status = 'active', cancel_at_period_end = FALSE, cancelled_at = NULL, updated_at = NOW()
            WHERE user_id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(row.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::subscriptions::PlanId;
    use crate::test_utils::create_test_user;
    use chrono::{Duration, SubsecRound};
    use sqlx::PgPool;

    /// Postgres stores microseconds
    fn now() -> DateTime<Utc> {
        Utc::now().trunc_subsecs(6)
    }

    async fn subscription(pool: &PgPool, user_id: UserId) -> SubscriptionDBResponse {
        let mut conn = pool.acquire().await.unwrap();
        Subscriptions::new(&mut conn).get_by_user(user_id).await.unwrap().unwrap()
    }

    fn activation(id: PlanId, start: DateTime<Utc>, end: DateTime<Utc>) -> PlanActivationDBRequest {
        let plan = plans::plan(id);
        PlanActivationDBRequest {
            tier: plan.tier,
            stories_per_month: plan.stories_per_month,
            profiles_limit: plan.profiles_limit,
            features: plan.features,
            provider_customer_id: Some("cus_test".to_string()),
            provider_subscription_id: Some("sub_test".to_string()),
            period_start: start,
            period_end: end,
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_new_account_starts_on_free_plan(pool: PgPool) {
        let user = create_test_user(&pool).await;
        let sub = subscription(&pool, user.id).await;

        assert_eq!(sub.tier, Tier::Free);
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.stories_per_month, plans::FREE.stories_per_month);
        assert_eq!(sub.stories_used_this_period, 0);
        assert_eq!(sub.individual_story_credits, 0);
        assert_eq!(sub.usage_period_start, sub.billing_anchor);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_credit_generation_spends_one_credit_only(pool: PgPool) {
        let user = create_test_user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Subscriptions::new(&mut conn);
        repo.add_story_credits(user.id, 2).await.unwrap();

        assert!(repo.record_generation(user.id, UsageType::IndividualCredit).await.unwrap());

        let sub = repo.get_by_user(user.id).await.unwrap().unwrap();
        assert_eq!(sub.individual_story_credits, 1);
        assert_eq!(sub.stories_used_this_period, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_quota_generation_stops_at_the_limit(pool: PgPool) {
        let user = create_test_user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Subscriptions::new(&mut conn);

        for _ in 0..plans::FREE.stories_per_month {
            assert!(repo.record_generation(user.id, UsageType::FreeTier).await.unwrap());
        }
        assert!(!repo.record_generation(user.id, UsageType::FreeTier).await.unwrap());
        assert!(!repo.record_generation(user.id, UsageType::IndividualCredit).await.unwrap());

        let sub = repo.get_by_user(user.id).await.unwrap().unwrap();
        assert_eq!(sub.stories_used_this_period, plans::FREE.stories_per_month);
        assert_eq!(sub.individual_story_credits, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_inactive_subscription_records_nothing(pool: PgPool) {
        let user = create_test_user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Subscriptions::new(&mut conn);
        let sub = repo.add_story_credits(user.id, 1).await.unwrap();
        repo.downgrade_to_free(sub.id, SubscriptionStatus::Cancelled, now())
            .await
            .unwrap();

        assert!(!repo.record_generation(user.id, UsageType::IndividualCredit).await.unwrap());
        assert!(!repo.record_generation(user.id, UsageType::FreeTier).await.unwrap());

        let sub = repo.get_by_user(user.id).await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Cancelled);
        assert!(sub.cancelled_at.is_some());
        assert_eq!(sub.individual_story_credits, 1);
        assert_eq!(sub.stories_used_this_period, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unlimited_plan_counts_without_a_ceiling(pool: PgPool) {
        let user = create_test_user(&pool).await;
        let now = now();
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Subscriptions::new(&mut conn);
        repo.activate_plan(user.id, &activation(PlanId::Unlimited, now, now + Duration::days(30)))
            .await
            .unwrap();

        for _ in 0..5 {
            assert!(repo.record_generation(user.id, UsageType::Unlimited).await.unwrap());
        }
        let sub = repo.get_by_user(user.id).await.unwrap().unwrap();
        assert_eq!(sub.stories_used_this_period, 5);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_usage_resets_once_when_the_period_rolls_over(pool: PgPool) {
        let user = create_test_user(&pool).await;
        let anchor = now() - Duration::days(45);
        sqlx::query("UPDATE subscriptions SET billing_anchor = $2, usage_period_start = $2 WHERE user_id = $1")
            .bind(user.id)
            .bind(anchor)
            .execute(&pool)
            .await
            .unwrap();

        let mut tx = pool.begin().await.unwrap();
        let mut repo = Subscriptions::new(&mut tx);
        repo.record_generation(user.id, UsageType::FreeTier).await.unwrap();
        repo.record_generation(user.id, UsageType::FreeTier).await.unwrap();

        let now = now();
        let sub = repo.current_for_update(user.id, now).await.unwrap().unwrap();
        assert_eq!(sub.stories_used_this_period, 0);
        assert!(sub.usage_period_start > anchor);
        assert!(sub.usage_period_start <= now);

        // Same period: a later lookup keeps the new count
        repo.record_generation(user.id, UsageType::FreeTier).await.unwrap();
        let again = repo.current_for_update(user.id, now).await.unwrap().unwrap();
        assert_eq!(again.stories_used_this_period, 1);
        assert_eq!(again.usage_period_start, sub.usage_period_start);
        tx.commit().await.unwrap();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_provider_period_keeps_paid_usage(pool: PgPool) {
        let user = create_test_user(&pool).await;
        let now = now();
        let start = now - Duration::days(2);

        let mut tx = pool.begin().await.unwrap();
        let mut repo = Subscriptions::new(&mut tx);
        repo.activate_plan(user.id, &activation(PlanId::Plus, start, start + Duration::days(30)))
            .await
            .unwrap();
        repo.record_generation(user.id, UsageType::Subscription).await.unwrap();

        let sub = repo.current_for_update(user.id, now).await.unwrap().unwrap();
        assert_eq!(sub.tier, Tier::Basic);
        assert_eq!(sub.stories_used_this_period, 1);
        assert_eq!(sub.usage_period_start, start);
        tx.commit().await.unwrap();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_scheduled_cancellation_downgrades_after_period_end(pool: PgPool) {
        let user = create_test_user(&pool).await;
        let now = now();
        let end = now - Duration::days(1);

        let mut tx = pool.begin().await.unwrap();
        let mut repo = Subscriptions::new(&mut tx);
        repo.activate_plan(user.id, &activation(PlanId::Plus, end - Duration::days(30), end))
            .await
            .unwrap();
        repo.set_cancel_at_period_end(user.id, true).await.unwrap();

        let sub = repo.current_for_update(user.id, now).await.unwrap().unwrap();
        assert_eq!(sub.tier, Tier::Free);
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.stories_per_month, plans::FREE.stories_per_month);
        assert!(!sub.cancel_at_period_end);
        assert!(!sub.features.pdf_export);
        assert!(sub.provider_subscription_id.is_none());
        assert_eq!(sub.billing_anchor, end);
        tx.commit().await.unwrap();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_scheduled_cancellation_waits_for_period_end(pool: PgPool) {
        let user = create_test_user(&pool).await;
        let now = now();

        let mut tx = pool.begin().await.unwrap();
        let mut repo = Subscriptions::new(&mut tx);
        repo.activate_plan(user.id, &activation(PlanId::Plus, now - Duration::days(1), now + Duration::days(29)))
            .await
            .unwrap();
        repo.set_cancel_at_period_end(user.id, true).await.unwrap();

        let sub = repo.current_for_update(user.id, now).await.unwrap().unwrap();
        assert_eq!(sub.tier, Tier::Basic);
        assert!(sub.cancel_at_period_end);

        let sub = repo.reactivate(user.id).await.unwrap();
        assert!(!sub.cancel_at_period_end);
        tx.commit().await.unwrap();
    }
}
