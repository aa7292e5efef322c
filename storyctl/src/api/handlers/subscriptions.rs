//! Subscription, usage and checkout endpoints.
//!
//! Checkout goes through the configured [`PaymentProvider`](crate::payment_providers::PaymentProvider).
//! Completing a session is idempotent; see [`crate::payment_providers::fulfil_session`].

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use chrono::Utc;

use crate::AppState;
use crate::api::models::subscriptions::{
    CancelRequest, CheckoutProcessedResponse, CheckoutRequest, CheckoutResponse, Feature, FeatureAccessResponse, PlansResponse,
    SubscriptionResponse, SubscriptionStatus, Tier, UsageStats,
};
use crate::api::models::users::CurrentUser;
use crate::db::handlers::{Profiles, Subscriptions};
use crate::db::models::subscriptions::SubscriptionDBResponse;
use crate::errors::{Error, Result};
use crate::metering::{UsageDenied, plans, usage_stats};
use crate::payment_providers::{PaymentError, PaymentProvider};
use crate::types::{UserId, abbrev_uuid};

fn payment_provider(state: &AppState) -> Result<Arc<dyn PaymentProvider>> {
    state.payment_provider.clone().ok_or_else(|| {
        tracing::warn!("Checkout requested but no payment provider is configured");
        PaymentError::NotConfigured.into()
    })
}

/// The account's subscription brought up to date for the current period
async fn current_subscription(state: &AppState, user_id: UserId) -> Result<SubscriptionDBResponse> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let subscription = Subscriptions::new(&mut tx)
        .current_for_update(user_id, Utc::now())
        .await?
        .ok_or(UsageDenied::NoSubscription)?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    Ok(subscription)
}

fn validate_redirect_url(field: &str, value: &str) -> Result<()> {
    let url = url::Url::parse(value).map_err(|e| Error::BadRequest {
        message: format!("{field} is not a valid URL: {e}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::BadRequest {
            message: format!("{field} must be an http or https URL"),
        });
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/subscription/plans",
    tag = "subscription",
    summary = "List plans",
    responses(
        (status = 200, description = "Plan catalogue and the single story credit price", body = PlansResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_plans() -> Json<PlansResponse> {
    Json(PlansResponse {
        plans: plans::catalogue(),
        story_credit: plans::story_credit_offer(),
    })
}

#[utoipa::path(
    get,
    path = "/subscription",
    tag = "subscription",
    summary = "Get the current subscription",
    responses(
        (status = 200, description = "Current subscription", body = SubscriptionResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No subscription"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_subscription(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<SubscriptionResponse>> {
    let subscription = current_subscription(&state, current_user.id).await?;
    Ok(Json(subscription.into()))
}

#[utoipa::path(
    get,
    path = "/subscription/usage",
    tag = "subscription",
    summary = "Get usage for the current billing period",
    responses(
        (status = 200, description = "Usage statistics", body = UsageStats),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No subscription"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_usage(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<UsageStats>> {
    let subscription = current_subscription(&state, current_user.id).await?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let profiles_count = Profiles::new(&mut conn).count_active(current_user.id).await?;

    Ok(Json(usage_stats(&subscription, profiles_count, Utc::now())))
}

#[utoipa::path(
    get,
    path = "/subscription/features/{feature}",
    tag = "subscription",
    summary = "Check access to a feature",
    params(("feature" = Feature, Path, description = "Feature name, e.g. pdf_export")),
    responses(
        (status = 200, description = "Whether the current plan includes the feature", body = FeatureAccessResponse),
        (status = 400, description = "Unknown feature"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn check_feature_access(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(feature): Path<Feature>,
) -> Result<Json<FeatureAccessResponse>> {
    let subscription = current_subscription(&state, current_user.id).await?;
    Ok(Json(FeatureAccessResponse {
        feature,
        tier: subscription.tier,
        has_access: subscription.features.has(feature),
    }))
}

#[utoipa::path(
    post,
    path = "/subscription/checkout",
    tag = "subscription",
    summary = "Start a checkout",
    description = "Creates a checkout session for a plan upgrade or a single story credit and returns the URL to send the user to",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Checkout URL", body = CheckoutResponse),
        (status = 400, description = "Invalid purchase or redirect URL"),
        (status = 401, description = "Unauthorized"),
        (status = 501, description = "No payment provider configured"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn create_checkout(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    let provider = payment_provider(&state)?;
    validate_redirect_url("success_url", &request.success_url)?;
    validate_redirect_url("cancel_url", &request.cancel_url)?;

    let url = provider
        .create_checkout_session(&current_user, request.purchase, &request.cancel_url, &request.success_url)
        .await?;

    tracing::info!(purchase = ?request.purchase, "Created checkout session");
    Ok(Json(CheckoutResponse { url }))
}

/// Complete a checkout session. Safe to call more than once; the purchase is applied once.
#[utoipa::path(
    patch,
    path = "/subscription/checkout/{session_id}",
    tag = "subscription",
    summary = "Complete a checkout",
    params(("session_id" = String, Path, description = "Checkout session ID")),
    responses(
        (status = 200, description = "Purchase applied", body = CheckoutProcessedResponse),
        (status = 400, description = "Malformed session ID"),
        (status = 401, description = "Unauthorized"),
        (status = 402, description = "Payment not completed"),
        (status = 404, description = "Session not found"),
        (status = 501, description = "No payment provider configured"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn process_checkout(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(session_id): Path<String>,
) -> Result<Json<CheckoutProcessedResponse>> {
    let provider = payment_provider(&state)?;

    let session = provider.get_payment_session(&session_id).await?;
    if session.user_id != current_user.id {
        return Err(PaymentError::SessionNotFound.into());
    }

    provider.process_payment_session(&state.db, &session_id).await?;

    let subscription = current_subscription(&state, current_user.id).await?;
    Ok(Json(CheckoutProcessedResponse {
        message: "Payment processed successfully".to_string(),
        subscription: subscription.into(),
    }))
}

/// Cancel a paid plan, either now or when the current period ends.
///
/// Immediate cancellation drops to free quotas with status `cancelled`, which blocks generation
/// until the subscription is reactivated.
#[utoipa::path(
    post,
    path = "/subscription/cancel",
    tag = "subscription",
    summary = "Cancel the subscription",
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Subscription after cancellation", body = SubscriptionResponse),
        (status = 400, description = "Nothing to cancel"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn cancel_subscription(
    State(state): State<AppState>,
    current_user: CurrentUser,
    request: Option<Json<CancelRequest>>,
) -> Result<Json<SubscriptionResponse>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Subscriptions::new(&mut tx);
    let subscription = repo
        .current_for_update(current_user.id, Utc::now())
        .await?
        .ok_or(UsageDenied::NoSubscription)?;

    if subscription.tier == Tier::Free || subscription.status == SubscriptionStatus::Cancelled {
        return Err(Error::BadRequest {
            message: "No active subscription to cancel".to_string(),
        });
    }

    let updated = if request.immediate {
        repo.downgrade_to_free(subscription.id, SubscriptionStatus::Cancelled, Utc::now())
            .await?
    } else {
        repo.set_cancel_at_period_end(current_user.id, true).await?
    };
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    tracing::info!(immediate = request.immediate, tier = %subscription.tier, "Subscription cancelled");
    Ok(Json(updated.into()))
}

#[utoipa::path(
    post,
    path = "/subscription/reactivate",
    tag = "subscription",
    summary = "Reactivate a cancelled subscription",
    responses(
        (status = 200, description = "Subscription after reactivation", body = SubscriptionResponse),
        (status = 400, description = "Subscription is not cancelled"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn reactivate_subscription(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> Result<Json<SubscriptionResponse>> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Subscriptions::new(&mut tx);
    let subscription = repo
        .current_for_update(current_user.id, Utc::now())
        .await?
        .ok_or(UsageDenied::NoSubscription)?;

    if !subscription.cancel_at_period_end && subscription.status != SubscriptionStatus::Cancelled {
        return Err(Error::BadRequest {
            message: "Subscription is not cancelled".to_string(),
        });
    }

    let updated = repo.reactivate(current_user.id).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    tracing::info!("Subscription reactivated");
    Ok(Json(updated.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment_providers::dummy;
    use crate::test_utils::{bearer_token, create_test_config, create_test_server};
    use axum::http::{StatusCode, header};
    use serde_json::{Value, json};

    #[tokio::test]
    async fn test_plans_are_public() {
        let server = create_test_server(create_test_config());

        let response = server.get("/api/v1/subscription/plans").await;
        response.assert_status_ok();

        let body: Value = response.json();
        let ids: Vec<&str> = body["plans"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["free", "plus", "unlimited"]);
        assert_eq!(body["story_credit"]["price"], "5.00");
    }

    #[tokio::test]
    async fn test_subscription_endpoints_require_authentication() {
        let server = create_test_server(create_test_config());

        for path in ["/api/v1/subscription", "/api/v1/subscription/usage", "/api/v1/subscription/features/pdf_export"] {
            server.get(path).await.assert_status(StatusCode::UNAUTHORIZED);
        }
        server
            .post("/api/v1/subscription/cancel")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_dummy_checkout_returns_success_url_with_session() {
        let config = create_test_config();
        let token = bearer_token(&config);
        let server = create_test_server(config);

        let response = server
            .post("/api/v1/subscription/checkout")
            .add_header(header::AUTHORIZATION, token)
            .json(&json!({
                "purchase": {"type": "plan", "plan": "plus"},
                "success_url": "http://localhost:5173/billing?session_id={CHECKOUT_SESSION_ID}",
                "cancel_url": "http://localhost:5173/billing",
            }))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        let url = body["url"].as_str().unwrap();
        assert!(url.starts_with("http://localhost:5173/billing?session_id=dummy_session_"));
        assert!(url.contains("_plus_"));
    }

    #[tokio::test]
    async fn test_checkout_rejects_free_plan_and_bad_urls() {
        let config = create_test_config();
        let token = bearer_token(&config);
        let server = create_test_server(config);

        let response = server
            .post("/api/v1/subscription/checkout")
            .add_header(header::AUTHORIZATION, token.clone())
            .json(&json!({
                "purchase": {"type": "plan", "plan": "free"},
                "success_url": "http://localhost/ok",
                "cancel_url": "http://localhost/cancel",
            }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let response = server
            .post("/api/v1/subscription/checkout")
            .add_header(header::AUTHORIZATION, token)
            .json(&json!({
                "purchase": {"type": "story_credit"},
                "success_url": "not a url",
                "cancel_url": "http://localhost/cancel",
            }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.text().contains("success_url"));
    }

    #[tokio::test]
    async fn test_checkout_without_provider_is_not_implemented() {
        let mut config = create_test_config();
        config.payment = None;
        let token = bearer_token(&config);
        let server = create_test_server(config);

        let response = server
            .post("/api/v1/subscription/checkout")
            .add_header(header::AUTHORIZATION, token)
            .json(&json!({
                "purchase": {"type": "story_credit"},
                "success_url": "http://localhost/ok",
                "cancel_url": "http://localhost/cancel",
            }))
            .await;
        response.assert_status(StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_processing_another_accounts_session_is_not_found() {
        let config = create_test_config();
        let token = bearer_token(&config);
        let server = create_test_server(config);

        let foreign = dummy::session_id(uuid::Uuid::new_v4(), crate::api::models::subscriptions::Purchase::StoryCredit);
        let response = server
            .patch(&format!("/api/v1/subscription/checkout/{foreign}"))
            .add_header(header::AUTHORIZATION, token.clone())
            .await;
        response.assert_status(StatusCode::NOT_FOUND);

        let response = server
            .patch("/api/v1/subscription/checkout/cs_test_123")
            .add_header(header::AUTHORIZATION, token)
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_redirect_url_validation() {
        assert!(validate_redirect_url("success_url", "https://app.example.com/done").is_ok());
        assert!(validate_redirect_url("success_url", "javascript:alert(1)").is_err());
        assert!(validate_redirect_url("success_url", "/relative").is_err());
    }
}
