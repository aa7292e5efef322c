//! OpenAPI document for the story service.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api;

/// Prefix for everything except the account endpoints
pub const API_PREFIX: &str = "/api/v1";

/// Bearer token and session cookie, both carrying the same JWT
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Session token returned by `/authentication/login` or `/authentication/register`:\n\n\
                            ```\nAuthorization: Bearer YOUR_TOKEN\n```",
                        ))
                        .build(),
                ),
            );
            components.security_schemes.insert(
                "CookieAuth".to_string(),
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                    "storyctl_session",
                    "Session cookie set on login",
                ))),
            );
        }
    }
}

/// Handlers declare paths relative to the API root; move them under [`API_PREFIX`]
struct ApiPrefixAddon;

impl Modify for ApiPrefixAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let paths = std::mem::take(&mut openapi.paths.paths);
        openapi.paths.paths = paths
            .into_iter()
            .map(|(path, item)| {
                if path.starts_with("/authentication/") {
                    (path, item)
                } else {
                    (format!("{API_PREFIX}{path}"), item)
                }
            })
            .collect();
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "storyctl",
        description = "Personalized children's stories: child profiles, character-consistent narratives and illustrations, with plan-based usage metering."
    ),
    modifiers(&SecurityAddon, &ApiPrefixAddon),
    paths(
        api::handlers::auth::register,
        api::handlers::auth::login,
        api::handlers::auth::logout,
        api::handlers::users::get_current_user,
        api::handlers::users::update_current_user,
        api::handlers::users::delete_current_user,
        api::handlers::profiles::list_profiles,
        api::handlers::profiles::create_profile,
        api::handlers::profiles::get_profile,
        api::handlers::profiles::update_profile,
        api::handlers::profiles::delete_profile,
        api::handlers::profiles::get_character_reference,
        api::handlers::family_members::list_family_members,
        api::handlers::family_members::create_family_member,
        api::handlers::family_members::update_family_member,
        api::handlers::family_members::delete_family_member,
        api::handlers::comfort_items::list_comfort_items,
        api::handlers::comfort_items::create_comfort_item,
        api::handlers::comfort_items::update_comfort_item,
        api::handlers::comfort_items::delete_comfort_item,
        api::handlers::personality_traits::list_personality_traits,
        api::handlers::personality_traits::replace_personality_traits,
        api::handlers::photos::list_photos,
        api::handlers::photos::upload_photo,
        api::handlers::photos::delete_photo,
        api::handlers::photos::set_primary_photo,
        api::handlers::photos::get_photo_content,
        api::handlers::photos::analyze_character_photo,
        api::handlers::stories::generate_story,
        api::handlers::stories::list_stories,
        api::handlers::stories::get_story,
        api::handlers::stories::toggle_favorite,
        api::handlers::stories::rate_story,
        api::handlers::stories::delete_story,
        api::handlers::stories::export_story_pdf,
        api::handlers::stories::list_story_templates,
        api::handlers::subscriptions::list_plans,
        api::handlers::subscriptions::get_subscription,
        api::handlers::subscriptions::get_usage,
        api::handlers::subscriptions::check_feature_access,
        api::handlers::subscriptions::create_checkout,
        api::handlers::subscriptions::process_checkout,
        api::handlers::subscriptions::cancel_subscription,
        api::handlers::subscriptions::reactivate_subscription,
    ),
    components(
        schemas(
            api::models::auth::RegisterRequest,
            api::models::auth::LoginRequest,
            api::models::auth::AuthResponse,
            api::models::auth::AuthSuccessResponse,
            api::models::users::UserResponse,
            api::models::users::UserUpdate,
            api::models::users::CurrentUser,
            api::models::profiles::ProfileCreate,
            api::models::profiles::ProfileUpdate,
            api::models::profiles::ProfileResponse,
            api::models::profiles::PersonalityTraitInput,
            api::models::profiles::PersonalityTraitResponse,
            api::models::profiles::PersonalityTraitsUpdate,
            api::models::profiles::FamilyMemberCreate,
            api::models::profiles::FamilyMemberUpdate,
            api::models::profiles::FamilyMemberResponse,
            api::models::profiles::ComfortItemCreate,
            api::models::profiles::ComfortItemUpdate,
            api::models::profiles::ComfortItemResponse,
            api::models::profiles::CharacterReferenceResponse,
            crate::generation::characters::CharacterProfile,
            api::models::photos::PhotoType,
            api::models::photos::PhotoUploadForm,
            api::models::photos::PhotoResponse,
            api::models::photos::CharacterPhotoForm,
            api::models::photos::CharacterPreviewResponse,
            api::models::stories::StoryTone,
            api::models::stories::GenerateStoryRequest,
            api::models::stories::AgeGroup,
            api::models::stories::StoryTemplate,
            api::models::stories::SceneResponse,
            api::models::stories::StoryResponse,
            api::models::stories::GeneratedStoryResponse,
            api::models::stories::RatingRequest,
            crate::metering::UsageType,
            crate::metering::period::PeriodSource,
            api::models::subscriptions::Tier,
            api::models::subscriptions::SubscriptionStatus,
            api::models::subscriptions::Feature,
            api::models::subscriptions::FeatureSet,
            api::models::subscriptions::PlanId,
            api::models::subscriptions::Purchase,
            api::models::subscriptions::PlanResponse,
            api::models::subscriptions::StoryCreditOffer,
            api::models::subscriptions::PlansResponse,
            api::models::subscriptions::SubscriptionResponse,
            api::models::subscriptions::UsageStats,
            api::models::subscriptions::FeatureAccessResponse,
            api::models::subscriptions::CheckoutRequest,
            api::models::subscriptions::CheckoutResponse,
            api::models::subscriptions::CheckoutProcessedResponse,
            api::models::subscriptions::CancelRequest,
        )
    ),
    tags(
        (name = "authentication", description = "Registration, login and logout. A successful login sets the session cookie and returns the same token for Bearer use."),
        (name = "users", description = "The signed-in account. Deleting it removes every profile, photo and story it owns."),
        (name = "profiles", description = "Child profiles. Active profiles count against the plan's profile limit."),
        (name = "family_members", description = "Family members who can appear in a child's stories."),
        (name = "comfort_items", description = "Toys and objects that help a child feel safe, in preference order."),
        (name = "personality_traits", description = "The child's personality traits, used to shape the character reference."),
        (name = "photos", description = "Photos of the child, family members and comfort items. Used to describe how characters look."),
        (name = "stories", description = "Story generation and the story library."),
        (name = "subscription", description = "Plans, usage for the current billing period, and checkout."),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versioned_paths_are_prefixed() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();

        assert!(paths.iter().any(|p| p.as_str() == "/authentication/login"));
        assert!(paths.iter().any(|p| p.as_str() == "/api/v1/stories/generate"));
        assert!(paths.iter().any(|p| p.as_str() == "/api/v1/photos/{photo_id}/content"));
        assert!(
            paths
                .iter()
                .all(|p| p.starts_with("/api/v1/") || p.starts_with("/authentication/")),
            "unexpected paths: {paths:?}"
        );
    }

    #[test]
    fn test_security_schemes_registered() {
        let doc = ApiDoc::openapi();
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("BearerAuth"));
        assert!(components.security_schemes.contains_key("CookieAuth"));
    }
}
