use axum::{
    Json,
    extract::{Path, State},
};

use super::profiles::owned_profile;
use crate::AppState;
use crate::api::models::profiles::{PersonalityTraitInput, PersonalityTraitResponse, PersonalityTraitsUpdate};
use crate::api::models::users::CurrentUser;
use crate::db::handlers::PersonalityTraits;
use crate::db::models::profiles::PersonalityTraitDBRequest;
use crate::errors::{Error, Result};
use crate::types::ProfileId;

const MAX_TRAITS: usize = 20;

#[utoipa::path(
    get,
    path = "/profiles/{id}/personality-traits",
    tag = "personality_traits",
    summary = "Get a profile's personality traits",
    params(("id" = uuid::Uuid, Path, description = "Profile ID")),
    responses(
        (status = 200, description = "Traits in order", body = Vec<PersonalityTraitResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Profile not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_personality_traits(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(profile_id): Path<ProfileId>,
) -> Result<Json<Vec<PersonalityTraitResponse>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    owned_profile(&mut conn, profile_id, current_user.id).await?;

    let traits = PersonalityTraits::new(&mut conn).list_for_profile(profile_id).await?;
    Ok(Json(traits.into_iter().map(Into::into).collect()))
}

/// Replaces the whole list. An empty list clears the profile's traits.
#[utoipa::path(
    put,
    path = "/profiles/{id}/personality-traits",
    tag = "personality_traits",
    summary = "Replace a profile's personality traits",
    request_body = PersonalityTraitsUpdate,
    params(("id" = uuid::Uuid, Path, description = "Profile ID")),
    responses(
        (status = 200, description = "Traits saved", body = Vec<PersonalityTraitResponse>),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Profile not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn replace_personality_traits(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(profile_id): Path<ProfileId>,
    Json(update): Json<PersonalityTraitsUpdate>,
) -> Result<Json<Vec<PersonalityTraitResponse>>> {
    if update.traits.len() > MAX_TRAITS {
        return Err(Error::BadRequest {
            message: format!("A profile can have at most {MAX_TRAITS} personality traits"),
        });
    }
    update.traits.iter().try_for_each(PersonalityTraitInput::validate)?;
    let traits: Vec<PersonalityTraitDBRequest> = update.traits.iter().map(Into::into).collect();

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    owned_profile(&mut tx, profile_id, current_user.id).await?;
    let saved = PersonalityTraits::new(&mut tx).replace_all(profile_id, &traits).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(saved.into_iter().map(Into::into).collect()))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{create_test_config, create_test_server};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_sub_resources_require_authentication() {
        let server = create_test_server(create_test_config());
        let profile_id = uuid::Uuid::new_v4();

        for path in ["personality-traits", "family-members", "comfort-items", "photos"] {
            server
                .get(&format!("/api/v1/profiles/{profile_id}/{path}"))
                .await
                .assert_status(StatusCode::UNAUTHORIZED);
        }
        server
            .put(&format!("/api/v1/profiles/{profile_id}/personality-traits"))
            .json(&json!({"traits": [{"trait": "brave"}]}))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }
}
