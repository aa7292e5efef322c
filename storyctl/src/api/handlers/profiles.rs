use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{NaiveDate, Utc};
use sqlx::PgConnection;

use crate::AppState;
use crate::api::models::pagination::PaginatedResponse;
use crate::api::models::profiles::{
    CharacterReferenceQuery, CharacterReferenceResponse, ComfortItemResponse, FamilyMemberResponse, ListProfilesQuery,
    PersonalityTraitResponse, ProfileCreate, ProfileResponse, ProfileUpdate, age_on,
};
use crate::api::models::photos::PhotoResponse;
use crate::api::models::users::CurrentUser;
use crate::db::handlers::{
    ComfortItems, FamilyMembers, PersonalityTraits, Photos, Profiles, Repository, Subscriptions, profiles::ProfileFilter,
};
use crate::db::models::profiles::{PersonalityTraitDBRequest, ProfileDBResponse};
use crate::errors::{Error, Result};
use crate::generation::characters::{
    ChildSubject, FamilySubject, RawTraits, SubjectPhoto, build_characters, select_family_photo, select_representative_photo,
};
use crate::metering::{UsageDenied, check_profile_limit};
use crate::types::{ProfileId, UserId};

pub(crate) fn profile_not_found(id: ProfileId) -> Error {
    Error::NotFound {
        resource: "Profile".to_string(),
        id: id.to_string(),
    }
}

/// Load a profile owned by `user_id`. Profiles of other accounts are reported as missing.
pub(crate) async fn owned_profile(conn: &mut PgConnection, id: ProfileId, user_id: UserId) -> Result<ProfileDBResponse> {
    Profiles::new(conn)
        .get_for_user(id, user_id)
        .await?
        .ok_or_else(|| profile_not_found(id))
}

/// Everything a story or character reference needs from a saved profile
#[derive(Debug, Clone)]
pub(crate) struct ProfileSubjects {
    pub child: ChildSubject,
    pub family: Vec<FamilySubject>,
    /// name -> relation
    pub family_relations: BTreeMap<String, String>,
    pub comfort_items: Vec<String>,
    pub favorite_places: Vec<String>,
}

/// Gather the child, family and comfort items of a profile, with the photo bytes needed to
/// describe them. At most `max_family_members` family members are loaded with photos.
pub(crate) async fn load_subjects(
    conn: &mut PgConnection,
    profile: &ProfileDBResponse,
    today: NaiveDate,
    max_family_members: usize,
) -> Result<ProfileSubjects> {
    let traits = PersonalityTraits::new(&mut *conn).list_for_profile(profile.id).await?;
    let members = FamilyMembers::new(&mut *conn).list_for_profile(profile.id).await?;
    let items = ComfortItems::new(&mut *conn).list_for_profile(profile.id).await?;
    let photos = Photos::new(&mut *conn).list_for_profile(profile.id).await?;

    let child_photo = select_representative_photo(&photos).map(|p| p.id);
    let member_photos: Vec<_> = members
        .iter()
        .take(max_family_members)
        .map(|m| select_family_photo(&photos, m.id).map(|p| p.id))
        .collect();

    let wanted: Vec<_> = child_photo.iter().chain(member_photos.iter().flatten()).copied().collect();
    let mut contents = Photos::new(&mut *conn).get_contents(&wanted).await?;
    let mut take_photo = |id: Option<_>| {
        id.and_then(|id| contents.remove(&id)).map(|c| SubjectPhoto {
            content_type: c.content_type,
            data: c.data,
        })
    };

    let child = ChildSubject {
        name: profile.name.clone(),
        age: age_on(profile.birthdate, today),
        traits: RawTraits::from_names(traits.into_iter().map(|t| t.trait_name)),
        photo: take_photo(child_photo),
    };

    let family_relations = members.iter().map(|m| (m.name.clone(), m.relation().to_string())).collect();

    let mut member_photos = member_photos.into_iter();
    let family = members
        .iter()
        .map(|m| FamilySubject {
            name: m.name.clone(),
            relation: m.relation().to_string(),
            traits: RawTraits::from_json(&m.personality_traits),
            photo: take_photo(member_photos.next().flatten()),
        })
        .collect();

    Ok(ProfileSubjects {
        child,
        family,
        family_relations,
        comfort_items: items.into_iter().map(|i| i.name).collect(),
        favorite_places: profile.favorite_places.clone(),
    })
}

/// Enforce the plan's active-profile limit, locking the subscription row for the transaction
async fn ensure_profile_capacity(conn: &mut PgConnection, user_id: UserId) -> Result<()> {
    let subscription = Subscriptions::new(&mut *conn)
        .current_for_update(user_id, Utc::now())
        .await?
        .ok_or(UsageDenied::NoSubscription)?;
    let active = Profiles::new(&mut *conn).count_active(user_id).await?;
    check_profile_limit(&subscription, active)?;
    Ok(())
}

#[utoipa::path(
    get,
    path = "/profiles",
    tag = "profiles",
    summary = "List child profiles",
    params(ListProfilesQuery),
    responses(
        (status = 200, description = "Profiles of the current account, oldest first", body = PaginatedResponse<ProfileResponse>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_profiles(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListProfilesQuery>,
) -> Result<Json<PaginatedResponse<ProfileResponse>>> {
    let (skip, limit) = query.pagination.window();
    let filter = ProfileFilter::new(current_user.id, skip, limit).with_inactive(query.include_inactive.unwrap_or(false));

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Profiles::new(&mut conn);
    let profiles = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    let today = Utc::now().date_naive();
    let data = profiles.into_iter().map(|p| ProfileResponse::from_db(p, today)).collect();
    Ok(Json(PaginatedResponse::new(data, total_count, skip, limit)))
}

#[utoipa::path(
    post,
    path = "/profiles",
    tag = "profiles",
    summary = "Create a child profile",
    request_body = ProfileCreate,
    responses(
        (status = 201, description = "Profile created", body = ProfileResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "The plan's profile limit is reached"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_profile(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(create): Json<ProfileCreate>,
) -> Result<(StatusCode, Json<ProfileResponse>)> {
    let today = Utc::now().date_naive();
    create.validate(today)?;

    let traits: Vec<PersonalityTraitDBRequest> = create.personality_traits.iter().map(Into::into).collect();

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    ensure_profile_capacity(&mut tx, current_user.id).await?;

    let profile = Profiles::new(&mut tx).create(&create.into_db_request(current_user.id)).await?;
    let traits = PersonalityTraits::new(&mut tx).replace_all(profile.id, &traits).await?;

    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    let mut response = ProfileResponse::from_db(profile, today);
    response.personality_traits = Some(traits.into_iter().map(Into::into).collect());
    Ok((StatusCode::CREATED, Json(response)))
}

#[utoipa::path(
    get,
    path = "/profiles/{id}",
    tag = "profiles",
    summary = "Get a child profile with its traits, family, comfort items and photos",
    params(("id" = uuid::Uuid, Path, description = "Profile ID")),
    responses(
        (status = 200, description = "Profile", body = ProfileResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Profile not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_profile(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<ProfileId>,
) -> Result<Json<ProfileResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let profile = owned_profile(&mut conn, id, current_user.id).await?;

    let traits = PersonalityTraits::new(&mut conn).list_for_profile(id).await?;
    let members = FamilyMembers::new(&mut conn).list_for_profile(id).await?;
    let items = ComfortItems::new(&mut conn).list_for_profile(id).await?;
    let photos = Photos::new(&mut conn).list_for_profile(id).await?;

    let mut response = ProfileResponse::from_db(profile, Utc::now().date_naive());
    response.personality_traits = Some(traits.into_iter().map(PersonalityTraitResponse::from).collect());
    response.family_members = Some(members.into_iter().map(FamilyMemberResponse::from).collect());
    response.comfort_items = Some(items.into_iter().map(ComfortItemResponse::from).collect());
    response.photos = Some(photos.into_iter().map(PhotoResponse::from).collect());
    Ok(Json(response))
}

#[utoipa::path(
    patch,
    path = "/profiles/{id}",
    tag = "profiles",
    summary = "Update a child profile",
    request_body = ProfileUpdate,
    params(("id" = uuid::Uuid, Path, description = "Profile ID")),
    responses(
        (status = 200, description = "Profile updated", body = ProfileResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Reactivating would exceed the plan's profile limit"),
        (status = 404, description = "Profile not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_profile(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<ProfileId>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<ProfileResponse>> {
    let today = Utc::now().date_naive();
    update.validate(today)?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let existing = owned_profile(&mut tx, id, current_user.id).await?;

    if update.is_active == Some(true) && !existing.is_active {
        ensure_profile_capacity(&mut tx, current_user.id).await?;
    }

    let profile = Profiles::new(&mut tx).update(id, &update.into()).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(ProfileResponse::from_db(profile, today)))
}

/// Deletes the profile with its family members, comfort items, traits and photos. Stories
/// generated for it are kept.
#[utoipa::path(
    delete,
    path = "/profiles/{id}",
    tag = "profiles",
    summary = "Delete a child profile",
    params(("id" = uuid::Uuid, Path, description = "Profile ID")),
    responses(
        (status = 204, description = "Profile deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Profile not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_profile(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<ProfileId>,
) -> Result<StatusCode> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    owned_profile(&mut tx, id, current_user.id).await?;

    if !Profiles::new(&mut tx).delete(id).await? {
        return Err(profile_not_found(id));
    }
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Builds the character reference a story for this profile would be illustrated with. Photos are
/// described by the vision model; nothing is stored.
#[utoipa::path(
    get,
    path = "/profiles/{id}/character-reference",
    tag = "profiles",
    summary = "Preview the character reference for a profile",
    params(("id" = uuid::Uuid, Path, description = "Profile ID"), CharacterReferenceQuery),
    responses(
        (status = 200, description = "Character reference", body = CharacterReferenceResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Profile not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_character_reference(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<ProfileId>,
    Query(query): Query<CharacterReferenceQuery>,
) -> Result<Json<CharacterReferenceResponse>> {
    let max_family_members = state.pipeline.max_family_members();

    let subjects = {
        let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
        let profile = owned_profile(&mut conn, id, current_user.id).await?;
        load_subjects(&mut conn, &profile, Utc::now().date_naive(), max_family_members).await?
    };

    let characters = build_characters(
        state.pipeline.vision(),
        &subjects.child,
        &subjects.family,
        query.include_family.unwrap_or(true),
        max_family_members,
    )
    .await;

    Ok(Json(CharacterReferenceResponse {
        profile_id: id,
        characters: characters.to_map(),
    }))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{create_test_config, create_test_server};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_profiles_require_authentication() {
        let server = create_test_server(create_test_config());

        server.get("/api/v1/profiles").await.assert_status(StatusCode::UNAUTHORIZED);
        server
            .post("/api/v1/profiles")
            .json(&json!({"name": "Emma", "birthdate": "2019-01-10"}))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
        server
            .get(&format!("/api/v1/profiles/{}/character-reference", uuid::Uuid::new_v4()))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }
}
