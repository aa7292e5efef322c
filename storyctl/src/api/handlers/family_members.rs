use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use super::profiles::owned_profile;
use crate::AppState;
use crate::api::models::profiles::{FamilyMemberCreate, FamilyMemberResponse, FamilyMemberUpdate};
use crate::api::models::users::CurrentUser;
use crate::db::{errors::DbError, handlers::FamilyMembers};
use crate::errors::{Error, Result};
use crate::types::{FamilyMemberId, ProfileId};

fn member_not_found(id: FamilyMemberId) -> Error {
    Error::NotFound {
        resource: "Family member".to_string(),
        id: id.to_string(),
    }
}

#[utoipa::path(
    get,
    path = "/profiles/{id}/family-members",
    tag = "family_members",
    summary = "List a profile's family members",
    params(("id" = uuid::Uuid, Path, description = "Profile ID")),
    responses(
        (status = 200, description = "Family members in the order they were added", body = Vec<FamilyMemberResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Profile not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_family_members(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(profile_id): Path<ProfileId>,
) -> Result<Json<Vec<FamilyMemberResponse>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    owned_profile(&mut conn, profile_id, current_user.id).await?;

    let members = FamilyMembers::new(&mut conn).list_for_profile(profile_id).await?;
    Ok(Json(members.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/profiles/{id}/family-members",
    tag = "family_members",
    summary = "Add a family member",
    request_body = FamilyMemberCreate,
    params(("id" = uuid::Uuid, Path, description = "Profile ID")),
    responses(
        (status = 201, description = "Family member added", body = FamilyMemberResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Profile not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_family_member(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(profile_id): Path<ProfileId>,
    Json(create): Json<FamilyMemberCreate>,
) -> Result<(StatusCode, Json<FamilyMemberResponse>)> {
    create.validate()?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    owned_profile(&mut conn, profile_id, current_user.id).await?;

    let member = FamilyMembers::new(&mut conn).create(&create.into_db_request(profile_id)).await?;
    Ok((StatusCode::CREATED, Json(member.into())))
}

#[utoipa::path(
    patch,
    path = "/profiles/{id}/family-members/{member_id}",
    tag = "family_members",
    summary = "Update a family member",
    request_body = FamilyMemberUpdate,
    params(
        ("id" = uuid::Uuid, Path, description = "Profile ID"),
        ("member_id" = uuid::Uuid, Path, description = "Family member ID"),
    ),
    responses(
        (status = 200, description = "Family member updated", body = FamilyMemberResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Profile or family member not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_family_member(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((profile_id, member_id)): Path<(ProfileId, FamilyMemberId)>,
    Json(update): Json<FamilyMemberUpdate>,
) -> Result<Json<FamilyMemberResponse>> {
    update.validate()?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    owned_profile(&mut conn, profile_id, current_user.id).await?;

    match FamilyMembers::new(&mut conn).update(profile_id, member_id, &update.into()).await {
        Ok(member) => Ok(Json(member.into())),
        Err(DbError::NotFound) => Err(member_not_found(member_id)),
        Err(e) => Err(e.into()),
    }
}

#[utoipa::path(
    delete,
    path = "/profiles/{id}/family-members/{member_id}",
    tag = "family_members",
    summary = "Remove a family member",
    params(
        ("id" = uuid::Uuid, Path, description = "Profile ID"),
        ("member_id" = uuid::Uuid, Path, description = "Family member ID"),
    ),
    responses(
        (status = 204, description = "Family member removed"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Profile or family member not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_family_member(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((profile_id, member_id)): Path<(ProfileId, FamilyMemberId)>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    owned_profile(&mut conn, profile_id, current_user.id).await?;

    if FamilyMembers::new(&mut conn).delete(profile_id, member_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(member_not_found(member_id))
    }
}
