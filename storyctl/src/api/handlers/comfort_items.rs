use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use super::profiles::owned_profile;
use crate::AppState;
use crate::api::models::profiles::{ComfortItemCreate, ComfortItemResponse, ComfortItemUpdate};
use crate::api::models::users::CurrentUser;
use crate::db::{errors::DbError, handlers::ComfortItems};
use crate::errors::{Error, Result};
use crate::types::{ComfortItemId, ProfileId};

fn item_not_found(id: ComfortItemId) -> Error {
    Error::NotFound {
        resource: "Comfort item".to_string(),
        id: id.to_string(),
    }
}

#[utoipa::path(
    get,
    path = "/profiles/{id}/comfort-items",
    tag = "comfort_items",
    summary = "List a profile's comfort items",
    params(("id" = uuid::Uuid, Path, description = "Profile ID")),
    responses(
        (status = 200, description = "Comfort items in preference order", body = Vec<ComfortItemResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Profile not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_comfort_items(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(profile_id): Path<ProfileId>,
) -> Result<Json<Vec<ComfortItemResponse>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    owned_profile(&mut conn, profile_id, current_user.id).await?;

    let items = ComfortItems::new(&mut conn).list_for_profile(profile_id).await?;
    Ok(Json(items.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/profiles/{id}/comfort-items",
    tag = "comfort_items",
    summary = "Add a comfort item",
    request_body = ComfortItemCreate,
    params(("id" = uuid::Uuid, Path, description = "Profile ID")),
    responses(
        (status = 201, description = "Comfort item added", body = ComfortItemResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Profile not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_comfort_item(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(profile_id): Path<ProfileId>,
    Json(create): Json<ComfortItemCreate>,
) -> Result<(StatusCode, Json<ComfortItemResponse>)> {
    create.validate()?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    owned_profile(&mut conn, profile_id, current_user.id).await?;

    let item = ComfortItems::new(&mut conn).create(&create.into_db_request(profile_id)).await?;
    Ok((StatusCode::CREATED, Json(item.into())))
}

#[utoipa::path(
    patch,
    path = "/profiles/{id}/comfort-items/{item_id}",
    tag = "comfort_items",
    summary = "Update a comfort item",
    request_body = ComfortItemUpdate,
    params(
        ("id" = uuid::Uuid, Path, description = "Profile ID"),
        ("item_id" = uuid::Uuid, Path, description = "Comfort item ID"),
    ),
    responses(
        (status = 200, description = "Comfort item updated", body = ComfortItemResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Profile or comfort item not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_comfort_item(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((profile_id, item_id)): Path<(ProfileId, ComfortItemId)>,
    Json(update): Json<ComfortItemUpdate>,
) -> Result<Json<ComfortItemResponse>> {
    update.validate()?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    owned_profile(&mut conn, profile_id, current_user.id).await?;

    match ComfortItems::new(&mut conn).update(profile_id, item_id, &update.into()).await {
        Ok(item) => Ok(Json(item.into())),
        Err(DbError::NotFound) => Err(item_not_found(item_id)),
        Err(e) => Err(e.into()),
    }
}

#[utoipa::path(
    delete,
    path = "/profiles/{id}/comfort-items/{item_id}",
    tag = "comfort_items",
    summary = "Remove a comfort item",
    params(
        ("id" = uuid::Uuid, Path, description = "Profile ID"),
        ("item_id" = uuid::Uuid, Path, description = "Comfort item ID"),
    ),
    responses(
        (status = 204, description = "Comfort item removed"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Profile or comfort item not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_comfort_item(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((profile_id, item_id)): Path<(ProfileId, ComfortItemId)>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    owned_profile(&mut conn, profile_id, current_user.id).await?;

    if ComfortItems::new(&mut conn).delete(profile_id, item_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(item_not_found(item_id))
    }
}
