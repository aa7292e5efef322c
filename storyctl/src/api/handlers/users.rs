use axum::{Json, extract::State, http::StatusCode};

use crate::api::models::users::{CurrentUser, UserResponse, UserUpdate};
use crate::db::handlers::{Repository, Users};
use crate::db::models::users::UserUpdateDBRequest;
use crate::errors::{Error, Result};
use crate::AppState;

fn account_not_found(current_user: &CurrentUser) -> Error {
    Error::NotFound {
        resource: "User".to_string(),
        id: current_user.id.to_string(),
    }
}

#[utoipa::path(
    get,
    path = "/users/current",
    tag = "users",
    summary = "Get the current account",
    responses(
        (status = 200, description = "The authenticated account", body = UserResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Account no longer exists"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_current_user(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<UserResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn)
        .get_by_id(current_user.id)
        .await?
        .ok_or_else(|| account_not_found(&current_user))?;

    Ok(Json(UserResponse::from(user)))
}

#[utoipa::path(
    patch,
    path = "/users/current",
    tag = "users",
    summary = "Update the current account",
    request_body = UserUpdate,
    responses(
        (status = 200, description = "Account updated", body = UserResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_current_user(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(update): Json<UserUpdate>,
) -> Result<Json<UserResponse>> {
    if let Some(name) = &update.display_name
        && name.chars().count() > 100
    {
        return Err(Error::BadRequest {
            message: "Display name must be at most 100 characters".to_string(),
        });
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn)
        .update(
            current_user.id,
            &UserUpdateDBRequest {
                display_name: update.display_name,
                password_hash: None,
            },
        )
        .await?;

    Ok(Json(UserResponse::from(user)))
}

/// Deleting the account removes its profiles, photos, stories and subscription.
#[utoipa::path(
    delete,
    path = "/users/current",
    tag = "users",
    summary = "Delete the current account",
    responses(
        (status = 204, description = "Account deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Account no longer exists"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_current_user(State(state): State<AppState>, current_user: CurrentUser) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if Users::new(&mut conn).delete(current_user.id).await? {
        tracing::info!(user_id = %current_user.id, "Deleted account");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(account_not_found(&current_user))
    }
}
