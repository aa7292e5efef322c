use axum::{Json, extract::State};
use chrono::Utc;

use crate::{
    AppState,
    api::models::{
        auth::{AuthResponse, AuthSuccessResponse, LoginRequest, LoginResponse, LogoutResponse, RegisterRequest, RegisterResponse},
        users::UserResponse,
    },
    auth::{
        password::{self, Argon2Params},
        session,
    },
    db::{
        handlers::{Repository, Subscriptions, Users},
        models::users::UserCreateDBRequest,
    },
    errors::Error,
};

fn invalid_credentials() -> Error {
    Error::Unauthenticated {
        message: Some("Invalid email or password".to_string()),
    }
}

fn require_native_auth(state: &AppState) -> Result<(), Error> {
    if !state.config.auth.native.enabled {
        return Err(Error::BadRequest {
            message: "Native authentication is disabled".to_string(),
        });
    }
    Ok(())
}

fn validate_registration(request: &RegisterRequest) -> Result<(), Error> {
    let username = request.username.trim();
    if username.is_empty() || username.chars().count() > 50 {
        return Err(Error::BadRequest {
            message: "Username must be between 1 and 50 characters".to_string(),
        });
    }
    let email = request.email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(Error::BadRequest {
            message: "A valid email address is required".to_string(),
        }),
    }
}

/// Register a new parent account
///
/// The account starts on the free plan.
#[utoipa::path(
    post,
    path = "/authentication/register",
    request_body = RegisterRequest,
    tag = "authentication",
    responses(
        (status = 201, description = "Account registered", body = AuthResponse),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "An account with this email or username already exists"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn register(State(state): State<AppState>, Json(request): Json<RegisterRequest>) -> Result<RegisterResponse, Error> {
    require_native_auth(&state)?;

    if !state.config.auth.native.allow_registration {
        return Err(Error::BadRequest {
            message: "User registration is disabled".to_string(),
        });
    }

    validate_registration(&request)?;
    password::validate_password(&request.password, &state.config.auth.native.password)?;

    // Hash the password on a blocking thread to avoid blocking async runtime
    let params = Argon2Params::from(&state.config.auth.native.password);
    let password = request.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || password::hash_string_with_params(&password, Some(params)))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password hashing task: {e}"),
        })??;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;

    let mut user_repo = Users::new(&mut tx);
    if user_repo.get_user_by_email(request.email.trim()).await?.is_some() {
        return Err(Error::Conflict {
            message: "An account with this email address already exists".to_string(),
        });
    }

    let created_user = user_repo
        .create(&UserCreateDBRequest {
            username: request.username.trim().to_string(),
            email: request.email.trim().to_string(),
            display_name: request.display_name,
            password_hash: Some(password_hash),
        })
        .await?;

    Subscriptions::new(&mut tx).create_free(created_user.id, Utc::now()).await?;

    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    tracing::info!(user_id = %created_user.id, "Registered new account");

    let user_response = UserResponse::from(created_user);
    let current_user = user_response.clone().into();
    let token = session::create_session_token(&current_user, &state.config)?;
    let cookie = create_session_cookie(&token, &state.config);

    Ok(RegisterResponse {
        auth_response: AuthResponse {
            user: user_response,
            message: "Registration successful".to_string(),
        },
        cookie,
    })
}

/// Login with email and password
///
/// The session token is set as a cookie; the same token is accepted as a bearer token.
#[utoipa::path(
    post,
    path = "/authentication/login",
    request_body = LoginRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<LoginResponse, Error> {
    require_native_auth(&state)?;

    if request.email.trim().is_empty() || request.password.is_empty() {
        return Err(invalid_credentials());
    }

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut user_repo = Users::new(&mut pool_conn);

    let user = user_repo
        .get_user_by_email(request.email.trim())
        .await?
        .ok_or_else(invalid_credentials)?;

    let hash = user.password_hash.clone().ok_or_else(invalid_credentials)?;

    // Verify password on a blocking thread to avoid blocking async runtime
    let password = request.password.clone();
    let is_valid = tokio::task::spawn_blocking(move || password::verify_string(&password, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password verification task: {e}"),
        })??;

    if !is_valid {
        return Err(invalid_credentials());
    }

    user_repo.record_login(user.id).await?;

    let user_response = UserResponse::from(user);
    let current_user = user_response.clone().into();
    let token = session::create_session_token(&current_user, &state.config)?;
    let cookie = create_session_cookie(&token, &state.config);

    Ok(LoginResponse {
        auth_response: AuthResponse {
            user: user_response,
            message: "Login successful".to_string(),
        },
        cookie,
    })
}

/// Logout (clear session)
#[utoipa::path(
    post,
    path = "/authentication/logout",
    tag = "authentication",
    responses(
        (status = 200, description = "Logout successful", body = AuthSuccessResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>) -> Result<LogoutResponse, Error> {
    let session_config = &state.config.auth.native.session;
    let cookie = format!(
        "{}=; Path=/; HttpOnly; Secure={}; SameSite={}; Max-Age=0",
        session_config.cookie_name, session_config.cookie_secure, session_config.cookie_same_site
    );

    Ok(LogoutResponse {
        auth_response: AuthSuccessResponse {
            message: "Logout successful".to_string(),
        },
        cookie,
    })
}

fn create_session_cookie(token: &str, config: &crate::config::Config) -> String {
    let session_config = &config.auth.native.session;
    let max_age = session_config.timeout.as_secs();

    format!(
        "{}={}; Path=/; HttpOnly; Secure={}; SameSite={}; Max-Age={}",
        session_config.cookie_name, token, session_config.cookie_secure, session_config.cookie_same_site, max_age
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_config, create_test_server};
    use axum::http::StatusCode;
    use serde_json::json;

    fn registration(password: &str) -> serde_json::Value {
        json!({
            "username": "parent",
            "email": "parent@example.com",
            "password": password,
            "display_name": "Parent"
        })
    }

    #[test]
    fn test_session_cookie_format() {
        let config = create_test_config();
        let cookie = create_session_cookie("abc.def.ghi", &config);
        assert!(cookie.starts_with("storyctl_session=abc.def.ghi; Path=/; HttpOnly;"));
        assert!(cookie.contains("Secure=false"));
        assert!(cookie.ends_with("Max-Age=86400"));
    }

    #[test]
    fn test_registration_validation() {
        let request: RegisterRequest = serde_json::from_value(registration("password123")).unwrap();
        assert!(validate_registration(&request).is_ok());

        let request: RegisterRequest = serde_json::from_value(json!({
            "username": "parent",
            "email": "not-an-email",
            "password": "password123"
        }))
        .unwrap();
        assert!(matches!(validate_registration(&request), Err(Error::BadRequest { .. })));

        let request: RegisterRequest = serde_json::from_value(json!({
            "username": "  ",
            "email": "parent@example.com",
            "password": "password123"
        }))
        .unwrap();
        assert!(matches!(validate_registration(&request), Err(Error::BadRequest { .. })));
    }

    #[tokio::test]
    async fn test_register_disabled() {
        let mut config = create_test_config();
        config.auth.native.allow_registration = false;
        let server = create_test_server(config);

        let response = server.post("/authentication/register").json(&registration("password123")).await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_register_rejects_short_password() {
        let server = create_test_server(create_test_config());

        let response = server.post("/authentication/register").json(&registration("short")).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.text().contains("at least 8"));
    }

    #[tokio::test]
    async fn test_login_with_native_auth_disabled() {
        let mut config = create_test_config();
        config.auth.native.enabled = false;
        let server = create_test_server(config);

        let response = server
            .post("/authentication/login")
            .json(&json!({"email": "parent@example.com", "password": "password123"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_with_empty_credentials() {
        let server = create_test_server(create_test_config());

        let response = server
            .post("/authentication/login")
            .json(&json!({"email": "", "password": ""}))
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_clears_cookie() {
        let server = create_test_server(create_test_config());

        let response = server.post("/authentication/logout").await;
        response.assert_status_ok();
        let cookie = response.headers().get("set-cookie").unwrap().to_str().unwrap().to_string();
        assert!(cookie.starts_with("storyctl_session=;"));
        assert!(cookie.contains("Max-Age=0"));
    }
}
