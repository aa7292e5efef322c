use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session,
    config::Config,
    errors::{Error, Result},
};
use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::{debug, instrument, trace};

/// Extract user from JWT session cookie if present and valid
/// Returns:
/// - None: No JWT cookie present
/// - Some(Ok(user)): Valid JWT found and verified
/// - Some(Err(error)): JWT cookie present but invalid/malformed
#[instrument(skip(parts, config))]
fn try_jwt_session_auth(parts: &Parts, config: &Config) -> Option<Result<CurrentUser>> {
    let cookie_header = parts.headers.get(axum::http::header::COOKIE)?;

    let cookie_str = match cookie_header.to_str() {
        Ok(s) => s,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid cookie header: {e}"),
            }));
        }
    };
    let cookie_name = &config.auth.native.session.cookie_name;

    let mut last_error = None;
    for cookie in cookie_str.split(';') {
        if let Some((name, value)) = cookie.trim().split_once('=')
            && name == cookie_name
        {
            match session::verify_session_token(value, config) {
                Ok(user) => return Some(Ok(user)),
                // Expired tokens are expected; keep looking in case of duplicate cookies
                Err(e) => last_error = Some(e),
            }
        }
    }
    last_error.map(Err)
}

/// Extract user from a session token sent as `Authorization: Bearer <token>`
/// Returns:
/// - None: No Authorization header or not a Bearer token
/// - Some(Ok(user)): Valid token
/// - Some(Err(error)): Bearer token present but invalid
#[instrument(skip(parts, config))]
fn try_bearer_auth(parts: &Parts, config: &Config) -> Option<Result<CurrentUser>> {
    let auth_header = parts.headers.get(axum::http::header::AUTHORIZATION)?;

    let auth_str = match auth_header.to_str() {
        Ok(s) => s,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid authorization header: {e}"),
            }));
        }
    };

    let token = auth_str.strip_prefix("Bearer ")?;
    Some(session::verify_session_token(token.trim(), config))
}

/// Authenticate a request from its headers alone
pub fn authenticate(parts: &Parts, config: &Config) -> Result<CurrentUser> {
    if !config.auth.native.enabled {
        return Err(Error::Unauthenticated {
            message: Some("Authentication is disabled".to_string()),
        });
    }

    let mut auth_errors = Vec::new();

    for (method, attempt) in [
        ("Bearer token", try_bearer_auth(parts, config)),
        ("JWT session", try_jwt_session_auth(parts, config)),
    ] {
        match attempt {
            Some(Ok(user)) => {
                debug!("Found {} authenticated user: {}", method, user.id);
                return Ok(user);
            }
            Some(Err(e)) => {
                trace!("{} authentication failed: {:?}", method, e);
                auth_errors.push((method, e));
            }
            None => trace!("No {} authentication attempted", method),
        }
    }

    if auth_errors.is_empty() {
        trace!("No authentication credentials found in request");
    } else {
        trace!("All authentication attempts failed ({}): {:?}", auth_errors.len(), auth_errors);
    }
    Err(Error::Unauthenticated { message: None })
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        authenticate(parts, &state.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_config;
    use axum::http::{Request, header};
    use uuid::Uuid;

    fn user() -> CurrentUser {
        CurrentUser {
            id: Uuid::new_v4(),
            username: "parent".to_string(),
            email: "parent@example.com".to_string(),
            display_name: None,
        }
    }

    fn parts(headers: &[(header::HeaderName, String)]) -> Parts {
        let mut builder = Request::builder().uri("/api/v1/profiles");
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_cookie_session() {
        let config = create_test_config();
        let user = user();
        let token = session::create_session_token(&user, &config).unwrap();
        let cookie = format!("theme=dark; {}={}", config.auth.native.session.cookie_name, token);

        let authenticated = authenticate(&parts(&[(header::COOKIE, cookie)]), &config).unwrap();
        assert_eq!(authenticated.id, user.id);
    }

    #[test]
    fn test_bearer_token() {
        let config = create_test_config();
        let user = user();
        let token = session::create_session_token(&user, &config).unwrap();

        let authenticated = authenticate(&parts(&[(header::AUTHORIZATION, format!("Bearer {token}"))]), &config).unwrap();
        assert_eq!(authenticated.email, "parent@example.com");
    }

    #[test]
    fn test_invalid_bearer_falls_back_to_cookie() {
        let config = create_test_config();
        let user = user();
        let token = session::create_session_token(&user, &config).unwrap();
        let headers = [
            (header::AUTHORIZATION, "Bearer not-a-jwt".to_string()),
            (header::COOKIE, format!("{}={}", config.auth.native.session.cookie_name, token)),
        ];

        assert_eq!(authenticate(&parts(&headers), &config).unwrap().id, user.id);
    }

    #[test]
    fn test_missing_or_invalid_credentials_are_unauthenticated() {
        let config = create_test_config();
        for headers in [
            vec![],
            vec![(header::AUTHORIZATION, "Basic dXNlcjpwYXNz".to_string())],
            vec![(header::COOKIE, format!("{}=garbage", config.auth.native.session.cookie_name))],
        ] {
            assert!(matches!(
                authenticate(&parts(&headers), &config),
                Err(Error::Unauthenticated { .. })
            ));
        }
    }

    #[test]
    fn test_disabled_native_auth_rejects_valid_tokens() {
        let mut config = create_test_config();
        let token = session::create_session_token(&user(), &config).unwrap();
        config.auth.native.enabled = false;

        let result = authenticate(&parts(&[(header::AUTHORIZATION, format!("Bearer {token}"))]), &config);
        assert!(matches!(result, Err(Error::Unauthenticated { .. })));
    }
}
