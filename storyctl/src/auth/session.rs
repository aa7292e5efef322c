//! Signed session tokens for logged-in parents.
//!
//! A token is an HS256 JWT keyed by `secret_key`, issued by `storyctl` and carrying enough of
//! the account to build a [`CurrentUser`] without a database round trip.

use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use crate::{api::models::users::CurrentUser, config::Config, errors::Error, types::UserId};

const ISSUER: &str = "storyctl";

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: UserId,
    iss: String,
    email: String,
    username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    iat: i64,
    exp: i64,
}

impl SessionClaims {
    fn issue(user: &CurrentUser, issued_at: DateTime<Utc>, config: &Config) -> Self {
        Self {
            sub: user.id,
            iss: ISSUER.to_string(),
            email: user.email.clone(),
            username: user.username.clone(),
            name: user.display_name.clone(),
            iat: issued_at.timestamp(),
            exp: (issued_at + config.auth.security.jwt_expiry).timestamp(),
        }
    }
}

impl From<SessionClaims> for CurrentUser {
    fn from(claims: SessionClaims) -> Self {
        Self {
            id: claims.sub,
            email: claims.email,
            username: claims.username,
            display_name: claims.name,
        }
    }
}

fn secret(config: &Config) -> Result<&[u8], Error> {
    config
        .secret_key
        .as_deref()
        .map(str::as_bytes)
        .ok_or_else(|| Error::Internal {
            operation: "sign sessions: secret_key is not configured".to_string(),
        })
}

/// Sign a session token for `user`, valid for `auth.security.jwt_expiry`
pub fn create_session_token(user: &CurrentUser, config: &Config) -> Result<String, Error> {
    let claims = SessionClaims::issue(user, Utc::now(), config);
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret(config)?)).map_err(|e| Error::Internal {
        operation: format!("sign session token: {e}"),
    })
}

/// Check signature, issuer and expiry, then rebuild the caller from the claims.
///
/// Anything wrong with the token itself is a 401. Key or serialization trouble on our side is a
/// 500.
pub fn verify_session_token(token: &str, config: &Config) -> Result<CurrentUser, Error> {
    let mut validation = Validation::default();
    validation.set_issuer(&[ISSUER]);
    validation.set_required_spec_claims(&["exp", "iss", "sub"]);

    let data = decode::<SessionClaims>(token, &DecodingKey::from_secret(secret(config)?), &validation).map_err(|e| {
        match e.kind() {
            ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::RsaFailedSigning
            | ErrorKind::InvalidKeyFormat
            | ErrorKind::Crypto(_) => Error::Internal {
                operation: format!("verify session token: {e}"),
            },
            _ => Error::Unauthenticated { message: None },
        }
    })?;

    Ok(data.claims.into())
}
