use crate::db::errors::DbError;
use crate::metering::UsageDenied;
use crate::payment_providers::PaymentError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// The usage gate refused a story generation, or a plan limit was hit
    #[error(transparent)]
    UsageDenied(#[from] UsageDenied),

    /// Story generation failed after the gate admitted it. Nothing was charged.
    #[error("Story generation failed: {reason}")]
    GenerationFailed { reason: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// Conflict error, e.g. a checkout that was already processed
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Checkout or payment processing failure
    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// Upload exceeds the configured size limit
    #[error("Payload too large: {message}")]
    PayloadTooLarge { message: String },
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::UsageDenied(denied) => denied.status_code(),
            Error::GenerationFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Payment(err) => err.status_code(),
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => {
                format!("{resource} with ID {id} not found")
            }
            Error::UsageDenied(denied) => denied.to_string(),
            Error::GenerationFailed { .. } => "Failed to generate story. You have not been charged.".to_string(),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { constraint, table, .. } => unique_violation_message(table.as_deref(), constraint.as_deref()).0,
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
            Error::Conflict { message } => message.clone(),
            Error::PayloadTooLarge { message } => message.clone(),
            Error::Payment(err) => match err {
                PaymentError::ProviderApi(_) | PaymentError::Database(_) => "Payment processing failed".to_string(),
                other => other.to_string(),
            },
        }
    }
}

/// Map a unique constraint to a user-facing message and the resource it concerns
fn unique_violation_message(table: Option<&str>, constraint: Option<&str>) -> (String, &'static str) {
    match (table, constraint) {
        (Some("users"), Some(c)) if c.contains("email") => ("An account with this email address already exists".to_string(), "user"),
        (Some("users"), Some(c)) if c.contains("username") => ("This username is already taken".to_string(), "user"),
        (Some("photos"), Some("photos_one_primary_per_profile")) => ("This profile already has a primary photo".to_string(), "photo"),
        (Some("billing_events"), Some(_)) => ("This checkout session has already been processed".to_string(), "checkout"),
        _ => ("Resource already exists".to_string(), "unknown"),
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) | Error::GenerationFailed { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::Unauthenticated { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::UsageDenied(_) => {
                tracing::info!("Usage denied: {}", self);
            }
            Error::Payment(PaymentError::ProviderApi(_) | PaymentError::Database(_)) => {
                tracing::error!("Payment processing error: {:#}", self);
            }
            Error::Payment(_) => {
                tracing::info!("Payment error: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } | Error::PayloadTooLarge { .. } => {
                tracing::debug!("Client error: {}", self);
            }
            Error::Conflict { .. } => {
                tracing::warn!("Conflict error: {}", self);
            }
        }

        let status = self.status_code();

        match &self {
            Error::Database(DbError::UniqueViolation { constraint, table, .. }) => {
                let (message, resource) = unique_violation_message(table.as_deref(), constraint.as_deref());
                let body = json!({
                    "message": message,
                    "resource": resource
                });
                (status, axum::response::Json(body)).into_response()
            }
            Error::UsageDenied(denied) => {
                let body = json!({
                    "message": denied.to_string(),
                    "reason": denied.reason(),
                });
                (status, axum::response::Json(body)).into_response()
            }
            _ => {
                let user_message = self.user_message();
                (status, user_message).into_response()
            }
        }
    }
}

/// Convert from String errors (e.g., from external functions)
impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Unauthenticated { message: None }.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            Error::NotFound {
                resource: "Story".to_string(),
                id: "x".to_string()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(Error::Database(DbError::NotFound).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::GenerationFailed {
                reason: "db down".to_string()
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_usage_denials_map_to_billing_statuses() {
        let limit = Error::from(UsageDenied::LimitReached { limit: 3 });
        assert_eq!(limit.status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(limit.user_message(), "Monthly limit of 3 stories reached");

        assert_eq!(Error::from(UsageDenied::PaymentFailed).status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(Error::from(UsageDenied::Cancelled).status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_payment_errors() {
        let unpaid = Error::from(PaymentError::PaymentNotCompleted);
        assert_eq!(unpaid.status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(unpaid.user_message(), "Payment not completed yet");

        let provider = Error::from(PaymentError::ProviderApi("timeout talking to processor".to_string()));
        assert_eq!(provider.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(provider.user_message(), "Payment processing failed");
    }

    #[test]
    fn test_generation_failure_message_does_not_leak_cause() {
        let err = Error::GenerationFailed {
            reason: "connection refused to 10.0.0.3".to_string(),
        };
        assert_eq!(err.user_message(), "Failed to generate story. You have not been charged.");
    }

    #[test]
    fn test_unique_violation_messages() {
        let err = Error::Database(DbError::UniqueViolation {
            constraint: Some("users_email_key".to_string()),
            table: Some("users".to_string()),
            message: "duplicate key".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.user_message(), "An account with this email address already exists");
    }
}
