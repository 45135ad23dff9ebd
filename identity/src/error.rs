//! # Identity Domain Errors
//!
//! The error taxonomy for every operation this crate exposes: authentication
//! failures, validation failures, existence/constraint violations, and the
//! transport/database faults that cross the external-collaborator boundary.
//!
//! This is deliberately **not** [`shared::ApiError`] - see `shared::lib` for
//! why the two stay separate. `IdentityError` implements both
//! `actix_web::ResponseError` and `axum::response::IntoResponse` so a host
//! can propagate it straight out of a handler.
//!
//! ## Enumeration defense
//!
//! Authentication failures are always reported as [`IdentityError::InvalidCredentials`]
//! — never [`IdentityError::UserNotFound`] — so a caller cannot distinguish
//! "wrong password" from "no such user" by error shape alone.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Result alias used throughout this crate's public API.
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Reasons a hook invocation failed, carried by [`IdentityError::HookExecution`].
#[derive(Debug, Clone, Serialize)]
pub struct HookFailure {
    pub hook_name: String,
    pub cause: String,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    // -------------------------------------------------------------------
    // Authorization
    // -------------------------------------------------------------------
    /// Always returned for both "no such user" and "wrong password" - see
    /// module docs on enumeration defense.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account locked until {until}")]
    AccountLocked {
        until: chrono::DateTime<chrono::Utc>,
        reason: String,
    },

    #[error("insufficient permissions")]
    InsufficientPermissions,

    #[error("invalid token")]
    InvalidToken { detail: Option<String> },

    #[error("suspicious token")]
    SuspiciousToken { detail: Option<String> },

    #[error("token replay detected for family {family}")]
    TokenReplayDetected {
        family: Uuid,
        original_token_id: Uuid,
    },

    #[error("account not verified")]
    UnverifiedAccount,

    #[error("user has no roles")]
    UserHasNoRoles,

    // -------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("invalid email: {value}")]
    InvalidEmail { value: String, errors: Vec<String> },

    #[error("invalid phone: {value}")]
    InvalidPhone { value: String, errors: Vec<String> },

    #[error("weak password (score {score})")]
    WeakPassword { score: u8, feedback: Vec<String> },

    #[error("invalid custom attribute {key}")]
    InvalidCustomAttribute { key: String, errors: Vec<String> },

    #[error("invalid input for field {field}")]
    InvalidInput { field: String, errors: Vec<String> },

    // -------------------------------------------------------------------
    // Existence
    // -------------------------------------------------------------------
    #[error("user not found")]
    UserNotFound,

    #[error("role not found: {0}")]
    RoleNotFound(String),

    #[error("profile not found for user {0}")]
    ProfileNotFound(Uuid),

    #[error("update failed for user {0}")]
    UserUpdateFailed(Uuid),

    // -------------------------------------------------------------------
    // Constraint
    // -------------------------------------------------------------------
    #[error("email already exists")]
    EmailAlreadyExists,

    #[error("phone already exists")]
    PhoneAlreadyExists,

    // -------------------------------------------------------------------
    // MFA-specific (rate limiting / challenge lifecycle)
    // -------------------------------------------------------------------
    #[error("rate limit exceeded: {reason}")]
    RateLimitExceeded { reason: String, retry_after_seconds: u64 },

    #[error("cooldown active: {reason}")]
    Cooldown { reason: String, retry_after_seconds: u64 },

    #[error("invalid: {reason}")]
    Invalid { reason: String },

    #[error("expired: {reason}")]
    Expired { reason: String },

    // -------------------------------------------------------------------
    // Database
    // -------------------------------------------------------------------
    #[error("database error: {0}")]
    Database(String),

    // -------------------------------------------------------------------
    // Hook
    // -------------------------------------------------------------------
    #[error("hook execution failed: {message}")]
    HookExecution {
        message: String,
        failures: Vec<HookFailure>,
    },

    // -------------------------------------------------------------------
    // Expansion: transport + unknown realm (see SPEC_FULL §7 expansion)
    // -------------------------------------------------------------------
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unknown realm: {0}")]
    UnknownRealm(String),

    // -------------------------------------------------------------------
    // Unknown
    // -------------------------------------------------------------------
    #[error("internal error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for IdentityError {
    fn from(e: sqlx::Error) -> Self {
        IdentityError::Database(e.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct IdentityErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IdentityError {
    /// Machine-readable error code in SCREAMING_SNAKE_CASE.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::AccountLocked { .. } => "ACCOUNT_LOCKED",
            Self::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            Self::InvalidToken { .. } => "INVALID_TOKEN",
            Self::SuspiciousToken { .. } => "SUSPICIOUS_TOKEN",
            Self::TokenReplayDetected { .. } => "TOKEN_REPLAY_DETECTED",
            Self::UnverifiedAccount => "UNVERIFIED_ACCOUNT",
            Self::UserHasNoRoles => "USER_HAS_NO_ROLES",
            Self::ValidationFailed(_) => "VALIDATION_FAILED",
            Self::InvalidEmail { .. } => "INVALID_EMAIL",
            Self::InvalidPhone { .. } => "INVALID_PHONE",
            Self::WeakPassword { .. } => "WEAK_PASSWORD",
            Self::InvalidCustomAttribute { .. } => "INVALID_CUSTOM_ATTRIBUTE",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::RoleNotFound(_) => "ROLE_NOT_FOUND",
            Self::ProfileNotFound(_) => "PROFILE_NOT_FOUND",
            Self::UserUpdateFailed(_) => "USER_UPDATE_FAILED",
            Self::EmailAlreadyExists => "EMAIL_ALREADY_EXISTS",
            Self::PhoneAlreadyExists => "PHONE_ALREADY_EXISTS",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::Cooldown { .. } => "COOLDOWN",
            Self::Invalid { .. } => "INVALID",
            Self::Expired { .. } => "EXPIRED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::HookExecution { .. } => "HOOK_EXECUTION_FAILED",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::UnknownRealm(_) => "UNKNOWN_REALM",
            Self::Unknown(_) => "UNKNOWN",
        }
    }

    /// Source-of-truth HTTP status mapping, shared by both framework impls.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials
            | Self::AccountLocked { .. }
            | Self::InvalidToken { .. }
            | Self::SuspiciousToken { .. }
            | Self::TokenReplayDetected { .. }
            | Self::UnverifiedAccount => StatusCode::UNAUTHORIZED,
            Self::InsufficientPermissions => StatusCode::FORBIDDEN,
            Self::ValidationFailed(_)
            | Self::InvalidEmail { .. }
            | Self::InvalidPhone { .. }
            | Self::WeakPassword { .. }
            | Self::InvalidCustomAttribute { .. }
            | Self::InvalidInput { .. }
            | Self::UserHasNoRoles
            | Self::Invalid { .. } => StatusCode::BAD_REQUEST,
            Self::UserNotFound
            | Self::RoleNotFound(_)
            | Self::ProfileNotFound(_)
            | Self::UnknownRealm(_) => StatusCode::NOT_FOUND,
            Self::EmailAlreadyExists | Self::PhoneAlreadyExists => StatusCode::CONFLICT,
            Self::RateLimitExceeded { .. } | Self::Cooldown { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::Expired { .. } => StatusCode::GONE,
            Self::Database(_)
            | Self::HookExecution { .. }
            | Self::UserUpdateFailed(_)
            | Self::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded {
                retry_after_seconds,
                ..
            }
            | Self::Cooldown {
                retry_after_seconds,
                ..
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }
}

impl From<&IdentityError> for IdentityErrorResponse {
    fn from(error: &IdentityError) -> Self {
        let details = match error {
            IdentityError::HookExecution { failures, .. } => {
                Some(serde_json::to_value(failures).unwrap_or_default())
            }
            IdentityError::InvalidEmail { errors, .. }
            | IdentityError::InvalidPhone { errors, .. }
            | IdentityError::InvalidCustomAttribute { errors, .. }
            | IdentityError::InvalidInput { errors, .. } => {
                Some(serde_json::json!({ "errors": errors }))
            }
            _ => None,
        };

        Self {
            code: error.error_code().to_string(),
            message: error.to_string(),
            retry_after_seconds: error.retry_after_seconds(),
            details,
        }
    }
}

impl ResponseError for IdentityError {
    fn status_code(&self) -> StatusCode {
        self.status_code()
    }

    fn error_response(&self) -> HttpResponse {
        let response: IdentityErrorResponse = self.into();
        HttpResponse::build(self.status_code()).json(response)
    }
}

impl axum::response::IntoResponse for IdentityError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let axum_status = axum::http::StatusCode::from_u16(status.as_u16())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        let response: IdentityErrorResponse = (&self).into();
        (axum_status, axum::Json(response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_credentials_maps_to_401() {
        assert_eq!(
            IdentityError::InvalidCredentials.status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn constraint_errors_map_to_409() {
        assert_eq!(
            IdentityError::EmailAlreadyExists.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            IdentityError::PhoneAlreadyExists.status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = IdentityError::RateLimitExceeded {
            reason: "too many attempts".into(),
            retry_after_seconds: 30,
        };
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.retry_after_seconds(), Some(30));
    }

    #[test]
    fn error_codes_are_screaming_snake_case() {
        assert_eq!(
            IdentityError::UserNotFound.error_code(),
            "USER_NOT_FOUND"
        );
        assert_eq!(
            IdentityError::TokenReplayDetected {
                family: Uuid::nil(),
                original_token_id: Uuid::nil(),
            }
            .error_code(),
            "TOKEN_REPLAY_DETECTED"
        );
    }
}
