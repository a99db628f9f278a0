//! Authentication and authorization for the gateway.
//!
//! This module provides:
//! - JWT issuance and validation for access, refresh, invitation and admin tokens
//! - Password hashing and password policy
//! - Login, refresh and logout
//! - Invitation-based onboarding
//! - First-run admin bootstrap
//! - Auth and role middleware for protected routes

mod invitations;
mod jwt;
mod middleware;
mod password;
mod service;
/// First-run setup and bootstrap management.
pub mod setup;

pub use invitations::{
    CompleteInvitationRequest, CreateInvitationRequest, InvitationCreated, InvitationDetails,
    InvitationService,
};
pub(crate) use jwt::generate_admin_keypair;
pub use jwt::{ADMIN_TOKEN_TTL, Claims, IssuedToken, TokenKind, TokenService};
pub use middleware::{
    CurrentIdentity, Identity, MaybeIdentity, OwnershipGuard, RoleGuard, optional_auth,
    require_auth, require_ownership, require_role,
};
pub use password::{Argon2Hasher, CredentialHasher, PasswordPolicy};
pub use service::{AuthService, LoginResponse, TokenPair};
pub use setup::{BootstrapResult, BootstrapService, SetupStatus};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use classgate_core::StoreError;
use serde::Serialize;
use thiserror::Error;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Bad credentials, or an invalid, expired or wrong-kind token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Role or ownership denial.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Duplicate username, or the system is already initialized.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed request fields or a weak password.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Request refers to something in the wrong state (used or expired invitation).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Missing user or invitation.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unexpected failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Shorthand for the login failure shared by every cause.
    #[must_use]
    pub fn invalid_credentials() -> Self {
        Self::Unauthorized("invalid credentials".to_string())
    }

    /// Shorthand for a token of the wrong kind.
    #[must_use]
    pub fn invalid_token_type() -> Self {
        Self::Unauthorized("invalid token type".to_string())
    }

    /// Whether a token was well formed and correctly signed but past `exp`.
    pub(crate) fn is_token_expired(&self) -> bool {
        matches!(self, Self::Unauthorized(msg) if msg == jwt::TOKEN_EXPIRED)
    }

    const fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::NotFound(msg) => Self::NotFound(msg),
            StoreError::Storage(_) | StoreError::Serialization(_) => {
                tracing::error!(error = %e, "Store failure");
                Self::Internal("storage failure".to_string())
            }
        }
    }
}

/// Error response for auth failures.
#[derive(Debug, Serialize)]
struct AuthErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let error = match &self {
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error");
                "Internal error".to_string()
            }
            other => other.to_string(),
        };

        let body = AuthErrorResponse { error, code };

        (status, Json(body)).into_response()
    }
}
