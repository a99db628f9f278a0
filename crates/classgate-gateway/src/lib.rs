//! # Classgate Gateway
//!
//! HTTP gateway for the Classgate auth core: token issuing, invitation
//! onboarding, admin bootstrap, route guards and per-identity rate limits.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Authentication and authorization.
pub mod auth;
/// Per-identity rate limiting.
pub mod rate_limit;
mod server;

#[cfg(test)]
mod testing;

pub use auth::{
    AuthError, AuthService, BootstrapService, Claims, Identity, InvitationService, TokenKind,
    TokenService,
};
pub use rate_limit::{IdentityRateLimiter, RateLimitState, RoleQuotas};
pub use server::{AppState, Gateway, shutdown_signal};

use classgate_core::Config;

/// Start the gateway server and run until Ctrl-C.
///
/// # Errors
///
/// Returns error if server fails to start.
pub async fn start(config: Config) -> Result<(), GatewayError> {
    let gateway = Gateway::new(config)?;
    gateway.run(shutdown_signal()).await
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Server error.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
