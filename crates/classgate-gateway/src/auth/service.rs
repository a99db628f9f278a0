//! Login, refresh and logout.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use classgate_core::{PublicUser, RefreshToken, Role, SessionStore};
use serde::{Deserialize, Serialize};

use super::jwt::{Claims, TokenKind, TokenService};
use super::password::CredentialHasher;
use super::AuthError;

/// Successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Access token.
    pub access_token: String,
    /// Refresh token.
    pub refresh_token: String,
    /// Always "Bearer".
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    /// Role of the logged-in user.
    pub role: Role,
    /// ID of the logged-in user.
    pub user_id: String,
}

/// Result of a refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    /// New access token.
    pub access_token: String,
    /// The refresh token that was presented.
    pub refresh_token: String,
    /// Always "Bearer".
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

/// Credential login and session management.
pub struct AuthService {
    store: Arc<dyn SessionStore>,
    tokens: Arc<TokenService>,
    hasher: Arc<dyn CredentialHasher>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    /// Verified against when the username does not exist.
    dummy_digest: String,
}

impl AuthService {
    /// Create the service.
    ///
    /// # Errors
    ///
    /// Returns error if the hasher cannot produce the placeholder digest.
    pub fn new(
        store: Arc<dyn SessionStore>,
        tokens: Arc<TokenService>,
        hasher: Arc<dyn CredentialHasher>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<Self, AuthError> {
        let dummy_digest = hasher.hash(&classgate_core::types::new_id())?;

        Ok(Self {
            store,
            tokens,
            hasher,
            access_ttl,
            refresh_ttl,
            dummy_digest,
        })
    }

    /// Authenticate with username and password.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized("invalid credentials")` for an unknown user
    /// and for a wrong password alike.
    pub fn login(&self, username: &str, password: &str) -> Result<LoginResponse, AuthError> {
        let Some(user) = self.store.get_user_by_username(username)? else {
            let _ = self.hasher.verify(password, &self.dummy_digest);
            tracing::info!(username = %username, "Login failed");
            return Err(AuthError::invalid_credentials());
        };

        if !self.hasher.verify(password, &user.password_hash) {
            tracing::info!(username = %username, "Login failed");
            return Err(AuthError::invalid_credentials());
        }

        let access = self
            .tokens
            .issue(&user.id, user.role, TokenKind::Access, self.access_ttl)?;
        let refresh = self
            .tokens
            .issue(&user.id, user.role, TokenKind::Refresh, self.refresh_ttl)?;

        self.store.create_refresh_token(&RefreshToken::new(
            &user.id,
            &refresh.token,
            refresh.expires_at,
        ))?;

        if let Err(e) = self.store.update_last_login(&user.id, Utc::now()) {
            tracing::warn!(user_id = %user.id, error = %e, "Failed to record last login");
        }

        tracing::info!(username = %user.username, role = %user.role, "User logged in");

        Ok(LoginResponse {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.as_secs(),
            role: user.role,
            user_id: user.id,
        })
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// The refresh token is not rotated: the same string comes back.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` if the token is invalid, not a refresh token,
    /// unknown to the store, or expired.
    pub fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = match self.tokens.validate(refresh_token) {
            Ok(claims) => claims,
            Err(e) => {
                if e.is_token_expired() {
                    self.discard_refresh_token(refresh_token);
                }
                return Err(e);
            }
        };
        if claims.kind != TokenKind::Refresh {
            return Err(AuthError::invalid_token_type());
        }

        let Some(record) = self.store.get_refresh_token(refresh_token)? else {
            return Err(AuthError::Unauthorized(
                "refresh token revoked".to_string(),
            ));
        };

        if record.is_expired() {
            self.discard_refresh_token(refresh_token);
            return Err(AuthError::Unauthorized(
                "refresh token expired".to_string(),
            ));
        }

        if record.user_id != claims.sub {
            return Err(AuthError::Unauthorized("invalid token".to_string()));
        }

        let user = self
            .store
            .get_user(&claims.sub)?
            .ok_or_else(|| AuthError::Unauthorized("invalid token".to_string()))?;

        let access = self
            .tokens
            .issue(&user.id, user.role, TokenKind::Access, self.access_ttl)?;

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: record.token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.as_secs(),
        })
    }

    /// Drop an expired refresh record; failures are logged, not returned.
    fn discard_refresh_token(&self, refresh_token: &str) {
        match self.store.delete_refresh_token(refresh_token) {
            Ok(true) => tracing::debug!("Removed expired refresh token"),
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to delete expired refresh token"),
        }
    }

    /// Revoke every refresh token of a user. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn logout(&self, user_id: &str) -> Result<usize, AuthError> {
        let revoked = self.store.delete_refresh_tokens_for_user(user_id)?;
        tracing::info!(user_id = %user_id, revoked, "User logged out");
        Ok(revoked)
    }

    /// Validate a token presented for API access.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` unless the token is a valid access or admin token.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.tokens.validate(token)?;

        match claims.kind {
            TokenKind::Access | TokenKind::Admin => Ok(claims),
            TokenKind::Refresh | TokenKind::Invitation => Err(AuthError::invalid_token_type()),
        }
    }

    /// Public profile of a user.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the user does not exist.
    pub fn current_user(&self, user_id: &str) -> Result<PublicUser, AuthError> {
        self.store
            .get_user(user_id)?
            .map(|user| user.to_public())
            .ok_or_else(|| AuthError::NotFound(format!("user {user_id}")))
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, PASSWORD};

    #[test]
    fn test_login_success() {
        let store = testing::store();
        let user = testing::seed_user(&store, "alice", Role::Teacher);
        let service = testing::auth_service(store.clone(), testing::tokens());

        let response = service.login("alice", PASSWORD).unwrap();
        assert!(!response.access_token.is_empty());
        assert!(!response.refresh_token.is_empty());
        assert!(response.expires_in > 0);
        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.role, Role::Teacher);
        assert_eq!(response.user_id, user.id);

        let stored = store.get_user(&user.id).unwrap().unwrap();
        assert!(stored.last_login.is_some());
        assert!(store.get_refresh_token(&response.refresh_token).unwrap().is_some());
    }

    #[test]
    fn test_login_failures_are_indistinguishable() {
        let store = testing::store();
        testing::seed_user(&store, "alice", Role::Student);
        let service = testing::auth_service(store, testing::tokens());

        let wrong_password = service.login("alice", "Wrong-Passw0rd!").unwrap_err();
        let no_such_user = service.login("mallory", PASSWORD).unwrap_err();

        assert_eq!(wrong_password.to_string(), no_such_user.to_string());
        assert!(matches!(wrong_password, AuthError::Unauthorized(_)));
        assert!(matches!(no_such_user, AuthError::Unauthorized(_)));
    }

    #[test]
    fn test_refresh_keeps_refresh_token() {
        let store = testing::store();
        let tokens = testing::tokens();
        testing::seed_user(&store, "alice", Role::Student);
        let service = testing::auth_service(store, tokens.clone());

        let login = service.login("alice", PASSWORD).unwrap();
        let pair = service.refresh_access_token(&login.refresh_token).unwrap();

        assert_eq!(pair.refresh_token, login.refresh_token);
        let claims = tokens.validate(&pair.access_token).unwrap();
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.sub, login.user_id);
    }

    #[test]
    fn test_refresh_rejects_other_kinds() {
        let store = testing::store();
        let tokens = testing::tokens_with_admin_keys();
        let user = testing::seed_user(&store, "alice", Role::Student);
        let service = testing::auth_service(store, tokens.clone());

        let hour = Duration::from_secs(3600);
        for kind in [TokenKind::Access, TokenKind::Invitation, TokenKind::Admin] {
            let issued = tokens.issue(&user.id, user.role, kind, hour).unwrap();
            let err = service.refresh_access_token(&issued.token).unwrap_err();
            assert!(
                matches!(&err, AuthError::Unauthorized(msg) if msg == "invalid token type"),
                "{kind:?}: {err}"
            );
        }
    }

    #[test]
    fn test_refresh_requires_stored_record() {
        let store = testing::store();
        let tokens = testing::tokens();
        let user = testing::seed_user(&store, "alice", Role::Student);
        let service = testing::auth_service(store, tokens.clone());

        let unsaved = tokens
            .issue(&user.id, user.role, TokenKind::Refresh, Duration::from_secs(3600))
            .unwrap();
        assert!(matches!(
            service.refresh_access_token(&unsaved.token),
            Err(AuthError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_expired_record_is_deleted() {
        let store = testing::store();
        let tokens = testing::tokens();
        let user = testing::seed_user(&store, "alice", Role::Student);
        let service = testing::auth_service(store.clone(), tokens.clone());

        let issued = tokens
            .issue(&user.id, user.role, TokenKind::Refresh, Duration::from_secs(3600))
            .unwrap();
        let stale = RefreshToken::new(
            &user.id,
            &issued.token,
            Utc::now() - chrono::Duration::seconds(1),
        );
        store.create_refresh_token(&stale).unwrap();

        let err = service.refresh_access_token(&issued.token).unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized(msg) if msg == "refresh token expired"));
        assert!(store.get_refresh_token(&issued.token).unwrap().is_none());
    }

    #[test]
    fn test_signature_expired_record_is_deleted() {
        let store = testing::store();
        let tokens = testing::tokens();
        let user = testing::seed_user(&store, "alice", Role::Student);
        let service = testing::auth_service(store.clone(), tokens.clone());

        let now = Utc::now();
        let token = tokens
            .sign(&Claims {
                sub: user.id.clone(),
                role: user.role,
                kind: TokenKind::Refresh,
                iat: (now - chrono::Duration::hours(2)).timestamp(),
                exp: (now - chrono::Duration::hours(1)).timestamp(),
                jti: "stale".to_string(),
            })
            .unwrap();
        store
            .create_refresh_token(&RefreshToken::new(
                &user.id,
                &token,
                now - chrono::Duration::hours(1),
            ))
            .unwrap();

        let err = service.refresh_access_token(&token).unwrap_err();
        assert!(err.is_token_expired(), "{err}");
        assert!(store.get_refresh_token(&token).unwrap().is_none());
    }

    #[test]
    fn test_logout_revokes_all_sessions() {
        let store = testing::store();
        testing::seed_user(&store, "alice", Role::Teacher);
        let service = testing::auth_service(store, testing::tokens());

        let first = service.login("alice", PASSWORD).unwrap();
        let second = service.login("alice", PASSWORD).unwrap();

        assert_eq!(service.logout(&first.user_id).unwrap(), 2);

        for refresh in [first.refresh_token, second.refresh_token] {
            assert!(service.refresh_access_token(&refresh).is_err());
        }
        assert_eq!(service.logout(&first.user_id).unwrap(), 0);
    }

    #[test]
    fn test_validate_token_kinds() {
        let store = testing::store();
        let tokens = testing::tokens_with_admin_keys();
        let service = testing::auth_service(store, tokens.clone());
        let hour = Duration::from_secs(3600);

        for (kind, accepted) in [
            (TokenKind::Access, true),
            (TokenKind::Admin, true),
            (TokenKind::Refresh, false),
            (TokenKind::Invitation, false),
        ] {
            let issued = tokens.issue("u1", Role::Admin, kind, hour).unwrap();
            assert_eq!(service.validate_token(&issued.token).is_ok(), accepted, "{kind:?}");
        }
    }

    #[test]
    fn test_current_user() {
        let store = testing::store();
        let user = testing::seed_user(&store, "alice", Role::Student);
        let service = testing::auth_service(store, testing::tokens());

        assert_eq!(service.current_user(&user.id).unwrap(), user.to_public());
        assert!(matches!(
            service.current_user("missing"),
            Err(AuthError::NotFound(_))
        ));
    }
}
