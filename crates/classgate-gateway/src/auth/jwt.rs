//! JWT token management.
//!
//! Access, refresh and invitation tokens are HS256 with the shared secret.
//! Admin tokens are EdDSA with the bootstrap keypair, so the shared secret
//! alone can never mint an admin token.

use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use classgate_core::Config;
use classgate_core::config::MIN_SECRET_LEN;
use classgate_core::types::{Role, new_id};
use ed25519_dalek::SigningKey;
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{EncodePrivateKey, EncodePublicKey};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
};
use serde::{Deserialize, Serialize};

use super::AuthError;

/// Message for tokens rejected only because `exp` has passed.
pub(crate) const TOKEN_EXPIRED: &str = "token expired";

/// Lifetime of admin tokens (100 years).
pub const ADMIN_TOKEN_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// JWT claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID, or invitee email for invitation tokens).
    pub sub: String,
    /// Role carried by the token.
    pub role: Role,
    /// What the token may be used for.
    pub kind: TokenKind,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp).
    pub exp: i64,
    /// Unique token ID.
    #[serde(default)]
    pub jti: String,
}

/// Token kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Short-lived API access.
    Access,
    /// Long-lived, persisted; exchanged for access tokens.
    Refresh,
    /// Single-use registration.
    Invitation,
    /// Bootstrap admin credential (EdDSA-signed).
    Admin,
}

impl TokenKind {
    const fn algorithm(self) -> Algorithm {
        match self {
            Self::Admin => Algorithm::EdDSA,
            Self::Access | Self::Refresh | Self::Invitation => Algorithm::HS256,
        }
    }
}

/// A freshly signed token and its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    /// Encoded JWT.
    pub token: String,
    /// Expiry mirrored from the `exp` claim.
    pub expires_at: DateTime<Utc>,
}

struct AdminKeys {
    /// Absent when only the public key was loaded.
    encoding: Option<EncodingKey>,
    decoding: DecodingKey,
}

/// Issues and validates every token kind.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    admin: RwLock<Option<AdminKeys>>,
}

impl TokenService {
    /// Create a token service with an HS256 secret.
    ///
    /// # Errors
    ///
    /// Returns error if the secret is shorter than [`MIN_SECRET_LEN`] bytes.
    pub fn new(secret: &[u8]) -> Result<Self, AuthError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::Internal(format!(
                "signing secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            admin: RwLock::new(None),
        })
    }

    /// Create a token service from validated config, loading admin keys
    /// when they exist on disk.
    ///
    /// # Errors
    ///
    /// Returns error if the secret is too short or a key file is unreadable.
    pub fn from_config(config: &Config) -> Result<Self, AuthError> {
        let service = Self::new(config.jwt.secret_bytes())?;
        let loaded = service.load_admin_keys(
            &config.admin_private_key_path(),
            &config.admin_public_key_path(),
        )?;
        if !loaded {
            tracing::debug!("No admin keys on disk; admin tokens disabled until bootstrap");
        }
        Ok(service)
    }

    /// Install the admin keypair (PKCS#8 private PEM, SPKI public PEM).
    ///
    /// # Errors
    ///
    /// Returns error if either PEM is not an Ed25519 key.
    pub fn install_admin_keys(&self, private_pem: &[u8], public_pem: &[u8]) -> Result<(), AuthError> {
        self.install(Some(private_pem), public_pem)
    }

    /// Load the admin keypair from disk.
    ///
    /// Returns `false` if the public key file does not exist. A public key
    /// alone is enough to validate admin tokens; issuing needs both.
    ///
    /// # Errors
    ///
    /// Returns error if a present file cannot be read or parsed.
    pub fn load_admin_keys(&self, private_path: &Path, public_path: &Path) -> Result<bool, AuthError> {
        if !public_path.exists() {
            return Ok(false);
        }

        let public_pem = std::fs::read(public_path)
            .map_err(|e| AuthError::Internal(format!("read admin public key: {e}")))?;
        let private_pem = if private_path.exists() {
            Some(
                std::fs::read(private_path)
                    .map_err(|e| AuthError::Internal(format!("read admin private key: {e}")))?,
            )
        } else {
            None
        };

        self.install(private_pem.as_deref(), &public_pem)?;
        tracing::info!(
            public_key = %public_path.display(),
            can_issue = private_pem.is_some(),
            "Loaded admin keys"
        );
        Ok(true)
    }

    /// Whether admin tokens can currently be validated.
    #[must_use]
    pub fn has_admin_keys(&self) -> bool {
        self.read_admin().is_some()
    }

    fn install(&self, private_pem: Option<&[u8]>, public_pem: &[u8]) -> Result<(), AuthError> {
        let encoding = private_pem
            .map(EncodingKey::from_ed_pem)
            .transpose()
            .map_err(|e| AuthError::Internal(format!("invalid admin private key: {e}")))?;
        let decoding = DecodingKey::from_ed_pem(public_pem)
            .map_err(|e| AuthError::Internal(format!("invalid admin public key: {e}")))?;

        *self.admin.write().unwrap_or_else(PoisonError::into_inner) =
            Some(AdminKeys { encoding, decoding });
        Ok(())
    }

    fn read_admin(&self) -> RwLockReadGuard<'_, Option<AdminKeys>> {
        self.admin.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue a token.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if `ttl` is out of range, encoding fails, or an
    /// admin token is requested without an installed admin private key.
    pub fn issue(
        &self,
        subject: &str,
        role: Role,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<IssuedToken, AuthError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| AuthError::Internal("token lifetime out of range".to_string()))?;
        let expires_at = now + ttl;

        let claims = Claims {
            sub: subject.to_string(),
            role,
            kind,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: new_id(),
        };

        let token = self.sign(&claims)?;
        Ok(IssuedToken { token, expires_at })
    }

    /// Sign claims with the scheme their kind requires.
    pub(crate) fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        let header = Header::new(claims.kind.algorithm());

        let result = if claims.kind == TokenKind::Admin {
            let admin = self.read_admin();
            let key = admin
                .as_ref()
                .and_then(|keys| keys.encoding.as_ref())
                .ok_or_else(|| AuthError::Internal("admin signing key not installed".to_string()))?;
            encode(&header, claims, key)
        } else {
            encode(&header, claims, &self.encoding_key)
        };

        result.map_err(|e| AuthError::Internal(format!("token encoding failed: {e}")))
    }

    /// Validate signature and expiry and decode claims.
    ///
    /// Does not check the kind against what the caller expects; callers must
    /// check `claims.kind` themselves.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` if the token is malformed, expired, badly
    /// signed, uses an unsupported algorithm, or its kind does not match
    /// its signing scheme.
    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        let header = decode_header(token).map_err(token_error)?;

        let claims = match header.alg {
            Algorithm::HS256 => {
                decode::<Claims>(token, &self.decoding_key, &strict_validation(Algorithm::HS256))
                    .map_err(token_error)?
                    .claims
            }
            Algorithm::EdDSA => {
                let admin = self.read_admin();
                let keys = admin.as_ref().ok_or_else(|| {
                    AuthError::Unauthorized("admin tokens are not enabled".to_string())
                })?;
                decode::<Claims>(token, &keys.decoding, &strict_validation(Algorithm::EdDSA))
                    .map_err(token_error)?
                    .claims
            }
            other => {
                tracing::debug!(algorithm = ?other, "Rejected token algorithm");
                return Err(AuthError::Unauthorized(
                    "unsupported token algorithm".to_string(),
                ));
            }
        };

        if claims.kind.algorithm() != header.alg {
            return Err(AuthError::Unauthorized(
                "token kind does not match signature".to_string(),
            ));
        }

        Ok(claims)
    }

    /// Extract token from an Authorization header value.
    ///
    /// Expects format: "Bearer <token>"
    #[must_use]
    pub fn extract_bearer(header: &str) -> Option<&str> {
        header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("has_admin_keys", &self.has_admin_keys())
            .finish_non_exhaustive()
    }
}

fn strict_validation(alg: Algorithm) -> Validation {
    let mut validation = Validation::new(alg);
    validation.leeway = 0;
    validation
}

fn token_error(e: jsonwebtoken::errors::Error) -> AuthError {
    match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::Unauthorized(TOKEN_EXPIRED.to_string()),
        _ => {
            tracing::debug!(error = %e, "Token rejected");
            AuthError::Unauthorized("invalid token".to_string())
        }
    }
}

/// Generate a fresh Ed25519 admin keypair as (PKCS#8 private PEM, SPKI public PEM).
///
/// # Errors
///
/// Returns error if PEM encoding fails.
pub(crate) fn generate_admin_keypair() -> Result<(String, String), AuthError> {
    let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);

    let private_pem = signing_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| AuthError::Internal(format!("encode admin private key: {e}")))?;
    let public_pem = signing_key
        .verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| AuthError::Internal(format!("encode admin public key: {e}")))?;

    Ok((private_pem.as_str().to_owned(), public_pem))
}
