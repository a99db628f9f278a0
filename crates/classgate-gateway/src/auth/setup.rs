//! First-run setup and bootstrap management.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use classgate_core::{Role, SessionStore, StoreError, User};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::AuthError;
use super::jwt::{ADMIN_TOKEN_TTL, TokenKind, TokenService, generate_admin_keypair};
use super::password::CredentialHasher;

/// Username of the bootstrap admin.
pub const ADMIN_USERNAME: &str = "admin";

/// Setup status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupStatus {
    /// Whether the bootstrap admin exists.
    pub initialized: bool,
}

/// Outcome of a successful bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapResult {
    /// Admin token (EdDSA, effectively non-expiring).
    pub admin_token: String,
    /// Where the admin verification key was written.
    pub public_key_path: PathBuf,
}

/// One-time creation of the admin account and its signing keys.
pub struct BootstrapService {
    store: Arc<dyn SessionStore>,
    tokens: Arc<TokenService>,
    hasher: Arc<dyn CredentialHasher>,
    private_key_path: PathBuf,
    public_key_path: PathBuf,
    /// Serializes concurrent bootstrap attempts.
    lock: Mutex<()>,
}

impl BootstrapService {
    /// Create a bootstrap service writing keys to the given paths.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        tokens: Arc<TokenService>,
        hasher: Arc<dyn CredentialHasher>,
        private_key_path: PathBuf,
        public_key_path: PathBuf,
    ) -> Self {
        Self {
            store,
            tokens,
            hasher,
            private_key_path,
            public_key_path,
            lock: Mutex::new(()),
        }
    }

    /// Get setup status.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn status(&self) -> Result<SetupStatus, AuthError> {
        Ok(SetupStatus {
            initialized: self.store.get_user_by_username(ADMIN_USERNAME)?.is_some(),
        })
    }

    /// Create the admin account, its Ed25519 keypair, and an admin token.
    ///
    /// The private key is written to disk and installed in the token
    /// service but never returned.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the system is already initialized, or
    /// `Internal` if keys cannot be generated or written.
    pub fn initialize_admin(&self) -> Result<BootstrapResult, AuthError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        if self.status()?.initialized {
            return Err(already_initialized());
        }

        let (private_pem, public_pem) = generate_admin_keypair()?;
        write_key(&self.private_key_path, &private_pem, 0o600)?;
        write_key(&self.public_key_path, &public_pem, 0o644)?;
        self.tokens
            .install_admin_keys(private_pem.as_bytes(), public_pem.as_bytes())?;

        let admin = User::new(ADMIN_USERNAME, self.unusable_digest()?, Role::Admin, None);
        self.store.create_user(&admin).map_err(|e| match e {
            StoreError::Conflict(_) => already_initialized(),
            other => other.into(),
        })?;

        let issued = self
            .tokens
            .issue(&admin.id, Role::Admin, TokenKind::Admin, ADMIN_TOKEN_TTL)?;

        tracing::info!(
            user_id = %admin.id,
            public_key = %self.public_key_path.display(),
            "Admin bootstrap complete"
        );

        Ok(BootstrapResult {
            admin_token: issued.token,
            public_key_path: self.public_key_path.clone(),
        })
    }

    /// Digest of a random password nobody knows.
    fn unusable_digest(&self) -> Result<String, AuthError> {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        self.hasher.hash(&hex::encode(bytes))
    }
}

impl std::fmt::Debug for BootstrapService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapService")
            .field("public_key_path", &self.public_key_path)
            .finish_non_exhaustive()
    }
}

fn already_initialized() -> AuthError {
    AuthError::Conflict("system already initialized".to_string())
}

#[cfg_attr(not(unix), allow(unused_variables))]
fn write_key(path: &Path, pem: &str, mode: u32) -> Result<(), AuthError> {
    let io_error = |e: std::io::Error| {
        AuthError::Internal(format!("write {}: {e}", path.display()))
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    std::fs::write(path, pem).map_err(io_error)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(io_error)?;
    }

    Ok(())
}
