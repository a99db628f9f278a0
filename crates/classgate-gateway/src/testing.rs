//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::time::Duration;

use classgate_core::{Role, SessionStore, SledStore, User};

use crate::auth::{Argon2Hasher, AuthService, CredentialHasher, TokenService};

pub const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
pub const PASSWORD: &str = "Correct-Horse-9";

pub fn store() -> Arc<SledStore> {
    Arc::new(SledStore::temporary().unwrap())
}

pub fn tokens() -> Arc<TokenService> {
    Arc::new(TokenService::new(SECRET).unwrap())
}

pub fn tokens_with_admin_keys() -> Arc<TokenService> {
    let tokens = tokens();
    let (private_pem, public_pem) = crate::auth::generate_admin_keypair().unwrap();
    tokens
        .install_admin_keys(private_pem.as_bytes(), public_pem.as_bytes())
        .unwrap();
    tokens
}

pub fn auth_service(store: Arc<SledStore>, tokens: Arc<TokenService>) -> AuthService {
    AuthService::new(
        store,
        tokens,
        Arc::new(Argon2Hasher::new()),
        Duration::from_secs(3600),
        Duration::from_secs(720 * 3600),
    )
    .unwrap()
}

/// Create a user whose password is [`PASSWORD`].
pub fn seed_user(store: &SledStore, username: &str, role: Role) -> User {
    let digest = Argon2Hasher::new().hash(PASSWORD).unwrap();
    let user = User::new(username, digest, role, None);
    store.create_user(&user).unwrap();
    user
}
