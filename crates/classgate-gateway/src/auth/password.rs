//! Password hashing and password policy.

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};

use super::AuthError;

/// One-way password hashing.
pub trait CredentialHasher: Send + Sync {
    /// Hash a password into a self-describing digest.
    ///
    /// # Errors
    ///
    /// Returns error if hashing fails.
    fn hash(&self, password: &str) -> Result<String, AuthError>;

    /// Check a password against a digest. A malformed digest never matches.
    fn verify(&self, password: &str, digest: &str) -> bool;
}

/// Argon2id with a random salt per hash, encoded as a PHC string.
#[derive(Debug, Clone, Copy, Default)]
pub struct Argon2Hasher;

impl Argon2Hasher {
    /// Create a hasher with the argon2 crate's default parameters.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);

        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AuthError::Internal(format!("Password hashing failed: {e}")))
    }

    fn verify(&self, password: &str, digest: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(digest) else {
            return false;
        };

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

/// Password strength rules applied at registration.
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    /// Minimum length in characters.
    pub min_length: usize,
    /// Maximum length in characters.
    pub max_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 128,
        }
    }
}

impl PasswordPolicy {
    /// Validate a password.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Validation` naming the first rule broken.
    pub fn validate(&self, password: &str) -> Result<(), AuthError> {
        let len = password.chars().count();

        if len < self.min_length {
            return Err(AuthError::Validation(format!(
                "password must be at least {} characters",
                self.min_length
            )));
        }

        if len > self.max_length {
            return Err(AuthError::Validation(format!(
                "password must be at most {} characters",
                self.max_length
            )));
        }

        if is_common_password(password) {
            return Err(AuthError::Validation(
                "password is too common".to_string(),
            ));
        }

        let missing = [
            (password.chars().any(char::is_uppercase), "an uppercase letter"),
            (password.chars().any(char::is_lowercase), "a lowercase letter"),
            (password.chars().any(|c| c.is_ascii_digit()), "a digit"),
            (password.chars().any(|c| !c.is_alphanumeric()), "a special character"),
        ]
        .into_iter()
        .find_map(|(present, what)| (!present).then_some(what));

        if let Some(what) = missing {
            return Err(AuthError::Validation(format!(
                "password must contain {what}"
            )));
        }

        Ok(())
    }
}

/// Common password, or a common base with only digits appended.
fn is_common_password(password: &str) -> bool {
    let lower = password.to_lowercase();

    if COMMON_PASSWORDS.contains(&lower.as_str()) {
        return true;
    }

    COMMON_PASSWORDS.iter().any(|common| {
        common.len() >= 4
            && lower
                .strip_prefix(common)
                .is_some_and(|suffix| suffix.chars().all(|c| c.is_ascii_digit()))
    })
}

static COMMON_PASSWORDS: &[&str] = &[
    "123456", "password", "12345678", "qwerty", "123456789", "111111", "1234567890",
    "abc123", "letmein", "monkey", "dragon", "football", "baseball", "iloveyou",
    "trustno1", "sunshine", "master", "welcome", "shadow", "superman", "princess",
    "qwertyuiop", "1qaz2wsx", "qazwsx", "zxcvbnm", "admin", "administrator", "root",
    "changeme", "default", "secret", "login", "guest", "test", "passw0rd", "p@ssw0rd",
    "p@ssword", "p@55w0rd", "pa$$word", "passw0rd!", "password!", "password1!",
    "qwerty!", "qwerty1!", "welcome!", "welcome1!", "letmein!", "admin@123",
    "admin!23", "admin123!", "abc@123", "abcd@1234", "teacher", "student", "school",
    "classroom", "teacher1!", "student1!", "school@123", "summer", "winter",
];
