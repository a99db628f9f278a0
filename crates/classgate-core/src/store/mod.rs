//! Persistence contract for users, sessions and invitations.
//!
//! Services depend on [`SessionStore`] only. Multi-write operations go
//! through [`SessionStore::transaction`]: the closure receives a
//! [`StoreTx`] and either every write it makes commits, or none do.

mod sled_store;

pub use sled_store::SledStore;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{Invitation, RefreshToken, Student, Teacher, User};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Unique constraint violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Writes available inside a transaction.
///
/// Implementations must make every call visible only once the surrounding
/// transaction commits.
pub trait StoreTx {
    /// Insert a student row.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    fn create_student(&self, student: &Student) -> Result<(), StoreError>;

    /// Insert a teacher row.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    fn create_teacher(&self, teacher: &Teacher) -> Result<(), StoreError>;

    /// Insert a user.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the username is taken.
    fn create_user(&self, user: &User) -> Result<(), StoreError>;

    /// Flip an invitation to used.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if it does not exist and
    /// `StoreError::Conflict` if it was already used.
    fn mark_invitation_used(&self, invitation_id: &str) -> Result<(), StoreError>;
}

/// Transaction body. May be run more than once if the store retries on
/// write conflicts, so it must not have side effects outside `tx`.
pub type TxOps<'a> = &'a dyn Fn(&dyn StoreTx) -> Result<(), StoreError>;

/// Persistence required by the auth services.
pub trait SessionStore: Send + Sync {
    /// Insert a user outside of a transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the username is taken.
    fn create_user(&self, user: &User) -> Result<(), StoreError>;

    /// Get a user by ID.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn get_user(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// Get a user by username.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// Record a successful login.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user does not exist.
    fn update_last_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Persist a refresh token.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn create_refresh_token(&self, record: &RefreshToken) -> Result<(), StoreError>;

    /// Look up a refresh token by its token string.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>, StoreError>;

    /// Delete one refresh token. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn delete_refresh_token(&self, token: &str) -> Result<bool, StoreError>;

    /// Delete every refresh token owned by a user. Returns how many.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn delete_refresh_tokens_for_user(&self, user_id: &str) -> Result<usize, StoreError>;

    /// Persist a new invitation.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn create_invitation(&self, invitation: &Invitation) -> Result<(), StoreError>;

    /// Look up an invitation by its token string.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn get_invitation_by_token(&self, token: &str) -> Result<Option<Invitation>, StoreError>;

    /// Get a student row.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn get_student(&self, id: &str) -> Result<Option<Student>, StoreError>;

    /// Get a teacher row.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn get_teacher(&self, id: &str) -> Result<Option<Teacher>, StoreError>;

    /// Run `ops` atomically: all of its writes commit, or none do.
    ///
    /// # Errors
    ///
    /// Returns the error `ops` aborted with, or a storage error.
    fn transaction(&self, ops: TxOps<'_>) -> Result<(), StoreError>;
}
