//! Core types used throughout Classgate.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User role for access control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full administrative access.
    Admin,
    /// Teaching staff, supervises students.
    Teacher,
    /// Enrolled student.
    Student,
}

impl Role {
    /// Check if this role has admin privileges.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a role string is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "teacher" => Ok(Self::Teacher),
            "student" => Ok(Self::Student),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// User account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Username for login.
    pub username: String,
    /// Argon2 password hash (stored in DB, not exposed in public API).
    pub password_hash: String,
    /// User role.
    pub role: Role,
    /// Student or teacher row this account belongs to.
    #[serde(default)]
    pub entity_id: Option<String>,
    /// When the user was created.
    pub created_at: DateTime<Utc>,
    /// When the user last logged in.
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    /// Create a new user from an already hashed password.
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        password_hash: impl Into<String>,
        role: Role,
        entity_id: Option<String>,
    ) -> Self {
        Self {
            id: new_id(),
            username: username.into(),
            password_hash: password_hash.into(),
            role,
            entity_id,
            created_at: Utc::now(),
            last_login: None,
        }
    }

    /// Create a safe version of user for API responses (no password hash).
    #[must_use]
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id.clone(),
            username: self.username.clone(),
            role: self.role,
            entity_id: self.entity_id.clone(),
            created_at: self.created_at,
            last_login: self.last_login,
        }
    }
}

/// Public user representation (for API responses).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    /// Unique user ID.
    pub id: String,
    /// Username.
    pub username: String,
    /// User role.
    pub role: Role,
    /// Linked student or teacher row.
    pub entity_id: Option<String>,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// Last login time.
    pub last_login: Option<DateTime<Utc>>,
}

/// Persisted refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    /// Record ID.
    pub id: String,
    /// Owner.
    pub user_id: String,
    /// The signed token string.
    pub token: String,
    /// Expiry mirrored from the token's `exp` claim.
    pub expires_at: DateTime<Utc>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    /// Create a record for a freshly issued refresh token.
    #[must_use]
    pub fn new(user_id: impl Into<String>, token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            user_id: user_id.into(),
            token: token.into(),
            expires_at,
            created_at: Utc::now(),
        }
    }

    /// Whether the record's expiry has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Role-specific placement carried by an invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Enrollment {
    /// Invitee becomes a teacher in a department.
    Teacher {
        /// Department name.
        department: String,
    },
    /// Invitee becomes a student supervised by a teacher.
    Student {
        /// Supervising teacher's entity ID.
        teacher_id: String,
    },
}

impl Enrollment {
    /// Role the invitee receives.
    #[must_use]
    pub const fn role(&self) -> Role {
        match self {
            Self::Teacher { .. } => Role::Teacher,
            Self::Student { .. } => Role::Student,
        }
    }
}

/// Single-use registration invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    /// Record ID.
    pub id: String,
    /// The signed invitation token.
    pub token: String,
    /// Invitee email (also the token subject).
    pub email: String,
    /// Invitee first name.
    pub first_name: String,
    /// Invitee last name.
    pub last_name: String,
    /// Role and role-specific metadata.
    pub enrollment: Enrollment,
    /// Set once registration completes.
    pub used: bool,
    /// When the invitation was created.
    pub created_at: DateTime<Utc>,
    /// When the invitation stops being redeemable.
    pub expires_at: DateTime<Utc>,
}

impl Invitation {
    /// Role the invitee receives.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.enrollment.role()
    }

    /// Whether the invitation's expiry has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Student row created on invitation completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    /// Entity ID.
    pub id: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Contact email.
    pub email: String,
    /// Supervising teacher's entity ID.
    pub teacher_id: String,
    /// When created.
    pub created_at: DateTime<Utc>,
}

/// Teacher row created on invitation completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Teacher {
    /// Entity ID.
    pub id: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Contact email.
    pub email: String,
    /// Department name.
    pub department: String,
    /// When created.
    pub created_at: DateTime<Utc>,
}

/// Generate a new random identifier (UUID v4).
#[must_use]
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
