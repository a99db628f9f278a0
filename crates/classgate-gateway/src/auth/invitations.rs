//! Invitation-based onboarding.
//!
//! An admin creates an invitation for a teacher or student; the invitee
//! opens the link, picks a username and password, and completion creates
//! the user, the teacher/student row and marks the invitation used in one
//! store transaction.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use classgate_core::types::new_id;
use classgate_core::{
    Enrollment, Invitation, PublicUser, Role, SessionStore, StoreTx, Student, Teacher, User,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::jwt::{TokenKind, TokenService};
use super::password::{CredentialHasher, PasswordPolicy};
use super::AuthError;

/// Admin request to invite someone.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateInvitationRequest {
    /// Invitee email.
    #[validate(email)]
    pub email: String,
    /// Invitee first name.
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    /// Invitee last name.
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    /// Teacher or student.
    pub role: Role,
    /// Required for teachers.
    #[serde(default)]
    pub department: Option<String>,
    /// Required for students: supervising teacher's entity ID.
    #[serde(default)]
    pub teacher_id: Option<String>,
}

impl CreateInvitationRequest {
    fn enrollment(&self) -> Result<Enrollment, AuthError> {
        let present = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        match self.role {
            Role::Teacher => present(&self.department)
                .map(|department| Enrollment::Teacher { department })
                .ok_or_else(|| {
                    AuthError::Validation("department is required for teachers".to_string())
                }),
            Role::Student => present(&self.teacher_id)
                .map(|teacher_id| Enrollment::Student { teacher_id })
                .ok_or_else(|| {
                    AuthError::Validation("teacher_id is required for students".to_string())
                }),
            Role::Admin => Err(AuthError::Validation(
                "invitations are only for teachers and students".to_string(),
            )),
        }
    }
}

/// A created invitation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationCreated {
    /// Invitation token.
    pub token: String,
    /// Registration link to send to the invitee.
    pub link: String,
    /// When the invitation stops being redeemable.
    pub expires_at: DateTime<Utc>,
}

/// What an invitee sees before registering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationDetails {
    /// Invitee email.
    pub email: String,
    /// Invitee first name.
    pub first_name: String,
    /// Invitee last name.
    pub last_name: String,
    /// Role the invitee will get.
    pub role: Role,
    /// Department, for teachers.
    pub department: Option<String>,
    /// Supervising teacher, for students.
    pub teacher_id: Option<String>,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
}

impl From<&Invitation> for InvitationDetails {
    fn from(invitation: &Invitation) -> Self {
        let (department, teacher_id) = match &invitation.enrollment {
            Enrollment::Teacher { department } => (Some(department.clone()), None),
            Enrollment::Student { teacher_id } => (None, Some(teacher_id.clone())),
        };

        Self {
            email: invitation.email.clone(),
            first_name: invitation.first_name.clone(),
            last_name: invitation.last_name.clone(),
            role: invitation.role(),
            department,
            teacher_id,
            expires_at: invitation.expires_at,
        }
    }
}

/// Invitee's chosen credentials.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CompleteInvitationRequest {
    /// Desired username.
    #[validate(length(min = 3, max = 64))]
    pub username: String,
    /// Desired password.
    pub password: String,
}

/// Creates and redeems invitations.
pub struct InvitationService {
    store: Arc<dyn SessionStore>,
    tokens: Arc<TokenService>,
    hasher: Arc<dyn CredentialHasher>,
    policy: PasswordPolicy,
    ttl: Duration,
    base_url: String,
}

impl InvitationService {
    /// Create the service.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        tokens: Arc<TokenService>,
        hasher: Arc<dyn CredentialHasher>,
        ttl: Duration,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            tokens,
            hasher,
            policy: PasswordPolicy::default(),
            ttl,
            base_url: base_url.into(),
        }
    }

    /// Replace the password policy.
    #[must_use]
    pub fn with_policy(mut self, policy: PasswordPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Create an invitation.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for bad fields, an admin role, or missing
    /// role-specific metadata.
    pub fn create_invitation(
        &self,
        request: &CreateInvitationRequest,
    ) -> Result<InvitationCreated, AuthError> {
        request.validate().map_err(validation_error)?;
        for (field, value) in [
            ("first_name", &request.first_name),
            ("last_name", &request.last_name),
        ] {
            if value.trim().is_empty() {
                return Err(AuthError::Validation(format!("{field} cannot be blank")));
            }
        }
        let enrollment = request.enrollment()?;
        let role = enrollment.role();

        let issued = self
            .tokens
            .issue(&request.email, role, TokenKind::Invitation, self.ttl)?;

        let invitation = Invitation {
            id: new_id(),
            token: issued.token.clone(),
            email: request.email.clone(),
            first_name: request.first_name.trim().to_string(),
            last_name: request.last_name.trim().to_string(),
            enrollment,
            used: false,
            created_at: Utc::now(),
            expires_at: issued.expires_at,
        };
        self.store.create_invitation(&invitation)?;

        tracing::info!(
            invitation_id = %invitation.id,
            email = %invitation.email,
            role = %role,
            "Invitation created"
        );

        Ok(InvitationCreated {
            link: format!(
                "{}/invite/{}",
                self.base_url.trim_end_matches('/'),
                issued.token
            ),
            token: issued.token,
            expires_at: issued.expires_at,
        })
    }

    /// Look up an invitation for display.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` for a bad token, `NotFound` if there is no
    /// record, and `BadRequest` if it was used or has expired.
    pub fn get_invitation_details(&self, token: &str) -> Result<InvitationDetails, AuthError> {
        let claims = self.tokens.validate(token)?;
        if claims.kind != TokenKind::Invitation {
            return Err(AuthError::invalid_token_type());
        }

        let invitation = self.find(token)?;
        ensure_redeemable(&invitation)?;

        Ok(InvitationDetails::from(&invitation))
    }

    /// Redeem an invitation, creating the account.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `BadRequest` (used or expired), `Unauthorized`
    /// (bad token), `Conflict` (username taken), or `Validation` (username
    /// shape or weak password). Nothing is written unless everything succeeds.
    pub fn complete_invitation(
        &self,
        token: &str,
        request: &CompleteInvitationRequest,
    ) -> Result<PublicUser, AuthError> {
        let invitation = self.find(token)?;
        ensure_redeemable(&invitation)?;

        let claims = self.tokens.validate(token)?;
        if claims.kind != TokenKind::Invitation {
            return Err(AuthError::invalid_token_type());
        }

        if self.store.get_user_by_username(&request.username)?.is_some() {
            return Err(AuthError::Conflict(format!(
                "username {} is already taken",
                request.username
            )));
        }

        request.validate().map_err(validation_error)?;
        self.policy.validate(&request.password)?;

        let digest = self.hasher.hash(&request.password)?;
        let entity_id = new_id();
        let now = Utc::now();
        let user = User::new(
            request.username.as_str(),
            digest,
            invitation.role(),
            Some(entity_id.clone()),
        );

        let entity = match &invitation.enrollment {
            Enrollment::Teacher { department } => Entity::Teacher(Teacher {
                id: entity_id,
                first_name: invitation.first_name.clone(),
                last_name: invitation.last_name.clone(),
                email: invitation.email.clone(),
                department: department.clone(),
                created_at: now,
            }),
            Enrollment::Student { teacher_id } => Entity::Student(Student {
                id: entity_id,
                first_name: invitation.first_name.clone(),
                last_name: invitation.last_name.clone(),
                email: invitation.email.clone(),
                teacher_id: teacher_id.clone(),
                created_at: now,
            }),
        };

        self.store.transaction(&|tx: &dyn StoreTx| {
            match &entity {
                Entity::Teacher(teacher) => tx.create_teacher(teacher)?,
                Entity::Student(student) => tx.create_student(student)?,
            }
            tx.create_user(&user)?;
            tx.mark_invitation_used(&invitation.id)
        })?;

        tracing::info!(
            invitation_id = %invitation.id,
            user_id = %user.id,
            username = %user.username,
            role = %user.role,
            "Invitation completed"
        );

        Ok(user.to_public())
    }

    fn find(&self, token: &str) -> Result<Invitation, AuthError> {
        self.store
            .get_invitation_by_token(token)?
            .ok_or_else(|| AuthError::NotFound("invitation not found".to_string()))
    }
}

impl std::fmt::Debug for InvitationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvitationService")
            .field("ttl", &self.ttl)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

enum Entity {
    Teacher(Teacher),
    Student(Student),
}

fn ensure_redeemable(invitation: &Invitation) -> Result<(), AuthError> {
    if invitation.used {
        return Err(AuthError::BadRequest(
            "invitation already used".to_string(),
        ));
    }
    if invitation.is_expired() {
        return Err(AuthError::BadRequest("invitation expired".to_string()));
    }
    Ok(())
}

fn validation_error(e: validator::ValidationErrors) -> AuthError {
    AuthError::Validation(e.to_string())
}
