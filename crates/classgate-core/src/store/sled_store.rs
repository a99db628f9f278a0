//! sled-backed [`SessionStore`].
//!
//! Layout, one tree per record type:
//! - `users`: `{id}` → user, `idx:username:{name}` → id
//! - `refresh_tokens`: `tok:{token}` → record, `idx:user:{user_id}:{token}` → token
//! - `invitations`: `{id}` → invitation, `idx:token:{token}` → id
//! - `students`, `teachers`: `{id}` → row

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree, UnabortableTransactionError,
};
use sled::{Transactional, Tree};

use super::{SessionStore, StoreError, StoreTx, TxOps};
use crate::types::{Invitation, RefreshToken, Student, Teacher, User};

const INDEX_PREFIX: &[u8] = b"idx:";

fn username_key(username: &str) -> String {
    format!("idx:username:{username}")
}

fn token_key(token: &str) -> String {
    format!("tok:{token}")
}

fn user_tokens_prefix(user_id: &str) -> String {
    format!("idx:user:{user_id}:")
}

fn invitation_token_key(token: &str) -> String {
    format!("idx:token:{token}")
}

fn storage(context: &str) -> impl Fn(sled::Error) -> StoreError + '_ {
    move |e| StoreError::Storage(format!("{context}: {e}"))
}

fn tx_storage(e: UnabortableTransactionError) -> StoreError {
    StoreError::Storage(format!("Transaction error: {e}"))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Session store backed by sled.
pub struct SledStore {
    db: sled::Db,
    users: Tree,
    refresh_tokens: Tree,
    invitations: Tree,
    students: Tree,
    teachers: Tree,
}

impl SledStore {
    /// Open or create a store under the given directory.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path.join("auth")).map_err(storage("Failed to open auth database"))?;
        Self::with_db(db)
    }

    /// Open a throwaway in-memory store that is deleted on drop.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be created.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(storage("Failed to open temporary database"))?;
        Self::with_db(db)
    }

    /// Create a store on an existing sled database.
    ///
    /// # Errors
    ///
    /// Returns error if a tree cannot be opened.
    pub fn with_db(db: sled::Db) -> Result<Self, StoreError> {
        let open = |name: &str| {
            db.open_tree(name)
                .map_err(|e| StoreError::Storage(format!("Failed to open {name} tree: {e}")))
        };

        Ok(Self {
            users: open("users")?,
            refresh_tokens: open("refresh_tokens")?,
            invitations: open("invitations")?,
            students: open("students")?,
            teachers: open("teachers")?,
            db,
        })
    }

    /// Get the underlying sled database.
    #[must_use]
    pub const fn db(&self) -> &sled::Db {
        &self.db
    }

    /// Count users (index entries excluded).
    #[must_use]
    pub fn user_count(&self) -> usize {
        count_records(&self.users)
    }

    /// Count student rows.
    #[must_use]
    pub fn student_count(&self) -> usize {
        self.students.len()
    }

    /// Count teacher rows.
    #[must_use]
    pub fn teacher_count(&self) -> usize {
        self.teachers.len()
    }

    fn flush(tree: &Tree) -> Result<(), StoreError> {
        tree.flush().map_err(storage("Flush error"))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(tree: &Tree, key: &[u8]) -> Result<Option<T>, StoreError> {
        match tree.get(key).map_err(storage("Get error"))? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }
}

fn count_records(tree: &Tree) -> usize {
    tree.iter()
        .keys()
        .filter(|k| k.as_ref().is_ok_and(|k| !k.starts_with(INDEX_PREFIX)))
        .count()
}

impl SessionStore for SledStore {
    fn create_user(&self, user: &User) -> Result<(), StoreError> {
        self.transaction(&|tx: &dyn StoreTx| tx.create_user(user))
    }

    fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Self::get_json(&self.users, id.as_bytes())
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        match self
            .users
            .get(username_key(username).as_bytes())
            .map_err(storage("Index lookup error"))?
        {
            Some(id) => self.get_user(&String::from_utf8_lossy(&id)),
            None => Ok(None),
        }
    }

    fn update_last_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut user = self
            .get_user(user_id)?
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;

        user.last_login = Some(at);
        self.users
            .insert(user_id.as_bytes(), encode(&user)?)
            .map_err(storage("Update error"))?;
        Self::flush(&self.users)
    }

    fn create_refresh_token(&self, record: &RefreshToken) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        batch.insert(token_key(&record.token).as_bytes(), encode(record)?);
        batch.insert(
            format!("{}{}", user_tokens_prefix(&record.user_id), record.token).as_bytes(),
            record.token.as_bytes(),
        );

        self.refresh_tokens
            .apply_batch(batch)
            .map_err(storage("Insert error"))?;
        Self::flush(&self.refresh_tokens)
    }

    fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>, StoreError> {
        Self::get_json(&self.refresh_tokens, token_key(token).as_bytes())
    }

    fn delete_refresh_token(&self, token: &str) -> Result<bool, StoreError> {
        let Some(record) = self.get_refresh_token(token)? else {
            return Ok(false);
        };

        let mut batch = sled::Batch::default();
        batch.remove(token_key(token).as_bytes());
        batch.remove(format!("{}{token}", user_tokens_prefix(&record.user_id)).as_bytes());

        self.refresh_tokens
            .apply_batch(batch)
            .map_err(storage("Delete error"))?;
        Self::flush(&self.refresh_tokens)?;
        Ok(true)
    }

    fn delete_refresh_tokens_for_user(&self, user_id: &str) -> Result<usize, StoreError> {
        let mut batch = sled::Batch::default();
        let mut removed = 0;

        for entry in self.refresh_tokens.scan_prefix(user_tokens_prefix(user_id).as_bytes()) {
            let (index_key, token) = entry.map_err(storage("Scan error"))?;
            batch.remove(index_key);
            batch.remove(token_key(&String::from_utf8_lossy(&token)).as_bytes());
            removed += 1;
        }

        self.refresh_tokens
            .apply_batch(batch)
            .map_err(storage("Delete error"))?;
        Self::flush(&self.refresh_tokens)?;
        Ok(removed)
    }

    fn create_invitation(&self, invitation: &Invitation) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        batch.insert(invitation.id.as_bytes(), encode(invitation)?);
        batch.insert(
            invitation_token_key(&invitation.token).as_bytes(),
            invitation.id.as_bytes(),
        );

        self.invitations
            .apply_batch(batch)
            .map_err(storage("Insert error"))?;
        Self::flush(&self.invitations)
    }

    fn get_invitation_by_token(&self, token: &str) -> Result<Option<Invitation>, StoreError> {
        match self
            .invitations
            .get(invitation_token_key(token).as_bytes())
            .map_err(storage("Index lookup error"))?
        {
            Some(id) => Self::get_json(&self.invitations, &id),
            None => Ok(None),
        }
    }

    fn get_student(&self, id: &str) -> Result<Option<Student>, StoreError> {
        Self::get_json(&self.students, id.as_bytes())
    }

    fn get_teacher(&self, id: &str) -> Result<Option<Teacher>, StoreError> {
        Self::get_json(&self.teachers, id.as_bytes())
    }

    fn transaction(&self, ops: TxOps<'_>) -> Result<(), StoreError> {
        (&self.users, &self.invitations, &self.students, &self.teachers)
            .transaction(|(users, invitations, students, teachers)| {
                let tx = SledTx {
                    users,
                    invitations,
                    students,
                    teachers,
                };
                ops(&tx).map_err(ConflictableTransactionError::Abort)
            })
            .map_err(|e| match e {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(err) => {
                    StoreError::Storage(format!("Transaction error: {err}"))
                }
            })?;

        self.db.flush().map_err(storage("Flush error"))?;
        Ok(())
    }
}

/// Transactional view over the trees touched by multi-write operations.
struct SledTx<'a> {
    users: &'a TransactionalTree,
    invitations: &'a TransactionalTree,
    students: &'a TransactionalTree,
    teachers: &'a TransactionalTree,
}

impl StoreTx for SledTx<'_> {
    fn create_student(&self, student: &Student) -> Result<(), StoreError> {
        self.students
            .insert(student.id.as_bytes(), encode(student)?)
            .map_err(tx_storage)?;
        Ok(())
    }

    fn create_teacher(&self, teacher: &Teacher) -> Result<(), StoreError> {
        self.teachers
            .insert(teacher.id.as_bytes(), encode(teacher)?)
            .map_err(tx_storage)?;
        Ok(())
    }

    fn create_user(&self, user: &User) -> Result<(), StoreError> {
        let index_key = username_key(&user.username);
        if self
            .users
            .get(index_key.as_bytes())
            .map_err(tx_storage)?
            .is_some()
        {
            return Err(StoreError::Conflict(format!(
                "username {} already exists",
                user.username
            )));
        }

        self.users
            .insert(user.id.as_bytes(), encode(user)?)
            .map_err(tx_storage)?;
        self.users
            .insert(index_key.as_bytes(), user.id.as_bytes())
            .map_err(tx_storage)?;
        Ok(())
    }

    fn mark_invitation_used(&self, invitation_id: &str) -> Result<(), StoreError> {
        let bytes = self
            .invitations
            .get(invitation_id.as_bytes())
            .map_err(tx_storage)?
            .ok_or_else(|| StoreError::NotFound(format!("invitation {invitation_id}")))?;

        let mut invitation: Invitation = decode(&bytes)?;
        if invitation.used {
            return Err(StoreError::Conflict(format!(
                "invitation {invitation_id} already used"
            )));
        }

        invitation.used = true;
        self.invitations
            .insert(invitation_id.as_bytes(), encode(&invitation)?)
            .map_err(tx_storage)?;
        Ok(())
    }
}
