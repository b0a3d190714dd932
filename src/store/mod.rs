//! Persistence collaborator for users and ephemeral tokens.
//!
//! The engine never coordinates in-process; everything cross-request goes
//! through these traits. Implementations must make token redemption and
//! session-set mutation atomic: read-then-delete (tokens) and
//! read-then-filter-then-write (sessions) may not race two concurrent
//! callers into two successes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::theme::{CustomTheme, DEFAULT_THEME};
use crate::auth::token::{EphemeralToken, TokenPurpose};

pub mod memory;
pub mod postgres;

/// A user as persisted. `active_sessions` has set semantics: unordered,
/// existence-only.
#[derive(Clone, Debug)]
pub struct UserRecord {
    pub id: Uuid,
    pub name: String,
    /// Stored lowercase; uniqueness is case-insensitive.
    pub email: String,
    /// Unset until the first password is set via a verification token.
    pub password_hash: Option<String>,
    pub is_verified: bool,
    pub active_sessions: Vec<String>,
    pub theme: String,
    pub custom_themes: Vec<CustomTheme>,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// Fresh unverified user. UUIDv7 ids order by creation time, which is
    /// what cursor pagination sorts on.
    #[must_use]
    pub fn new(name: String, email: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            name,
            email,
            password_hash: None,
            is_verified: false,
            active_sessions: Vec::new(),
            theme: DEFAULT_THEME.to_string(),
            custom_themes: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Outcome of an insert guarded by the unique-email constraint.
#[derive(Debug)]
pub enum CreateOutcome {
    Created,
    DuplicateEmail,
}

/// Outcome of a conditional write that re-verifies its precondition at
/// write time (e.g. committing an email change).
#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The uniqueness precondition failed at commit time.
    Conflict,
    /// The target row no longer exists.
    Missing,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new user; the unique-email check happens at write time, not
    /// only at the earlier existence probe.
    async fn create_user(&self, user: UserRecord) -> Result<CreateOutcome>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>>;

    /// Lookup by normalized (lowercase) email.
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    async fn update_name(&self, id: Uuid, name: &str) -> Result<bool>;

    /// Commit a pending email change, re-checking uniqueness at write time.
    async fn commit_email(&self, id: Uuid, email: &str) -> Result<WriteOutcome>;

    /// Store a new password hash, optionally flipping the verified flag.
    /// Session-set changes are separate registry operations.
    async fn update_password(&self, id: Uuid, hash: &str, mark_verified: bool) -> Result<bool>;

    /// Append one jti to the session set.
    async fn append_session(&self, id: Uuid, jti: &str) -> Result<bool>;

    /// Remove one jti. Idempotent: removing an absent jti is not an error.
    async fn remove_session(&self, id: Uuid, jti: &str) -> Result<bool>;

    /// Collapse the session set to exactly the given jti.
    async fn retain_session(&self, id: Uuid, jti: &str) -> Result<bool>;

    /// Empty the session set.
    async fn clear_sessions(&self, id: Uuid) -> Result<bool>;

    /// Replace the active theme and custom theme list in one write.
    async fn update_themes(
        &self,
        id: Uuid,
        theme: &str,
        custom_themes: &[CustomTheme],
    ) -> Result<bool>;

    async fn delete_user(&self, id: Uuid) -> Result<bool>;

    /// Users with id strictly greater than `after`, ordered by id
    /// ascending, at most `limit` rows.
    async fn list_users(&self, after: Option<Uuid>, limit: usize) -> Result<Vec<UserRecord>>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist a token keyed by the hash of its raw id.
    async fn insert_token(&self, id_hash: Vec<u8>, token: EphemeralToken) -> Result<()>;

    /// Atomically read-and-delete a live token whose purpose is in
    /// `purposes`. Exactly one of N concurrent redemptions succeeds. An
    /// expired token is treated as absent; a purpose mismatch leaves the
    /// token in place.
    async fn redeem(
        &self,
        id_hash: &[u8],
        purposes: &[TokenPurpose],
    ) -> Result<Option<EphemeralToken>>;

    /// Read-only lookup, expiry still enforced.
    async fn peek(&self, id_hash: &[u8]) -> Result<Option<EphemeralToken>>;

    /// Physically delete expired tokens. Eventual hygiene only; correctness
    /// never depends on it.
    async fn purge_expired(&self) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_starts_unverified_with_default_theme() {
        let user = UserRecord::new("Alice".to_string(), "a@x.com".to_string());
        assert!(!user.is_verified);
        assert!(user.password_hash.is_none());
        assert!(user.active_sessions.is_empty());
        assert_eq!(user.theme, DEFAULT_THEME);
    }

    #[test]
    fn v7_ids_order_by_creation() {
        let first = UserRecord::new("a".to_string(), "a@x.com".to_string());
        let second = UserRecord::new("b".to_string(), "b@x.com".to_string());
        assert!(second.id > first.id);
    }
}
