//! In-memory store for tests and local development.
//!
//! A single async mutex around both maps makes every operation a critical
//! section, which is what gives redeem and the session-set writes their
//! at-most-once / no-lost-update guarantees here.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::theme::CustomTheme;
use crate::auth::token::{EphemeralToken, TokenPurpose};

use super::{CreateOutcome, TokenStore, UserRecord, UserStore, WriteOutcome};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, UserRecord>,
    tokens: HashMap<Vec<u8>, EphemeralToken>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tokens, including expired-but-unpurged ones.
    /// Test visibility into the "expired is logically absent" invariant.
    pub async fn token_count(&self) -> usize {
        self.inner.lock().await.tokens.len()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: UserRecord) -> Result<CreateOutcome> {
        let mut inner = self.inner.lock().await;
        if inner
            .users
            .values()
            .any(|existing| existing.email == user.email)
        {
            return Ok(CreateOutcome::DuplicateEmail);
        }
        inner.users.insert(user.id, user);
        Ok(CreateOutcome::Created)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .inner
            .lock()
            .await
            .users
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn update_name(&self, id: Uuid, name: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.users.get_mut(&id) {
            Some(user) => {
                user.name = name.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn commit_email(&self, id: Uuid, email: &str) -> Result<WriteOutcome> {
        let mut inner = self.inner.lock().await;
        if inner
            .users
            .values()
            .any(|user| user.id != id && user.email == email)
        {
            return Ok(WriteOutcome::Conflict);
        }
        match inner.users.get_mut(&id) {
            Some(user) => {
                user.email = email.to_string();
                Ok(WriteOutcome::Applied)
            }
            None => Ok(WriteOutcome::Missing),
        }
    }

    async fn update_password(&self, id: Uuid, hash: &str, mark_verified: bool) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.users.get_mut(&id) {
            Some(user) => {
                user.password_hash = Some(hash.to_string());
                if mark_verified {
                    user.is_verified = true;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn append_session(&self, id: Uuid, jti: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.users.get_mut(&id) {
            Some(user) => {
                if !user.active_sessions.iter().any(|existing| existing == jti) {
                    user.active_sessions.push(jti.to_string());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_session(&self, id: Uuid, jti: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.users.get_mut(&id) {
            Some(user) => {
                user.active_sessions.retain(|existing| existing != jti);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn retain_session(&self, id: Uuid, jti: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.users.get_mut(&id) {
            Some(user) => {
                user.active_sessions = vec![jti.to_string()];
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear_sessions(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.users.get_mut(&id) {
            Some(user) => {
                user.active_sessions.clear();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_themes(
        &self,
        id: Uuid,
        theme: &str,
        custom_themes: &[CustomTheme],
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.users.get_mut(&id) {
            Some(user) => {
                user.theme = theme.to_string();
                user.custom_themes = custom_themes.to_vec();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool> {
        Ok(self.inner.lock().await.users.remove(&id).is_some())
    }

    async fn list_users(&self, after: Option<Uuid>, limit: usize) -> Result<Vec<UserRecord>> {
        let inner = self.inner.lock().await;
        let mut users: Vec<UserRecord> = inner
            .users
            .values()
            .filter(|user| after.is_none_or(|cursor| user.id > cursor))
            .cloned()
            .collect();
        users.sort_by_key(|user| user.id);
        users.truncate(limit);
        Ok(users)
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn insert_token(&self, id_hash: Vec<u8>, token: EphemeralToken) -> Result<()> {
        self.inner.lock().await.tokens.insert(id_hash, token);
        Ok(())
    }

    async fn redeem(
        &self,
        id_hash: &[u8],
        purposes: &[TokenPurpose],
    ) -> Result<Option<EphemeralToken>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let Some(token) = inner.tokens.get(id_hash) else {
            return Ok(None);
        };
        if token.is_expired(now) || !purposes.contains(&token.purpose) {
            return Ok(None);
        }
        Ok(inner.tokens.remove(id_hash))
    }

    async fn peek(&self, id_hash: &[u8]) -> Result<Option<EphemeralToken>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tokens
            .get(id_hash)
            .filter(|token| !token.is_expired(Utc::now()))
            .cloned())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let before = inner.tokens.len();
        inner.tokens.retain(|_, token| !token.is_expired(now));
        Ok((before - inner.tokens.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::TokenPayload;
    use chrono::Duration;
    use std::sync::Arc;

    fn live_token(purpose: TokenPurpose) -> EphemeralToken {
        EphemeralToken {
            purpose,
            owner: None,
            payload: TokenPayload::None,
            expires_at: Utc::now() + Duration::minutes(5),
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_at_write_time() {
        let store = MemoryStore::new();
        let first = UserRecord::new("Alice".to_string(), "a@x.com".to_string());
        let second = UserRecord::new("Other".to_string(), "a@x.com".to_string());
        assert!(matches!(
            store.create_user(first).await.unwrap(),
            CreateOutcome::Created
        ));
        assert!(matches!(
            store.create_user(second).await.unwrap(),
            CreateOutcome::DuplicateEmail
        ));
    }

    #[tokio::test]
    async fn redeem_is_at_most_once_under_concurrency() {
        let store = Arc::new(MemoryStore::new());
        let hash = vec![1u8; 32];
        store
            .insert_token(hash.clone(), live_token(TokenPurpose::PasswordReset))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let hash = hash.clone();
            handles.push(tokio::spawn(async move {
                store
                    .redeem(&hash, &[TokenPurpose::PasswordReset])
                    .await
                    .unwrap()
                    .is_some()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn purpose_mismatch_does_not_consume() {
        let store = MemoryStore::new();
        let hash = vec![2u8; 32];
        store
            .insert_token(hash.clone(), live_token(TokenPurpose::EmailChange))
            .await
            .unwrap();

        let miss = store
            .redeem(&hash, &[TokenPurpose::EmailVerification, TokenPurpose::PasswordReset])
            .await
            .unwrap();
        assert!(miss.is_none());

        let hit = store.redeem(&hash, &[TokenPurpose::EmailChange]).await.unwrap();
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn expired_token_is_absent_before_purge() {
        let store = MemoryStore::new();
        let hash = vec![3u8; 32];
        let mut token = live_token(TokenPurpose::Captcha);
        token.expires_at = Utc::now() - Duration::seconds(1);
        store.insert_token(hash.clone(), token).await.unwrap();

        assert!(store.peek(&hash).await.unwrap().is_none());
        assert!(store
            .redeem(&hash, &[TokenPurpose::Captcha])
            .await
            .unwrap()
            .is_none());
        // Still physically present until the sweep runs.
        assert_eq!(store.token_count().await, 1);
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.token_count().await, 0);
    }

    #[tokio::test]
    async fn retain_session_collapses_to_one() {
        let store = MemoryStore::new();
        let user = UserRecord::new("Alice".to_string(), "a@x.com".to_string());
        let id = user.id;
        store.create_user(user).await.unwrap();
        store.append_session(id, "one").await.unwrap();
        store.append_session(id, "two").await.unwrap();
        store.append_session(id, "three").await.unwrap();

        store.retain_session(id, "two").await.unwrap();
        let user = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(user.active_sessions, vec!["two".to_string()]);
    }

    #[tokio::test]
    async fn commit_email_detects_conflict_at_write_time() {
        let store = MemoryStore::new();
        let alice = UserRecord::new("Alice".to_string(), "a@x.com".to_string());
        let bob = UserRecord::new("Bob".to_string(), "b@x.com".to_string());
        let alice_id = alice.id;
        store.create_user(alice).await.unwrap();
        store.create_user(bob).await.unwrap();

        assert_eq!(
            store.commit_email(alice_id, "b@x.com").await.unwrap(),
            WriteOutcome::Conflict
        );
        assert_eq!(
            store.commit_email(alice_id, "new@x.com").await.unwrap(),
            WriteOutcome::Applied
        );
        assert_eq!(
            store.commit_email(Uuid::now_v7(), "x@x.com").await.unwrap(),
            WriteOutcome::Missing
        );
    }

    #[tokio::test]
    async fn listing_pages_in_id_order() {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let user = UserRecord::new(format!("u{i}"), format!("u{i}@x.com"));
            ids.push(user.id);
            store.create_user(user).await.unwrap();
        }

        let first = store.list_users(None, 2).await.unwrap();
        assert_eq!(
            first.iter().map(|u| u.id).collect::<Vec<_>>(),
            ids[..2].to_vec()
        );
        let rest = store.list_users(Some(ids[1]), 10).await.unwrap();
        assert_eq!(
            rest.iter().map(|u| u.id).collect::<Vec<_>>(),
            ids[2..].to_vec()
        );
    }
}
