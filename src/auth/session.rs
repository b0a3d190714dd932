//! Session allowlist over signed JWTs.
//!
//! Signature expiry alone is too coarse to log out one device, so every
//! login mints a random `jti` that is both embedded in the signed token and
//! recorded in the user's `active_sessions` set. Validation checks the
//! signature, then membership; removing the `jti` from the set revokes that
//! one token immediately without touching the signing key or any other
//! session.

use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::store::UserStore;

use super::error::{AuthError, AuthResult};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Owning user id.
    pub sub: Uuid,
    /// Session identifier tracked in the per-user allowlist.
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 signer with a fixed expiry horizon.
#[derive(Clone)]
pub struct SessionSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SessionSigner {
    #[must_use]
    pub fn new(secret: &SecretString, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.expose_secret().as_bytes()),
            decoding: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            ttl,
        }
    }

    pub fn sign(&self, user_id: Uuid, jti: &str) -> anyhow::Result<String> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: user_id,
            jti: jti.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .context("failed to sign session token")
    }

    /// Signature and expiry check only; allowlist membership is the
    /// registry's job.
    #[must_use]
    pub fn decode(&self, token: &str) -> Option<SessionClaims> {
        decode::<SessionClaims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .ok()
    }
}

pub struct SessionRegistry {
    store: Arc<dyn UserStore>,
    signer: SessionSigner,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn UserStore>, signer: SessionSigner) -> Self {
        Self { store, signer }
    }

    /// Mint a `jti`, record it in the allowlist, and return it with the
    /// signed token.
    pub async fn issue_session(&self, user_id: Uuid) -> AuthResult<(String, String)> {
        let jti = Uuid::new_v4().to_string();
        let token = self.signer.sign(user_id, &jti)?;
        if !self.store.append_session(user_id, &jti).await? {
            return Err(AuthError::Authentication);
        }
        Ok((jti, token))
    }

    /// Full validation: signature, expiry, user existence, and allowlist
    /// membership. A structurally valid token whose `jti` has been removed
    /// is rejected.
    pub async fn validate(&self, token: &str) -> AuthResult<SessionClaims> {
        let Some(claims) = self.signer.decode(token) else {
            debug!("session token failed signature or expiry check");
            return Err(AuthError::Authentication);
        };
        let Some(user) = self.store.find_by_id(claims.sub).await? else {
            debug!("session token references a deleted user");
            return Err(AuthError::Authentication);
        };
        if !user.active_sessions.iter().any(|jti| *jti == claims.jti) {
            debug!("session token jti is not in the allowlist");
            return Err(AuthError::Authentication);
        }
        Ok(claims)
    }

    /// Remove one session. Idempotent: revoking an absent `jti` succeeds.
    pub async fn revoke(&self, user_id: Uuid, jti: &str) -> AuthResult<()> {
        self.store.remove_session(user_id, jti).await?;
        Ok(())
    }

    /// Collapse the allowlist to the caller's own session. Used on password
    /// change so every other device has to re-authenticate.
    pub async fn revoke_all_except(&self, user_id: Uuid, jti: &str) -> AuthResult<()> {
        self.store.retain_session(user_id, jti).await?;
        Ok(())
    }

    /// Drop every session. Used when a password is (re)set via token, since
    /// any session opened under the old credential must die.
    pub async fn revoke_all(&self, user_id: Uuid) -> AuthResult<()> {
        self.store.clear_sessions(user_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{memory::MemoryStore, UserRecord};

    fn signer() -> SessionSigner {
        SessionSigner::new(
            &SecretString::from("test-secret".to_string()),
            Duration::days(7),
        )
    }

    async fn registry_with_user() -> (SessionRegistry, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let user = UserRecord::new("Alice".to_string(), "a@x.com".to_string());
        let id = user.id;
        store.create_user(user).await.unwrap();
        (SessionRegistry::new(store, signer()), id)
    }

    #[test]
    fn sign_then_decode_round_trips() {
        let signer = signer();
        let user_id = Uuid::now_v7();
        let token = signer.sign(user_id, "jti-1").unwrap();
        let claims = signer.decode(&token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.jti, "jti-1");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn decode_rejects_wrong_secret() {
        let token = signer().sign(Uuid::now_v7(), "jti-1").unwrap();
        let other = SessionSigner::new(
            &SecretString::from("other-secret".to_string()),
            Duration::days(7),
        );
        assert!(other.decode(&token).is_none());
    }

    #[tokio::test]
    async fn validated_token_implies_jti_in_allowlist() {
        let (registry, user_id) = registry_with_user().await;
        let (jti, token) = registry.issue_session(user_id).await.unwrap();
        let claims = registry.validate(&token).await.unwrap();
        assert_eq!(claims.jti, jti);
    }

    #[tokio::test]
    async fn revoked_token_is_rejected_idempotently() {
        let (registry, user_id) = registry_with_user().await;
        let (jti, token) = registry.issue_session(user_id).await.unwrap();

        registry.revoke(user_id, &jti).await.unwrap();
        assert!(matches!(
            registry.validate(&token).await,
            Err(AuthError::Authentication)
        ));

        // Second revoke of the same jti is a no-op, not an error.
        registry.revoke(user_id, &jti).await.unwrap();
        assert!(matches!(
            registry.validate(&token).await,
            Err(AuthError::Authentication)
        ));
    }

    #[tokio::test]
    async fn revoke_all_except_keeps_only_the_caller() {
        let (registry, user_id) = registry_with_user().await;
        let (_jti_a, token_a) = registry.issue_session(user_id).await.unwrap();
        let (jti_b, token_b) = registry.issue_session(user_id).await.unwrap();

        registry.revoke_all_except(user_id, &jti_b).await.unwrap();
        assert!(registry.validate(&token_a).await.is_err());
        assert!(registry.validate(&token_b).await.is_ok());
    }

    #[tokio::test]
    async fn expired_token_fails_signature_stage() {
        let store: Arc<dyn UserStore> = Arc::new(MemoryStore::new());
        let expired_signer = SessionSigner::new(
            &SecretString::from("test-secret".to_string()),
            Duration::seconds(-120),
        );
        let registry = SessionRegistry::new(store, expired_signer);
        let token = registry.signer.sign(Uuid::now_v7(), "jti-1").unwrap();
        assert!(matches!(
            registry.validate(&token).await,
            Err(AuthError::Authentication)
        ));
    }
}
