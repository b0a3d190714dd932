//! Typed, single-use, TTL-bound ephemeral tokens.
//!
//! One token model backs four purposes: email verification, password reset,
//! email-change confirmation, and captcha challenges. The raw token id is
//! the bearer secret and is handed out exactly once; the store only ever
//! sees its SHA-256 hash. A token is consumed (deleted) exactly once, on
//! successful redemption, and anything past `expires_at` is treated as
//! nonexistent even if the purge has not run yet.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::store::TokenStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenPurpose {
    EmailVerification,
    PasswordReset,
    EmailChange,
    Captcha,
}

impl TokenPurpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmailVerification => "email_verification",
            Self::PasswordReset => "password_reset",
            Self::EmailChange => "email_change",
            Self::Captcha => "captcha",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "email_verification" => Some(Self::EmailVerification),
            "password_reset" => Some(Self::PasswordReset),
            "email_change" => Some(Self::EmailChange),
            "captcha" => Some(Self::Captcha),
            _ => None,
        }
    }
}

/// Purpose-specific payload, carried only where a purpose needs one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenPayload {
    None,
    /// Email-change confirmation: the address waiting to be committed.
    PendingEmail(String),
    /// Captcha: the expected answer to the rendered puzzle.
    CaptchaAnswer(i64),
}

impl TokenPayload {
    #[must_use]
    pub fn pending_email(&self) -> Option<&str> {
        match self {
            Self::PendingEmail(email) => Some(email),
            _ => None,
        }
    }

    #[must_use]
    pub fn captcha_answer(&self) -> Option<i64> {
        match self {
            Self::CaptchaAnswer(answer) => Some(*answer),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EphemeralToken {
    pub purpose: TokenPurpose,
    /// Captcha tokens have no owner. A dangling owner (user deleted after
    /// issuance) simply fails the user lookup on redemption.
    pub owner: Option<Uuid>,
    pub payload: TokenPayload,
    pub expires_at: DateTime<Utc>,
}

impl EphemeralToken {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Generate a raw bearer token id.
///
/// The raw value is only returned to the caller (email link, captcha id);
/// the store keeps a hash.
pub fn generate_token_id() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token id")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a raw token id so bearer secrets never touch the store.
#[must_use]
pub fn hash_token_id(raw: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hasher.finalize().to_vec()
}

/// Issue a token: mint a raw id, persist the hashed record, return the raw
/// id for delivery to the user.
pub async fn issue(
    store: &dyn TokenStore,
    purpose: TokenPurpose,
    owner: Option<Uuid>,
    payload: TokenPayload,
    ttl: Duration,
) -> Result<String> {
    let raw = generate_token_id()?;
    let token = EphemeralToken {
        purpose,
        owner,
        payload,
        expires_at: Utc::now() + ttl,
    };
    store.insert_token(hash_token_id(&raw), token).await?;
    Ok(raw)
}

/// Redeem a raw token id against a set of acceptable purposes.
///
/// At-most-once: the underlying store deletes the record atomically with
/// the read, so concurrent redemptions of one token yield exactly one
/// `Some`. A purpose mismatch does not consume the token.
pub async fn redeem(
    store: &dyn TokenStore,
    raw: &str,
    purposes: &[TokenPurpose],
) -> Result<Option<EphemeralToken>> {
    store.redeem(&hash_token_id(raw), purposes).await
}

/// Read a token without consuming it. Expiry is still enforced.
pub async fn peek(store: &dyn TokenStore, raw: &str) -> Result<Option<EphemeralToken>> {
    store.peek(&hash_token_id(raw)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purpose_round_trips_through_str() {
        for purpose in [
            TokenPurpose::EmailVerification,
            TokenPurpose::PasswordReset,
            TokenPurpose::EmailChange,
            TokenPurpose::Captcha,
        ] {
            assert_eq!(TokenPurpose::parse(purpose.as_str()), Some(purpose));
        }
        assert_eq!(TokenPurpose::parse("session"), None);
    }

    #[test]
    fn generated_ids_are_distinct_and_url_safe() {
        let first = generate_token_id().unwrap();
        let second = generate_token_id().unwrap();
        assert_ne!(first, second);
        assert_eq!(URL_SAFE_NO_PAD.decode(first.as_bytes()).unwrap().len(), 32);
    }

    #[test]
    fn hash_is_stable_and_collision_free_for_distinct_input() {
        assert_eq!(hash_token_id("alpha"), hash_token_id("alpha"));
        assert_ne!(hash_token_id("alpha"), hash_token_id("beta"));
    }

    #[test]
    fn expiry_is_inclusive_of_now() {
        let token = EphemeralToken {
            purpose: TokenPurpose::Captcha,
            owner: None,
            payload: TokenPayload::CaptchaAnswer(7),
            expires_at: Utc::now(),
        };
        assert!(token.is_expired(Utc::now()));
    }

    #[test]
    fn payload_accessors_match_variants() {
        assert_eq!(TokenPayload::None.pending_email(), None);
        assert_eq!(
            TokenPayload::PendingEmail("new@example.com".to_string()).pending_email(),
            Some("new@example.com")
        );
        assert_eq!(TokenPayload::CaptchaAnswer(12).captcha_answer(), Some(12));
        assert_eq!(TokenPayload::None.captcha_answer(), None);
    }
}
