//! Identity lifecycle orchestrator.
//!
//! Composes the token store, credential hasher, session registry, captcha
//! gate, and email collaborator into the register / verify / login /
//! logout / forgot / reset / change-password / change-email flows. Every
//! precondition failure aborts before any write; email delivery happens
//! after state is persisted and never rolls it back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use secrecy::SecretString;
use serde::Serialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::email::{self, DeliveryConfig, EmailMessage, EmailSender};
use crate::store::{CreateOutcome, TokenStore, UserRecord, UserStore, WriteOutcome};

use super::captcha::CaptchaGate;
use super::config::AppConfig;
use super::error::{AuthError, AuthResult};
use super::listing::{FaultPolicy, ListSource, UserPage, UserSummary};
use super::password::CredentialHasher;
use super::session::{SessionRegistry, SessionSigner};
use super::theme::{self, CustomTheme, DEFAULT_THEME};
use super::token::{self, TokenPayload, TokenPurpose};

const MIN_NAME_LEN: usize = 2;
const MAX_NAME_LEN: usize = 50;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_PAGE_SIZE: usize = 100;

/// A solved captcha challenge presented with register/login.
#[derive(Clone, Debug)]
pub struct CaptchaProof {
    pub challenge_id: String,
    pub answer: i64,
}

/// Successful registration. The verification token is also emailed; it is
/// returned here so callers (and tests) can complete the flow directly.
#[derive(Clone, Debug)]
pub struct Registration {
    pub user_id: Uuid,
    pub verification_token: String,
}

/// Successful login: the signed JWT and the jti recorded for it.
#[derive(Clone, Debug)]
pub struct Login {
    pub token: String,
    pub jti: String,
}

/// Profile projection: never exposes the hash or the session set.
#[derive(Clone, Debug, Serialize)]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub is_verified: bool,
    pub theme: String,
    pub custom_themes: Vec<CustomTheme>,
    pub created_at: DateTime<Utc>,
}

impl From<UserRecord> for Profile {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            is_verified: user.is_verified,
            theme: user.theme,
            custom_themes: user.custom_themes,
            created_at: user.created_at,
        }
    }
}

/// What a profile update actually did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub name_updated: bool,
    /// The email itself is not touched yet; a confirmation token was
    /// mailed to the new address.
    pub email_confirmation_sent: bool,
}

#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic format check on already-normalized input.
#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

pub struct UserService {
    users: Arc<dyn UserStore>,
    tokens: Arc<dyn TokenStore>,
    hasher: Arc<dyn CredentialHasher>,
    mailer: Arc<dyn EmailSender>,
    faults: Arc<dyn FaultPolicy>,
    sessions: SessionRegistry,
    captcha: CaptchaGate,
    delivery: DeliveryConfig,
    config: AppConfig,
}

impl UserService {
    #[must_use]
    pub fn new(
        users: Arc<dyn UserStore>,
        tokens: Arc<dyn TokenStore>,
        hasher: Arc<dyn CredentialHasher>,
        mailer: Arc<dyn EmailSender>,
        faults: Arc<dyn FaultPolicy>,
        jwt_secret: &SecretString,
        config: AppConfig,
    ) -> Self {
        let signer = SessionSigner::new(jwt_secret, config.session_ttl());
        let sessions = SessionRegistry::new(Arc::clone(&users), signer);
        let captcha = CaptchaGate::new(Arc::clone(&tokens), config.captcha_ttl());
        Self {
            users,
            tokens,
            hasher,
            mailer,
            faults,
            sessions,
            captcha,
            delivery: DeliveryConfig::default(),
            config,
        }
    }

    #[must_use]
    pub fn with_delivery_config(mut self, delivery: DeliveryConfig) -> Self {
        self.delivery = delivery;
        self
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    #[must_use]
    pub fn captcha(&self) -> &CaptchaGate {
        &self.captcha
    }

    fn send_email(&self, message: EmailMessage) {
        // Fire-and-forget: the request already persisted its state.
        email::spawn_delivery(Arc::clone(&self.mailer), message, self.delivery);
    }

    /// Create an unverified user and mail a set-password link.
    #[instrument(skip_all)]
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        captcha: &CaptchaProof,
    ) -> AuthResult<Registration> {
        let name = validate_name(name)?;
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(AuthError::validation("invalid email address"));
        }
        self.captcha.verify(&captcha.challenge_id, captcha.answer).await?;

        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AuthError::conflict("email already exists"));
        }

        let user = UserRecord::new(name.clone(), email.clone());
        let user_id = user.id;
        // The existence probe above is advisory; the insert re-checks
        // uniqueness so two concurrent registrations cannot both win.
        if let CreateOutcome::DuplicateEmail = self.users.create_user(user).await? {
            return Err(AuthError::conflict("email already exists"));
        }

        let verification_token = token::issue(
            self.tokens.as_ref(),
            TokenPurpose::EmailVerification,
            Some(user_id),
            TokenPayload::None,
            self.config.verification_ttl(),
        )
        .await?;

        self.send_email(email::verification_email(
            self.config.frontend_base_url(),
            &name,
            &verification_token,
            &email,
        ));

        Ok(Registration {
            user_id,
            verification_token,
        })
    }

    /// Unified first-password and reset-password path. Verification and
    /// reset tokens are interchangeable here; only the post-condition
    /// differs (verification also flips `is_verified`).
    ///
    /// The token is consumed only once every precondition holds: a
    /// rejected attempt (mismatch, reuse) leaves it redeemable so the user
    /// can retry the same link.
    #[instrument(skip_all)]
    pub async fn set_password(
        &self,
        token_id: &str,
        password: &str,
        confirm: &str,
    ) -> AuthResult<()> {
        const PURPOSES: [TokenPurpose; 2] =
            [TokenPurpose::EmailVerification, TokenPurpose::PasswordReset];

        if password != confirm {
            return Err(AuthError::validation("passwords don't match"));
        }
        validate_password(password)?;

        let Some(pending) = token::peek(self.tokens.as_ref(), token_id).await? else {
            return Err(AuthError::not_found("invalid or expired token"));
        };
        if !PURPOSES.contains(&pending.purpose) {
            return Err(AuthError::not_found("invalid or expired token"));
        }
        let Some(user_id) = pending.owner else {
            return Err(AuthError::not_found("invalid or expired token"));
        };
        let Some(user) = self.users.find_by_id(user_id).await? else {
            return Err(AuthError::not_found("user not found"));
        };

        if let Some(current) = &user.password_hash {
            if self.hasher.verify(password, current) {
                return Err(AuthError::validation(
                    "new password cannot be the same as the old password",
                ));
            }
        }

        let hash = self.hasher.hash(password)?;

        // The redeem is the at-most-once step; losing the race to a
        // concurrent redemption is indistinguishable from expiry.
        let Some(redeemed) = token::redeem(self.tokens.as_ref(), token_id, &PURPOSES).await?
        else {
            return Err(AuthError::not_found("invalid or expired token"));
        };
        let mark_verified = redeemed.purpose == TokenPurpose::EmailVerification;
        self.users.update_password(user_id, &hash, mark_verified).await?;

        // A password set via token invalidates every open session: any of
        // them may have been opened under the old credential.
        self.sessions.revoke_all(user_id).await?;
        Ok(())
    }

    /// Authenticate and open a session. Unknown email, unverified account,
    /// and wrong password are deliberately indistinguishable.
    #[instrument(skip_all)]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        captcha: &CaptchaProof,
    ) -> AuthResult<Login> {
        self.captcha.verify(&captcha.challenge_id, captcha.answer).await?;

        let email = normalize_email(email);
        let Some(user) = self.users.find_by_email(&email).await? else {
            debug!("login for unknown email");
            return Err(AuthError::Authentication);
        };
        if !user.is_verified {
            debug!("login for unverified user");
            return Err(AuthError::Authentication);
        }
        let Some(hash) = &user.password_hash else {
            return Err(AuthError::Authentication);
        };
        if !self.hasher.verify(password, hash) {
            return Err(AuthError::Authentication);
        }

        let (jti, token) = self.sessions.issue_session(user.id).await?;
        Ok(Login { token, jti })
    }

    /// Remove one session. Idempotent.
    pub async fn logout(&self, user_id: Uuid, jti: &str) -> AuthResult<()> {
        self.sessions.revoke(user_id, jti).await
    }

    /// Mail a reset link. Enumeration-safe: an unknown email is an outward
    /// no-op, and no token is created for it.
    #[instrument(skip_all)]
    pub async fn forgot_password(&self, email: &str) -> AuthResult<()> {
        let email = normalize_email(email);
        let Some(user) = self.users.find_by_email(&email).await? else {
            debug!("password reset requested for unknown email");
            return Ok(());
        };

        let reset_token = token::issue(
            self.tokens.as_ref(),
            TokenPurpose::PasswordReset,
            Some(user.id),
            TokenPayload::None,
            self.config.reset_ttl(),
        )
        .await?;

        self.send_email(email::reset_email(
            self.config.frontend_base_url(),
            &reset_token,
            &email,
        ));
        Ok(())
    }

    /// Authenticated password change. Keeps only the caller's session:
    /// they are already authenticated and expect to stay logged in on the
    /// current device, while every other device must re-authenticate.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn change_password(
        &self,
        user_id: Uuid,
        old_password: &str,
        new_password: &str,
        confirm: &str,
        current_jti: &str,
    ) -> AuthResult<()> {
        if new_password != confirm {
            return Err(AuthError::validation("passwords don't match"));
        }
        if new_password == old_password {
            return Err(AuthError::validation(
                "new password cannot be the same as the old password",
            ));
        }
        validate_password(new_password)?;

        let Some(user) = self.users.find_by_id(user_id).await? else {
            return Err(AuthError::not_found("user not found"));
        };
        let Some(hash) = &user.password_hash else {
            return Err(AuthError::validation("old password is incorrect"));
        };
        if !self.hasher.verify(old_password, hash) {
            return Err(AuthError::validation("old password is incorrect"));
        }

        let new_hash = self.hasher.hash(new_password)?;
        self.users.update_password(user_id, &new_hash, false).await?;
        self.sessions.revoke_all_except(user_id, current_jti).await?;
        Ok(())
    }

    /// Update name and/or start an email change. The name applies
    /// immediately; the email only after the confirmation token mailed to
    /// the NEW address is redeemed.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn update_user(
        &self,
        user_id: Uuid,
        name: Option<&str>,
        email: Option<&str>,
    ) -> AuthResult<UpdateOutcome> {
        let Some(user) = self.users.find_by_id(user_id).await? else {
            return Err(AuthError::not_found("user not found"));
        };

        // Validate both fields before writing either: a rejected email
        // must not leave a half-applied name change behind.
        let new_name = match name {
            Some(name) => {
                let name = validate_name(name)?;
                (name != user.name).then_some(name)
            }
            None => None,
        };

        let pending_email = match email {
            Some(email) => {
                let email = normalize_email(email);
                if email != user.email {
                    if !valid_email(&email) {
                        return Err(AuthError::validation("invalid email address"));
                    }
                    if self.users.find_by_email(&email).await?.is_some() {
                        return Err(AuthError::conflict("email already in use"));
                    }
                    Some(email)
                } else {
                    None
                }
            }
            None => None,
        };

        let mut outcome = UpdateOutcome::default();

        if let Some(name) = new_name {
            self.users.update_name(user_id, &name).await?;
            outcome.name_updated = true;
        }

        if let Some(email) = pending_email {
            let change_token = token::issue(
                self.tokens.as_ref(),
                TokenPurpose::EmailChange,
                Some(user_id),
                TokenPayload::PendingEmail(email.clone()),
                self.config.email_change_ttl(),
            )
            .await?;

            self.send_email(email::email_change_email(
                self.config.frontend_base_url(),
                &change_token,
                &email,
            ));
            outcome.email_confirmation_sent = true;
        }

        Ok(outcome)
    }

    /// Commit a pending email change. Uniqueness is re-checked at write
    /// time: the address may have been taken since the token was issued.
    #[instrument(skip_all)]
    pub async fn confirm_email_change(&self, token_id: &str) -> AuthResult<()> {
        let Some(redeemed) = token::redeem(
            self.tokens.as_ref(),
            token_id,
            &[TokenPurpose::EmailChange],
        )
        .await?
        else {
            return Err(AuthError::not_found("invalid or expired token"));
        };

        let Some(pending) = redeemed.payload.pending_email() else {
            return Err(AuthError::validation(
                "token does not contain a pending email",
            ));
        };
        let Some(user_id) = redeemed.owner else {
            return Err(AuthError::not_found("user not found"));
        };

        match self.users.commit_email(user_id, pending).await? {
            WriteOutcome::Applied => Ok(()),
            WriteOutcome::Conflict => Err(AuthError::conflict("email already in use")),
            WriteOutcome::Missing => Err(AuthError::not_found("user not found")),
        }
    }

    pub async fn profile(&self, user_id: Uuid) -> AuthResult<Profile> {
        let Some(user) = self.users.find_by_id(user_id).await? else {
            return Err(AuthError::not_found("user not found"));
        };
        Ok(Profile::from(user))
    }

    pub async fn delete_user(&self, user_id: Uuid) -> AuthResult<()> {
        if !self.users.delete_user(user_id).await? {
            return Err(AuthError::not_found("user not found"));
        }
        Ok(())
    }

    /// Switch the active theme to a reserved name or a hex color.
    pub async fn change_theme(&self, user_id: Uuid, new_theme: &str) -> AuthResult<()> {
        if !theme::is_reserved(new_theme) && !theme::valid_hex(new_theme) {
            return Err(AuthError::validation("invalid theme"));
        }
        let Some(user) = self.users.find_by_id(user_id).await? else {
            return Err(AuthError::not_found("user not found"));
        };
        self.users
            .update_themes(user_id, new_theme, &user.custom_themes)
            .await?;
        Ok(())
    }

    pub async fn add_custom_theme(
        &self,
        user_id: Uuid,
        name: &str,
        hex: &str,
    ) -> AuthResult<()> {
        if !theme::valid_hex(hex) {
            return Err(AuthError::validation("invalid hex color format"));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(AuthError::validation("theme name must not be empty"));
        }
        if theme::is_reserved(name) {
            return Err(AuthError::conflict("theme name is reserved"));
        }

        let Some(user) = self.users.find_by_id(user_id).await? else {
            return Err(AuthError::not_found("user not found"));
        };
        if user
            .custom_themes
            .iter()
            .any(|existing| existing.name.eq_ignore_ascii_case(name))
        {
            return Err(AuthError::conflict("theme name already exists"));
        }

        let mut custom_themes = user.custom_themes;
        custom_themes.push(CustomTheme {
            name: name.to_string(),
            hex: hex.to_string(),
        });
        self.users
            .update_themes(user_id, &user.theme, &custom_themes)
            .await?;
        Ok(())
    }

    /// Remove a custom theme; if it was active, fall back to the default.
    /// Returns the active theme after the change.
    pub async fn delete_custom_theme(&self, user_id: Uuid, name: &str) -> AuthResult<String> {
        let Some(user) = self.users.find_by_id(user_id).await? else {
            return Err(AuthError::not_found("user not found"));
        };
        let Some(deleted) = user
            .custom_themes
            .iter()
            .find(|existing| existing.name.eq_ignore_ascii_case(name))
            .cloned()
        else {
            return Err(AuthError::not_found("theme not found"));
        };

        let custom_themes: Vec<CustomTheme> = user
            .custom_themes
            .into_iter()
            .filter(|existing| !existing.name.eq_ignore_ascii_case(name))
            .collect();
        let active = if user.theme == deleted.hex {
            DEFAULT_THEME.to_string()
        } else {
            user.theme
        };
        self.users
            .update_themes(user_id, &active, &custom_themes)
            .await?;
        Ok(active)
    }

    /// Physically drop expired tokens. A periodic hygiene task; never
    /// correctness-critical since reads already treat expired as absent.
    pub async fn purge_expired_tokens(&self) -> AuthResult<u64> {
        Ok(self.tokens.purge_expired().await?)
    }
}

#[async_trait::async_trait]
impl ListSource for UserService {
    /// Flaky server-side read: the fault policy may turn the fetch into a
    /// "no data" miss. Fetches one record beyond the limit so `next_cursor`
    /// is only set when a next page really exists; the cursor is the id of
    /// the last record returned.
    async fn fetch_page(
        &self,
        limit: usize,
        cursor: Option<Uuid>,
    ) -> AuthResult<Option<UserPage>> {
        if self.faults.drop_read() {
            debug!("list read dropped by fault policy");
            return Ok(None);
        }
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let mut records = self.users.list_users(cursor, limit + 1).await?;
        let has_more = records.len() > limit;
        records.truncate(limit);
        let next_cursor = if has_more {
            records.last().map(|user| user.id)
        } else {
            None
        };
        let users = records.into_iter().map(UserSummary::from).collect();
        Ok(Some(UserPage { users, next_cursor }))
    }
}

fn validate_name(name: &str) -> AuthResult<String> {
    let name = name.trim();
    if name.len() < MIN_NAME_LEN || name.len() > MAX_NAME_LEN {
        return Err(AuthError::validation(format!(
            "name must be between {MIN_NAME_LEN} and {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn validate_password(password: &str) -> AuthResult<()> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AuthError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn name_validation_trims_and_bounds() {
        assert_eq!(validate_name("  Alice  ").unwrap(), "Alice");
        assert!(validate_name("x").is_err());
        assert!(validate_name(&"x".repeat(51)).is_err());
    }

    #[test]
    fn password_validation_enforces_minimum_length() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("long enough").is_ok());
    }
}
