//! Error taxonomy for the lifecycle engine.
//!
//! Every state-mutating failure aborts the whole operation before any
//! partial write. Login and session failures collapse into a single
//! generic [`AuthError::Authentication`] so callers cannot tell whether an
//! email exists, a user is unverified, or a password is wrong.

use thiserror::Error;

pub type AuthResult<T> = std::result::Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed input, rejected before touching state.
    #[error("{0}")]
    Validation(String),

    /// Captcha missing, expired, replayed, or answered incorrectly.
    #[error("invalid or expired captcha")]
    CaptchaInvalid,

    /// Bad credentials or an invalid/revoked session. Deliberately does not
    /// say which check failed.
    #[error("invalid credentials")]
    Authentication,

    /// Duplicate email or theme name. Safe to reveal.
    #[error("{0}")]
    Conflict(String),

    /// Missing token, theme, or user. Safe to reveal except where it would
    /// leak account existence; those paths use [`AuthError::Authentication`]
    /// or an outward no-op instead.
    #[error("{0}")]
    NotFound(String),

    /// A flaky read gave up after exhausting its retry budget. Carries the
    /// last cause.
    #[error("no data after {attempts} attempts")]
    Transient {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// Persistence collaborator failure.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl AuthError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}
