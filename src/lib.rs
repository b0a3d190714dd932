//! # Pannello (user management backend)
//!
//! `pannello` is a user-management backend. Its core is the credential and
//! session lifecycle engine: a unified ephemeral-token model backing
//! registration, email verification, password reset, email-change
//! confirmation and captcha gating, combined with a per-user session
//! allowlist that makes signed JWTs individually revocable.
//!
//! ## Tokens
//!
//! Every short-lived secret (verification link, reset link, email-change
//! confirmation, captcha challenge) is a single ephemeral token type with a
//! purpose discriminant. Tokens are single-use: redemption deletes the
//! record atomically, and expired tokens are treated as nonexistent on read
//! even before the background purge removes them. Only token hashes are
//! stored; raw values are handed to the user exactly once.
//!
//! ## Sessions
//!
//! Logins mint a random `jti` recorded in the user's `active_sessions` set
//! and embedded in an HS256 JWT. A token is only accepted while its `jti`
//! is still in the set, so a single device can be logged out without
//! rotating the signing key or touching other sessions.
//!
//! ## Collaborators
//!
//! Persistence ([`store::UserStore`], [`store::TokenStore`]) and email
//! delivery ([`email::EmailSender`]) sit behind traits; the crate ships an
//! in-memory store for tests and local development and a Postgres store for
//! production.

pub mod api;
pub mod auth;
pub mod cli;
pub mod email;
pub mod store;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_contains_name_and_version() {
        assert!(APP_USER_AGENT.starts_with("pannello/"));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
