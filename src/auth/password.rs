//! One-way credential hashing.
//!
//! The contract is deliberately small: a hasher produces a salted,
//! cost-parameterized digest and verifies a plaintext against one. Any
//! transport-level encoding of the password is decoded before it reaches
//! this module; the hasher never sees or assumes an encoding.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher as _, PasswordVerifier as _,
};

/// Contract a password hasher must satisfy.
pub trait CredentialHasher: Send + Sync {
    /// Produce a randomized, salted digest at interactive cost.
    fn hash(&self, plaintext: &str) -> Result<String>;

    /// Check a plaintext against a stored digest. A malformed digest is a
    /// verification failure, not an error.
    fn verify(&self, plaintext: &str, digest: &str) -> bool;
}

/// Argon2id hasher with the library's default interactive parameters.
#[derive(Clone, Debug, Default)]
pub struct Argon2Hasher;

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|digest| digest.to_string())
            .map_err(|err| anyhow!("failed to hash password: {err}"))
    }

    fn verify(&self, plaintext: &str, digest: &str) -> bool {
        PasswordHash::new(digest).is_ok_and(|parsed| {
            Argon2::default()
                .verify_password(plaintext.as_bytes(), &parsed)
                .is_ok()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_round_trips() {
        let hasher = Argon2Hasher;
        let digest = hasher.hash("correct horse battery staple").unwrap();
        assert!(hasher.verify("correct horse battery staple", &digest));
        assert!(!hasher.verify("wrong password", &digest));
    }

    #[test]
    fn hashes_are_salted() {
        let hasher = Argon2Hasher;
        let first = hasher.hash("p1").unwrap();
        let second = hasher.hash("p1").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn malformed_digest_fails_verification() {
        let hasher = Argon2Hasher;
        assert!(!hasher.verify("p1", "not-a-phc-string"));
        assert!(!hasher.verify("p1", ""));
    }
}
