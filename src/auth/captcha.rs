//! Arithmetic captcha gate.
//!
//! A challenge is a small arithmetic expression; its answer lives in the
//! token store under the captcha purpose with a short TTL. Verification
//! consumes the challenge whether or not the answer matches, so a solved
//! (or guessed-at) puzzle can never be replayed.

use std::sync::Arc;

use chrono::Duration;
use rand::Rng;
use tracing::debug;

use crate::store::TokenStore;

use super::error::{AuthError, AuthResult};
use super::token::{self, TokenPayload, TokenPurpose};

#[derive(Clone, Debug)]
pub struct CaptchaChallenge {
    /// Bearer id the client echoes back on verify.
    pub challenge_id: String,
    /// Human-readable puzzle, e.g. `7 * 3`. The answer is never included.
    pub puzzle: String,
}

pub struct CaptchaGate {
    store: Arc<dyn TokenStore>,
    ttl: Duration,
}

impl CaptchaGate {
    #[must_use]
    pub fn new(store: Arc<dyn TokenStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Generate a puzzle and store its expected answer.
    pub async fn challenge(&self) -> AuthResult<CaptchaChallenge> {
        let (puzzle, answer) = generate_puzzle(&mut rand::thread_rng());
        let challenge_id = token::issue(
            self.store.as_ref(),
            TokenPurpose::Captcha,
            None,
            TokenPayload::CaptchaAnswer(answer),
            self.ttl,
        )
        .await?;
        Ok(CaptchaChallenge {
            challenge_id,
            puzzle,
        })
    }

    /// Check an answer against a live challenge, consuming it.
    ///
    /// Reads the expected answer first, then redeems; the redeem is the
    /// at-most-once step, so of two concurrent verifies at most one can
    /// reach the comparison.
    pub async fn verify(&self, challenge_id: &str, answer: i64) -> AuthResult<()> {
        let Some(pending) = token::peek(self.store.as_ref(), challenge_id).await? else {
            debug!("captcha challenge missing or expired");
            return Err(AuthError::CaptchaInvalid);
        };
        let Some(expected) = pending.payload.captcha_answer() else {
            debug!("token presented as captcha has no answer payload");
            return Err(AuthError::CaptchaInvalid);
        };
        // Consume before comparing: a wrong answer burns the challenge too.
        if token::redeem(self.store.as_ref(), challenge_id, &[TokenPurpose::Captcha])
            .await?
            .is_none()
        {
            return Err(AuthError::CaptchaInvalid);
        }
        if expected == answer {
            Ok(())
        } else {
            Err(AuthError::CaptchaInvalid)
        }
    }
}

/// Small-integer puzzle: operands 1..=10, operators `+ - *`.
fn generate_puzzle<R: Rng>(rng: &mut R) -> (String, i64) {
    let a = rng.gen_range(1..=10i64);
    let b = rng.gen_range(1..=10i64);
    let (op, answer) = match rng.gen_range(0..3) {
        0 => ('+', a + b),
        1 => ('-', a - b),
        _ => ('*', a * b),
    };
    (format!("{a} {op} {b}"), answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use rand::rngs::mock::StepRng;

    fn gate(ttl: Duration) -> (CaptchaGate, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (CaptchaGate::new(Arc::clone(&store) as _, ttl), store)
    }

    #[test]
    fn puzzle_answers_are_consistent() {
        let mut rng = StepRng::new(0, 1);
        for _ in 0..50 {
            let (puzzle, answer) = generate_puzzle(&mut rng);
            let parts: Vec<&str> = puzzle.split_whitespace().collect();
            let a: i64 = parts[0].parse().unwrap();
            let b: i64 = parts[2].parse().unwrap();
            let expected = match parts[1] {
                "+" => a + b,
                "-" => a - b,
                "*" => a * b,
                other => panic!("unexpected operator {other}"),
            };
            assert_eq!(answer, expected);
            assert!((1..=10).contains(&a));
            assert!((1..=10).contains(&b));
        }
    }

    #[tokio::test]
    async fn verify_consumes_the_challenge() {
        let (gate, store) = gate(Duration::minutes(5));
        let challenge = gate.challenge().await.unwrap();

        // Recover the expected answer through the store to solve honestly.
        let hash = super::super::token::hash_token_id(&challenge.challenge_id);
        let answer = store
            .peek(&hash)
            .await
            .unwrap()
            .unwrap()
            .payload
            .captcha_answer()
            .unwrap();

        gate.verify(&challenge.challenge_id, answer).await.unwrap();

        // Replay of the solved challenge fails.
        assert!(matches!(
            gate.verify(&challenge.challenge_id, answer).await,
            Err(AuthError::CaptchaInvalid)
        ));
    }

    #[tokio::test]
    async fn wrong_answer_fails_and_burns() {
        let (gate, store) = gate(Duration::minutes(5));
        let challenge = gate.challenge().await.unwrap();

        let hash = super::super::token::hash_token_id(&challenge.challenge_id);
        let answer = store
            .peek(&hash)
            .await
            .unwrap()
            .unwrap()
            .payload
            .captcha_answer()
            .unwrap();

        assert!(matches!(
            gate.verify(&challenge.challenge_id, answer + 1).await,
            Err(AuthError::CaptchaInvalid)
        ));
        // Even the right answer no longer works; the challenge is gone.
        assert!(matches!(
            gate.verify(&challenge.challenge_id, answer).await,
            Err(AuthError::CaptchaInvalid)
        ));
    }

    #[tokio::test]
    async fn expired_challenge_never_verifies() {
        let (gate, store) = gate(Duration::seconds(-1));
        let challenge = gate.challenge().await.unwrap();
        assert!(matches!(
            gate.verify(&challenge.challenge_id, 0).await,
            Err(AuthError::CaptchaInvalid)
        ));
        // The record still exists physically until purged.
        assert_eq!(store.token_count().await, 1);
    }
}
