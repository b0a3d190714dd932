//! Cursor-paginated user listing and the caller-side retry wrapper.
//!
//! The read side is deliberately unreliable: an injectable [`FaultPolicy`]
//! can turn any page fetch into a "no data" miss, modeling a flaky
//! upstream. A miss is a contractual try-again signal, not an error; it
//! only becomes one after [`RetryingListClient`] exhausts its bounded
//! attempt budget. A legitimately empty page is not a miss.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::time::sleep;
use tracing::debug;
use uuid::Uuid;

use crate::store::UserRecord;

use super::error::{AuthError, AuthResult};

/// Listing projection: never exposes the password hash or session set.
#[derive(Clone, Debug, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub is_verified: bool,
    pub theme: String,
    pub created_at: DateTime<Utc>,
}

impl From<UserRecord> for UserSummary {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            is_verified: user.is_verified,
            theme: user.theme,
            created_at: user.created_at,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct UserPage {
    pub users: Vec<UserSummary>,
    /// Present only when the store returned one record beyond the
    /// requested limit, i.e. there really is a next page.
    pub next_cursor: Option<Uuid>,
}

/// Decides whether a given read is dropped. Injectable so tests can force
/// both branches deterministically instead of relying on randomness.
pub trait FaultPolicy: Send + Sync {
    fn drop_read(&self) -> bool;
}

/// Production policy: drop a fraction of reads at random.
#[derive(Clone, Debug)]
pub struct CoinFlipFaults {
    rate: f64,
}

impl CoinFlipFaults {
    #[must_use]
    pub fn new(rate: f64) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
        }
    }
}

impl FaultPolicy for CoinFlipFaults {
    fn drop_read(&self) -> bool {
        rand::thread_rng().gen_bool(self.rate)
    }
}

#[derive(Clone, Debug)]
pub struct NoFaults;

impl FaultPolicy for NoFaults {
    fn drop_read(&self) -> bool {
        false
    }
}

/// Anything that can serve a page, or signal a transient miss with
/// `Ok(None)`.
#[async_trait]
pub trait ListSource: Send + Sync {
    async fn fetch_page(&self, limit: usize, cursor: Option<Uuid>)
        -> AuthResult<Option<UserPage>>;
}

#[async_trait]
impl<S: ListSource + ?Sized> ListSource for Arc<S> {
    async fn fetch_page(
        &self,
        limit: usize,
        cursor: Option<Uuid>,
    ) -> AuthResult<Option<UserPage>> {
        self.as_ref().fetch_page(limit, cursor).await
    }
}

/// Retry knobs for the caller-side wrapper. Delays are fixed per attempt
/// and capped so a retry loop can never wait unboundedly.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(attempts: u32, delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay: delay.min(max_delay),
            max_delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200), Duration::from_secs(2))
    }
}

/// Caller-side wrapper over a flaky list read.
pub struct RetryingListClient<S> {
    source: S,
    policy: RetryPolicy,
}

impl<S: ListSource> RetryingListClient<S> {
    #[must_use]
    pub fn new(source: S, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    /// Fetch one page, retrying "no data" misses up to the attempt budget.
    /// Real errors propagate immediately; only misses are retried.
    pub async fn fetch(&self, limit: usize, cursor: Option<Uuid>) -> AuthResult<UserPage> {
        let attempts = self.policy.attempts;
        for attempt in 1..=attempts {
            match self.source.fetch_page(limit, cursor).await? {
                Some(page) => return Ok(page),
                None => {
                    debug!(attempt, "list read returned no data");
                    if attempt < attempts {
                        sleep(self.policy.delay.min(self.policy.max_delay)).await;
                    }
                }
            }
        }
        Err(AuthError::Transient {
            attempts,
            source: anyhow!("listing upstream returned no data"),
        })
    }

    /// Follow `next_cursor` until exhaustion. Yields the full, ID-ordered,
    /// duplicate-free set of users that existed at scan start (absent
    /// concurrent deletes).
    pub async fn fetch_all(&self, page_size: usize) -> AuthResult<Vec<UserSummary>> {
        let mut out = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.fetch(page_size, cursor).await?;
            out.extend(page.users);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(out),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Source that misses a fixed number of times, then serves one page.
    struct ScriptedSource {
        misses: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ListSource for ScriptedSource {
        async fn fetch_page(
            &self,
            _limit: usize,
            _cursor: Option<Uuid>,
        ) -> AuthResult<Option<UserPage>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.misses {
                Ok(None)
            } else {
                Ok(Some(UserPage {
                    users: Vec::new(),
                    next_cursor: None,
                }))
            }
        }
    }

    fn quick_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn retries_misses_then_succeeds() {
        let client = RetryingListClient::new(
            ScriptedSource {
                misses: 2,
                calls: AtomicU32::new(0),
            },
            quick_policy(3),
        );
        let page = client.fetch(10, None).await.unwrap();
        assert!(page.users.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn exhausted_budget_surfaces_transient_error() {
        let client = RetryingListClient::new(
            ScriptedSource {
                misses: u32::MAX,
                calls: AtomicU32::new(0),
            },
            quick_policy(3),
        );
        match client.fetch(10, None).await {
            Err(AuthError::Transient { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected transient error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_page_is_not_retried() {
        let source = ScriptedSource {
            misses: 0,
            calls: AtomicU32::new(0),
        };
        let client = RetryingListClient::new(source, quick_policy(5));
        client.fetch(10, None).await.unwrap();
        assert_eq!(client.source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn coin_flip_rate_is_clamped() {
        assert!(!CoinFlipFaults::new(-1.0).drop_read());
        assert!(CoinFlipFaults::new(2.0).drop_read());
        assert!(!NoFaults.drop_read());
    }

    #[test]
    fn retry_policy_repairs_degenerate_values() {
        let policy = RetryPolicy::new(0, Duration::from_secs(60), Duration::from_millis(10));
        assert_eq!(policy.attempts, 1);
        assert!(policy.delay <= policy.max_delay);
    }
}
