//! Email delivery collaborator.
//!
//! Delivery is best-effort and fire-and-forget relative to the triggering
//! request: the orchestrator persists its state first, then hands the
//! message to a spawned task that retries with exponential backoff and
//! jitter, logging the final failure. A failed email never rolls back
//! user or token state; the user can simply re-request.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tokio::time::sleep;
use tracing::{error, info};
use url::Url;

mod templates;

pub use templates::{email_change_email, reset_email, verification_email};

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Delivery abstraction: deliver a message or return an error so the
/// delivery task can retry.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs instead of delivering.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            "email delivery stub"
        );
        Ok(())
    }
}

/// Sender backed by a transactional email HTTP API.
pub struct HttpEmailSender {
    client: Client,
    endpoint: Url,
    api_key: SecretString,
    from: String,
}

impl HttpEmailSender {
    pub fn new(endpoint: Url, api_key: SecretString, from: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .build()
            .context("failed to build email http client")?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            from,
        })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let body = json!({
            "sender": { "email": self.from },
            "to": [{ "email": message.to }],
            "subject": message.subject,
            "htmlContent": message.html,
        });
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("email api request failed")?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "email api returned status {}",
                response.status()
            ))
        }
    }
}

/// Retry knobs for the delivery task.
#[derive(Clone, Copy, Debug)]
pub struct DeliveryConfig {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl DeliveryConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    #[must_use]
    pub fn with_backoff_max(mut self, max: Duration) -> Self {
        self.backoff_max = max;
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let max_attempts = self.max_attempts.max(1);
        let backoff_base = if self.backoff_base.is_zero() {
            Duration::from_millis(1)
        } else {
            self.backoff_base
        };
        let backoff_max = if self.backoff_max < backoff_base {
            backoff_base
        } else {
            self.backoff_max
        };
        Self {
            max_attempts,
            backoff_base,
            backoff_max,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Hand a message to a background delivery task and return immediately.
pub fn spawn_delivery(
    sender: Arc<dyn EmailSender>,
    message: EmailMessage,
    config: DeliveryConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = config.normalize();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match sender.send(&message).await {
                Ok(()) => return,
                Err(err) if attempt >= config.max_attempts => {
                    error!(
                        to = %message.to,
                        subject = %message.subject,
                        attempts = attempt,
                        "giving up on email delivery: {err}"
                    );
                    return;
                }
                Err(err) => {
                    let delay = backoff_delay(attempt, config.backoff_base, config.backoff_max);
                    error!(
                        to = %message.to,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "email delivery failed, retrying: {err}"
                    );
                    sleep(delay).await;
                }
            }
        }
    })
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    let capped = if delay > max { max } else { delay };
    jitter_delay(capped)
}

fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySender {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl EmailSender for FlakySender {
        async fn send(&self, _message: &EmailMessage) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(anyhow::anyhow!("transient delivery failure"))
            } else {
                Ok(())
            }
        }
    }

    fn message() -> EmailMessage {
        EmailMessage {
            to: "a@x.com".to_string(),
            subject: "subject".to_string(),
            html: "<p>body</p>".to_string(),
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(400);
        for attempt in 1..=6 {
            let delay = backoff_delay(attempt, base, max);
            assert!(delay <= max);
            assert!(delay >= Duration::from_millis(50));
        }
    }

    #[test]
    fn normalize_repairs_degenerate_config() {
        let config = DeliveryConfig::new()
            .with_max_attempts(0)
            .with_backoff_base(Duration::ZERO)
            .with_backoff_max(Duration::ZERO)
            .normalize();
        assert_eq!(config.max_attempts, 1);
        assert!(!config.backoff_base.is_zero());
        assert!(config.backoff_max >= config.backoff_base);
    }

    #[tokio::test]
    async fn delivery_retries_until_success() {
        let sender = Arc::new(FlakySender {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
        });
        let config = DeliveryConfig::new()
            .with_max_attempts(5)
            .with_backoff_base(Duration::from_millis(1))
            .with_backoff_max(Duration::from_millis(2));
        spawn_delivery(Arc::clone(&sender) as _, message(), config)
            .await
            .unwrap();
        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn delivery_gives_up_after_budget() {
        let sender = Arc::new(FlakySender {
            failures_before_success: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let config = DeliveryConfig::new()
            .with_max_attempts(3)
            .with_backoff_base(Duration::from_millis(1))
            .with_backoff_max(Duration::from_millis(2));
        spawn_delivery(Arc::clone(&sender) as _, message(), config)
            .await
            .unwrap();
        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
    }
}
