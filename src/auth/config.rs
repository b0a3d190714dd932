//! Lifecycle engine configuration.

use chrono::Duration;

const DEFAULT_VERIFICATION_TTL_HOURS: i64 = 24;
const DEFAULT_RESET_TTL_HOURS: i64 = 1;
const DEFAULT_EMAIL_CHANGE_TTL_HOURS: i64 = 1;
const DEFAULT_CAPTCHA_TTL_MINUTES: i64 = 5;
const DEFAULT_SESSION_TTL_DAYS: i64 = 7;

/// Token TTLs and the frontend base URL used to build email links.
///
/// The session TTL is the JWT expiry horizon only; early invalidation goes
/// through the session allowlist, never through signature expiry.
#[derive(Clone, Debug)]
pub struct AppConfig {
    frontend_base_url: String,
    verification_ttl: Duration,
    reset_ttl: Duration,
    email_change_ttl: Duration,
    captcha_ttl: Duration,
    session_ttl: Duration,
}

impl AppConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            verification_ttl: Duration::hours(DEFAULT_VERIFICATION_TTL_HOURS),
            reset_ttl: Duration::hours(DEFAULT_RESET_TTL_HOURS),
            email_change_ttl: Duration::hours(DEFAULT_EMAIL_CHANGE_TTL_HOURS),
            captcha_ttl: Duration::minutes(DEFAULT_CAPTCHA_TTL_MINUTES),
            session_ttl: Duration::days(DEFAULT_SESSION_TTL_DAYS),
        }
    }

    #[must_use]
    pub fn with_verification_ttl(mut self, ttl: Duration) -> Self {
        self.verification_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_reset_ttl(mut self, ttl: Duration) -> Self {
        self.reset_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_email_change_ttl(mut self, ttl: Duration) -> Self {
        self.email_change_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_captcha_ttl(mut self, ttl: Duration) -> Self {
        self.captcha_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn verification_ttl(&self) -> Duration {
        self.verification_ttl
    }

    #[must_use]
    pub fn reset_ttl(&self) -> Duration {
        self.reset_ttl
    }

    #[must_use]
    pub fn email_change_ttl(&self) -> Duration {
        self.email_change_ttl
    }

    #[must_use]
    pub fn captcha_ttl(&self) -> Duration {
        self.captcha_ttl
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_horizons() {
        let config = AppConfig::new("https://panel.example".to_string());
        assert_eq!(config.verification_ttl(), Duration::hours(24));
        assert_eq!(config.reset_ttl(), Duration::hours(1));
        assert_eq!(config.captcha_ttl(), Duration::minutes(5));
        assert_eq!(config.session_ttl(), Duration::days(7));
    }

    #[test]
    fn builders_override_defaults() {
        let config = AppConfig::new("https://panel.example".to_string())
            .with_captcha_ttl(Duration::seconds(30))
            .with_session_ttl(Duration::hours(1));
        assert_eq!(config.captcha_ttl(), Duration::seconds(30));
        assert_eq!(config.session_ttl(), Duration::hours(1));
    }
}
