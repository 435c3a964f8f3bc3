use crate::config::env_parse;
use crate::domain::errors::BrowserError;
use std::time::Duration;

/// Bounded retry for intercepted fetches and page loads.
///
/// Absence of a response is the common retryable outcome. Browser errors are
/// retried only when they are transient (a timed out DevTools call or a
/// missing element while the page is still rendering); a lost connection or a
/// closed page never is.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub retry_on_absence: bool,
    pub retry_on_transient_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            retry_on_absence: true,
            retry_on_transient_errors: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: env_parse("RUSTCHASE_FETCH_ATTEMPTS", defaults.max_attempts).max(1),
            initial_backoff: Duration::from_millis(env_parse(
                "RUSTCHASE_FETCH_BACKOFF_MS",
                defaults.initial_backoff.as_millis() as u64,
            )),
            ..defaults
        }
    }

    /// Single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn without_backoff(mut self) -> Self {
        self.initial_backoff = Duration::ZERO;
        self.max_backoff = Duration::ZERO;
        self
    }

    /// Pause before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let scaled = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(scaled.min(self.max_backoff.as_secs_f64()).max(0.0))
    }

    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn is_retryable(&self, error: &BrowserError) -> bool {
        self.retry_on_transient_errors
            && matches!(
                error,
                BrowserError::Timeout { .. } | BrowserError::ElementNotFound { .. }
            )
    }
}
