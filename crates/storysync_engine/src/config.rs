//! Configuration for the sync engine.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use storysync_protocol::{ProjectDefinition, ProjectKey, UserId};

/// Configuration for syncing one project.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Owning user.
    pub user_id: UserId,
    /// Project to sync.
    pub project: ProjectDefinition,
    /// Server base URL, e.g. `https://sync.example.com`.
    pub server_url: String,
    /// Bearer token sent with every request.
    pub auth_token: Option<String>,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Request timeout.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(user_id: UserId, project: ProjectDefinition, server_url: impl Into<String>) -> Self {
        Self {
            user_id,
            project,
            server_url: server_url.into(),
            auth_token: None,
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the bearer token.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the key of the synced project.
    pub fn key(&self) -> ProjectKey {
        ProjectKey::new(self.user_id, self.project.clone())
    }
}

/// Backoff between attempts of a failed sync pass.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts in total, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay, before jitter.
    pub max_delay: Duration,
    /// Growth factor per retry.
    pub backoff_multiplier: f64,
    /// Extra random delay as a fraction of the base delay (0 disables).
    pub jitter: f64,
}

impl RetryConfig {
    /// Creates a retry configuration with `max_attempts` attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.25,
        }
    }

    /// A single attempt and no delay.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the jitter fraction.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.max(0.0);
        self
    }

    /// Returns the wait before attempt `attempt` (0 is the first attempt).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = (self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent))
            .min(self.max_delay.as_secs_f64());
        let delay = base * (1.0 + self.jitter * jitter_sample());

        Duration::try_from_secs_f64(delay).unwrap_or(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// A value in `[0, 1)` taken from the clock's sub-second part.
fn jitter_sample() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1024) / 1024.0
}
