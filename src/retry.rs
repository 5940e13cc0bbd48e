//! Bounded retry with exponential backoff.
//!
//! [`retry`] drives an async operation through at most
//! [`RetryPolicy::max_attempts`] attempts. Each attempt reports whether its
//! failure is worth retrying; the driver owns attempt counting, sleeping and
//! delay growth, and nothing else.
//!
//! # Default policy
//!
//! - 3 attempts
//! - delays 1s, 2s (initial 1s, factor 2.0)
//!
//! # Status classification
//!
//! [`classify_status`] maps an HTTP status to a [`StatusClass`]:
//! - 2xx → success
//! - 5xx → retry
//! - anything else (4xx, unexpected 1xx/3xx) → fail immediately

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq)]
pub enum RetryPolicyError {
    #[error("max_attempts must be >= 1")]
    ZeroAttempts,
    #[error("backoff_factor must be a finite number >= 1.0, got {0}")]
    InvalidBackoffFactor(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs_f64(1.0),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        backoff_factor: f64,
    ) -> Result<Self, RetryPolicyError> {
        if max_attempts == 0 {
            return Err(RetryPolicyError::ZeroAttempts);
        }
        if !backoff_factor.is_finite() || backoff_factor < 1.0 {
            return Err(RetryPolicyError::InvalidBackoffFactor(backoff_factor));
        }
        Ok(Self {
            max_attempts,
            initial_delay,
            backoff_factor,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// The sleeps a fully failing run performs, in order.
    pub fn delays(&self) -> Vec<Duration> {
        let mut delays = Vec::with_capacity(self.max_attempts.saturating_sub(1) as usize);
        let mut delay = self.initial_delay;
        for _ in 1..self.max_attempts {
            delays.push(delay);
            delay = grow(delay, self.backoff_factor);
        }
        delays
    }
}

/// Multiplies `delay` by `factor`, saturating at [`Duration::MAX`].
fn grow(delay: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Retryable,
    Fatal,
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatusClass::Success => "success",
            StatusClass::Retryable => "retryable",
            StatusClass::Fatal => "fatal",
        })
    }
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        500..=u16::MAX => StatusClass::Retryable,
        _ => StatusClass::Fatal,
    }
}

/// Suspends the current task between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[async_trait]
impl<S: Sleeper + ?Sized> Sleeper for Arc<S> {
    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await;
    }
}

/// How a single attempt failed.
#[derive(Debug)]
pub enum AttemptError<E> {
    Retryable(E),
    Fatal(E),
}

#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    #[error(transparent)]
    Fatal(E),
    #[error("gave up after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },
}

/// Runs `op(attempt)` for `attempt = 1..=max_attempts`.
///
/// Returns the first success. A fatal failure ends the run at once. A
/// retryable failure sleeps the current delay and multiplies it by the
/// backoff factor, unless it was the last attempt, in which case the run ends
/// with [`RetryError::Exhausted`] carrying that failure.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError<E>>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Fatal(e)) => return Err(RetryError::Fatal(e)),
            Err(AttemptError::Retryable(e)) => {
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "attempt failed"
                );
                if attempt >= policy.max_attempts {
                    return Err(RetryError::Exhausted { attempts: attempt, last: e });
                }
                sleeper.sleep(delay).await;
                delay = grow(delay, policy.backoff_factor);
                attempt += 1;
            }
        }
    }
}
