use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::{FireError, Result};

/// Upper bound on `max_attempts` accepted by [`RetryPolicy::new`].
pub const MAX_ATTEMPTS_LIMIT: u32 = 1000;

/// Statuses retried by default.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

type BackoffFn = dyn Fn(u32) -> i64 + Send + Sync;

/// Delay schedule between consecutive attempts of one dispatch.
#[derive(Clone)]
pub enum Backoff {
    /// Same delay after every failed attempt.
    Fixed(Duration),
    /// `initial + step * attempt_index`.
    Linear { initial: Duration, step: Duration },
    /// `base * 2^attempt_index`, capped at `max`.
    Exponential { base: Duration, max: Duration },
    /// Caller-supplied delay in milliseconds. A negative value is rejected
    /// when the policy is built.
    Custom(Arc<BackoffFn>),
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            Self::Linear { initial, step } => f
                .debug_struct("Linear")
                .field("initial", initial)
                .field("step", step)
                .finish(),
            Self::Exponential { base, max } => f
                .debug_struct("Exponential")
                .field("base", base)
                .field("max", max)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed(delay)
    }

    pub fn linear(initial: Duration, step: Duration) -> Self {
        Self::Linear { initial, step }
    }

    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self::Exponential { base, max }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32) -> i64 + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Computes the delay following the failed attempt `attempt_index`.
    pub fn delay(&self, attempt_index: u32) -> Result<Duration> {
        match self {
            Self::Fixed(delay) => Ok(*delay),
            Self::Linear { initial, step } => {
                Ok(initial.saturating_add(step.saturating_mul(attempt_index)))
            }
            Self::Exponential { base, max } => {
                let exp = attempt_index.min(16);
                Ok(base.saturating_mul(1u32 << exp).min(*max))
            }
            Self::Custom(f) => {
                let millis = f(attempt_index);
                u64::try_from(millis).map(Duration::from_millis).map_err(|_| {
                    FireError::InvalidPolicy(format!(
                        "backoff for attempt {attempt_index} is negative ({millis} ms)"
                    ))
                })
            }
        }
    }
}

/// Bounded attempt count, per-attempt deadline and backoff schedule.
///
/// The backoff schedule is evaluated for every attempt index once, when the
/// policy is built, so a dispatch never meets an invalid delay mid-flight.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    per_attempt_timeout: Duration,
    schedule: Arc<[Duration]>,
    retryable_statuses: BTreeSet<u16>,
}

impl RetryPolicy {
    /// Builds a validated policy.
    ///
    /// Fails with [`FireError::InvalidPolicy`] when `max_attempts` is zero or
    /// above [`MAX_ATTEMPTS_LIMIT`], when `per_attempt_timeout` is zero, or
    /// when the backoff yields a negative delay for any index in range.
    pub fn new(max_attempts: u32, per_attempt_timeout: Duration, backoff: Backoff) -> Result<Self> {
        if max_attempts == 0 {
            return Err(FireError::InvalidPolicy(
                "max_attempts must be at least 1".to_owned(),
            ));
        }
        if max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(FireError::InvalidPolicy(format!(
                "max_attempts cannot be greater than {MAX_ATTEMPTS_LIMIT}"
            )));
        }
        if per_attempt_timeout.is_zero() {
            return Err(FireError::InvalidPolicy(
                "per-attempt timeout must be greater than 0".to_owned(),
            ));
        }

        let schedule = (0..max_attempts - 1)
            .map(|index| backoff.delay(index))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            max_attempts,
            per_attempt_timeout,
            schedule: schedule.into(),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.into_iter().collect(),
        })
    }

    /// Policy used by the UI invocation surface: `max_attempts` total
    /// attempts, `timeout_ms` per attempt, and a fixed backoff of a tenth of
    /// the timeout (at least 1 ms).
    pub fn from_timeout_ms(max_attempts: u32, timeout_ms: u64) -> Result<Self> {
        let backoff = Duration::from_millis((timeout_ms / 10).max(1));
        Self::new(
            max_attempts,
            Duration::from_millis(timeout_ms),
            Backoff::fixed(backoff),
        )
    }

    /// Replaces the set of HTTP statuses treated as transient failures.
    pub fn with_retryable_statuses<I>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.retryable_statuses = statuses.into_iter().collect();
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn per_attempt_timeout(&self) -> Duration {
        self.per_attempt_timeout
    }

    /// Delay to wait after the failed attempt `attempt_index`.
    ///
    /// Indices past the last retry map to zero; no attempt follows them.
    pub fn backoff(&self, attempt_index: u32) -> Duration {
        self.schedule
            .get(attempt_index as usize)
            .copied()
            .unwrap_or_default()
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            per_attempt_timeout: Duration::from_millis(10_000),
            schedule: Arc::from(Vec::new()),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.into_iter().collect(),
        }
    }
}
