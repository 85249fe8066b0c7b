//! Retry logic for provider calls.
//!
//! Errors from opening a model stream are sorted into transient failures,
//! which are retried with exponential backoff and jitter, and everything
//! else, which is returned to the caller on the first occurrence.

use anyhow::Result;
use quill_providers::ApiError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10_000);

/// Fraction of the backoff that may be added or removed at random.
const JITTER_FACTOR: f64 = 0.3;

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorType {
    Recoverable(RecoverableError),
    NonRecoverable,
}

/// Transient failure kinds worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverableError {
    RateLimit,
    NetworkError,
    /// HTTP 5xx
    ServerError,
    ModelBusy,
    Timeout,
}

/// Lowercase phrases that mark each transient kind, checked in order.
const TRANSIENT_PHRASES: &[(RecoverableError, &[&str])] = &[
    (RecoverableError::RateLimit, &["rate limit", "rate_limit", "too many requests"]),
    (
        RecoverableError::NetworkError,
        &["network", "connection", "dns", "refused"],
    ),
    (
        RecoverableError::ServerError,
        &["server error", "internal error", "bad gateway"],
    ),
    (
        RecoverableError::ModelBusy,
        &["busy", "overloaded", "capacity", "unavailable"],
    ),
    (RecoverableError::Timeout, &["timeout", "timed out"]),
];

fn kind_for_status(status: u16) -> Option<RecoverableError> {
    match status {
        429 => Some(RecoverableError::RateLimit),
        408 => Some(RecoverableError::Timeout),
        503 | 529 => Some(RecoverableError::ModelBusy),
        500..=599 => Some(RecoverableError::ServerError),
        _ => None,
    }
}

/// Three-digit numbers standing on their own in `message`, so `1500` or
/// `v4290` never read as a status code.
fn status_codes(message: &str) -> impl Iterator<Item = u16> + '_ {
    message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| word.len() == 3)
        .filter_map(|word| word.parse().ok())
}

/// Sort an error into recoverable or not.
///
/// An [`ApiError`] is judged by its HTTP status alone. Other errors are
/// judged by their message: a standalone 429/408/5xx code first, then
/// known phrases.
pub fn classify_error(error: &anyhow::Error) -> ErrorType {
    if let Some(api) = error.downcast_ref::<ApiError>() {
        return kind_for_status(api.status).map_or(ErrorType::NonRecoverable, ErrorType::Recoverable);
    }

    let message = error.to_string().to_lowercase();
    let kind = status_codes(&message)
        .find_map(kind_for_status)
        .or_else(|| {
            TRANSIENT_PHRASES
                .iter()
                .find(|(_, phrases)| phrases.iter().any(|p| message.contains(p)))
                .map(|(kind, _)| *kind)
        })
        .map_or(ErrorType::NonRecoverable, ErrorType::Recoverable);
    kind
}

/// How many times to attempt an operation and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Retries on top of the initial attempt, as configured in `[agent]`.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            ..Self::default()
        }
    }
}

/// Wait before attempt `attempt + 1`: `base_delay * 2^(attempt - 1)`, capped
/// at `max_delay`, then moved up or down by up to 30%.
pub fn calculate_retry_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let doublings = attempt.saturating_sub(1).min(16);
    let backoff = policy
        .base_delay
        .saturating_mul(1 << doublings)
        .min(policy.max_delay);

    let mut rng = rand::thread_rng();
    let spread = backoff.mul_f64(JITTER_FACTOR * rng.gen::<f64>());
    if rng.gen_bool(0.5) {
        backoff + spread
    } else {
        backoff.saturating_sub(spread)
    }
}

/// Run `operation` until it succeeds, fails with a non-recoverable error, or
/// uses up `policy.max_attempts`. The last error is returned unchanged.
pub async fn retry_with_backoff<F, Fut, T>(
    label: &str,
    mut operation: F,
    policy: &RetryPolicy,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let limit = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} recovered on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        let kind = match classify_error(&err) {
            ErrorType::Recoverable(kind) => kind,
            ErrorType::NonRecoverable => {
                error!("{} failed permanently: {}", label, err);
                return Err(err);
            }
        };

        if attempt >= limit {
            error!("{} still failing after {} attempt(s): {}", label, attempt, err);
            return Err(err);
        }

        let wait = calculate_retry_delay(attempt, policy);
        warn!(
            "{} hit {:?} on attempt {}/{}, next try in {:?}: {}",
            label, kind, attempt, limit, wait, err
        );
        tokio::time::sleep(wait).await;
    }
}
