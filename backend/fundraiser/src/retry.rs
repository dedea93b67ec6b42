//! Bounded exponential back-off for outbound HTTP calls.
//!
//! Each attempt reports whether its failure is worth retrying. Transient
//! failures (connection reset, timeout, 429, 5xx) are retried until the
//! budget runs out; anything else is returned immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries + 1,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }

    #[cfg(test)]
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries + 1,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }
}

/// Outcome of a single failed attempt.
#[derive(Debug)]
pub enum Attempt<E> {
    Transient(E),
    Fatal(E),
}

/// Why [`with_backoff`] gave up.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// A non-retryable failure.
    Fatal(E),
    /// Every attempt failed transiently; holds the last error.
    Exhausted { attempts: u32, last: E },
}

pub async fn with_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Attempt<E>>>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(Attempt::Fatal(e)) => return Err(RetryError::Fatal(e)),
            Err(Attempt::Transient(e)) => {
                if attempt >= policy.max_attempts {
                    return Err(RetryError::Exhausted { attempts: attempt, last: e });
                }
                warn!(
                    "{what} failed (attempt {attempt}/{}), retrying in {backoff:?}: {e}",
                    policy.max_attempts
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
                attempt += 1;
            }
        }
    }
}

/// Classify a transport-level `reqwest` failure.
pub fn classify_transport(e: reqwest::Error) -> Attempt<String> {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        Attempt::Transient(e.to_string())
    } else {
        Attempt::Fatal(e.to_string())
    }
}

/// Classify an HTTP status that was not a success.
pub fn classify_status(status: reqwest::StatusCode, body: &str) -> Attempt<String> {
    let msg = format!("HTTP {status}: {body}");
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Attempt::Transient(msg)
    } else {
        Attempt::Fatal(msg)
    }
}
