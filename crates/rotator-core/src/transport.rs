use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};

use crate::error::TransportError;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Immutable retry policy shared by every concurrent caller.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 3 retries means 4 attempts total.
    pub max_retries: u32,
    /// Delay before retry k (1-indexed) is `base_delay * 2^(k-1)`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, retry: u32) -> Duration {
        debug_assert!(retry >= 1);
        self.base_delay * (1u32 << (retry - 1).min(16))
    }
}

/// Statuses retried as transient: throttling and upstream failures.
const RETRIABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

// ---------------------------------------------------------------------------
// RetryingTransport
// ---------------------------------------------------------------------------

/// HTTP client wrapper that retries transient failures with bounded
/// exponential backoff.
///
/// Connection failures, per-request timeouts, and the statuses in
/// [`RETRIABLE_STATUSES`] are retried; every other response is returned to
/// the caller untouched after zero retries. The underlying connection pool
/// is shared, so this is cheap to clone and safe to use from many tasks.
#[derive(Debug, Clone)]
pub struct RetryingTransport {
    client: Client,
    policy: RetryPolicy,
}

impl RetryingTransport {
    pub fn new(policy: RetryPolicy, request_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(TransportError::InvalidRequest)?;
        Ok(Self { client, policy })
    }

    /// Access the shared client to build requests against it.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send a request, retrying per policy. The builder is cloned for each
    /// attempt, so requests with streaming bodies are rejected up front.
    pub async fn execute(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        let mut attempt: u32 = 1;
        loop {
            let builder = request
                .try_clone()
                .ok_or(TransportError::UnclonableRequest)?;

            let failure = match builder.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if !RETRIABLE_STATUSES.contains(&status) {
                        return Ok(resp);
                    }
                    AttemptFailure::Status(status)
                }
                // A timed-out attempt counts as a connection failure.
                Err(e) if e.is_connect() || e.is_timeout() => AttemptFailure::Connection(e),
                Err(e) => return Err(TransportError::InvalidRequest(e)),
            };

            if attempt > self.policy.max_retries {
                return Err(match failure {
                    AttemptFailure::Status(status) => TransportError::StatusExhausted {
                        status,
                        attempts: attempt,
                    },
                    AttemptFailure::Connection(source) => TransportError::ConnectionExhausted {
                        attempts: attempt,
                        source,
                    },
                });
            }

            let delay = self.policy.backoff(attempt);
            match &failure {
                AttemptFailure::Status(status) => tracing::warn!(
                    status,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retriable status, backing off"
                ),
                AttemptFailure::Connection(e) => tracing::warn!(
                    error = %e,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "connection failure, backing off"
                ),
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

enum AttemptFailure {
    Status(u16),
    Connection(reqwest::Error),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
