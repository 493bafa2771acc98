//! Retry middleware for HTTP requests.
//!
//! [`RetryPolicy`] plugs into [`tower::retry::RetryLayer`]. Tower clones the
//! policy for every request, so the attempt counter below is per-request
//! state and never shared between concurrent traversals.

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tower::retry::Policy;
use tracing::{debug, warn};

use crate::{Error, Request, Response, TransportErrorKind};

/// Default number of re-submissions after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Retry policy for HTTP requests.
///
/// By default, retries:
/// - Connection, timeout and I/O errors
/// - Any 5xx server error
/// - 429 Too Many Requests
///
/// Only requests that are [retry-safe](Request::is_retry_safe) are re-sent.
/// When the budget runs out on a transient failure, the last failure is
/// returned as [`Error::Transport`] carrying the total number of attempts.
///
/// # Example
///
/// ```ignore
/// use tether::middleware::{RetryLayer, RetryPolicy};
///
/// let chain = Chain::builder()
///     .layer(RetryLayer::new(RetryPolicy::new(3)))
///     .build(transport);
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    jitter_ratio: f64,
    attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl RetryPolicy {
    /// Create a new retry policy with the given maximum number of retries.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            jitter_ratio: 0.2,
            attempts: 1,
        }
    }

    /// Set the delay before the first retry and the upper bound for later ones.
    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max.max(base);
        self
    }

    /// Set the jitter ratio, clamped to `0.0..=1.0`.
    #[must_use]
    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Maximum number of re-submissions.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn is_transient(result: &Result<Response<Bytes>, Error>) -> bool {
        match result {
            Ok(response) => matches!(response.status(), 429 | 500..=599),
            Err(error) => error.is_transient(),
        }
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_backoff
            .saturating_mul(1_u32 << exponent)
            .min(self.max_backoff)
    }

    fn apply_jitter(&self, backoff: Duration) -> Duration {
        if self.jitter_ratio <= f64::EPSILON || backoff.is_zero() {
            return backoff;
        }

        let spread = backoff.mul_f64(self.jitter_ratio);
        let low = backoff.saturating_sub(spread);
        let high = backoff.saturating_add(spread).min(self.max_backoff).max(low);
        rand::rng().random_range(low..=high)
    }

    /// `Retry-After` in seconds, when the server sent one on a throttling status.
    fn retry_after(result: &Result<Response<Bytes>, Error>) -> Option<Duration> {
        let response = result.as_ref().ok()?;
        if !matches!(response.status(), 429 | 503) {
            return None;
        }
        response.retry_after()
    }

    fn exhausted(&self, result: &mut Result<Response<Bytes>, Error>) {
        let attempts = self.attempts;
        let failure = match std::mem::replace(result, Err(Error::Cancelled)) {
            Ok(response) => Error::Transport {
                kind: TransportErrorKind::Status(response.status()),
                message: format!("server answered {}", response.status()),
                attempts,
            },
            Err(error) => error.with_attempts(attempts),
        };
        warn!(attempts, error = %failure, "retry budget exhausted");
        *result = Err(failure);
    }
}

impl Policy<Request<Bytes>, Response<Bytes>, Error> for RetryPolicy {
    type Future = Pin<Box<tokio::time::Sleep>>;

    fn retry(
        &mut self,
        req: &mut Request<Bytes>,
        result: &mut Result<Response<Bytes>, Error>,
    ) -> Option<Self::Future> {
        if !Self::is_transient(result) {
            return None;
        }

        if !req.is_retry_safe() {
            debug!(method = %req.method(), "transient failure on a request that is not retry-safe");
            return None;
        }

        if self.attempts > self.max_retries {
            self.exhausted(result);
            return None;
        }

        let retry = self.attempts;
        let mut delay = self.apply_jitter(self.backoff(retry));
        if let Some(retry_after) = Self::retry_after(result) {
            delay = delay.max(retry_after.min(self.max_backoff));
        }

        self.attempts += 1;
        req.set_attempt(self.attempts);

        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        debug!(attempt = self.attempts, delay_ms, url = %req.url(), "retrying request");
        Some(Box::pin(tokio::time::sleep(delay)))
    }

    fn clone_request(&mut self, req: &Request<Bytes>) -> Option<Request<Bytes>> {
        Some(req.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert2::{check, let_assert};

    use super::*;
    use crate::Method;

    fn get() -> Request<Bytes> {
        let url = url::Url::parse("https://graph.microsoft.com/v1.0/me").expect("url");
        Request::builder(Method::GET, url).build()
    }

    fn status(code: u16) -> Result<Response<Bytes>, Error> {
        Ok(Response::new(code, HashMap::default(), Bytes::new()))
    }

    #[test]
    fn retry_policy_new() {
        let policy = RetryPolicy::new(3);
        check!(policy.max_retries() == 3);
        check!(policy.attempts == 1);
    }

    #[test]
    fn transient_statuses() {
        for code in [429, 500, 501, 502, 503, 504, 505, 599] {
            check!(RetryPolicy::is_transient(&status(code)));
        }
        for code in [200, 301, 400, 401, 404, 428, 600] {
            check!(!RetryPolicy::is_transient(&status(code)));
        }
    }

    #[test]
    fn transient_errors() {
        check!(RetryPolicy::is_transient(&Err(Error::connection("reset"))));
        check!(RetryPolicy::is_transient(&Err(Error::timeout())));
        check!(!RetryPolicy::is_transient(&Err(Error::tls("bad cert"))));
        check!(!RetryPolicy::is_transient(&Err(Error::protocol("bad"))));
    }

    #[test]
    fn backoff_grows_until_capped() {
        let policy = RetryPolicy::new(10)
            .with_backoff(Duration::from_millis(100), Duration::from_millis(500))
            .with_jitter(0.0);

        check!(policy.backoff(1) == Duration::from_millis(100));
        check!(policy.backoff(2) == Duration::from_millis(200));
        check!(policy.backoff(3) == Duration::from_millis(400));
        check!(policy.backoff(4) == Duration::from_millis(500));
        check!(policy.backoff(40) == Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = RetryPolicy::new(3)
            .with_backoff(Duration::from_millis(1000), Duration::from_secs(10))
            .with_jitter(0.2);

        for _ in 0..100 {
            let delay = policy.apply_jitter(Duration::from_millis(1000));
            check!(delay >= Duration::from_millis(800));
            check!(delay <= Duration::from_millis(1200));
        }
    }

    #[test]
    fn jitter_saturates_on_unbounded_backoff() {
        let policy = RetryPolicy::new(3)
            .with_backoff(Duration::MAX, Duration::MAX)
            .with_jitter(0.5);

        let delay = policy.apply_jitter(policy.backoff(1));
        check!(delay >= Duration::from_secs(u64::MAX / 4));
    }

    #[tokio::test]
    async fn not_implemented_is_retried_until_exhausted() {
        let mut policy = RetryPolicy::new(1).with_backoff(Duration::ZERO, Duration::ZERO);
        let mut request = get();

        let mut result = status(501);
        check!(policy.retry(&mut request, &mut result).is_some());

        let mut result = status(501);
        check!(policy.retry(&mut request, &mut result).is_none());
        let_assert!(
            Err(Error::Transport {
                kind: TransportErrorKind::Status(501),
                attempts: 2,
                ..
            }) = result
        );
    }

    #[test]
    fn retry_after_is_honored_on_throttling() {
        let mut headers = HashMap::new();
        headers.insert("Retry-After".to_string(), "7".to_string());
        let throttled = Ok(Response::new(429, headers.clone(), Bytes::new()));
        check!(RetryPolicy::retry_after(&throttled) == Some(Duration::from_secs(7)));

        let other = Ok(Response::new(500, headers, Bytes::new()));
        check!(RetryPolicy::retry_after(&other) == None);
    }

    #[tokio::test]
    async fn annotates_attempts_and_exhausts() {
        let mut policy = RetryPolicy::new(2).with_backoff(Duration::ZERO, Duration::ZERO);
        let mut request = get();

        let mut result = status(503);
        check!(policy.retry(&mut request, &mut result).is_some());
        check!(request.attempt() == 2);

        let mut result = status(503);
        check!(policy.retry(&mut request, &mut result).is_some());
        check!(request.attempt() == 3);

        let mut result = status(503);
        check!(policy.retry(&mut request, &mut result).is_none());
        let_assert!(
            Err(Error::Transport {
                kind: TransportErrorKind::Status(503),
                attempts: 3,
                ..
            }) = result
        );
    }

    #[tokio::test]
    async fn exhausted_error_keeps_its_kind() {
        let mut policy = RetryPolicy::new(0);
        let mut request = get();
        let mut result = Err(Error::connection("refused"));

        check!(policy.retry(&mut request, &mut result).is_none());
        let_assert!(Err(error) = result);
        check!(error.is_connection());
        check!(error.attempts() == Some(1));
    }

    #[test]
    fn non_idempotent_requests_are_not_retried() {
        let url = url::Url::parse("https://graph.microsoft.com/v1.0/me/sendMail").expect("url");
        let mut request = Request::builder(Method::POST, url)
            .body(Bytes::from_static(b"{}"))
            .build();
        let mut policy = RetryPolicy::new(3);

        let mut result = status(503);
        check!(policy.retry(&mut request, &mut result).is_none());
        let_assert!(Ok(response) = result);
        check!(response.status() == 503);
    }

    #[test]
    fn success_is_not_retried() {
        let mut policy = RetryPolicy::new(3);
        let mut request = get();
        let mut result = status(200);
        check!(policy.retry(&mut request, &mut result).is_none());
        check!(request.attempt() == 1);
    }
}
