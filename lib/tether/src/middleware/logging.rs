//! Request/response logging middleware.
//!
//! Opens one `http_request` span per traversal and emits a completion event
//! with the elapsed time. Placed outermost, it sees the final outcome after
//! retries and redirects.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use tower::{Layer, Service};
use tracing::{Instrument, Level, debug, info, span, warn};

use crate::{Error, Request, Response, Result};

/// Headers whose values never reach the log.
const REDACTED_HEADERS: [&str; 3] = ["authorization", "cookie", "proxy-authorization"];

/// Layer that adds request/response logging.
///
/// # Example
///
/// ```ignore
/// use tether::ClientBuilder;
/// use tether::middleware::LoggingLayer;
///
/// let client = ClientBuilder::new()
///     .authentication_provider(provider)
///     .layer(LoggingLayer::verbose())
///     .build()?;
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingLayer {
    verbosity: Verbosity,
}

/// How much of each exchange the logging middleware reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verbosity {
    /// Method, URL, status and elapsed time.
    #[default]
    Summary,
    /// Summary plus request headers (credentials redacted) at debug level.
    Headers,
}

impl LoggingLayer {
    /// Create a new logging layer that logs summaries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a logging layer that also logs request headers.
    #[must_use]
    pub fn verbose() -> Self {
        Self {
            verbosity: Verbosity::Headers,
        }
    }
}

impl<S> Layer<S> for LoggingLayer {
    type Service = Logging<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Logging {
            inner,
            verbosity: self.verbosity,
        }
    }
}

/// Service that logs requests and responses.
#[derive(Debug, Clone)]
pub struct Logging<S> {
    inner: S,
    verbosity: Verbosity,
}

fn redacted_headers(request: &Request<Bytes>) -> BTreeMap<&str, &str> {
    request
        .headers()
        .iter()
        .map(|(name, value)| {
            if REDACTED_HEADERS.contains(&name.as_str()) {
                (name.as_str(), "<redacted>")
            } else {
                (name.as_str(), value.as_str())
            }
        })
        .collect()
}

impl<S> Service<Request<Bytes>> for Logging<S>
where
    S: Service<Request<Bytes>, Response = Response<Bytes>, Error = Error> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Bytes>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Bytes>) -> Self::Future {
        let method = request.method().clone();
        let url = request.url().to_string();
        let request_id = request.header("client-request-id").unwrap_or_default().to_string();

        let span = span!(Level::INFO, "http_request", %method, %url, %request_id);

        if self.verbosity == Verbosity::Headers {
            let headers = redacted_headers(&request);
            span.in_scope(|| debug!(?headers, "sending request"));
        } else {
            span.in_scope(|| info!("sending request"));
        }

        // Swap in the clone so the instance that was polled ready is the one called.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = inner.call(request).await;
                let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

                match &result {
                    Ok(response) if response.is_success() || response.is_redirection() => {
                        info!(status = response.status(), elapsed_ms, "request completed");
                    }
                    Ok(response) => {
                        warn!(status = response.status(), elapsed_ms, "request failed with HTTP error");
                    }
                    Err(err) => {
                        warn!(error = %err, attempts = ?err.attempts(), elapsed_ms, "request failed");
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}
