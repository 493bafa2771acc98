//! Request identification headers.
//!
//! Stamps each traversal with a `client-request-id` so server-side logs can
//! be correlated with client logs, and an `sdkversion` header naming this
//! library. Retries and redirects below the layer reuse the same id.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tower::{Layer, Service};
use uuid::Uuid;

use crate::{Error, Request, Response, Result};

/// Header correlating one logical request across attempts.
pub const CLIENT_REQUEST_ID_HEADER: &str = "client-request-id";

/// Header identifying the client library.
pub const SDK_VERSION_HEADER: &str = "sdkversion";

/// Default `sdkversion` value.
pub const SDK_VERSION: &str = concat!("tether-rust/", env!("CARGO_PKG_VERSION"));

/// Layer that adds request identification headers.
#[derive(Debug, Clone)]
pub struct TelemetryLayer {
    sdk_version: String,
}

impl Default for TelemetryLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryLayer {
    /// Create a layer reporting [`SDK_VERSION`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            sdk_version: SDK_VERSION.to_string(),
        }
    }

    /// Prepend an application identifier, e.g. `my-app/1.2`.
    #[must_use]
    pub fn with_product(product: &str) -> Self {
        Self {
            sdk_version: format!("{product}, {SDK_VERSION}"),
        }
    }
}

impl<S> Layer<S> for TelemetryLayer {
    type Service = Telemetry<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Telemetry {
            inner,
            sdk_version: self.sdk_version.clone(),
        }
    }
}

/// Service that adds request identification headers.
#[derive(Debug, Clone)]
pub struct Telemetry<S> {
    inner: S,
    sdk_version: String,
}

impl<S> Service<Request<Bytes>> for Telemetry<S>
where
    S: Service<Request<Bytes>, Response = Response<Bytes>, Error = Error>,
    S::Future: Send + 'static,
{
    type Response = Response<Bytes>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Bytes>) -> Self::Future {
        if request.header(CLIENT_REQUEST_ID_HEADER).is_none() {
            request.set_header(CLIENT_REQUEST_ID_HEADER, Uuid::new_v4().to_string());
        }
        request.set_header(SDK_VERSION_HEADER, self.sdk_version.clone());

        Box::pin(self.inner.call(request))
    }
}
