//! Follow redirect middleware.
//!
//! This middleware follows HTTP redirects (3xx responses with a `location`
//! header) up to a hop budget, resolving relative targets against the URL
//! that produced the redirect.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tower::{Layer, Service, ServiceExt};
use tracing::debug;
use url::Url;

use crate::{Error, Method, Request, Response, Result};

/// Default maximum number of redirects to follow.
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

/// Layer that follows HTTP redirects.
///
/// # Example
///
/// ```ignore
/// use tether::middleware::FollowRedirectLayer;
///
/// let chain = Chain::builder()
///     .layer(FollowRedirectLayer::with_max_redirects(3))
///     .build(transport);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FollowRedirectLayer {
    max_redirects: usize,
}

impl Default for FollowRedirectLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl FollowRedirectLayer {
    /// Create a layer with the default hop budget.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }

    /// Create a layer with a custom hop budget.
    #[must_use]
    pub const fn with_max_redirects(max_redirects: usize) -> Self {
        Self { max_redirects }
    }

    /// Hop budget.
    #[must_use]
    pub const fn max_redirects(&self) -> usize {
        self.max_redirects
    }
}

impl<S> Layer<S> for FollowRedirectLayer {
    type Service = FollowRedirect<S>;

    fn layer(&self, inner: S) -> Self::Service {
        FollowRedirect {
            inner,
            max_redirects: self.max_redirects,
        }
    }
}

/// Service that follows HTTP redirects.
#[derive(Debug, Clone)]
pub struct FollowRedirect<S> {
    inner: S,
    max_redirects: usize,
}

fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// 301, 302 and 303 turn into GET, except that HEAD stays HEAD.
/// 307 and 308 keep the method and the body.
fn rewrites_to_get(status: u16, method: &Method) -> bool {
    matches!(status, 301..=303) && *method != Method::HEAD
}

fn resolve_location(current: &Url, location: &str) -> Result<Url> {
    let location = location.trim();
    if location.is_empty() {
        return Err(Error::protocol("redirect with an empty location header"));
    }

    current.join(location).map_err(|err| {
        Error::protocol(format!("unresolvable redirect location '{location}': {err}"))
    })
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// Rewrite `request` in place so it targets the redirect destination.
fn redirect_request(request: &mut Request<Bytes>, status: u16, target: Url) {
    if rewrites_to_get(status, request.method()) {
        request.set_method(Method::GET);
        request.take_body();
        request.remove_header("content-type");
        request.remove_header("content-length");
    }

    if !same_origin(request.url(), &target) && request.remove_header("authorization").is_some() {
        debug!(target = %target, "dropping authorization on cross-origin redirect");
    }

    request.set_url(target);
}

impl<S> Service<Request<Bytes>> for FollowRedirect<S>
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
        let inner = self.inner.clone();
        let max_redirects = self.max_redirects;

        Box::pin(async move {
            let mut current = request;
            let mut redirects = 0;

            loop {
                let response = inner.clone().oneshot(current.clone()).await?;
                let status = response.status();
                if !is_redirect(status) {
                    return Ok(response);
                }

                if redirects >= max_redirects {
                    return Err(Error::TooManyRedirects {
                        count: redirects,
                        max: max_redirects,
                    });
                }

                let location = response.header("location").ok_or_else(|| {
                    Error::protocol(format!("redirect {status} without a location header"))
                })?;
                let target = resolve_location(current.url(), location)?;

                redirects += 1;
                debug!(status, hop = redirects, from = %current.url(), to = %target, "following redirect");
                redirect_request(&mut current, status, target);
            }
        })
    }
}
