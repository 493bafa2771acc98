//! Application-facing client.

use std::task::{Context, Poll};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tower_service::Service;
use tracing::debug;
use url::Url;

use crate::{
    Chain, ClientConfig, Error, HttpClient, Method, Request, RequestBuilder, Response, Result,
    ServiceFuture,
};

/// HTTP client bound to one middleware chain.
///
/// Built by [`ClientFactory`](crate::ClientFactory) or
/// [`ClientBuilder`](crate::ClientBuilder). Cloning is cheap and clones share
/// the chain, including the cached credential of its authentication layer.
///
/// # Example
///
/// ```ignore
/// use tether::{ClientFactory, HttpClientExt, StaticTokenProvider};
///
/// let client = ClientFactory::create_http_client_with_authentication_provider(
///     StaticTokenProvider::new("token"),
/// )?;
/// let me = client.get("me").await?;
/// ```
#[derive(Clone)]
pub struct Client {
    chain: Chain,
    config: ClientConfig,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.config.base_url.as_str())
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub(crate) fn new(chain: Chain, config: ClientConfig) -> Self {
        Self { chain, config }
    }

    /// The middleware chain requests run through.
    #[must_use]
    pub const fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Get the client configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start a request whose `path` is resolved against the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the joined URL is invalid.
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        Ok(Request::builder(method, self.resolve(path)?))
    }

    /// Run one request through the chain.
    ///
    /// Yields exactly one outcome. With
    /// [`total_timeout`](ClientConfig::total_timeout) set, the whole traversal
    /// (retries, backoff and redirects included) is bounded by it.
    ///
    /// # Errors
    ///
    /// Returns the failure produced by the chain, or a timeout
    /// [`Error::Transport`] when the overall budget is exhausted.
    pub async fn execute(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let traversal = self.chain.process(request);

        match self.config.total_timeout {
            Some(budget) => tokio::time::timeout(budget, traversal).await.map_err(|_| {
                debug!(?budget, "overall request budget exhausted");
                Error::timeout()
            })?,
            None => traversal.await,
        }
    }

    /// Like [`execute`](Self::execute), but aborts once `token` is cancelled.
    ///
    /// The in-flight transport call and any pending backoff sleep are
    /// dropped. A credential refresh in progress leaves the cache untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the token fired first, otherwise the
    /// same failures as [`execute`](Self::execute).
    pub async fn execute_with_cancellation(
        &self,
        request: Request<Bytes>,
        token: &CancellationToken,
    ) -> Result<Response<Bytes>> {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                debug!("request cancelled");
                Err(Error::Cancelled)
            }
            result = self.execute(request) => result,
        }
    }
}

impl HttpClient for Client {
    async fn execute(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        Self::execute(self, request).await
    }

    fn base_url(&self) -> &Url {
        &self.config.base_url
    }
}

impl Service<Request<Bytes>> for Client {
    type Response = Response<Bytes>;
    type Error = Error;
    type Future = ServiceFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Bytes>) -> Self::Future {
        let client = self.clone();
        Box::pin(async move { client.execute(request).await })
    }
}
