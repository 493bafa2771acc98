//! Client construction.
//!
//! [`ClientFactory`] covers the two common cases in one call each.
//! [`ClientBuilder`] exposes the same assembly with configuration, extra
//! layers and a custom transport sink.

use std::time::Duration;

use bytes::Bytes;
use tower::Layer;
use tower::util::BoxCloneService;
use tower_service::Service;
use tracing::debug;

use crate::middleware::{
    AuthenticationLayer, FollowRedirectLayer, LoggingLayer, RetryLayer, RetryPolicy,
    TelemetryLayer,
};
use crate::{
    AuthenticationProvider, BoxedService, Chain, ChainBuilder, Client, ClientConfigBuilder,
    Error, HyperTransport, Request, Response, Result, Transport, TransportService,
};

type AuthenticationSlot = Box<dyn FnOnce(ChainBuilder) -> ChainBuilder + Send>;

/// Custom sink, bounded by the per-attempt timeout once it is known.
type TransportSlot = Box<dyn FnOnce(Duration) -> BoxedService + Send>;

/// Entry points building a ready-to-use [`Client`].
///
/// Neither path performs network I/O; the first request opens the first
/// connection.
#[derive(Debug, Clone, Copy)]
pub struct ClientFactory;

impl ClientFactory {
    /// Build the default chain around `provider`.
    ///
    /// Requests flow through authentication, then retry, then redirect
    /// handling, then the [`HyperTransport`] sink. The client targets
    /// [`DEFAULT_BASE_URL`](crate::DEFAULT_BASE_URL).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the default configuration is invalid.
    pub fn create_http_client_with_authentication_provider<P>(provider: P) -> Result<Client>
    where
        P: AuthenticationProvider,
    {
        ClientBuilder::new().authentication_provider(provider).build()
    }

    /// Use `head` as the whole chain, verbatim.
    ///
    /// Nothing is inserted around or after it: the head decides where
    /// requests go.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the default configuration is invalid.
    pub fn create_http_client_with_middleware<S>(head: S) -> Result<Client>
    where
        S: Service<Request<Bytes>, Response = Response<Bytes>, Error = Error>
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        ClientBuilder::new().middleware(head).build()
    }
}

/// Builder for [`Client`].
///
/// Exactly one chain source must be supplied: an
/// [`authentication_provider`](Self::authentication_provider) for the
/// default chain, or a [`middleware`](Self::middleware) head.
///
/// Layers added with [`layer`](Self::layer) sit outside the default chain,
/// first added = outermost.
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
/// use tether::{ClientBuilder, StaticTokenProvider};
///
/// let client = ClientBuilder::new()
///     .base_url("https://graph.microsoft.com/beta")
///     .timeout(Duration::from_secs(10))
///     .max_retries(5)
///     .authentication_provider(StaticTokenProvider::new("token"))
///     .with_logging()
///     .build()?;
/// ```
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfigBuilder,
    authentication: Option<AuthenticationSlot>,
    head: Option<Chain>,
    transport: Option<TransportSlot>,
    layers: ChainBuilder,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("authentication", &self.authentication.is_some())
            .field("head", &self.head)
            .field("transport", &self.transport.is_some())
            .field("layers", &self.layers)
            .finish()
    }
}

impl ClientBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL.
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config = self.config.base_url(base_url);
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.timeout(timeout);
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.connect_timeout(timeout);
        self
    }

    /// Bound the whole traversal, retries and redirects included.
    #[must_use]
    pub fn total_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.total_timeout(timeout);
        self
    }

    /// Set the maximum idle connections per host.
    #[must_use]
    pub fn pool_idle_per_host(mut self, count: usize) -> Self {
        self.config = self.config.pool_idle_per_host(count);
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.pool_idle_timeout(timeout);
        self
    }

    /// Set the retry policy of the default chain.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config = self.config.retry(policy);
        self
    }

    /// Shorthand for a default [`RetryPolicy`] with `max_retries` re-submissions.
    #[must_use]
    pub fn max_retries(self, max_retries: u32) -> Self {
        self.retry_policy(RetryPolicy::new(max_retries))
    }

    /// Set the redirect hop budget of the default chain.
    #[must_use]
    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.config = self.config.max_redirects(max_redirects);
        self
    }

    /// Replace the whole configuration builder.
    #[must_use]
    pub fn config(mut self, config: ClientConfigBuilder) -> Self {
        self.config = config;
        self
    }

    /// Build the default chain around this credential provider.
    #[must_use]
    pub fn authentication_provider<P>(mut self, provider: P) -> Self
    where
        P: AuthenticationProvider,
    {
        let layer = AuthenticationLayer::new(provider);
        self.authentication = Some(Box::new(move |chain: ChainBuilder| chain.layer(layer)));
        self
    }

    /// Use an already-linked service as the whole chain.
    #[must_use]
    pub fn middleware<S>(mut self, head: S) -> Self
    where
        S: Service<Request<Bytes>, Response = Response<Bytes>, Error = Error>
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        self.head = Some(Chain::from_head(head));
        self
    }

    /// Replace the default [`HyperTransport`] sink of the default chain.
    ///
    /// Each exchange is still bounded by the per-attempt
    /// [`timeout`](Self::timeout).
    #[must_use]
    pub fn transport<T: Transport>(mut self, transport: T) -> Self {
        self.transport = Some(Box::new(move |timeout| {
            BoxCloneService::new(TransportService::new(transport).with_timeout(timeout))
        }));
        self
    }

    /// Add a layer in front of the default chain.
    #[must_use]
    pub fn layer<L>(mut self, layer: L) -> Self
    where
        L: Layer<BoxedService> + Send + Sync + 'static,
        L::Service: Service<Request<Bytes>, Response = Response<Bytes>, Error = Error>
            + Clone
            + Send
            + 'static,
        <L::Service as Service<Request<Bytes>>>::Future: Send + 'static,
    {
        self.layers = self.layers.layer(layer);
        self
    }

    /// Add a [`LoggingLayer`] in front of the default chain.
    #[must_use]
    pub fn with_logging(self) -> Self {
        self.layer(LoggingLayer::new())
    }

    /// Add a [`TelemetryLayer`] in front of the default chain.
    #[must_use]
    pub fn with_telemetry(self) -> Self {
        self.layer(TelemetryLayer::new())
    }

    /// Assemble the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when no chain source or both were
    /// supplied, when a custom head is combined with layers or a transport,
    /// or when the configuration is invalid.
    pub fn build(self) -> Result<Client> {
        let config = self.config.build()?;

        let chain = match (self.authentication, self.head) {
            (None, None) => {
                return Err(Error::configuration(
                    "an authentication provider or a middleware chain is required",
                ));
            }
            (Some(_), Some(_)) => {
                return Err(Error::configuration(
                    "an authentication provider and a middleware chain are mutually exclusive",
                ));
            }
            (None, Some(head)) => {
                if !self.layers.is_empty() || self.transport.is_some() {
                    return Err(Error::configuration(
                        "a custom middleware chain cannot be combined with layers or a transport",
                    ));
                }
                head
            }
            (Some(authentication), None) => {
                let sink = match self.transport {
                    Some(transport) => transport(config.timeout),
                    None => BoxCloneService::new(TransportService::new(HyperTransport::new(&config))),
                };

                authentication(self.layers)
                    .layer(RetryLayer::new(config.retry.clone()))
                    .layer(FollowRedirectLayer::with_max_redirects(config.max_redirects))
                    .build_with_sink(sink)
            }
        };

        debug!(base_url = %config.base_url, layers = ?chain.layers(), "client assembled");
        Ok(Client::new(chain, config))
    }
}
