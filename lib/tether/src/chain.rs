//! Middleware chain construction.
//!
//! A chain is a single linear path of type-erased tower services ending in
//! one transport sink. [`ChainBuilder`] links layers around the sink once,
//! at construction time; the resulting [`Chain`] is immutable and can be
//! shared by any number of concurrent requests.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tower::util::BoxCloneService;
use tower::{Layer, ServiceExt};
use tower_service::Service;

use crate::{Error, Request, Response, Result, Transport};

/// Type-erased middleware node.
///
/// Every node of a chain, including custom chain heads, is stored as this
/// type so the chain never depends on concrete middleware types.
pub type BoxedService = BoxCloneService<Request<Bytes>, Response<Bytes>, Error>;

/// Future type for Tower Service implementation.
pub type ServiceFuture = Pin<Box<dyn Future<Output = Result<Response<Bytes>>> + Send + 'static>>;

type LayerFn = Arc<dyn Fn(BoxedService) -> BoxedService + Send + Sync>;

// ============================================================================
// Transport Sink Adapter
// ============================================================================

/// Adapts a [`Transport`] into the terminal service of a chain.
///
/// With [`with_timeout`](Self::with_timeout), every exchange that outlives
/// the bound fails with a transport timeout, whatever the transport does.
#[derive(Debug)]
pub struct TransportService<T> {
    transport: Arc<T>,
    timeout: Option<Duration>,
}

impl<T> Clone for TransportService<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            timeout: self.timeout,
        }
    }
}

impl<T: Transport> TransportService<T> {
    /// Wrap a transport.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            timeout: None,
        }
    }

    /// Bound each attempt.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<T: Transport> Service<Request<Bytes>> for TransportService<T> {
    type Response = Response<Bytes>;
    type Error = Error;
    type Future = ServiceFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Bytes>) -> Self::Future {
        let transport = Arc::clone(&self.transport);
        let timeout = self.timeout;
        Box::pin(async move {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, transport.send(request))
                    .await
                    .map_err(|_| Error::timeout())?,
                None => transport.send(request).await,
            }
        })
    }
}

// ============================================================================
// Chain
// ============================================================================

/// An assembled middleware chain.
///
/// Cloning is cheap: clones share the same nodes, and any state those nodes
/// hold (such as a cached credential).
#[derive(Clone)]
pub struct Chain {
    head: Arc<Mutex<BoxedService>>,
    layers: Arc<[&'static str]>,
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("layers", &self.layers)
            .finish_non_exhaustive()
    }
}

impl Chain {
    /// Create a new chain builder.
    #[must_use]
    pub fn builder() -> ChainBuilder {
        ChainBuilder::default()
    }

    /// Use an already-linked service as the chain head, verbatim.
    ///
    /// The chain adds nothing around it: whatever the head delegates to is
    /// entirely up to the caller.
    #[must_use]
    pub fn from_head<S>(head: S) -> Self
    where
        S: Service<Request<Bytes>, Response = Response<Bytes>, Error = Error>
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        Self {
            head: Arc::new(Mutex::new(BoxCloneService::new(head))),
            layers: Arc::from(vec![short_type_name::<S>()]),
        }
    }

    /// Names of the nodes this chain was built from, outermost first.
    #[must_use]
    pub fn layers(&self) -> &[&'static str] {
        &self.layers
    }

    /// Run one request through the chain.
    ///
    /// The lock is only held to clone the head; the traversal itself runs
    /// on a private copy of the node handles.
    pub fn process(&self, request: Request<Bytes>) -> ServiceFuture {
        let service = self
            .head
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();

        Box::pin(service.oneshot(request))
    }
}

impl Service<Request<Bytes>> for Chain {
    type Response = Response<Bytes>;
    type Error = Error;
    type Future = ServiceFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Bytes>) -> Self::Future {
        self.process(request)
    }
}

// ============================================================================
// Chain Builder
// ============================================================================

/// Builder for [`Chain`].
///
/// Layers are applied in order: first added = outermost (processes requests first).
///
/// # Example
///
/// ```ignore
/// use tether::{Chain, HyperTransport};
/// use tether::middleware::{FollowRedirectLayer, LoggingLayer};
///
/// let chain = Chain::builder()
///     .layer(LoggingLayer::new())
///     .layer(FollowRedirectLayer::new())
///     .build(HyperTransport::new(&config));
/// ```
#[derive(Default, Clone)]
pub struct ChainBuilder {
    layers: Vec<(&'static str, LayerFn)>,
}

impl std::fmt::Debug for ChainBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainBuilder")
            .field(
                "layers",
                &self.layers.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ChainBuilder {
    /// Append a Tower layer after the ones already added.
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
        self.layers.push((
            short_type_name::<L>(),
            Arc::new(move |service| BoxCloneService::new(layer.layer(service))),
        ));
        self
    }

    /// Number of layers added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns `true` if no layer was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Link every layer around the transport sink.
    #[must_use]
    pub fn build<T: Transport>(self, transport: T) -> Chain {
        self.build_with_sink(BoxCloneService::new(TransportService::new(transport)))
    }

    pub(crate) fn build_with_sink(self, sink: BoxedService) -> Chain {
        let names: Vec<&'static str> = self.layers.iter().map(|(name, _)| *name).collect();

        // Innermost first, so the first layer added ends up outermost.
        let head = self
            .layers
            .into_iter()
            .rev()
            .fold(sink, |service, (_, layer_fn)| layer_fn(service));

        Chain {
            head: Arc::new(Mutex::new(head)),
            layers: Arc::from(names),
        }
    }
}

/// Last path segment of a type name, generics stripped.
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tower::{ServiceExt, service_fn};

    use super::*;
    use crate::Method;
    use crate::middleware::LoggingLayer;

    struct Counting {
        calls: AtomicUsize,
    }

    impl Transport for Counting {
        async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let tag = request.header("x-tag").unwrap_or_default().to_string();
            Ok(Response::new(200, HashMap::new(), Bytes::from(tag)))
        }
    }

    fn request() -> Request<Bytes> {
        let url = url::Url::parse("https://graph.microsoft.com/v1.0/me").expect("url");
        Request::builder(Method::GET, url).build()
    }

    #[tokio::test]
    async fn empty_chain_reaches_transport() {
        let transport = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let chain = Chain::builder().build(Arc::clone(&transport));

        let response = chain.process(request()).await.expect("response");
        assert_eq!(response.status(), 200);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert!(chain.layers().is_empty());
    }

    #[tokio::test]
    async fn layers_run_in_insertion_order() {
        let tagging = |label: &'static str| {
            tower::layer::layer_fn(move |inner: BoxedService| {
                BoxCloneService::new(service_fn(move |mut request: Request<Bytes>| {
                    let tag = format!("{}{label}", request.header("x-tag").unwrap_or_default());
                    request.set_header("x-tag", tag);
                    inner.clone().oneshot(request)
                }))
            })
        };

        let chain = Chain::builder()
            .layer(tagging("a"))
            .layer(LoggingLayer::new())
            .layer(tagging("b"))
            .build(Counting {
                calls: AtomicUsize::new(0),
            });

        let body = chain.process(request()).await.expect("response").into_body();
        assert_eq!(&body[..], b"ab");
        assert_eq!(chain.layers().len(), 3);
        assert_eq!(chain.layers()[1], "LoggingLayer");
    }

    struct Hanging;

    impl Transport for Hanging {
        async fn send(&self, _request: Request<Bytes>) -> Result<Response<Bytes>> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sink_timeout_bounds_a_hanging_transport() {
        let sink = TransportService::new(Hanging).with_timeout(Duration::from_secs(1));
        let chain = Chain::builder().build_with_sink(BoxCloneService::new(sink));

        let outcome = tokio::time::timeout(Duration::from_secs(3600), chain.process(request())).await;
        let error = outcome
            .expect("sink timeout fires first")
            .expect_err("hanging transport");
        assert!(error.is_timeout());
    }

    #[tokio::test]
    async fn from_head_uses_service_verbatim() {
        let head = service_fn(|_request: Request<Bytes>| async {
            Ok::<_, Error>(Response::new(418, HashMap::new(), Bytes::new()))
        });

        let chain = Chain::from_head(head);
        let response = chain.process(request()).await.expect("response");
        assert_eq!(response.status(), 418);
    }
}
