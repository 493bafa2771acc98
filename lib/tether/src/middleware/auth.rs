//! Bearer authentication middleware backed by an [`AuthenticationProvider`].
//!
//! The layer attaches `Authorization: Bearer <token>` to every outgoing
//! request. The token is cached and shared by all requests going through the
//! same layer. When the server answers 401 the cached credential is marked
//! expired, a fresh one is fetched and the request is sent once more; a
//! second 401 in a row is reported as [`Error::Authentication`].
//!
//! Refreshes are serialized: requests that need a credential while another
//! request is fetching one wait for that fetch and reuse its result.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::{Mutex, RwLock};
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, warn};

use crate::{AuthenticationProvider, Credential, Error, Request, Response, Result};

const UNAUTHORIZED: u16 = 401;

/// Observable state of the shared credential.
///
/// `Authenticating` is not stored: it is the time spent holding the refresh
/// gate while the provider runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialState {
    /// No credential was fetched yet.
    Unauthenticated,
    /// A credential is cached and attached to outgoing requests.
    Attached(Credential),
    /// The server rejected the cached credential; the next request refreshes it.
    Expired(Credential),
}

/// Credential cache shared by every request of one authentication layer.
struct CredentialCache<P> {
    provider: P,
    state: RwLock<CredentialState>,
    refresh: Mutex<()>,
}

impl<P: AuthenticationProvider> CredentialCache<P> {
    fn new(provider: P) -> Self {
        Self {
            provider,
            state: RwLock::new(CredentialState::Unauthenticated),
            refresh: Mutex::new(()),
        }
    }

    /// The attached credential, fetching one if there is none.
    async fn current(&self) -> Result<Credential> {
        if let CredentialState::Attached(credential) = &*self.state.read().await {
            return Ok(credential.clone());
        }

        let _gate = self.refresh.lock().await;
        // Someone else may have fetched while we waited on the gate.
        if let CredentialState::Attached(credential) = &*self.state.read().await {
            return Ok(credential.clone());
        }

        self.fetch().await
    }

    /// A credential other than `rejected`, fetching a new one if needed.
    async fn renew(&self, rejected: &Credential) -> Result<Credential> {
        self.expire(rejected).await;

        let _gate = self.refresh.lock().await;
        if let CredentialState::Attached(credential) = &*self.state.read().await {
            debug!("reusing credential refreshed by a concurrent request");
            return Ok(credential.clone());
        }

        self.fetch().await
    }

    /// Mark `rejected` as expired if it is still the cached credential.
    async fn expire(&self, rejected: &Credential) {
        let mut state = self.state.write().await;
        if *state == CredentialState::Attached(rejected.clone()) {
            *state = CredentialState::Expired(rejected.clone());
        }
    }

    /// Ask the provider; the caller holds the refresh gate.
    async fn fetch(&self) -> Result<Credential> {
        debug!("requesting credential from authentication provider");
        let credential = self.provider.get_credential().await.map_err(|err| match err {
            Error::Authentication(_) | Error::Cancelled => err,
            other => Error::authentication(format!("credential provider failed: {other}")),
        })?;

        // Only written after the provider returned.
        *self.state.write().await = CredentialState::Attached(credential.clone());
        Ok(credential)
    }

    async fn state(&self) -> CredentialState {
        self.state.read().await.clone()
    }
}

/// Layer that authenticates requests with credentials from a provider.
///
/// # Example
///
/// ```ignore
/// use tether::middleware::AuthenticationLayer;
/// use tether::StaticTokenProvider;
///
/// let chain = Chain::builder()
///     .layer(AuthenticationLayer::new(StaticTokenProvider::new("my-token")))
///     .build(transport);
/// ```
pub struct AuthenticationLayer<P> {
    cache: Arc<CredentialCache<P>>,
}

impl<P> Clone for AuthenticationLayer<P> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<P> std::fmt::Debug for AuthenticationLayer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationLayer").finish_non_exhaustive()
    }
}

impl<P: AuthenticationProvider> AuthenticationLayer<P> {
    /// Create a new authentication layer around the given provider.
    #[must_use]
    pub fn new(provider: P) -> Self {
        Self {
            cache: Arc::new(CredentialCache::new(provider)),
        }
    }

    /// Current state of the shared credential.
    pub async fn credential_state(&self) -> CredentialState {
        self.cache.state().await
    }
}

impl<S, P> Layer<S> for AuthenticationLayer<P> {
    type Service = Authentication<S, P>;

    fn layer(&self, inner: S) -> Self::Service {
        Authentication {
            inner,
            cache: Arc::clone(&self.cache),
        }
    }
}

/// Service that authenticates requests with credentials from a provider.
pub struct Authentication<S, P> {
    inner: S,
    cache: Arc<CredentialCache<P>>,
}

impl<S: Clone, P> Clone for Authentication<S, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<S, P> std::fmt::Debug for Authentication<S, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authentication").finish_non_exhaustive()
    }
}

fn authorize(mut request: Request<Bytes>, credential: &Credential) -> Request<Bytes> {
    request.set_header("authorization", credential.to_header_value());
    request
}

impl<S, P> Service<Request<Bytes>> for Authentication<S, P>
where
    S: Service<Request<Bytes>, Response = Response<Bytes>, Error = Error> + Clone + Send + 'static,
    S::Future: Send,
    P: AuthenticationProvider,
{
    type Response = Response<Bytes>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Bytes>) -> Self::Future {
        let inner = self.inner.clone();
        let cache = Arc::clone(&self.cache);

        Box::pin(async move {
            let credential = cache.current().await?;
            let response = inner
                .clone()
                .oneshot(authorize(request.clone(), &credential))
                .await?;
            if response.status() != UNAUTHORIZED {
                return Ok(response);
            }

            warn!(url = %request.url(), "credential rejected, refreshing");
            let credential = cache.renew(&credential).await?;
            let response = inner.oneshot(authorize(request, &credential)).await?;
            if response.status() == UNAUTHORIZED {
                cache.expire(&credential).await;
                return Err(Error::authentication(
                    "credential rejected again after refresh",
                ));
            }

            Ok(response)
        })
    }
}

// ============================================================================
// Providers
// ============================================================================

/// Provider handing out a fixed token.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    credential: Credential,
}

impl StaticTokenProvider {
    /// Create a provider for the given token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            credential: Credential::new(token),
        }
    }
}

impl AuthenticationProvider for StaticTokenProvider {
    async fn get_credential(&self) -> Result<Credential> {
        Ok(self.credential.clone())
    }
}

/// Provider backed by an async closure.
///
/// Created with [`provider_fn`].
#[derive(Clone)]
pub struct ProviderFn<F> {
    f: F,
}

impl<F> std::fmt::Debug for ProviderFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderFn").finish_non_exhaustive()
    }
}

/// Turn an async closure into an [`AuthenticationProvider`].
///
/// # Example
///
/// ```ignore
/// let provider = tether::provider_fn(|| async { Ok(Credential::new(fetch_token().await?)) });
/// ```
pub fn provider_fn<F, Fut>(f: F) -> ProviderFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Credential>> + Send,
{
    ProviderFn { f }
}

impl<F, Fut> AuthenticationProvider for ProviderFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Credential>> + Send,
{
    fn get_credential(&self) -> impl Future<Output = Result<Credential>> + Send {
        (self.f)()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert2::{check, let_assert};
    use tower::service_fn;
    use tower::util::BoxCloneService;

    use super::*;
    use crate::{BoxedService, Method};

    fn request() -> Request<Bytes> {
        let url = url::Url::parse("https://graph.microsoft.com/v1.0/me").expect("url");
        Request::builder(Method::GET, url).build()
    }

    fn counting_provider(calls: Arc<AtomicUsize>) -> impl AuthenticationProvider {
        provider_fn(move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(Credential::new(format!("token-{n}")))
            }
        })
    }

    /// Answers 401 unless the request carries `Bearer <accepted>`.
    fn server(accepted: &'static str, hits: Arc<AtomicUsize>) -> BoxedService {
        BoxCloneService::new(service_fn(move |request: Request<Bytes>| {
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                let expected = format!("Bearer {accepted}");
                let status = if request.header("authorization") == Some(expected.as_str()) {
                    200
                } else {
                    UNAUTHORIZED
                };
                Ok(Response::new(status, HashMap::new(), Bytes::new()))
            }
        }))
    }

    #[tokio::test]
    async fn attaches_cached_credential() {
        let calls = Arc::new(AtomicUsize::new(0));
        let hits = Arc::new(AtomicUsize::new(0));
        let layer = AuthenticationLayer::new(counting_provider(Arc::clone(&calls)));
        let service = layer.layer(server("token-1", Arc::clone(&hits)));

        for _ in 0..3 {
            let response = service.clone().oneshot(request()).await.expect("response");
            check!(response.status() == 200);
        }

        check!(calls.load(Ordering::SeqCst) == 1);
        check!(hits.load(Ordering::SeqCst) == 3);
        let state = layer.credential_state().await;
        check!(state == CredentialState::Attached("token-1".into()));
    }

    #[tokio::test]
    async fn refreshes_once_after_unauthorized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let hits = Arc::new(AtomicUsize::new(0));
        let layer = AuthenticationLayer::new(counting_provider(Arc::clone(&calls)));
        let service = layer.layer(server("token-2", Arc::clone(&hits)));

        let response = service.oneshot(request()).await.expect("response");

        check!(response.status() == 200);
        check!(calls.load(Ordering::SeqCst) == 2);
        check!(hits.load(Ordering::SeqCst) == 2);
    }

    #[tokio::test]
    async fn second_unauthorized_is_authentication_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let hits = Arc::new(AtomicUsize::new(0));
        let layer = AuthenticationLayer::new(counting_provider(Arc::clone(&calls)));
        let service = layer.layer(server("never", Arc::clone(&hits)));

        let result = service.oneshot(request()).await;

        let_assert!(Err(Error::Authentication(_)) = result);
        check!(calls.load(Ordering::SeqCst) == 2);
        check!(hits.load(Ordering::SeqCst) == 2);
        let state = layer.credential_state().await;
        check!(state == CredentialState::Expired("token-2".into()));
    }

    #[tokio::test]
    async fn provider_failure_skips_transport() {
        let hits = Arc::new(AtomicUsize::new(0));
        let layer = AuthenticationLayer::new(provider_fn(|| async {
            Err(Error::connection("token endpoint unreachable"))
        }));
        let service = layer.layer(server("token-1", Arc::clone(&hits)));

        let result = service.oneshot(request()).await;

        let_assert!(Err(Error::Authentication(message)) = result);
        check!(message.contains("token endpoint unreachable"));
        check!(hits.load(Ordering::SeqCst) == 0);
        let state = layer.credential_state().await;
        check!(state == CredentialState::Unauthenticated);
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slow_calls = Arc::clone(&calls);
        let provider = provider_fn(move || {
            let calls = Arc::clone(&slow_calls);
            async move {
                tokio::task::yield_now().await;
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(Credential::new(format!("token-{n}")))
            }
        });
        let hits = Arc::new(AtomicUsize::new(0));
        let service = AuthenticationLayer::new(provider).layer(server("token-1", hits));

        let results = futures_join(service, 8).await;

        check!(results.iter().all(|status| *status == 200));
        check!(calls.load(Ordering::SeqCst) == 1);
    }

    #[tokio::test]
    async fn concurrent_rejections_share_one_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let layer = AuthenticationLayer::new(counting_provider(Arc::clone(&calls)));
        let hits = Arc::new(AtomicUsize::new(0));
        let service = layer.layer(server("token-2", hits));

        let results = futures_join(service, 8).await;

        check!(results.iter().all(|status| *status == 200));
        check!(calls.load(Ordering::SeqCst) == 2);
    }

    async fn futures_join<S>(service: S, count: usize) -> Vec<u16>
    where
        S: Service<Request<Bytes>, Response = Response<Bytes>, Error = Error>
            + Clone
            + Send
            + 'static,
        S::Future: Send,
    {
        let handles: Vec<_> = (0..count)
            .map(|_| tokio::spawn(service.clone().oneshot(request())))
            .collect();

        let mut statuses = Vec::with_capacity(count);
        for handle in handles {
            let response = handle.await.expect("join").expect("response");
            statuses.push(response.status());
        }
        statuses
    }
}
