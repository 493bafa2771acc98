//! Collaborator traits.
//!
//! - [`Transport`] - Terminal sink performing the network exchange
//! - [`AuthenticationProvider`] - Supplies bearer credentials on demand
//! - [`HttpClient`] - Application-facing client with a base URL
//! - [`HttpClientExt`] - Convenience methods resolving paths against the base URL

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use url::Url;

use crate::{Request, Response, Result};

// ============================================================================
// Transport
// ============================================================================

/// Terminal stage of a middleware chain.
///
/// Implementations perform the actual exchange and classify failures as
/// [`crate::Error::Transport`] so the retry middleware can recognise
/// transient ones. Any response the server produced, whatever its status,
/// is returned as `Ok`.
pub trait Transport: Send + Sync + 'static {
    /// Send the request and wait for the complete response.
    fn send(&self, request: Request<Bytes>) -> impl Future<Output = Result<Response<Bytes>>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn send(&self, request: Request<Bytes>) -> impl Future<Output = Result<Response<Bytes>>> + Send {
        T::send(self, request)
    }
}

// ============================================================================
// Authentication Provider
// ============================================================================

/// Bearer credential returned by an [`AuthenticationProvider`].
///
/// The token is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Arc<str>);

impl Credential {
    /// Wrap a raw access token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::from(token.into()))
    }

    /// The raw token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.0
    }

    /// Value for the `authorization` header.
    #[must_use]
    pub fn to_header_value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self::new(token)
    }
}

/// Source of bearer credentials.
///
/// The provider may do its own network I/O; the authentication middleware
/// awaits it before the request goes further down the chain. It is called
/// again after the server rejected the previous credential, so providers
/// that cache tokens should hand out a fresh one when asked twice.
pub trait AuthenticationProvider: Send + Sync + 'static {
    /// Produce a credential, or fail with a typed error.
    fn get_credential(&self) -> impl Future<Output = Result<Credential>> + Send;
}

impl<P: AuthenticationProvider> AuthenticationProvider for Arc<P> {
    fn get_credential(&self) -> impl Future<Output = Result<Credential>> + Send {
        P::get_credential(self)
    }
}

// ============================================================================
// Http Client
// ============================================================================

/// Application-facing HTTP client.
///
/// # Example
///
/// ```ignore
/// use tether_core::{HttpClient, HttpClientExt};
///
/// let response = client.get("me/messages").await?;
/// ```
pub trait HttpClient: Send + Sync {
    /// Execute an HTTP request and return the response.
    ///
    /// # Errors
    ///
    /// Returns exactly one typed failure when no response can be produced.
    fn execute(
        &self,
        request: Request<Bytes>,
    ) -> impl Future<Output = Result<Response<Bytes>>> + Send;

    /// Get the base URL for this client.
    ///
    /// Relative paths are resolved against this URL.
    fn base_url(&self) -> &Url;

    /// Resolve `path` against the base URL.
    ///
    /// A leading `/` is ignored so that paths stay under the base URL's own path.
    ///
    /// # Errors
    ///
    /// Returns an error if the joined URL is invalid.
    fn resolve(&self, path: &str) -> Result<Url> {
        resolve_path(self.base_url(), path)
    }
}

/// Join a path onto a base URL, keeping the base path as a prefix.
pub(crate) fn resolve_path(base: &Url, path: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(path) {
        return Ok(url);
    }

    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    Ok(base.join(path.trim_start_matches('/'))?)
}

/// Extension trait for [`HttpClient`] with convenience methods.
pub trait HttpClientExt: HttpClient {
    /// Execute a GET request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    fn get(&self, path: &str) -> impl Future<Output = Result<Response<Bytes>>> + Send {
        async move {
            let url = self.resolve(path)?;
            let request = Request::builder(Method::GET, url).build();
            self.execute(request).await
        }
    }

    /// Execute a POST request with a JSON body.
    ///
    /// POST is not idempotent, so the retry middleware will not re-submit it
    /// unless the caller builds the request with an idempotency key instead.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the request fails.
    fn post_json<T: serde::Serialize + Send + Sync>(
        &self,
        path: &str,
        body: &T,
    ) -> impl Future<Output = Result<Response<Bytes>>> + Send {
        async move {
            let url = self.resolve(path)?;
            let request = Request::builder(Method::POST, url).json(body)?.build();
            self.execute(request).await
        }
    }

    /// Execute a PATCH request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the request fails.
    fn patch_json<T: serde::Serialize + Send + Sync>(
        &self,
        path: &str,
        body: &T,
    ) -> impl Future<Output = Result<Response<Bytes>>> + Send {
        async move {
            let url = self.resolve(path)?;
            let request = Request::builder(Method::PATCH, url).json(body)?.build();
            self.execute(request).await
        }
    }

    /// Execute a PUT request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the request fails.
    fn put_json<T: serde::Serialize + Send + Sync>(
        &self,
        path: &str,
        body: &T,
    ) -> impl Future<Output = Result<Response<Bytes>>> + Send {
        async move {
            let url = self.resolve(path)?;
            let request = Request::builder(Method::PUT, url).json(body)?.build();
            self.execute(request).await
        }
    }

    /// Execute a DELETE request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    fn delete(&self, path: &str) -> impl Future<Output = Result<Response<Bytes>>> + Send {
        async move {
            let url = self.resolve(path)?;
            let request = Request::builder(Method::DELETE, url).build();
            self.execute(request).await
        }
    }
}

// Blanket implementation for all HttpClient implementors
impl<T: HttpClient> HttpClientExt for T {}
