//! HTTP request building.
//!
//! Use [`Request::builder`] to construct requests with headers, query parameters, and bodies.
//!
//! # Example
//!
//! ```
//! use tether_core::{Method, Request};
//! use bytes::Bytes;
//!
//! let request = Request::<Bytes>::builder(Method::GET, "https://graph.microsoft.com/v1.0/me".parse().unwrap())
//!     .header("Accept", "application/json")
//!     .query("$select", "displayName")
//!     .build();
//!
//! assert_eq!(request.header("accept"), Some("application/json"));
//! assert_eq!(request.attempt(), 1);
//! ```

use std::collections::HashMap;

use bytes::Bytes;
use http::Method;

/// Header carrying a caller-chosen idempotency token.
///
/// A request holding this header may be re-submitted even when its method is
/// not idempotent.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// An HTTP request with method, URL, headers, and optional body.
///
/// Header names are case-insensitive: they are stored lowercased and looked
/// up lowercased.
#[derive(Debug, Clone)]
pub struct Request<B = Bytes> {
    method: Method,
    url: url::Url,
    headers: HashMap<String, String>,
    body: Option<B>,
    attempt: u32,
    retry_safe: bool,
}

impl<B> Request<B> {
    /// Creates a new [`RequestBuilder`].
    #[must_use]
    pub fn builder(method: Method, url: url::Url) -> RequestBuilder<B> {
        RequestBuilder::new(method, url)
    }

    /// HTTP method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Replace the HTTP method.
    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// Request URL.
    #[must_use]
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// Rewrite the request target.
    pub fn set_url(&mut self, url: url::Url) {
        self.url = url;
    }

    /// Request headers, keyed by lowercased name.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Single header value by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Insert or replace a header, returning the previous value.
    pub fn set_header(
        &mut self,
        name: impl AsRef<str>,
        value: impl Into<String>,
    ) -> Option<String> {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into())
    }

    /// Remove a header, returning its value.
    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(&name.to_ascii_lowercase())
    }

    /// Request body.
    #[must_use]
    pub const fn body(&self) -> Option<&B> {
        self.body.as_ref()
    }

    /// Take the body out of the request, leaving none.
    pub fn take_body(&mut self) -> Option<B> {
        self.body.take()
    }

    /// Which attempt this request is, starting at 1.
    ///
    /// Re-submitting middleware bumps this on the copy it sends again.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Set the attempt annotation.
    pub fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    /// Returns `true` if re-submitting this request cannot duplicate side effects.
    ///
    /// Idempotent methods always qualify. Other methods qualify when the
    /// caller marked the request with [`RequestBuilder::retry_safe`] or set
    /// an [`IDEMPOTENCY_KEY_HEADER`].
    #[must_use]
    pub fn is_retry_safe(&self) -> bool {
        is_idempotent(&self.method)
            || self.retry_safe
            || self.headers.contains_key(IDEMPOTENCY_KEY_HEADER)
    }

    /// Consume into (method, url, headers, body).
    #[must_use]
    pub fn into_parts(self) -> (Method, url::Url, HashMap<String, String>, Option<B>) {
        (self.method, self.url, self.headers, self.body)
    }
}

/// Returns `true` for methods whose repetition has no additional effect.
#[must_use]
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE | Method::TRACE
    )
}

/// Builder for constructing [`Request`] instances.
#[derive(Debug, Clone)]
pub struct RequestBuilder<B = Bytes> {
    method: Method,
    url: url::Url,
    headers: HashMap<String, String>,
    body: Option<B>,
    retry_safe: bool,
}

impl<B> RequestBuilder<B> {
    /// Creates a new builder.
    #[must_use]
    pub fn new(method: Method, url: url::Url) -> Self {
        Self {
            method,
            url,
            headers: HashMap::new(),
            body: None,
            retry_safe: false,
        }
    }

    /// Sets a header.
    #[must_use]
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Sets multiple headers.
    #[must_use]
    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(
            headers
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value)),
        );
        self
    }

    /// Appends a query parameter to the URL.
    #[must_use]
    pub fn query(mut self, name: &str, value: &str) -> Self {
        self.url.query_pairs_mut().append_pair(name, value);
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: B) -> Self {
        self.body = Some(body);
        self
    }

    /// Allow the retry middleware to re-submit this request even if its
    /// method is not idempotent.
    #[must_use]
    pub fn retry_safe(mut self) -> Self {
        self.retry_safe = true;
        self
    }

    /// Attach an idempotency token, which also makes the request retry-safe.
    #[must_use]
    pub fn idempotency_key(self, key: impl Into<String>) -> Self {
        self.header(IDEMPOTENCY_KEY_HEADER, key)
    }

    /// Builds the [`Request`].
    #[must_use]
    pub fn build(self) -> Request<B> {
        Request {
            method: self.method,
            url: self.url,
            headers: self.headers,
            body: self.body,
            attempt: 1,
            retry_safe: self.retry_safe,
        }
    }
}

impl RequestBuilder<Bytes> {
    /// Set a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn json<T: serde::Serialize>(self, value: &T) -> crate::Result<Self> {
        let body = crate::to_json(value)?;
        Ok(self
            .header("content-type", crate::JSON_CONTENT_TYPE)
            .body(body))
    }
}
