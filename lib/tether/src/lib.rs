//! HTTP client assembled from a chain of Tower middleware.
//!
//! A [`Client`] sends every request through one linear chain of middleware
//! ending in a transport sink. The default chain, built by
//! [`ClientFactory::create_http_client_with_authentication_provider`], is:
//!
//! ```text
//! Client -> Authentication -> Retry -> FollowRedirect -> HyperTransport
//! ```
//!
//! A fully custom chain can be supplied instead with
//! [`ClientFactory::create_http_client_with_middleware`].
//!
//! # Example
//!
//! ```ignore
//! use tether::prelude::*;
//!
//! #[derive(Debug, Deserialize)]
//! struct User {
//!     id: String,
//!     #[serde(rename = "displayName")]
//!     display_name: String,
//! }
//!
//! let client = ClientFactory::create_http_client_with_authentication_provider(
//!     provider_fn(|| async { Ok(Credential::new(acquire_token().await?)) }),
//! )?;
//!
//! let me: User = client.get("me").await?.json()?;
//! ```
//!
//! See the [`middleware`] module for the individual layers.

mod chain;
mod client;
mod config;
mod factory;
pub mod middleware;
pub mod prelude;
mod transport;

// Re-export client types
pub use chain::{BoxedService, Chain, ChainBuilder, ServiceFuture, TransportService};
pub use client::Client;
pub use config::{ClientConfig, ClientConfigBuilder, DEFAULT_BASE_URL};
pub use factory::{ClientBuilder, ClientFactory};
pub use middleware::{StaticTokenProvider, provider_fn};
pub use transport::HyperTransport;

// Re-export cancellation support
pub use tokio_util::sync::CancellationToken;

// Re-export tower for middleware composition
pub use tower;

// Re-export core types
pub use tether_core::{
    AuthenticationProvider, Credential, Error, HttpClient, HttpClientExt, IDEMPOTENCY_KEY_HEADER,
    JSON_CONTENT_TYPE, Method, Request, RequestBuilder, Response, Result, Transport,
    TransportErrorKind, from_json, is_idempotent, to_json,
};

// Re-export http types for status codes and headers
pub use tether_core::{StatusCode, header};

pub use url;
