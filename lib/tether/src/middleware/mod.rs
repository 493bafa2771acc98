//! Tower middleware layers of the tether chain.
//!
//! Every layer here produces a `Service<Request<Bytes>>` with the chain's
//! response and error types, so layers compose in any order through
//! [`ChainBuilder::layer`](crate::ChainBuilder::layer). The first layer added
//! is the first to process requests.
//!
//! # Default chain
//!
//! [`ClientFactory`](crate::ClientFactory) assembles, outermost first:
//!
//! 1. [`AuthenticationLayer`] - attaches `Authorization: Bearer <token>` and
//!    refreshes the credential once on 401
//! 2. [`RetryLayer`] with [`RetryPolicy`] - re-submits transient failures
//!    with exponential backoff
//! 3. [`FollowRedirectLayer`] - follows 3xx responses up to a hop budget
//! 4. the transport sink
//!
//! # Optional layers
//!
//! - [`LoggingLayer`] - `tracing` span and completion event per request
//! - [`TelemetryLayer`] - `client-request-id` and `sdkversion` headers
//!
//! # Example
//!
//! ```ignore
//! use tether::ClientBuilder;
//! use tether::middleware::{LoggingLayer, TelemetryLayer};
//!
//! let client = ClientBuilder::new()
//!     .authentication_provider(provider)
//!     .layer(LoggingLayer::new())
//!     .layer(TelemetryLayer::new())
//!     .build()?;
//! ```

mod auth;
mod follow_redirect;
mod logging;
mod retry;
mod telemetry;

pub use auth::{
    Authentication, AuthenticationLayer, CredentialState, ProviderFn, StaticTokenProvider,
    provider_fn,
};
pub use follow_redirect::{DEFAULT_MAX_REDIRECTS, FollowRedirect, FollowRedirectLayer};
pub use logging::{Logging, LoggingLayer, Verbosity};
pub use retry::{DEFAULT_MAX_RETRIES, RetryPolicy};
pub use telemetry::{
    CLIENT_REQUEST_ID_HEADER, SDK_VERSION, SDK_VERSION_HEADER, Telemetry, TelemetryLayer,
};

// Re-export tower types for convenience
pub use tower::retry::RetryLayer;
pub use tower::{Layer, ServiceBuilder};
