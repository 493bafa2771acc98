//! Prelude module for convenient imports.
//!
//! This module re-exports the types needed to build a client and send
//! requests, for easy glob importing:
//!
//! ```ignore
//! use tether::prelude::*;
//! ```

pub use crate::{
    AuthenticationProvider, CancellationToken, Client, ClientBuilder, ClientConfig, ClientFactory,
    Credential, Error, HttpClient, HttpClientExt, Method, Request, RequestBuilder, Response,
    Result, StaticTokenProvider, StatusCode, header, provider_fn,
};
pub use serde::{Deserialize, Serialize};
