//! Prelude module for convenient imports.
//!
//! ```ignore
//! use tether_core::prelude::*;
//! ```

pub use crate::{
    AuthenticationProvider, Credential, Error, HttpClient, HttpClientExt, Method, Request,
    RequestBuilder, Response, Result, Transport,
};
