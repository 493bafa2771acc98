//! Core types and traits for the tether middleware HTTP client.
//!
//! This crate provides the foundational types used by tether:
//! - [`Request`] and [`RequestBuilder`] - HTTP request types, with attempt annotation
//! - [`Response`] - HTTP response type
//! - [`Error`] and [`Result`] - Error taxonomy shared by every middleware
//! - [`Transport`] - Terminal sink contract of a middleware chain
//! - [`AuthenticationProvider`] and [`Credential`] - Bearer credential source
//! - [`HttpClient`] - Application-facing client with base URL support
//! - [`Method`] and [`header`] - Re-exported from the `http` crate

mod body;
mod client;
mod error;
pub mod prelude;
mod request;
mod response;

pub use body::{JSON_CONTENT_TYPE, from_json, to_json};
pub use client::{AuthenticationProvider, Credential, HttpClient, HttpClientExt, Transport};
pub use error::{Error, Result, TransportErrorKind};
pub use request::{IDEMPOTENCY_KEY_HEADER, Request, RequestBuilder, is_idempotent};
pub use response::Response;

// Re-export http crate types for methods, status codes and headers
pub use http::{Method, StatusCode, header};
