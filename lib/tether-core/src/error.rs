//! Error types for tether.
//!
//! Every middleware either recovers a failure locally (retry, redirect) or
//! forwards it upward unchanged in kind, possibly annotated with the number
//! of attempts made.

use derive_more::{Display, Error, From};

// ============================================================================
// Transport Error Kind
// ============================================================================

/// Classification of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum TransportErrorKind {
    /// Connection could not be established or was reset.
    #[display("connect")]
    Connect,
    /// TLS handshake or certificate failure.
    #[display("tls")]
    Tls,
    /// The attempt (or the overall budget) timed out.
    #[display("timeout")]
    Timeout,
    /// I/O failure while exchanging the request or reading the body.
    #[display("io")]
    Io,
    /// Server kept answering with a transient status code.
    #[display("status {_0}")]
    Status(u16),
}

impl TransportErrorKind {
    /// Returns `true` if a failure of this kind is worth re-attempting.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Connect | Self::Timeout | Self::Io | Self::Status(_))
    }
}

// ============================================================================
// Error Type
// ============================================================================

/// Main error type for tether operations.
#[derive(Debug, Display, Error, From)]
pub enum Error {
    /// Invalid client or chain configuration, reported before any network activity.
    #[display("configuration error: {_0}")]
    #[from(skip)]
    Configuration(#[error(not(source))] String),

    /// The credential could not be obtained, or was rejected twice in a row.
    #[display("authentication error: {_0}")]
    #[from(skip)]
    Authentication(#[error(not(source))] String),

    /// Network-level failure.
    #[display("transport error ({kind}) after {attempts} attempt(s): {message}")]
    #[from(skip)]
    Transport {
        /// Failure classification.
        kind: TransportErrorKind,
        /// Error message.
        message: String,
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// Malformed server response.
    #[display("protocol error: {_0}")]
    #[from(skip)]
    Protocol(#[error(not(source))] String),

    /// Redirect hop budget exceeded.
    #[display("too many redirects ({count} exceeded max of {max})")]
    #[from(skip)]
    TooManyRedirects {
        /// Number of redirects followed.
        count: usize,
        /// Maximum allowed redirects.
        max: usize,
    },

    /// The caller aborted the request.
    #[display("request cancelled")]
    #[from(skip)]
    Cancelled,

    /// Invalid request configuration.
    #[display("invalid request: {_0}")]
    #[from(skip)]
    InvalidRequest(#[error(not(source))] String),

    /// URL parsing error.
    #[display("invalid URL: {_0}")]
    #[from]
    InvalidUrl(url::ParseError),

    /// JSON serialization error.
    #[display("JSON serialization error: {_0}")]
    #[from]
    JsonSerialization(serde_json::Error),

    /// JSON deserialization error with path context.
    #[display("JSON deserialization error at '{path}': {message}")]
    #[from(skip)]
    JsonDeserialization {
        /// JSON path to the error (e.g., "user.address.city").
        path: String,
        /// Error message.
        message: String,
    },
}

/// Result type alias using [`crate::Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an authentication error.
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication(message.into())
    }

    /// Create a transport error for a single attempt.
    #[must_use]
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
            attempts: 1,
        }
    }

    /// Create a connection error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::transport(TransportErrorKind::Connect, message)
    }

    /// Create a TLS error.
    #[must_use]
    pub fn tls(message: impl Into<String>) -> Self {
        Self::transport(TransportErrorKind::Tls, message)
    }

    /// Create a timeout error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::transport(TransportErrorKind::Timeout, "request timeout")
    }

    /// Create a protocol error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create a JSON deserialization error with path context.
    #[must_use]
    pub fn json_deserialization(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::JsonDeserialization {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns the transport failure kind, if this is a transport error.
    #[must_use]
    pub const fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns `true` if this is a transport error worth re-attempting.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self.transport_kind() {
            Some(kind) => kind.is_transient(),
            None => false,
        }
    }

    /// Returns `true` if this is a timeout error.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.transport_kind(), Some(TransportErrorKind::Timeout))
    }

    /// Returns `true` if this is a connection error.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self.transport_kind(), Some(TransportErrorKind::Connect))
    }

    /// Returns `true` if this is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Number of attempts recorded on a transport error.
    #[must_use]
    pub const fn attempts(&self) -> Option<u32> {
        match self {
            Self::Transport { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Annotate a transport error with the attempt count; other kinds are unchanged.
    #[must_use]
    pub fn with_attempts(mut self, count: u32) -> Self {
        if let Self::Transport { attempts, .. } = &mut self {
            *attempts = count;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::*;

    #[test]
    fn error_display() {
        let err = Error::timeout();
        assert_eq!(
            err.to_string(),
            "transport error (timeout) after 1 attempt(s): request timeout"
        );

        let err = Error::connection("failed to connect").with_attempts(4);
        assert_eq!(
            err.to_string(),
            "transport error (connect) after 4 attempt(s): failed to connect"
        );

        let err = Error::TooManyRedirects { count: 5, max: 5 };
        assert_eq!(err.to_string(), "too many redirects (5 exceeded max of 5)");

        let err = Error::json_deserialization("user.address.city", "missing field `city`");
        assert_eq!(
            err.to_string(),
            "JSON deserialization error at 'user.address.city': missing field `city`"
        );
    }

    #[test]
    fn transient_classification() {
        check!(Error::timeout().is_transient());
        check!(Error::connection("reset").is_transient());
        check!(Error::transport(TransportErrorKind::Status(503), "busy").is_transient());
        check!(!Error::tls("bad certificate").is_transient());
        check!(!Error::authentication("denied").is_transient());
        check!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn with_attempts_only_touches_transport() {
        let err = Error::connection("refused").with_attempts(3);
        check!(err.attempts() == Some(3));

        let err = Error::protocol("bad redirect").with_attempts(3);
        check!(err.attempts() == None);
        let_assert!(Error::Protocol(message) = err);
        check!(message == "bad redirect");
    }

    #[test]
    fn predicates() {
        check!(Error::timeout().is_timeout());
        check!(!Error::timeout().is_connection());
        check!(Error::connection("x").is_connection());
        check!(Error::Cancelled.is_cancelled());
    }
}
