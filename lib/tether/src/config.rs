//! Client configuration types.

use std::time::Duration;

use url::Url;

use crate::middleware::{DEFAULT_MAX_REDIRECTS, RetryPolicy};
use crate::{Error, Result};

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Configuration for the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL that relative request paths are resolved against.
    pub base_url: Url,
    /// Timeout for a single transport attempt.
    pub timeout: Duration,
    /// Connection timeout duration.
    pub connect_timeout: Duration,
    /// Optional budget for the whole traversal, retries and redirects included.
    pub total_timeout: Option<Duration>,
    /// Maximum idle connections per host.
    pub pool_idle_per_host: usize,
    /// Idle connection timeout.
    pub pool_idle_timeout: Duration,
    /// Retry policy of the default chain.
    pub retry: RetryPolicy,
    /// Redirect hop budget of the default chain.
    pub max_redirects: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            total_timeout: None,
            pool_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
            retry: RetryPolicy::default(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

#[allow(clippy::expect_used)]
fn default_base_url() -> Url {
    Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid")
}

impl ClientConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    base_url: Option<String>,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    total_timeout: Option<Duration>,
    pool_idle_per_host: Option<usize>,
    pool_idle_timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    max_redirects: Option<usize>,
}

impl ClientConfigBuilder {
    /// Set the base URL.
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the overall budget across retries and redirects.
    #[must_use]
    pub const fn total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = Some(timeout);
        self
    }

    /// Set the maximum idle connections per host.
    #[must_use]
    pub const fn pool_idle_per_host(mut self, count: usize) -> Self {
        self.pool_idle_per_host = Some(count);
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub const fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = Some(timeout);
        self
    }

    /// Set the retry policy of the default chain.
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Set the redirect hop budget of the default chain.
    #[must_use]
    pub const fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = Some(max_redirects);
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an unparsable or non-HTTP base URL
    /// and for zero timeouts.
    pub fn build(self) -> Result<ClientConfig> {
        let defaults = ClientConfig::default();

        let base_url = match self.base_url {
            Some(raw) => parse_base_url(&raw)?,
            None => defaults.base_url,
        };

        let timeout = self.timeout.unwrap_or(defaults.timeout);
        if timeout.is_zero() {
            return Err(Error::configuration("per-attempt timeout must be non-zero"));
        }
        if self.total_timeout.is_some_and(|total| total.is_zero()) {
            return Err(Error::configuration("total timeout must be non-zero"));
        }

        Ok(ClientConfig {
            base_url,
            timeout,
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            total_timeout: self.total_timeout,
            pool_idle_per_host: self
                .pool_idle_per_host
                .unwrap_or(defaults.pool_idle_per_host),
            pool_idle_timeout: self.pool_idle_timeout.unwrap_or(defaults.pool_idle_timeout),
            retry: self.retry.unwrap_or(defaults.retry),
            max_redirects: self.max_redirects.unwrap_or(defaults.max_redirects),
        })
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|err| Error::configuration(format!("invalid base URL '{raw}': {err}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::configuration(format!(
            "base URL must use http or https, got '{}'",
            url.scheme()
        )));
    }

    Ok(url)
}
