use std::time::Duration;

use crate::Strategy;

/// Timeout applied to each attempt unless overridden.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Caller options for a single lookup.
///
/// ```
/// use std::time::Duration;
///
/// let options = getip::Options::new()
///     .with_timeout(Duration::from_secs(2))
///     .with_fallback_urls(["https://ifconfig.me/ip"]);
/// assert_eq!(options.timeout(), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    timeout: Duration,
    https_only: bool,
    fallback_urls: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            https_only: false,
            fallback_urls: Vec::new(),
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-attempt timeout. A zero timeout keeps the default.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };
        self
    }

    /// Sets the per-attempt timeout in milliseconds.
    #[must_use]
    pub fn with_timeout_ms(self, millis: u64) -> Self {
        self.with_timeout(Duration::from_millis(millis))
    }

    /// Skip the DNS resolvers and only query HTTPS endpoints.
    #[must_use]
    pub fn with_https_only(mut self, https_only: bool) -> Self {
        self.https_only = https_only;
        self
    }

    /// Extra plain-text endpoints queried after the builtin ones.
    #[must_use]
    pub fn with_fallback_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn https_only(&self) -> bool {
        self.https_only
    }

    pub fn fallback_urls(&self) -> &[String] {
        &self.fallback_urls
    }

    /// The order in which sources are consulted.
    pub fn strategy(&self) -> Strategy {
        if self.https_only {
            Strategy::HttpsOnly
        } else {
            Strategy::DnsThenHttps
        }
    }
}
