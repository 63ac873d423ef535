use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{self, Poll};
use std::time::Duration;

use futures_util::{StreamExt, ready};
use tokio::task::JoinHandle;
use tracing::{debug, trace, trace_span};
use tracing_futures::Instrument;

use crate::{CancelToken, DEFAULT_TIMEOUT, Details, Error, Resolutions, Resolver, Version};
use crate::{dns, http};

///////////////////////////////////////////////////////////////////////////////
// Context

/// Transports and attempt timeout shared by the resolvers of one lookup.
#[derive(Clone)]
pub struct Context {
    timeout: Duration,
    dns: Arc<dyn dns::Transport>,
    http: Arc<dyn http::Transport>,
}

impl Context {
    /// Context using UDP for DNS and hyper for HTTP.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            dns: Arc::new(dns::UdpTransport),
            http: Arc::new(http::HyperTransport),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_dns_transport(mut self, transport: Arc<dyn dns::Transport>) -> Self {
        self.dns = transport;
        self
    }

    #[must_use]
    pub fn with_http_transport(mut self, transport: Arc<dyn http::Transport>) -> Self {
        self.http = transport;
        self
    }

    /// Budget of a single attempt.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn dns_transport(&self) -> Arc<dyn dns::Transport> {
        self.dns.clone()
    }

    pub fn http_transport(&self) -> Arc<dyn http::Transport> {
        self.http.clone()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

///////////////////////////////////////////////////////////////////////////////
// Lookup

/// Order in which the resolution sources are consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Query the DNS resolvers, then the HTTPS endpoints if none answered.
    DnsThenHttps,
    /// Only query the HTTPS endpoints.
    HttpsOnly,
}

/// A running lookup.
///
/// Resolves to the first validated address, [`Error::NotFound`] once every
/// source is exhausted, or [`Error::Cancelled`] after [`Lookup::cancel`].
/// Dropping the lookup cancels it.
#[derive(Debug)]
pub struct Lookup {
    token: CancelToken,
    task: JoinHandle<Result<(IpAddr, Details), Error>>,
}

impl Lookup {
    /// Spawns the lookup on the current Tokio runtime.
    pub fn spawn<D, H>(
        version: Version,
        strategy: Strategy,
        dns: D,
        https: H,
        cx: Context,
    ) -> Self
    where
        D: Resolver + 'static,
        H: Resolver + 'static,
    {
        let token = CancelToken::new();
        let span = trace_span!("lookup", ?version, ?strategy);
        let task = tokio::spawn(
            run(version, strategy, dns, https, cx, token.clone()).instrument(span),
        );
        Self { token, task }
    }

    /// Stops the lookup. No further attempt starts and in-flight queries are
    /// dropped.
    pub fn cancel(&self) {
        self.token.cancel();
        self.task.abort();
    }

    /// A token that cancels this lookup from elsewhere.
    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Future for Lookup {
    type Output = Result<(IpAddr, Details), Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        if self.token.is_cancelled() {
            return Poll::Ready(Err(Error::Cancelled));
        }
        let result = ready!(Pin::new(&mut self.task).poll(cx));
        if self.token.is_cancelled() {
            return Poll::Ready(Err(Error::Cancelled));
        }
        Poll::Ready(match result {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Err(Error::Cancelled),
            Err(err) => Err(Error::new(err)),
        })
    }
}

impl Drop for Lookup {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<D, H>(
    version: Version,
    strategy: Strategy,
    dns: D,
    https: H,
    cx: Context,
    token: CancelToken,
) -> Result<(IpAddr, Details), Error>
where
    D: Resolver,
    H: Resolver,
{
    if strategy == Strategy::DnsThenHttps {
        let attempts = dns.resolve(version, &cx);
        match first_valid(version, attempts, &token)
            .instrument(trace_span!("dns"))
            .await
        {
            Ok(found) => return Ok(found),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => debug!(%err, "dns resolution failed, falling back to https"),
        }
    }
    let attempts = https.resolve(version, &cx);
    first_valid(version, attempts, &token)
        .instrument(trace_span!("https"))
        .await
}

/// Drives `attempts` until one yields an address of `version`.
///
/// Failed attempts are skipped. Cancellation drops the stream, and with it any
/// in-flight query.
pub(crate) async fn first_valid(
    version: Version,
    mut attempts: Resolutions,
    token: &CancelToken,
) -> Result<(IpAddr, Details), Error> {
    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => return Err(Error::Cancelled),
            next = attempts.next() => next,
        };
        match next {
            Some(Ok((addr, details))) if version.matches(addr) => return Ok((addr, details)),
            Some(Ok((addr, _))) => trace!(%addr, "discarding address of the wrong version"),
            Some(Err(Error::Cancelled)) => return Err(Error::Cancelled),
            Some(Err(err)) => trace!(%err, "attempt failed"),
            None => return Err(Error::NotFound),
        }
    }
}
