use std::borrow::Cow;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{self, BoxFuture};
use futures_util::{StreamExt, stream};
use hickory_client::client::Client;
use hickory_proto::{
    ProtoError, ProtoErrorKind,
    op::Query,
    rr::{DNSClass, Name, RData, Record, RecordType},
    runtime::TokioRuntimeProvider,
    udp::UdpClientStream,
    xfer::{DnsHandle, DnsRequestOptions, DnsResponse},
};
use tokio::runtime::Handle;
use tokio::time;
use tracing::trace_span;
use tracing_futures::Instrument;

use crate::{Context, Resolutions, Version};

///////////////////////////////////////////////////////////////////////////////
// Hardcoded resolvers

const DEFAULT_DNS_PORT: u16 = 53;

/// Builtin IPv4 resolver groups, in the order they are queried.
pub const V4: &[Resolver<'static>] = &[OPENDNS_V4, GOOGLE_V4];

/// Builtin IPv6 resolver groups, in the order they are queried.
pub const V6: &[Resolver<'static>] = &[OPENDNS_V6, GOOGLE_V6];

/// OpenDNS IPv4 DNS resolver options.
pub const OPENDNS_V4: Resolver<'static> = Resolver::new_static(
    "myip.opendns.com",
    &[
        IpAddr::V4(Ipv4Addr::new(208, 67, 222, 222)),
        IpAddr::V4(Ipv4Addr::new(208, 67, 220, 220)),
        IpAddr::V4(Ipv4Addr::new(208, 67, 222, 220)),
        IpAddr::V4(Ipv4Addr::new(208, 67, 220, 222)),
    ],
    DEFAULT_DNS_PORT,
    QueryMethod::A,
    DNSClass::IN,
    None,
);

/// OpenDNS IPv6 DNS resolver options.
pub const OPENDNS_V6: Resolver<'static> = Resolver::new_static(
    "myip.opendns.com",
    &[
        // 2620:0:ccc::2
        IpAddr::V6(Ipv6Addr::new(9760, 0, 3276, 0, 0, 0, 0, 2)),
        // 2620:0:ccd::2
        IpAddr::V6(Ipv6Addr::new(9760, 0, 3277, 0, 0, 0, 0, 2)),
    ],
    DEFAULT_DNS_PORT,
    QueryMethod::AAAA,
    DNSClass::IN,
    None,
);

/// Google DNS IPv4 DNS resolver options
pub const GOOGLE_V4: Resolver<'static> = Resolver::new_static(
    "o-o.myaddr.l.google.com",
    &[
        IpAddr::V4(Ipv4Addr::new(216, 239, 32, 10)),
        IpAddr::V4(Ipv4Addr::new(216, 239, 34, 10)),
        IpAddr::V4(Ipv4Addr::new(216, 239, 36, 10)),
        IpAddr::V4(Ipv4Addr::new(216, 239, 38, 10)),
    ],
    DEFAULT_DNS_PORT,
    QueryMethod::TXT,
    DNSClass::IN,
    Some(strip_double_quotes as Transform),
);

/// Google DNS IPv6 DNS resolver options
pub const GOOGLE_V6: Resolver<'static> = Resolver::new_static(
    "o-o.myaddr.l.google.com",
    &[
        // 2001:4860:4802:32::a
        IpAddr::V6(Ipv6Addr::new(8193, 18528, 18434, 50, 0, 0, 0, 10)),
        // 2001:4860:4802:34::a
        IpAddr::V6(Ipv6Addr::new(8193, 18528, 18434, 52, 0, 0, 0, 10)),
        // 2001:4860:4802:36::a
        IpAddr::V6(Ipv6Addr::new(8193, 18528, 18434, 54, 0, 0, 0, 10)),
        // 2001:4860:4802:38::a
        IpAddr::V6(Ipv6Addr::new(8193, 18528, 18434, 56, 0, 0, 0, 10)),
    ],
    DEFAULT_DNS_PORT,
    QueryMethod::TXT,
    DNSClass::IN,
    Some(strip_double_quotes as Transform),
);

/// Builtin resolver groups for `version`.
#[must_use]
pub fn resolvers(version: Version) -> &'static [Resolver<'static>] {
    match version {
        Version::V4 => V4,
        Version::V6 => V6,
    }
}

fn strip_double_quotes(answer: &str) -> &str {
    answer.trim_matches('"')
}

///////////////////////////////////////////////////////////////////////////////
// Error

/// DNS resolver error.
pub type Error = ProtoError;

///////////////////////////////////////////////////////////////////////////////
// Details & options

/// Details produced from a DNS resolution.
#[derive(Debug, Clone)]
pub struct Details {
    name: Name,
    server: SocketAddr,
    method: QueryMethod,
}

impl Details {
    /// DNS name used in the resolution of our IP address.
    #[must_use]
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// DNS server used in the resolution of our IP address.
    #[must_use]
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// The query method used in the resolution of our IP address.
    #[must_use]
    pub fn query_method(&self) -> QueryMethod {
        self.method
    }
}

/// Method used to query an IP address from a DNS server
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(clippy::upper_case_acronyms)]
pub enum QueryMethod {
    /// The first queried `A` name record is extracted as our IP address.
    A,
    /// The first queried `AAAA` name record is extracted as our IP address.
    AAAA,
    /// The first `TXT` record is extracted and parsed as our IP address.
    TXT,
}

impl QueryMethod {
    fn record_type(self) -> RecordType {
        match self {
            QueryMethod::A => RecordType::A,
            QueryMethod::AAAA => RecordType::AAAA,
            QueryMethod::TXT => RecordType::TXT,
        }
    }
}

/// Rewrites the trimmed text of an answer before it is validated.
pub type Transform = fn(&str) -> &str;

///////////////////////////////////////////////////////////////////////////////
// Resolver

/// Options to build a DNS resolver group.
///
/// The servers are queried one after the other, each once, for the same
/// question.
#[derive(Debug, Clone)]
pub struct Resolver<'r> {
    port: u16,
    name: Cow<'r, str>,
    servers: Cow<'r, [IpAddr]>,
    method: QueryMethod,
    class: DNSClass,
    transform: Option<Transform>,
}

impl<'r> Resolver<'r> {
    /// Create a new DNS resolver.
    pub fn new<N, S>(
        name: N,
        servers: S,
        port: u16,
        method: QueryMethod,
        class: DNSClass,
        transform: Option<Transform>,
    ) -> Self
    where
        N: Into<Cow<'r, str>>,
        S: Into<Cow<'r, [IpAddr]>>,
    {
        Self {
            port,
            name: name.into(),
            servers: servers.into(),
            method,
            class,
            transform,
        }
    }
}

impl Resolver<'static> {
    /// Create a new DNS resolver from static options.
    #[must_use]
    pub const fn new_static(
        name: &'static str,
        servers: &'static [IpAddr],
        port: u16,
        method: QueryMethod,
        class: DNSClass,
        transform: Option<Transform>,
    ) -> Self {
        Self {
            port,
            name: Cow::Borrowed(name),
            servers: Cow::Borrowed(servers),
            method,
            class,
            transform,
        }
    }
}

impl crate::Resolver for Resolver<'_> {
    fn resolve(&self, version: Version, cx: &Context) -> Resolutions {
        let port = self.port;
        let method = self.method;
        let name = match Name::from_ascii(self.name.as_ref()) {
            Ok(name) => name,
            Err(err) => {
                return Box::pin(stream::once(future::ready(Err(crate::Error::from(err)))));
            }
        };
        let servers: Vec<_> = self
            .servers
            .iter()
            .copied()
            .filter(|addr| version.matches(*addr))
            .map(|addr| SocketAddr::new(addr, port))
            .collect();
        let span = trace_span!("dns resolver", ?version, ?method, %name, %port);
        let mut query = Query::query(name, method.record_type());
        query.set_query_class(self.class);
        let question = Question {
            query,
            method,
            transform: self.transform,
        };
        let transport = cx.dns_transport();
        let timeout = cx.timeout();
        let attempts = stream::iter(servers).then(move |server| {
            query_server(transport.clone(), server, question.clone(), version, timeout)
                .instrument(trace_span!("query server", %server))
        });
        Box::pin(attempts.instrument(span))
    }
}

///////////////////////////////////////////////////////////////////////////////
// Attempt

#[derive(Debug, Clone)]
struct Question {
    query: Query,
    method: QueryMethod,
    transform: Option<Transform>,
}

async fn query_server(
    transport: Arc<dyn Transport>,
    server: SocketAddr,
    question: Question,
    version: Version,
    timeout: Duration,
) -> Result<(IpAddr, crate::Details), crate::Error> {
    let Question {
        query,
        method,
        transform,
    } = question;
    let name = query.name().clone();
    let answers = time::timeout(timeout, transport.query(server, query, timeout))
        .await
        .map_err(|_| crate::Error::Timeout(timeout))??;
    let Some(answer) = answers.into_iter().next() else {
        return Err(crate::Error::Addr);
    };
    let text = answer_text(answer).ok_or(crate::Error::Addr)?;
    let text = text.trim();
    let text = match transform {
        Some(transform) => transform(text),
        None => text,
    };
    let addr = crate::parse_addr(version, text).ok_or(crate::Error::Addr)?;
    let details = Box::new(Details {
        name,
        server,
        method,
    });
    Ok((addr, crate::Details::from(details)))
}

fn answer_text(answer: Record) -> Option<String> {
    match answer.into_data() {
        RData::A(addr) => Some(addr.0.to_string()),
        RData::AAAA(addr) => Some(addr.0.to_string()),
        RData::TXT(txt) => txt
            .iter()
            .next()
            .map(|bytes| String::from_utf8_lossy(&bytes[..]).into_owned()),
        other => Some(other.to_string()),
    }
}

///////////////////////////////////////////////////////////////////////////////
// Client

/// Sends a single DNS query and returns the answer section of the response.
///
/// `timeout` is the budget of the attempt. The caller enforces it, so a
/// transport must not give up any sooner.
pub trait Transport: Send + Sync + 'static {
    fn query(
        &self,
        server: SocketAddr,
        query: Query,
        timeout: Duration,
    ) -> BoxFuture<'static, Result<Vec<Record>, Error>>;
}

/// Slack added to the socket timeout so the attempt deadline fires first.
const UDP_TIMEOUT_SLACK: Duration = Duration::from_millis(250);

/// Queries over a fresh UDP socket per attempt, without retries.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpTransport;

impl Transport for UdpTransport {
    fn query(
        &self,
        server: SocketAddr,
        query: Query,
        timeout: Duration,
    ) -> BoxFuture<'static, Result<Vec<Record>, Error>> {
        Box::pin(async move {
            let mut query_opts = DnsRequestOptions::default();
            query_opts.use_edns = true;
            let timeout = timeout.saturating_add(UDP_TIMEOUT_SLACK);
            let response = dns_query(server, query, query_opts, timeout).await?;
            Ok(response.answers().to_vec())
        })
    }
}

async fn dns_query(
    server: SocketAddr,
    query: Query,
    query_opts: DnsRequestOptions,
    timeout: Duration,
) -> Result<DnsResponse, ProtoError> {
    let handle = Handle::current();
    let stream = UdpClientStream::builder(server, TokioRuntimeProvider::new())
        .with_timeout(Some(timeout))
        .build();
    let (client, bg) = Client::connect(stream).await?;
    handle.spawn(bg);
    client
        .lookup(query, query_opts)
        .next()
        .await
        .transpose()?
        .ok_or_else(|| ProtoErrorKind::Message("expected a response").into())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hickory_proto::rr::rdata::{A, AAAA, TXT};

    use super::*;
    use crate::resolver::first_valid;
    use crate::testing::{DnsReply, MockDns, MockHttp, context, serve_dns};
    use crate::{CancelToken, Context, Resolver as _};

    const TIMEOUT: Duration = Duration::from_millis(500);

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn group(servers: &[&str], method: QueryMethod) -> Resolver<'static> {
        let servers: Vec<IpAddr> = servers.iter().map(|s| ip(s)).collect();
        Resolver::new("myip.example", servers, 53, method, DNSClass::IN, None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_valid_answer_stops_iteration() {
        let answer = RData::AAAA(AAAA("2001:db8::42".parse().unwrap()));
        let dns = MockDns::new([
            (ip("2001:db8::1"), DnsReply::Hang),
            (ip("2001:db8::2"), DnsReply::Answer(answer)),
            (ip("2001:db8::3"), DnsReply::Fail),
        ]);
        let cx = context(&dns, &MockHttp::new([]), TIMEOUT);
        let resolver = group(&["2001:db8::1", "2001:db8::2", "2001:db8::3"], QueryMethod::AAAA);

        let attempts = resolver.resolve(Version::V6, &cx);
        let (addr, details) = first_valid(Version::V6, attempts, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(addr, ip("2001:db8::42"));
        let details = details.downcast_ref::<Details>().unwrap();
        assert_eq!(details.server(), SocketAddr::new(ip("2001:db8::2"), 53));
        assert_eq!(details.query_method(), QueryMethod::AAAA);
        assert_eq!(
            dns.calls(),
            [
                SocketAddr::new(ip("2001:db8::1"), 53),
                SocketAddr::new(ip("2001:db8::2"), 53),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_reported_per_attempt() {
        let dns = MockDns::new([(ip("192.0.2.1"), DnsReply::Hang)]);
        let cx = context(&dns, &MockHttp::new([]), TIMEOUT);
        let resolver = group(&["192.0.2.1"], QueryMethod::A);

        let mut attempts = resolver.resolve(Version::V4, &cx);
        let err = attempts.next().await.unwrap().unwrap_err();
        assert!(matches!(err, crate::Error::Timeout(t) if t == TIMEOUT));
        assert!(attempts.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_groups_are_tried_in_order() {
        let answer = RData::A(A(Ipv4Addr::new(198, 51, 100, 7)));
        let dns = MockDns::new([
            (ip("192.0.2.1"), DnsReply::Empty),
            (ip("192.0.2.2"), DnsReply::Fail),
            (ip("192.0.2.3"), DnsReply::Answer(answer)),
        ]);
        let cx = context(&dns, &MockHttp::new([]), TIMEOUT);
        let groups = vec![
            group(&["192.0.2.1", "192.0.2.2"], QueryMethod::A),
            group(&["192.0.2.3"], QueryMethod::A),
        ];

        let attempts = groups.resolve(Version::V4, &cx);
        let (addr, _) = first_valid(Version::V4, attempts, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(addr, ip("198.51.100.7"));
        assert_eq!(dns.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_servers_of_other_version_are_skipped() {
        let dns = MockDns::new([]);
        let cx = context(&dns, &MockHttp::new([]), TIMEOUT);
        let resolver = group(&["192.0.2.1", "2001:db8::1"], QueryMethod::AAAA);

        let attempts = resolver.resolve(Version::V6, &cx);
        let err = first_valid(Version::V6, attempts, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(dns.calls(), [SocketAddr::new(ip("2001:db8::1"), 53)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_txt_answer_is_transformed() {
        let answer = RData::TXT(TXT::new(vec!["\"203.0.113.9\" ".to_owned()]));
        let dns = MockDns::new([(ip("192.0.2.1"), DnsReply::Answer(answer))]);
        let cx = context(&dns, &MockHttp::new([]), TIMEOUT);
        let resolver = Resolver::new(
            "myip.example",
            vec![ip("192.0.2.1")],
            53,
            QueryMethod::TXT,
            DNSClass::IN,
            Some(strip_double_quotes as Transform),
        );

        let attempts = resolver.resolve(Version::V4, &cx);
        let (addr, _) = first_valid(Version::V4, attempts, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(addr, ip("203.0.113.9"));
    }

    fn local_group(server: SocketAddr) -> Resolver<'static> {
        Resolver::new(
            "myip.example",
            vec![server.ip()],
            server.port(),
            QueryMethod::A,
            DNSClass::IN,
            None,
        )
    }

    #[tokio::test]
    async fn test_udp_answer_is_resolved() {
        let server = serve_dns(Some(Ipv4Addr::new(203, 0, 113, 7))).await;
        let cx = Context::new(Duration::from_secs(2));

        let mut attempts = local_group(server).resolve(Version::V4, &cx);
        let (addr, details) = attempts.next().await.unwrap().unwrap();
        assert_eq!(addr, ip("203.0.113.7"));
        let details = details.downcast_ref::<Details>().unwrap();
        assert_eq!(details.server(), server);
        assert_eq!(details.query_method(), QueryMethod::A);
    }

    #[tokio::test]
    async fn test_udp_silence_waits_for_the_whole_attempt_budget() {
        // Longer than hickory's own 5s default.
        let budget = Duration::from_secs(6);
        let server = serve_dns(None).await;
        let cx = Context::new(budget);

        let started = time::Instant::now();
        let mut attempts = local_group(server).resolve(Version::V4, &cx);
        let err = attempts.next().await.unwrap().unwrap_err();
        assert!(started.elapsed() >= budget, "{:?}", started.elapsed());
        assert!(matches!(err, crate::Error::Timeout(t) if t == budget), "{err}");
    }

    #[test]
    fn test_builtin_groups_match_version() {
        for resolver in resolvers(Version::V4) {
            assert!(resolver.servers.iter().all(|addr| addr.is_ipv4()));
        }
        for resolver in resolvers(Version::V6) {
            assert!(resolver.servers.iter().all(|addr| addr.is_ipv6()));
        }
        assert_eq!(OPENDNS_V4.method, QueryMethod::A);
        assert_eq!(OPENDNS_V6.method, QueryMethod::AAAA);
    }
}
