use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};
use std::str;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::{self, BoxFuture};
use futures_util::stream;
use http::{Response, StatusCode, Uri};
use http_body_util::BodyExt;
use hyper_util::{
    client::legacy::{
        Builder,
        connect::{HttpConnector, HttpInfo},
    },
    rt::TokioExecutor,
};
use thiserror::Error;
use tokio::time;
use tracing::trace_span;
use tracing_futures::Instrument;

#[cfg(feature = "tower-layer")]
use tower_layer::Layer;

use crate::{Context, Resolutions, Version};

type GaiResolver = hyper_system_resolver::system::Resolver;

////////////////////////////////////////////////////////////////////////////////
// Hardcoded resolvers

/// Builtin IPv4 endpoints, in the order they are queried.
pub const V4: &[Resolver<'static>] = &[HTTPS_ICANHAZIP_COM, HTTPS_IPIFY_ORG];

/// Builtin IPv6 endpoints, in the order they are queried.
pub const V6: &[Resolver<'static>] = &[HTTPS_ICANHAZIP_COM, HTTPS_IPIFY_ORG_V6];

/// `https://icanhazip.com/` HTTPS resolver options
pub const HTTPS_ICANHAZIP_COM: Resolver<'static> =
    Resolver::new_static("https://icanhazip.com/", ExtractMethod::PlainText);

/// `https://api.ipify.org/` HTTPS resolver options
pub const HTTPS_IPIFY_ORG: Resolver<'static> =
    Resolver::new_static("https://api.ipify.org/", ExtractMethod::PlainText);

/// `https://api6.ipify.org/` HTTPS resolver options
pub const HTTPS_IPIFY_ORG_V6: Resolver<'static> =
    Resolver::new_static("https://api6.ipify.org/", ExtractMethod::PlainText);

/// Builtin endpoints for `version` followed by `fallback_urls`.
///
/// Fallback URLs are expected to answer with the bare address.
pub fn resolvers<S>(version: Version, fallback_urls: &[S]) -> Vec<Resolver<'static>>
where
    S: AsRef<str>,
{
    let builtin = match version {
        Version::V4 => V4,
        Version::V6 => V6,
    };
    builtin
        .iter()
        .cloned()
        .chain(
            fallback_urls
                .iter()
                .map(|url| Resolver::new(url.as_ref().to_owned(), ExtractMethod::PlainText)),
        )
        .collect()
}

////////////////////////////////////////////////////////////////////////////////
// Error

/// HTTP resolver error
#[derive(Debug, Error)]
pub enum Error {
    /// Hyper error.
    #[error("{0}")]
    Hyper(hyper::Error),
    /// Client error.
    #[error("{0}")]
    Client(hyper_util::client::legacy::Error),
    /// URI parsing error.
    #[error("{0}")]
    Uri(http::uri::InvalidUri),
    /// The endpoint answered with a non-success status.
    #[error("unexpected status {0}")]
    Status(StatusCode),
    /// Failure to load certificates.
    #[error("failed to load certs: {0}")]
    NoCerts(std::io::Error),
    /// OpenSSL error.
    #[cfg(feature = "openssl")]
    #[error("{0}")]
    Openssl(openssl::error::ErrorStack),
}

////////////////////////////////////////////////////////////////////////////////
// Details & options

/// A resolution produced from a HTTP resolver
#[derive(Debug, Clone)]
pub struct Details {
    uri: Uri,
    server: Option<SocketAddr>,
    method: ExtractMethod,
}

impl Details {
    /// URI used in the resolution of the associated IP address
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// HTTP server used in the resolution of our IP address, when the
    /// connector reported it.
    pub fn server(&self) -> Option<SocketAddr> {
        self.server
    }

    /// The extract method used in the resolution of the associated IP address
    pub fn extract_method(&self) -> ExtractMethod {
        self.method
    }
}

/// Method used to extract an IP address from a http response
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExtractMethod {
    /// Parses the body with whitespace trimmed as the IP address.
    PlainText,
    /// Parses the body with double quotes and whitespace trimmed as the IP address.
    StripDoubleQuotes,
    /// Parses the value of the JSON property `"ip"` within the body as the IP address.
    ///
    /// Note this method does not validate the JSON.
    ExtractJsonIpField,
}

////////////////////////////////////////////////////////////////////////////////
// Resolver

/// Options to build a HTTP resolver
#[derive(Debug, Clone)]
pub struct Resolver<'r> {
    uri: Cow<'r, str>,
    method: ExtractMethod,
}

impl<'r> Resolver<'r> {
    /// Create new HTTP resolver options
    pub fn new<U>(uri: U, method: ExtractMethod) -> Self
    where
        U: Into<Cow<'r, str>>,
    {
        Self {
            uri: uri.into(),
            method,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl Resolver<'static> {
    /// Create new HTTP resolver options from static
    #[must_use]
    pub const fn new_static(uri: &'static str, method: ExtractMethod) -> Self {
        Self {
            uri: Cow::Borrowed(uri),
            method,
        }
    }
}

impl crate::Resolver for Resolver<'_> {
    fn resolve(&self, version: Version, cx: &Context) -> Resolutions {
        let method = self.method;
        let uri: Uri = match self.uri.as_ref().parse() {
            Ok(uri) => uri,
            Err(err) => {
                return Box::pin(stream::once(future::ready(Err(crate::Error::from(
                    Error::Uri(err),
                )))));
            }
        };
        let span = trace_span!("http resolver", ?version, ?method, %uri);
        let attempt = fetch(cx.http_transport(), version, uri, method, cx.timeout());
        Box::pin(stream::once(attempt).instrument(span))
    }
}

async fn fetch(
    transport: Arc<dyn Transport>,
    version: Version,
    uri: Uri,
    method: ExtractMethod,
    timeout: Duration,
) -> Result<(IpAddr, crate::Details), crate::Error> {
    let response = time::timeout(timeout, transport.get(version, uri.clone()))
        .await
        .map_err(|_| crate::Error::Timeout(timeout))??;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Status(status).into());
    }
    let server = response
        .extensions()
        .get::<HttpInfo>()
        .map(HttpInfo::remote_addr);
    let body_str = str::from_utf8(response.body())?;
    let address_str = match method {
        ExtractMethod::PlainText => body_str.trim(),
        ExtractMethod::ExtractJsonIpField => extract_json_ip_field(body_str)?,
        ExtractMethod::StripDoubleQuotes => body_str.trim().trim_matches('"'),
    };
    let address = crate::parse_addr(version, address_str).ok_or(crate::Error::Addr)?;
    let details = Box::new(Details {
        uri,
        server,
        method,
    });
    Ok((address, crate::Details::from(details)))
}

fn extract_json_ip_field(s: &str) -> Result<&str, crate::Error> {
    s.split_once(r#""ip":"#)
        .and_then(|(_, after_prop)| after_prop.split('"').nth(1))
        .ok_or(crate::Error::Addr)
}

////////////////////////////////////////////////////////////////////////////////
// Client

/// Performs a single GET over a connection of the given IP version.
pub trait Transport: Send + Sync + 'static {
    fn get(
        &self,
        version: Version,
        uri: Uri,
    ) -> BoxFuture<'static, Result<Response<Bytes>, Error>>;
}

/// Hyper client with a fresh connection pool per request.
#[derive(Debug, Default, Clone, Copy)]
pub struct HyperTransport;

impl Transport for HyperTransport {
    fn get(
        &self,
        version: Version,
        uri: Uri,
    ) -> BoxFuture<'static, Result<Response<Bytes>, Error>> {
        Box::pin(async move {
            let response = http_get(version, uri).await?;
            let (parts, body) = response.into_parts();
            let body = body.collect().await.map_err(Error::Hyper)?.to_bytes();
            Ok(Response::from_parts(parts, body))
        })
    }
}

fn http_connector(version: Version) -> HttpConnector<GaiResolver> {
    use dns_lookup::{AddrFamily, AddrInfoHints, SockType};
    use hyper_system_resolver::system::System;

    let family = match version {
        Version::V4 => AddrFamily::Inet,
        Version::V6 => AddrFamily::Inet6,
    };
    let hints = AddrInfoHints {
        address: family.into(),
        socktype: SockType::Stream.into(),
        ..AddrInfoHints::default()
    };
    let system = System {
        addr_info_hints: Some(hints),
        service: None,
    };
    HttpConnector::new_with_resolver(system.resolver())
}

async fn http_get(version: Version, uri: Uri) -> Result<Response<hyper::body::Incoming>, Error> {
    type GetBody = http_body_util::Full<bytes::Bytes>;

    let http = http_connector(version);

    #[cfg(any(
        feature = "https-openssl",
        feature = "https-rustls-native",
        feature = "https-rustls-webpki"
    ))]
    if uri.scheme() == Some(&http::uri::Scheme::HTTPS) {
        let mut http = http;
        http.enforce_http(false);

        #[cfg(feature = "https-openssl")]
        let connector = hyper_openssl::client::legacy::HttpsLayer::new()
            .map(|l| l.layer(http))
            .map_err(Error::Openssl)?;

        #[cfg(feature = "https-rustls-native")]
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(Error::NoCerts)?
            .https_only()
            .enable_http1()
            .wrap_connector(http);

        #[cfg(feature = "https-rustls-webpki")]
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_only()
            .enable_http1()
            .wrap_connector(http);

        return Builder::new(TokioExecutor::new())
            .build::<_, GetBody>(connector)
            .get(uri)
            .await
            .map_err(Error::Client);
    }

    Builder::new(TokioExecutor::new())
        .build::<_, GetBody>(http)
        .get(uri)
        .await
        .map_err(Error::Client)
}
