//! Find the public IP address of a device.
//!
//! A lookup first asks DNS resolvers that echo the requester's source address
//! (such as `myip.opendns.com`) and falls back to plain-text HTTPS echo
//! services once every resolver has failed. Each resolver and URL is tried
//! once, in declared order, and the first answer that parses as an address of
//! the requested [`Version`] wins.
//!
//! ```no_run
//! # async fn run() -> Result<(), getip::Error> {
//! let (addr, _details) = getip::v4(getip::Options::default()).await?;
//! println!("{addr}");
//! # Ok(())
//! # }
//! ```
//!
//! A [`Lookup`] can be cancelled at any time. A cancelled lookup settles with
//! [`Error::Cancelled`] and never reports a late answer.
#![cfg_attr(docsrs, feature(doc_cfg))]

mod cancel;
mod error;
mod options;
mod resolver;
mod validate;

#[cfg(test)]
mod testing;

pub mod dns;
pub mod http;

use std::any::Any;
use std::net::IpAddr;

use futures_util::stream::{self, BoxStream, StreamExt};

pub use crate::cancel::CancelToken;
pub use crate::error::Error;
pub use crate::options::{DEFAULT_TIMEOUT, Options};
pub use crate::resolver::{Context, Lookup, Strategy};
pub use crate::validate::{is_valid, parse_addr};

/// Stream of attempts produced by a [`Resolver`], one item per server or URL.
pub type Resolutions = BoxStream<'static, Result<(IpAddr, Details), Error>>;

///////////////////////////////////////////////////////////////////////////////
// Version

/// The version of IP address to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    /// IPv4.
    V4,
    /// IPv6.
    V6,
}

impl Version {
    /// Returns `true` if the provided IP address's version matches `self`.
    #[must_use]
    pub fn matches(self, addr: IpAddr) -> bool {
        match self {
            Version::V4 => addr.is_ipv4(),
            Version::V6 => addr.is_ipv6(),
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
// Details

/// Describes the resolver that produced an address.
///
/// Downcast to [`dns::Details`] or [`http::Details`] for the specifics.
#[derive(Debug)]
pub struct Details(Box<dyn Any + Send + Sync>);

impl Details {
    /// Returns the details as `T` if they are of that type.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.0).downcast_ref::<T>()
    }

    /// Returns `true` if the details are of type `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        (*self.0).is::<T>()
    }
}

impl<T> From<Box<T>> for Details
where
    T: Any + Send + Sync,
{
    fn from(details: Box<T>) -> Self {
        Self(details)
    }
}

///////////////////////////////////////////////////////////////////////////////
// Resolver

/// A source of public address attempts.
///
/// Implementations return a lazy stream: no query is sent before the stream is
/// polled, and attempt N+1 is not started before attempt N has yielded.
pub trait Resolver: Send + Sync {
    fn resolve(&self, version: Version, cx: &Context) -> Resolutions;
}

impl<R> Resolver for &R
where
    R: Resolver + ?Sized,
{
    fn resolve(&self, version: Version, cx: &Context) -> Resolutions {
        (**self).resolve(version, cx)
    }
}

impl<R> Resolver for Box<R>
where
    R: Resolver + ?Sized,
{
    fn resolve(&self, version: Version, cx: &Context) -> Resolutions {
        (**self).resolve(version, cx)
    }
}

impl<R> Resolver for [R]
where
    R: Resolver,
{
    fn resolve(&self, version: Version, cx: &Context) -> Resolutions {
        let streams: Vec<_> = self.iter().map(|r| r.resolve(version, cx)).collect();
        Box::pin(stream::iter(streams).flatten())
    }
}

impl<R> Resolver for Vec<R>
where
    R: Resolver,
{
    fn resolve(&self, version: Version, cx: &Context) -> Resolutions {
        self.as_slice().resolve(version, cx)
    }
}

///////////////////////////////////////////////////////////////////////////////
// Entry points

/// Resolves the public IPv4 address.
pub fn v4(options: Options) -> Lookup {
    resolve(Version::V4, options)
}

/// Resolves the public IPv6 address.
pub fn v6(options: Options) -> Lookup {
    resolve(Version::V6, options)
}

/// Resolves the public address of `version` with the builtin resolvers.
///
/// Must be called from within a Tokio runtime.
pub fn resolve(version: Version, options: Options) -> Lookup {
    let cx = Context::new(options.timeout());
    resolve_with(version, options, cx)
}

/// Like [`resolve`], with caller supplied transports.
///
/// The timeout of `options` replaces the one of `cx`.
pub fn resolve_with(version: Version, options: Options, cx: Context) -> Lookup {
    let cx = cx.with_timeout(options.timeout());
    let https = http::resolvers(version, options.fallback_urls());
    Lookup::spawn(
        version,
        options.strategy(),
        dns::resolvers(version),
        https,
        cx,
    )
}
