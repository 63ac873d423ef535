use std::error::Error as StdError;
use std::str::Utf8Error;
use std::time::Duration;

use thiserror::Error;

use crate::{dns, http};

/// An error produced while attempting to resolve
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("no or invalid IP address string found")]
    Addr,
    #[error("dns resolver: {0}")]
    Dns(dns::Error),
    #[error("http resolver: {0}")]
    Http(http::Error),
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
    /// Every resolver of every source was tried without a valid answer.
    #[error("Couldn't find your IP")]
    NotFound,
    /// The lookup was cancelled before it settled.
    #[error("lookup cancelled")]
    Cancelled,
    #[error("other resolver: {0}")]
    Other(Box<dyn StdError + Send + Sync + 'static>),
}

impl Error {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Other(Box::new(error))
    }

    /// Returns `true` if the lookup settled because it was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` if all sources were exhausted.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

impl From<dns::Error> for Error {
    fn from(error: dns::Error) -> Self {
        Self::Dns(error)
    }
}

impl From<http::Error> for Error {
    fn from(error: http::Error) -> Self {
        Self::Http(error)
    }
}

impl From<Utf8Error> for Error {
    fn from(_: Utf8Error) -> Self {
        Self::Addr
    }
}
