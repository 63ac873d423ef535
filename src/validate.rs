use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::Version;

/// Returns `true` if `candidate` is a textual IP address of the given version.
#[must_use]
pub fn is_valid(version: Version, candidate: &str) -> bool {
    parse_addr(version, candidate).is_some()
}

/// Parses `candidate` as an IP address of the given version.
///
/// IPv4 accepts dotted-quad notation only. IPv6 accepts every RFC 4291 form
/// (compressed, embedded IPv4) optionally followed by an alphanumeric `%zone`
/// suffix, which is dropped from the returned address.
#[must_use]
pub fn parse_addr(version: Version, candidate: &str) -> Option<IpAddr> {
    match version {
        Version::V4 => candidate.parse::<Ipv4Addr>().ok().map(IpAddr::V4),
        Version::V6 => {
            let addr = match candidate.split_once('%') {
                Some((addr, zone)) if is_zone_id(zone) => addr,
                Some(_) => return None,
                None => candidate,
            };
            addr.parse::<Ipv6Addr>().ok().map(IpAddr::V6)
        }
    }
}

fn is_zone_id(zone: &str) -> bool {
    !zone.is_empty() && zone.chars().all(|c| c.is_ascii_alphanumeric())
}
