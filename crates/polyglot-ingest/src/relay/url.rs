//! Relay address normalization.
//!
//! Relay addresses are user input and also part of cache keys, so two
//! spellings of the same relay must normalize to one string:
//!
//! - Surrounding whitespace and trailing slashes are removed
//! - Scheme and host are lowercased
//! - Default ports are dropped, other ports and paths are kept
//! - Only `ws://` and `wss://` are accepted
//!
//! Hosts that point into private address space are rejected unless
//! [`NormalizeOptions::allow_private_hosts`] is set.

use std::net::IpAddr;

use nostr::RelayUrl;

use crate::{Error, Result};

/// Options for relay address normalization.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeOptions {
    /// Accept loopback, private and link-local hosts (local relays, tests).
    pub allow_private_hosts: bool,
}

/// Normalize a single relay address.
pub fn normalize_relay_url(url: &str, opts: &NormalizeOptions) -> Result<String> {
    let url = url.trim();
    if !url.starts_with("wss://") && !url.starts_with("ws://") {
        return Err(Error::Validation(format!(
            "'{}': relay address must start with wss:// or ws://",
            url
        )));
    }

    let parsed = RelayUrl::parse(url)
        .map_err(|e| Error::Validation(format!("'{}': invalid relay address: {}", url, e)))?;

    let mut normalized = parsed.to_string();
    while normalized.ends_with('/') {
        normalized.pop();
    }

    if !opts.allow_private_hosts
        && let Some(reason) = private_host_reason(host_of(&normalized))
    {
        return Err(Error::Validation(format!("'{}': {}", normalized, reason)));
    }

    Ok(normalized)
}

/// Normalize a relay list into a sorted set without duplicates.
///
/// The result is order-independent: any permutation of the same relays
/// normalizes to the same list.
pub fn normalize_relay_set<S: AsRef<str>>(
    relays: &[S],
    opts: &NormalizeOptions,
) -> Result<Vec<String>> {
    let mut normalized = relays
        .iter()
        .map(|relay| normalize_relay_url(relay.as_ref(), opts))
        .collect::<Result<Vec<_>>>()?;
    normalized.sort();
    normalized.dedup();
    Ok(normalized)
}

/// Host portion (with port) of a normalized address.
fn host_of(url: &str) -> &str {
    let without_scheme = url
        .strip_prefix("wss://")
        .or_else(|| url.strip_prefix("ws://"))
        .unwrap_or(url);
    without_scheme.split('/').next().unwrap_or(without_scheme)
}

fn private_host_reason(host: &str) -> Option<&'static str> {
    let bare = match host.strip_prefix('[') {
        Some(rest) => rest.split(']').next().unwrap_or(rest),
        None => host.rsplit_once(':').map_or(host, |(name, _)| name),
    };

    if bare == "localhost" || bare.ends_with(".localhost") {
        return Some("localhost is not allowed");
    }
    if bare.ends_with(".local") {
        return Some(".local hosts are not allowed");
    }
    match bare.parse::<IpAddr>() {
        Ok(ip) if is_private_ip(&ip) => Some("private or reserved address is not allowed"),
        _ => None,
    }
}

/// Whether an address is loopback, private, link-local or otherwise not a
/// public relay host.
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_link_local()
                || v4.is_private()
                || (a == 100 && (64..=127).contains(&b))
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xffc0) == 0xfe80
                || (first & 0xfe00) == 0xfc00
                || v6.to_ipv4_mapped().is_some_and(|v4| is_private_ip(&IpAddr::V4(v4)))
        }
    }
}
