// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Resolution of configured server names into concrete IPv4 socket addresses.
//!
//! Pool hostnames commonly resolve to several addresses, and different literal
//! names may alias the same IP, so the orchestrator merges all names' results into
//! one deduplicated set before querying. A name that fails to resolve is reported
//! and contributes nothing; it never aborts the other names.

use log::debug;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use tokio::net::lookup_host;

use crate::error::ResolveError;
use crate::protocol;

/// The lookup target for a configured name: an explicit `:port` is honored,
/// otherwise the NTP port is appended.
fn lookup_target(name: &str) -> String {
    if name.contains(':') {
        name.to_string()
    } else {
        format!("{}:{}", name, protocol::PORT)
    }
}

/// Resolve one server name to its IPv4 socket addresses.
///
/// Uses the runtime's resolver; IPv6 results are dropped (the deployment target
/// speaks IPv4 only). Returns an error if the lookup fails or nothing IPv4 comes
/// back.
pub async fn resolve_name(name: &str) -> Result<Vec<SocketAddr>, ResolveError> {
    let addrs: Vec<SocketAddr> = lookup_host(lookup_target(name))
        .await
        .map_err(ResolveError::Lookup)?
        .filter(SocketAddr::is_ipv4)
        .collect();
    debug!("resolved '{}' to {} address(es)", name, addrs.len());
    if addrs.is_empty() {
        return Err(ResolveError::NoAddresses);
    }
    Ok(addrs)
}

/// Merge per-name resolution results into one deduplicated, deterministically
/// ordered address set.
pub fn merge_addresses<I>(per_name: I) -> Vec<SocketAddr>
where
    I: IntoIterator<Item = Vec<SocketAddr>>,
{
    let set: BTreeSet<SocketAddr> = per_name.into_iter().flatten().collect();
    set.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn addr(last_octet: u8, port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::new(192, 0, 2, last_octet),
            port,
        ))
    }

    #[test]
    fn lookup_target_appends_ntp_port() {
        assert_eq!(lookup_target("pool.ntp.org"), "pool.ntp.org:123");
        assert_eq!(lookup_target("127.0.0.1:9123"), "127.0.0.1:9123");
    }

    #[test]
    fn merge_deduplicates_across_names() {
        // Two pool aliases sharing an address must collapse to one entry.
        let merged = merge_addresses(vec![
            vec![addr(1, 123), addr(2, 123)],
            vec![addr(2, 123), addr(3, 123)],
        ]);
        assert_eq!(merged, vec![addr(1, 123), addr(2, 123), addr(3, 123)]);
    }

    #[tokio::test]
    async fn literal_addresses_resolve_without_dns() {
        let addrs = resolve_name("127.0.0.1:9123").await.unwrap();
        assert_eq!(addrs, vec![addr_literal("127.0.0.1:9123")]);
    }

    #[tokio::test]
    async fn ipv6_only_results_are_an_error() {
        let result = resolve_name("[::1]:123").await;
        assert!(matches!(result, Err(ResolveError::NoAddresses)));
    }

    fn addr_literal(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }
}
