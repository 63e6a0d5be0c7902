//! Fake socket addresses.
//!
//! Addresses are plain strings (`"fake:8080"`, `"127.0.0.1:8080"`, `":8080"`).
//! Nothing is resolved; matching is textual, except that a listener bound to
//! a wildcard host (`:port`, `0.0.0.0:port`, `[::]:port`) accepts dials to
//! any host on that port.

use crate::base::neterror::NetError;
use std::fmt;

/// Networks accepted by `Hub::dial`. Datagram networks are not simulated.
const STREAM_NETWORKS: &[&str] = &["tcp", "tcp4", "tcp6", "fake"];

/// Hosts that mean "every interface" when listening.
const WILDCARD_HOSTS: &[&str] = &["", "0.0.0.0", "[::]"];

/// Address of a fake listener or connection endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FakeAddr {
    address: String,
}

impl FakeAddr {
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into() }
    }

    /// Name of the network, always `"fake"`.
    pub fn network(&self) -> &'static str {
        "fake"
    }

    pub fn as_str(&self) -> &str {
        &self.address
    }

    /// Port part of the address, if it has one.
    pub fn port(&self) -> Option<u16> {
        split_host_port(&self.address).and_then(|(_, port)| port.parse().ok())
    }
}

impl fmt::Display for FakeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

impl From<&str> for FakeAddr {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

/// Reject networks the hub cannot emulate.
pub(crate) fn check_network(network: &str) -> Result<(), NetError> {
    if STREAM_NETWORKS.contains(&network) {
        Ok(())
    } else {
        tracing::debug!("Unsupported network: {:?}", network);
        Err(NetError::NotImplemented)
    }
}

/// Split `host:port` at the last colon. Bracketed IPv6 hosts keep their brackets.
pub(crate) fn split_host_port(address: &str) -> Option<(&str, &str)> {
    let (host, port) = address.rsplit_once(':')?;
    if host.starts_with('[') != host.ends_with(']') {
        return None;
    }
    Some((host, port))
}

/// Whether the address asks for an automatically assigned port.
pub(crate) fn wants_ephemeral_port(address: &str) -> bool {
    matches!(split_host_port(address), Some((_, "0")))
}

/// Replace the port of `host:0` with `port`.
pub(crate) fn with_port(address: &str, port: u16) -> String {
    match split_host_port(address) {
        Some((host, _)) => format!("{}:{}", host, port),
        None => format!("{}:{}", address, port),
    }
}

/// Registry keys that may serve a dial to `address`, most specific first.
pub(crate) fn candidates(address: &str) -> Vec<String> {
    let mut keys = vec![address.to_string()];
    if let Some((host, port)) = split_host_port(address) {
        for wildcard in WILDCARD_HOSTS {
            if *wildcard != host {
                keys.push(format!("{}:{}", wildcard, port));
            }
        }
    }
    keys
}
