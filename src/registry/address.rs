//! Peer keys and endpoint records
//!
//! A [`PeerKey`] is the canonical `host:port` identity of a peer. An
//! [`Address`] is the registry's bookkeeping for one key: the endpoint
//! itself plus the blacklist flag and last-update time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::types::NetAddress;

// =============================================================================
// ERRORS
// =============================================================================

/// Failure to turn `host:port` text into an endpoint
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("missing port in address {0:?}")]
    MissingPort(String),

    #[error("malformed address {0:?}")]
    Malformed(String),

    #[error("invalid host {0:?}: not an IP address")]
    InvalidHost(String),

    #[error("invalid port {0:?}: must fit in 16 bits")]
    InvalidPort(String),
}

// =============================================================================
// PEER KEY
// =============================================================================

/// Canonical `host:port` identity of a peer
///
/// IPv6 hosts render bracketed (`[::1]:8233`). Two keys are equal iff their
/// canonical text is equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerKey(SocketAddr);

impl PeerKey {
    /// Parse `host:port` text, where host is an IP literal
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let (host, port) = split_host_port(text)?;

        let ip: IpAddr = host
            .parse()
            .map_err(|_| ParseError::InvalidHost(host.to_string()))?;

        // `u16::from_str` tolerates a leading '+', which is not part of the form
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::InvalidPort(port.to_string()));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| ParseError::InvalidPort(port.to_string()))?;

        Ok(Self(SocketAddr::new(ip, port)))
    }

    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for PeerKey {
    fn from(addr: SocketAddr) -> Self {
        // Drop IPv6 flow info and scope id; they are not part of the identity
        Self(SocketAddr::new(addr.ip(), addr.port()))
    }
}

impl FromStr for PeerKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for PeerKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeerKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Split `host:port` or `[host]:port` into its two halves
fn split_host_port(text: &str) -> Result<(&str, &str), ParseError> {
    if let Some(rest) = text.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| ParseError::Malformed(text.to_string()))?;
        let port = after
            .strip_prefix(':')
            .ok_or_else(|| ParseError::MissingPort(text.to_string()))?;
        if host.contains('[') || port.contains(']') {
            return Err(ParseError::Malformed(text.to_string()));
        }
        return Ok((host, port));
    }

    let (host, port) = text
        .rsplit_once(':')
        .ok_or_else(|| ParseError::MissingPort(text.to_string()))?;

    // Unbracketed IPv6 is ambiguous
    if host.contains(':') || host.contains(']') || port.contains(']') {
        return Err(ParseError::Malformed(text.to_string()));
    }

    Ok((host, port))
}

// =============================================================================
// ENDPOINT RECORD
// =============================================================================

/// Registry state for one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Endpoint as last handed to us
    net_address: NetAddress,

    /// Peer is disfavored (independent of registry membership)
    blacklisted: bool,

    /// Last registry-visible change: creation, blacklist, or touch
    last_update: DateTime<Utc>,
}

impl Address {
    /// Parse `host:port` text into a fresh, non-blacklisted record
    pub fn parse_key(text: &str) -> Result<Self, ParseError> {
        let key = PeerKey::parse(text)?;
        Ok(Self::from_peer_key(&key))
    }

    /// Fresh record for a key, stamped now, with no advertised services
    pub fn from_peer_key(key: &PeerKey) -> Self {
        Self::from_net_address(NetAddress::new(key.ip(), key.port(), 0))
    }

    /// Adopt an endpoint handed in by the transport layer
    ///
    /// Takes the address by value, so later changes on the caller's side
    /// cannot reach the record.
    pub fn from_net_address(net_address: NetAddress) -> Self {
        let last_update = net_address.timestamp;
        Self {
            net_address,
            blacklisted: false,
            last_update,
        }
    }

    /// Copy of the endpoint with its timestamp replaced by `last_update`
    ///
    /// Consumers see registry recency, not the originally advertised time.
    pub fn to_net_address(&self) -> NetAddress {
        NetAddress {
            timestamp: self.last_update,
            ..self.net_address.clone()
        }
    }

    /// Canonical key of this record
    pub fn to_key(&self) -> PeerKey {
        PeerKey::from(self.net_address.socket_addr())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.net_address.socket_addr()
    }

    pub fn is_blacklisted(&self) -> bool {
        self.blacklisted
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    pub(crate) fn blacklist(&mut self) {
        self.blacklisted = true;
        self.last_update = Utc::now();
    }

    pub(crate) fn touch(&mut self) {
        self.last_update = Utc::now();
    }
}

impl FromStr for Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_key(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_key(), f)
    }
}

/// Records marshal as their `host:port` text
impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse_key(&s).map_err(serde::de::Error::custom)
    }
}
