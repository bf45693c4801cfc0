//! Core network types
//!
//! The transport-layer network address the registry consumes and produces.
//! The crawler's wire layer hands these in when peers advertise addresses and
//! receives them back when it needs endpoints to dial.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

// =============================================================================
// NETWORK PORTS
// =============================================================================

/// Default P2P port on mainnet
pub const DEFAULT_MAINNET_PORT: u16 = 8233;

/// Default P2P port on testnet
pub const DEFAULT_TESTNET_PORT: u16 = 18233;

/// Network a crawler is pointed at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    /// Default P2P port for this network
    pub fn default_port(&self) -> u16 {
        match self {
            Network::Mainnet => DEFAULT_MAINNET_PORT,
            Network::Testnet => DEFAULT_TESTNET_PORT,
        }
    }
}

// =============================================================================
// NETWORK ADDRESS
// =============================================================================

/// A network address as seen on the wire
///
/// Plain value type: cloning it never shares state with whoever handed it out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetAddress {
    /// Last time the address was seen or advertised
    pub timestamp: DateTime<Utc>,

    /// Advertised service bitfield
    pub services: u64,

    /// IP address of the peer
    pub ip: IpAddr,

    /// Port the peer listens on
    pub port: u16,
}

impl NetAddress {
    /// Create a new address stamped with the current time
    pub fn new(ip: IpAddr, port: u16, services: u64) -> Self {
        Self::with_timestamp(Utc::now(), services, ip, port)
    }

    /// Create a new address with an explicit timestamp
    pub fn with_timestamp(timestamp: DateTime<Utc>, services: u64, ip: IpAddr, port: u16) -> Self {
        Self {
            timestamp,
            services,
            ip,
            port,
        }
    }

    /// Socket address for dialing this peer
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}
