//! Peer Address Registry
//!
//! Tracks which remote endpoints are known and which are blacklisted, and
//! lets callers block until enough endpoints have been discovered.
//! Pure in-memory state: nothing outlives the process.

mod address;
mod book;

pub use address::{Address, ParseError, PeerKey};
pub use book::{AddressBook, WaitTimeout};

/// Snapshot of registry counters
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RegistryStats {
    /// Total entries, blacklisted ones included
    pub total_peers: usize,

    /// Entries with the blacklist flag set
    pub blacklisted_peers: usize,

    /// Entries with an IPv4 endpoint
    pub ipv4_peers: usize,

    /// Entries with an IPv6 endpoint
    pub ipv6_peers: usize,
}

impl RegistryStats {
    /// Entries that are not blacklisted
    pub fn usable_peers(&self) -> usize {
        self.total_peers - self.blacklisted_peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_peers() {
        let stats = RegistryStats {
            total_peers: 10,
            blacklisted_peers: 3,
            ipv4_peers: 9,
            ipv6_peers: 1,
        };
        assert_eq!(stats.usable_peers(), 7);
        assert_eq!(RegistryStats::default().usable_peers(), 0);
    }
}
