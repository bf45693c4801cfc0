//! Address Book
//!
//! In-memory, thread-safe mapping from peer key to endpoint record.
//! Crawler workers share one book (behind an `Arc`) and call into it from
//! many threads at once.
//!
//! ## Locking
//!
//! One reader-writer lock guards the whole map. Mutations take it
//! exclusively, queries take it shared. Waiters park on a condition
//! variable paired with a separate mutex; writers only take that mutex
//! after releasing the map lock, and only to broadcast, so a waiter holding
//! it between its count check and its wait can never miss a wakeup.
//! Async waiters watch an entry-count channel updated under the map lock.

use rand::seq::SliceRandom;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{
    Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;

use super::address::{Address, ParseError, PeerKey};
use super::RegistryStats;
use crate::types::NetAddress;

/// A bounded wait ran out before enough peers were known
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("timed out waiting for {wanted} addresses ({known} known)")]
pub struct WaitTimeout {
    pub wanted: usize,
    pub known: usize,
}

/// Concurrent registry of known peer addresses
pub struct AddressBook {
    /// All known peers, blacklisted or not
    addrs: RwLock<HashMap<PeerKey, Address>>,

    /// Held by blocking waiters between checking the count and parking
    recv_lock: Mutex<()>,

    /// Broadcast whenever the entry count grows
    recv_cond: Condvar,

    /// Current entry count, for async waiters
    count_tx: watch::Sender<usize>,
}

impl AddressBook {
    /// Create an empty address book
    pub fn new() -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            addrs: RwLock::new(HashMap::new()),
            recv_lock: Mutex::new(()),
            recv_cond: Condvar::new(),
            count_tx,
        }
    }

    // =========================================================================
    // MUTATION
    // =========================================================================

    /// Add or replace a peer, dropping text that does not parse
    ///
    /// Replacing resets the blacklist flag.
    pub fn add(&self, peer: &str) {
        if let Err(e) = self.try_add(peer) {
            debug!("Ignoring bogus peer string {:?}: {}", peer, e);
        }
    }

    /// Like [`add`](Self::add), but reports text that does not parse
    pub fn try_add(&self, peer: &str) -> Result<(), ParseError> {
        let key = PeerKey::parse(peer)?;
        self.insert(key, Address::from_peer_key(&key));
        Ok(())
    }

    /// Add or replace a peer advertised by the transport layer
    pub fn add_net_address(&self, net_address: NetAddress) {
        let key = PeerKey::from(net_address.socket_addr());
        self.insert(key, Address::from_net_address(net_address));
    }

    /// Forget a peer. Absent peers are ignored.
    pub fn remove(&self, peer: &str) {
        let Some(key) = lookup_key(peer) else {
            return;
        };

        let mut addrs = self.write();
        if addrs.remove(&key).is_some() {
            self.publish_count(addrs.len());
        }
    }

    /// Mark a peer as blacklisted, recording it first if unknown
    pub fn blacklist(&self, peer: &str) {
        if let Err(e) = self.try_blacklist(peer) {
            debug!("Ignoring bogus peer string {:?}: {}", peer, e);
        }
    }

    /// Like [`blacklist`](Self::blacklist), but reports text that does not parse
    pub fn try_blacklist(&self, peer: &str) -> Result<(), ParseError> {
        let key = PeerKey::parse(peer)?;

        let created = {
            let mut addrs = self.write();
            let created = match addrs.entry(key) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().blacklist();
                    false
                }
                Entry::Vacant(entry) => {
                    let mut addr = Address::from_peer_key(&key);
                    addr.blacklist();
                    entry.insert(addr);
                    true
                }
            };
            if created {
                self.publish_count(addrs.len());
            }
            created
        };

        if created {
            self.wake_waiters();
        }
        Ok(())
    }

    /// Refresh a known peer's last-update time. Unknown peers are not created.
    pub fn touch(&self, peer: &str) {
        let Some(key) = lookup_key(peer) else {
            return;
        };

        if let Some(target) = self.write().get_mut(&key) {
            target.touch();
        }
    }

    // =========================================================================
    // QUERY
    // =========================================================================

    /// Whether the peer has an entry, blacklisted or not
    pub fn is_known(&self, peer: &str) -> bool {
        lookup_key(peer)
            .map(|key| self.read().contains_key(&key))
            .unwrap_or(false)
    }

    /// Whether the peer has an entry with the blacklist flag set
    pub fn is_blacklisted(&self, peer: &str) -> bool {
        lookup_key(peer)
            .and_then(|key| self.read().get(&key).map(Address::is_blacklisted))
            .unwrap_or(false)
    }

    /// Copy of a peer's record
    pub fn get(&self, peer: &str) -> Option<Address> {
        let key = lookup_key(peer)?;
        self.read().get(&key).cloned()
    }

    /// A peer's endpoint, stamped with its last-update time
    pub fn net_address(&self, peer: &str) -> Option<NetAddress> {
        let key = lookup_key(peer)?;
        self.read().get(&key).map(Address::to_net_address)
    }

    /// Number of entries, blacklisted ones included
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies of every record, in no particular order
    pub fn addresses(&self) -> Vec<Address> {
        self.read().values().cloned().collect()
    }

    /// Up to `n` non-blacklisted endpoints in random order
    pub fn shuffled_addresses(&self, n: usize) -> Vec<NetAddress> {
        let mut list: Vec<NetAddress> = self
            .read()
            .values()
            .filter(|a| !a.is_blacklisted())
            .map(Address::to_net_address)
            .collect();

        list.shuffle(&mut rand::thread_rng());
        list.truncate(n);
        list
    }

    /// Snapshot of registry counters
    pub fn stats(&self) -> RegistryStats {
        let addrs = self.read();

        let mut stats = RegistryStats {
            total_peers: addrs.len(),
            ..Default::default()
        };
        for addr in addrs.values() {
            if addr.is_blacklisted() {
                stats.blacklisted_peers += 1;
            }
            if addr.socket_addr().is_ipv4() {
                stats.ipv4_peers += 1;
            } else {
                stats.ipv6_peers += 1;
            }
        }
        stats
    }

    // =========================================================================
    // WAITING
    // =========================================================================

    /// Block until at least `n` peers are known
    ///
    /// There is no way out if that never happens; callers that need a
    /// deadline use [`wait_for_count_timeout`](Self::wait_for_count_timeout)
    /// or [`wait_for_count_async`](Self::wait_for_count_async).
    pub fn wait_for_count(&self, n: usize) {
        let mut guard = self.lock_recv();
        while self.len() < n {
            guard = self
                .recv_cond
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until at least `n` peers are known or `timeout` elapses
    ///
    /// A bound too large to represent as a deadline waits without one.
    pub fn wait_for_count_timeout(&self, n: usize, timeout: Duration) -> Result<(), WaitTimeout> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait_for_count(n);
            return Ok(());
        };

        let mut guard = self.lock_recv();
        loop {
            let known = self.len();
            if known >= n {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(WaitTimeout { wanted: n, known });
            }

            let (next, _) = self
                .recv_cond
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next;
        }
    }

    /// Resolve once at least `n` peers are known
    ///
    /// Dropping the future cancels the wait; wrap it in
    /// `tokio::time::timeout` for a deadline.
    pub async fn wait_for_count_async(&self, n: usize) {
        let mut rx = self.count_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn insert(&self, key: PeerKey, addr: Address) {
        {
            let mut addrs = self.write();
            addrs.insert(key, addr);
            self.publish_count(addrs.len());
        }
        self.wake_waiters();
    }

    /// Broadcast to blocking waiters. Must not be called with the map lock held.
    fn wake_waiters(&self) {
        let _guard = self.lock_recv();
        self.recv_cond.notify_all();
    }

    fn publish_count(&self, count: usize) {
        self.count_tx.send_if_modified(|current| {
            if *current == count {
                false
            } else {
                *current = count;
                true
            }
        });
    }

    // No critical section leaves the map half-updated, so a poisoned lock
    // still guards consistent data.

    fn read(&self) -> RwLockReadGuard<'_, HashMap<PeerKey, Address>> {
        self.addrs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PeerKey, Address>> {
        self.addrs.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_recv(&self) -> MutexGuard<'_, ()> {
        self.recv_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for AddressBook {
    fn default() -> Self {
        Self::new()
    }
}

/// Text that does not parse can never name an entry
fn lookup_key(peer: &str) -> Option<PeerKey> {
    PeerKey::parse(peer).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;

    const PEER: &str = "10.0.0.1:8233";

    #[test]
    fn test_add_remove_blacklist_flow() {
        let book = AddressBook::new();

        book.add(PEER);
        assert!(book.is_known(PEER));
        assert!(!book.is_blacklisted(PEER));

        book.blacklist(PEER);
        assert!(book.is_blacklisted(PEER));
        assert!(book.is_known(PEER));

        book.remove(PEER);
        assert!(!book.is_known(PEER));
        assert!(!book.is_blacklisted(PEER));
    }

    #[test]
    fn test_malformed_input_is_absorbed() {
        let book = AddressBook::new();

        book.add("not-an-address");
        book.blacklist("not-an-address");
        book.add("10.0.0.1:99999");

        assert!(!book.is_known("not-an-address"));
        assert!(book.is_empty());
    }

    #[test]
    fn test_try_variants_report_errors() {
        let book = AddressBook::new();

        assert!(matches!(
            book.try_add("not-an-address"),
            Err(ParseError::MissingPort(_))
        ));
        assert!(matches!(
            book.try_blacklist("10.0.0.1:70000"),
            Err(ParseError::InvalidPort(_))
        ));
        assert!(book.try_add(PEER).is_ok());
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_blacklist_creates_entry() {
        let book = AddressBook::new();

        book.blacklist("192.168.1.7:8233");
        assert!(book.is_known("192.168.1.7:8233"));
        assert!(book.is_blacklisted("192.168.1.7:8233"));
    }

    #[test]
    fn test_touch_is_conditional() {
        let book = AddressBook::new();

        book.touch(PEER);
        assert!(!book.is_known(PEER));

        let ts = Utc.with_ymd_and_hms(2018, 10, 29, 12, 0, 0).unwrap();
        book.add_net_address(NetAddress::with_timestamp(
            ts,
            1,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            8233,
        ));
        assert_eq!(book.get(PEER).unwrap().last_update(), ts);

        book.touch(PEER);
        assert!(book.get(PEER).unwrap().last_update() > ts);
        assert!(!book.is_blacklisted(PEER));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let book = AddressBook::new();
        book.add("10.0.0.2:8233");

        book.remove(PEER);
        book.remove(PEER);

        assert!(!book.is_known(PEER));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_readd_resets_blacklist() {
        let book = AddressBook::new();

        book.blacklist(PEER);
        book.add(PEER);

        assert!(book.is_known(PEER));
        assert!(!book.is_blacklisted(PEER));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_equivalent_texts_share_an_entry() {
        let book = AddressBook::new();

        book.add("[2001:db8:0:0:0:0:0:7]:8233");
        book.blacklist("[2001:db8::7]:8233");

        assert_eq!(book.len(), 1);
        assert!(book.is_blacklisted("[2001:0db8::7]:8233"));
    }

    #[test]
    fn test_net_address_is_a_copy() {
        let book = AddressBook::new();
        book.add(PEER);

        let mut na = book.net_address(PEER).unwrap();
        na.port = 1;
        na.services = 42;

        let again = book.net_address(PEER).unwrap();
        assert_eq!(again.port, 8233);
        assert_eq!(again.services, 0);
        assert_eq!(again.timestamp, book.get(PEER).unwrap().last_update());
    }

    #[test]
    fn test_shuffled_addresses_skip_blacklisted() {
        let book = AddressBook::new();
        for i in 1..=10 {
            book.add(&format!("10.0.0.{}:8233", i));
        }
        book.blacklist("10.0.0.1:8233");
        book.blacklist("10.0.0.2:8233");

        let all = book.shuffled_addresses(100);
        assert_eq!(all.len(), 8);
        assert!(all.iter().all(|na| na.ip != IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));

        assert_eq!(book.shuffled_addresses(3).len(), 3);
    }

    #[test]
    fn test_stats() {
        let book = AddressBook::new();
        book.add("10.0.0.1:8233");
        book.add("[::1]:8233");
        book.blacklist("10.0.0.3:8233");

        let stats = book.stats();
        assert_eq!(stats.total_peers, 3);
        assert_eq!(stats.blacklisted_peers, 1);
        assert_eq!(stats.ipv4_peers, 2);
        assert_eq!(stats.ipv6_peers, 1);
    }

    #[test]
    fn test_wait_for_count_already_satisfied() {
        let book = AddressBook::new();
        book.wait_for_count(0);

        book.add(PEER);
        book.wait_for_count(1);
    }

    #[test]
    fn test_wait_timeout_expires() {
        let book = AddressBook::new();
        book.add(PEER);

        let err = book
            .wait_for_count_timeout(2, Duration::from_millis(50))
            .unwrap_err();
        assert_eq!(err, WaitTimeout { wanted: 2, known: 1 });
    }

    #[test]
    fn test_wait_timeout_unbounded_duration() {
        let book = Arc::new(AddressBook::new());
        book.add(PEER);

        // Already satisfied
        assert!(book.wait_for_count_timeout(1, Duration::MAX).is_ok());

        // Not yet satisfied: waits without a deadline until the count is reached
        let waiter = {
            let book = book.clone();
            thread::spawn(move || book.wait_for_count_timeout(2, Duration::MAX))
        };
        thread::sleep(Duration::from_millis(20));
        book.add("10.0.0.2:8233");

        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_blacklisting_unknown_peer_wakes_waiters() {
        let book = Arc::new(AddressBook::new());

        let waiter = {
            let book = book.clone();
            thread::spawn(move || book.wait_for_count_timeout(1, Duration::from_secs(10)))
        };

        thread::sleep(Duration::from_millis(20));
        book.blacklist(PEER);

        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_concurrent_adds_release_all_waiters() {
        const PEERS: usize = 64;
        const WAITERS: usize = 4;

        let book = Arc::new(AddressBook::new());
        let (done_tx, done_rx) = mpsc::channel();

        let waiters: Vec<_> = (0..WAITERS)
            .map(|_| {
                let book = book.clone();
                let done_tx = done_tx.clone();
                thread::spawn(move || {
                    book.wait_for_count(PEERS);
                    done_tx.send(book.len()).unwrap();
                })
            })
            .collect();

        let adders: Vec<_> = (0..PEERS)
            .map(|i| {
                let book = book.clone();
                thread::spawn(move || book.add(&format!("10.1.{}.{}:8233", i / 256, i % 256)))
            })
            .collect();

        for adder in adders {
            adder.join().unwrap();
        }

        for _ in 0..WAITERS {
            let seen = done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
            assert_eq!(seen, PEERS);
        }
        for waiter in waiters {
            waiter.join().unwrap();
        }
    }

    #[test]
    fn test_waiter_blocks_until_threshold() {
        let book = Arc::new(AddressBook::new());
        let (done_tx, done_rx) = mpsc::channel();

        let waiter = {
            let book = book.clone();
            thread::spawn(move || {
                book.wait_for_count(2);
                done_tx.send(()).unwrap();
            })
        };

        book.add("10.0.0.1:8233");
        // Re-adding the same key does not grow the book
        book.add("10.0.0.1:8233");
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

        book.add("10.0.0.2:8233");
        assert!(done_rx.recv_timeout(Duration::from_secs(10)).is_ok());
        waiter.join().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_async_wait() {
        let book = Arc::new(AddressBook::new());

        let waiter = {
            let book = book.clone();
            tokio::spawn(async move { book.wait_for_count_async(3).await })
        };

        for i in 1..=3 {
            let book = book.clone();
            tokio::spawn(async move { book.add(&format!("10.0.0.{}:8233", i)) });
        }

        tokio::time::timeout(Duration::from_secs(10), waiter)
            .await
            .expect("waiter should be released")
            .unwrap();
    }

    #[tokio::test]
    async fn test_async_wait_can_time_out() {
        let book = AddressBook::new();
        book.add(PEER);

        let res =
            tokio::time::timeout(Duration::from_millis(50), book.wait_for_count_async(2)).await;
        assert!(res.is_err());

        // A removal after an add is reflected for later waiters
        book.add("10.0.0.2:8233");
        book.remove("10.0.0.2:8233");
        let res =
            tokio::time::timeout(Duration::from_millis(50), book.wait_for_count_async(2)).await;
        assert!(res.is_err());
    }
}
