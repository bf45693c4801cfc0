//! Seeder Address Book
//!
//! The peer-address registry used by the network crawler and DNS seeder.
//!
//! ```text
//! crawler workers ──add/blacklist/touch──▶ AddressBook ◀──wait_for_count── bootstrap
//!                                            │
//!                                            └──shuffled_addresses──▶ seeder
//! ```
//!
//! An [`AddressBook`] is always constructed explicitly and shared by `Arc`;
//! there is no process-wide instance.

pub mod config;
pub mod registry;
pub mod types;

pub use config::AddressBookConfig;
pub use registry::{Address, AddressBook, ParseError, PeerKey, RegistryStats, WaitTimeout};
pub use types::{NetAddress, Network};
