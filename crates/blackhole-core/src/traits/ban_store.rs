// # Ban Store Trait
//
// Defines the interface for durable ban state.
//
// ## Purpose
//
// The ban store is the authoritative record of which addresses are banned
// and until when. Routes are derived from it; it owns no routes itself.
//
// ## Schema
//
// Persistent implementations hold a single table:
//
// ```sql
// CREATE TABLE bans (address TEXT NOT NULL UNIQUE, expiry_ts INTEGER);
// ```
//
// ## Implementations
//
// - In-memory: `MemoryBanStore` in this crate
// - SQLite: `blackhole-store-sqlite` crate

use async_trait::async_trait;
use std::net::IpAddr;

/// A single ban
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BanRecord {
    /// Banned host address
    pub address: IpAddr,
    /// Unix timestamp after which the ban is no longer valid
    pub expires_at: i64,
}

impl BanRecord {
    /// Create a new ban record
    pub fn new(address: IpAddr, expires_at: i64) -> Self {
        Self {
            address,
            expires_at,
        }
    }

    /// Whether the ban has lapsed at `now`
    ///
    /// A ban expiring exactly at `now` is still in force.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at < now
    }

    /// Expiry as a UTC datetime (for logging)
    pub fn expires_at_utc(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.expires_at, 0)
    }
}

/// Trait for ban store implementations
///
/// # Thread Safety
///
/// The engine calls the store from a single task, one operation at a time.
/// Implementations still have to be `Send + Sync` so the engine can be
/// spawned.
///
/// # Errors
///
/// Every storage failure is returned to the caller. Implementations never
/// swallow errors and never terminate the process; the engine decides
/// whether a failure is fatal.
#[async_trait]
pub trait BanStore: Send + Sync {
    /// Insert or replace the ban for `address`
    ///
    /// Unconditionally sets the expiry. There is never more than one record
    /// per address, even if this is called repeatedly.
    async fn upsert(&self, address: IpAddr, expires_at: i64) -> Result<(), crate::Error>;

    /// Addresses whose ban expired strictly before `now`
    ///
    /// The result is fully materialized; the caller deletes records while
    /// walking it. Order is unspecified.
    async fn query_expired(&self, now: i64) -> Result<Vec<IpAddr>, crate::Error>;

    /// Remove the ban for `address`
    ///
    /// Removing an address that is not banned is not an error.
    async fn delete(&self, address: IpAddr) -> Result<(), crate::Error>;

    /// Fetch the ban for `address`, if any
    async fn get(&self, address: IpAddr) -> Result<Option<BanRecord>, crate::Error>;

    /// All bans currently stored
    async fn list(&self) -> Result<Vec<BanRecord>, crate::Error>;

    /// Release the backend
    ///
    /// Called once when the engine stops. The default does nothing.
    async fn close(&self) -> Result<(), crate::Error> {
        Ok(())
    }
}
