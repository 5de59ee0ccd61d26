// # Memory Ban Store
//
// In-memory implementation of BanStore.
//
// ## Purpose
//
// Provides a fast ban store that doesn't persist across restarts.
// Useful for testing, dry runs and embedding.
//
// ## Crash Behavior
//
// - All bans are forgotten on restart/crash
// - Routes installed by the previous run are not revoked by the next one

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::ban_store::{BanRecord, BanStore};

/// In-memory ban store implementation
///
/// Records are keyed by address, so uniqueness holds by construction.
///
/// # Example
///
/// ```rust,no_run
/// use blackhole_core::state::MemoryBanStore;
/// use blackhole_core::traits::BanStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryBanStore::new();
///
///     store.upsert("203.0.113.7".parse()?, 1_700_001_800).await?;
///
///     let expired = store.query_expired(1_700_001_801).await?;
///     assert_eq!(expired.len(), 1);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBanStore {
    inner: Arc<RwLock<HashMap<IpAddr, i64>>>,
}

impl MemoryBanStore {
    /// Create a new empty memory ban store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of bans in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Clear all bans from the store
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }
}

#[async_trait]
impl BanStore for MemoryBanStore {
    async fn upsert(&self, address: IpAddr, expires_at: i64) -> Result<(), Error> {
        self.inner.write().await.insert(address, expires_at);
        Ok(())
    }

    async fn query_expired(&self, now: i64) -> Result<Vec<IpAddr>, Error> {
        let guard = self.inner.read().await;
        Ok(guard
            .iter()
            .filter(|(_, expires_at)| **expires_at < now)
            .map(|(address, _)| *address)
            .collect())
    }

    async fn delete(&self, address: IpAddr) -> Result<(), Error> {
        self.inner.write().await.remove(&address);
        Ok(())
    }

    async fn get(&self, address: IpAddr) -> Result<Option<BanRecord>, Error> {
        let guard = self.inner.read().await;
        Ok(guard
            .get(&address)
            .map(|expires_at| BanRecord::new(address, *expires_at)))
    }

    async fn list(&self) -> Result<Vec<BanRecord>, Error> {
        let guard = self.inner.read().await;
        Ok(guard
            .iter()
            .map(|(address, expires_at)| BanRecord::new(*address, *expires_at))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_upsert_refreshes_single_record() {
        let store = MemoryBanStore::new();
        let addr = ip("203.0.113.7");

        store.upsert(addr, 100).await.unwrap();
        store.upsert(addr, 250).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(addr).await.unwrap(), Some(BanRecord::new(addr, 250)));
    }

    #[tokio::test]
    async fn test_query_expired_is_strict() {
        let store = MemoryBanStore::new();
        store.upsert(ip("192.0.2.1"), 99).await.unwrap();
        store.upsert(ip("192.0.2.2"), 100).await.unwrap();
        store.upsert(ip("2001:db8::1"), 101).await.unwrap();

        let expired = store.query_expired(100).await.unwrap();
        assert_eq!(expired, vec![ip("192.0.2.1")]);
    }

    #[tokio::test]
    async fn test_delete_absent_is_noop() {
        let store = MemoryBanStore::new();
        store.delete(ip("192.0.2.1")).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = MemoryBanStore::new();
        let other = store.clone();
        store.upsert(ip("192.0.2.1"), 10).await.unwrap();
        assert_eq!(other.list().await.unwrap().len(), 1);

        other.clear().await;
        assert!(store.is_empty().await);
    }
}
