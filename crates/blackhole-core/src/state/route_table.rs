// # Memory Route Table
//
// In-memory implementation of RouteController.
//
// Mirrors kernel semantics for blackhole routes: one route per network,
// adding a present route and removing an absent one are reported as
// `RouteExists` / `RouteMissing`. Nothing outside the process changes.

use async_trait::async_trait;
use ipnet::IpNet;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::Error;
use crate::config::Prefixes;
use crate::traits::RouteController;

/// In-memory blackhole route table
#[derive(Debug, Clone)]
pub struct MemoryRouteTable {
    prefixes: Prefixes,
    routes: Arc<RwLock<BTreeSet<IpNet>>>,
}

impl MemoryRouteTable {
    /// Create an empty table masking addresses with `prefixes`
    pub fn new(prefixes: Prefixes) -> Self {
        Self {
            prefixes,
            routes: Arc::new(RwLock::new(BTreeSet::new())),
        }
    }

    /// Installed networks, sorted
    pub async fn routes(&self) -> Vec<IpNet> {
        self.routes.read().await.iter().copied().collect()
    }

    /// Whether a blackhole route for `network` is installed
    pub async fn contains(&self, network: &IpNet) -> bool {
        self.routes.read().await.contains(network)
    }

    /// Number of installed routes
    pub async fn len(&self) -> usize {
        self.routes.read().await.len()
    }

    /// Whether no route is installed
    pub async fn is_empty(&self) -> bool {
        self.routes.read().await.is_empty()
    }
}

#[async_trait]
impl RouteController for MemoryRouteTable {
    async fn add_blackhole(&self, address: IpAddr) -> Result<(), Error> {
        let network = self.prefixes.network(address)?;
        info!(%network, "Adding blackhole route");

        if !self.routes.write().await.insert(network) {
            return Err(Error::route_exists(network.to_string()));
        }
        Ok(())
    }

    async fn remove_blackhole(&self, address: IpAddr) -> Result<(), Error> {
        let network = self.prefixes.network(address)?;
        info!(%network, "Removing blackhole route");

        if !self.routes.write().await.remove(&network) {
            return Err(Error::route_missing(network.to_string()));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
