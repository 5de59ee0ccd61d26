// # Route Controller Trait
//
// Defines the interface for installing and removing blackhole routes.
//
// ## Behavior
//
// A blackhole route drops every packet destined to its network. The network
// is the banned address masked with the configured prefix length for its
// family (see `Prefixes::network`).
//
// ## Implementations
//
// - In-memory: `MemoryRouteTable` in this crate (tests, dry runs)
// - Netlink (Linux): `blackhole-route-netlink` crate

use async_trait::async_trait;
use std::net::IpAddr;

/// Trait for route backends
///
/// The controller keeps no state of its own. Everything it installs is
/// derived from the ban store.
///
/// # Errors
///
/// - `Error::RouteExists` when adding a route that is already installed
/// - `Error::RouteMissing` when removing a route that is not installed
/// - `Error::Route` for any other backend failure
///
/// None of these are fatal; the engine logs them and moves on.
#[async_trait]
pub trait RouteController: Send + Sync {
    /// Install a blackhole route for the network containing `address`
    async fn add_blackhole(&self, address: IpAddr) -> Result<(), crate::Error>;

    /// Remove the blackhole route for the network containing `address`
    async fn remove_blackhole(&self, address: IpAddr) -> Result<(), crate::Error>;

    /// Backend name (for logging)
    fn backend_name(&self) -> &'static str;
}
