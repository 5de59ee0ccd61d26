//! Built-in in-memory backends
//!
//! - [`MemoryBanStore`]: non-persistent [`BanStore`](crate::traits::BanStore)
//! - [`MemoryRouteTable`]: route table that never touches the kernel

pub mod memory;
pub mod route_table;

pub use memory::MemoryBanStore;
pub use route_table::MemoryRouteTable;
