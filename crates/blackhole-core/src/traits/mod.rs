//! Core traits for the blackhole system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`LogSource`]: Deliver raw SSH daemon log lines
//! - [`BanStore`]: Durable ban records with expiry
//! - [`RouteController`]: Install and remove blackhole routes

pub mod log_source;
pub mod ban_store;
pub mod route_controller;

pub use log_source::{LogSource, LogLines};
pub use ban_store::{BanStore, BanRecord};
pub use route_controller::RouteController;
