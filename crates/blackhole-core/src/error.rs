//! Error types for the blackhole system
//!
//! This module defines all error types used throughout the crate.
//!
//! Errors fall into two operational classes:
//! - raised during startup (opening the store, spawning the log source,
//!   validating configuration) they are fatal and end the process
//! - raised while handling a single log line or sweep they are logged and
//!   the event is abandoned
//!
//! The class is decided by the caller, not by the variant.

use thiserror::Error;

/// Result type alias for blackhole operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the blackhole system
#[derive(Error, Debug)]
pub enum Error {
    /// Log source errors (spawn failure, stream closed)
    #[error("Log source error: {0}")]
    LogSource(String),

    /// Ban store errors (open, schema, read, write)
    #[error("Ban store error: {0}")]
    Store(String),

    /// Route backend errors
    #[error("Route error: {0}")]
    Route(String),

    /// The blackhole route was already installed
    #[error("Route already exists: {0}")]
    RouteExists(String),

    /// The blackhole route was not installed
    #[error("Route not found: {0}")]
    RouteMissing(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Extraction pattern errors
    #[error("Pattern error: {0}")]
    Pattern(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a log source error
    pub fn log_source(msg: impl Into<String>) -> Self {
        Self::LogSource(msg.into())
    }

    /// Create a ban store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a route backend error
    pub fn route(msg: impl Into<String>) -> Self {
        Self::Route(msg.into())
    }

    /// Create a "route already exists" error
    pub fn route_exists(network: impl Into<String>) -> Self {
        Self::RouteExists(network.into())
    }

    /// Create a "route not found" error
    pub fn route_missing(network: impl Into<String>) -> Self {
        Self::RouteMissing(network.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a pattern error
    pub fn pattern(msg: impl Into<String>) -> Self {
        Self::Pattern(msg.into())
    }

    /// Whether the route table already was in the requested state.
    ///
    /// Adding a present route or removing an absent one leaves the kernel
    /// exactly where the engine wanted it.
    pub fn is_route_conflict(&self) -> bool {
        matches!(self, Self::RouteExists(_) | Self::RouteMissing(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Self::Pattern(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_conflicts() {
        assert!(Error::route_exists("203.0.113.7/32").is_route_conflict());
        assert!(Error::route_missing("203.0.113.7/32").is_route_conflict());
        assert!(!Error::route("EPERM").is_route_conflict());
        assert!(!Error::store("disk full").is_route_conflict());
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::store("db(insert): database is locked");
        assert_eq!(err.to_string(), "Ban store error: db(insert): database is locked");
    }
}
