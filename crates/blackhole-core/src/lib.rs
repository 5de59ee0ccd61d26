// # blackhole-core
//
// Core library for the blackhole route daemon.
//
// ## Architecture Overview
//
// This library provides the ban engine that turns failed SSH logins into
// temporary blackhole routes:
// - **LogSource**: Trait for the stream of raw SSH daemon log lines
// - **PatternSet**: Ordered extraction rules (line -> offending address)
// - **BanStore**: Trait for durable ban records with expiry
// - **RouteController**: Trait for installing/removing blackhole routes
// - **BanEngine**: Core engine serializing log lines and expiry sweeps
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from backends
// 2. **Single Consumer**: One task owns the store and the route table
// 3. **Record First**: Bans are recorded before routes are installed and
//    routes are removed before records are deleted
// 4. **Library-First**: All core functionality can be used as a library
// 5. **Explicit Configuration**: No global state; config is passed in

pub mod traits;
pub mod engine;
pub mod patterns;
pub mod config;
pub mod clock;
pub mod error;
pub mod state;

// Re-export core types for convenience
pub use traits::{BanRecord, BanStore, LogLines, LogSource, RouteController};
pub use engine::{BanEngine, EngineEvent, Operation, ReconcileReport, SweepReport};
pub use patterns::{LineMatcher, PatternSet, RegexMatcher};
pub use config::{BlackholeConfig, Prefixes};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use state::{MemoryBanStore, MemoryRouteTable};
