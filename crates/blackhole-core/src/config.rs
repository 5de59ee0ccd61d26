//! Configuration types for the blackhole system
//!
//! The configuration is built once at startup and handed by reference to
//! every component that needs it. Nothing reads it from global state and
//! nothing mutates it after construction.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default location of the systemd journal
pub const DEFAULT_JOURNAL_PATH: &str = "/var/log/journal";

/// Default location of the ban database
pub const DEFAULT_DB_PATH: &str = "/var/lib/blackhole.db";

/// Syslog identifier of the SSH daemon
pub const SSHD_SYSLOG_IDENTIFIER: &str = "sshd";

/// Main blackhole configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlackholeConfig {
    /// Log source configuration
    #[serde(default)]
    pub log_source: LogSourceConfig,

    /// Ban store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Prefix lengths used to derive the banned network
    #[serde(default)]
    pub prefixes: Prefixes,

    /// Ban policy
    #[serde(default)]
    pub ban: BanConfig,

    /// Extraction rules
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Event loop settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl BlackholeConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.prefixes.validate()?;
        self.ban.validate()?;
        self.engine.validate()?;
        self.log_source.validate()?;

        if self.store.path.is_empty() {
            return Err(Error::config("Ban store path cannot be empty"));
        }

        Ok(())
    }
}

/// Log source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSourceConfig {
    /// Journal directory to follow
    #[serde(default = "default_journal_path")]
    pub journal_path: PathBuf,

    /// Syslog identifier whose lines are forwarded
    #[serde(default = "default_identifier")]
    pub identifier: String,

    /// Number of most recent lines replayed on startup
    #[serde(default = "default_replay_lines")]
    pub replay_lines: usize,
}

impl LogSourceConfig {
    /// Validate the log source configuration
    pub fn validate(&self) -> Result<()> {
        if self.identifier.is_empty() {
            return Err(Error::config("Log source identifier cannot be empty"));
        }
        if self.journal_path.as_os_str().is_empty() {
            return Err(Error::config("Journal path cannot be empty"));
        }
        Ok(())
    }
}

impl Default for LogSourceConfig {
    fn default() -> Self {
        Self {
            journal_path: default_journal_path(),
            identifier: default_identifier(),
            replay_lines: default_replay_lines(),
        }
    }
}

/// Ban store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database location (`:memory:` for a throwaway store)
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Per-family prefix lengths applied to banned addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prefixes {
    /// Mask length for IPv4 addresses
    #[serde(default = "default_ipv4_prefix")]
    pub ipv4: u8,

    /// Mask length for IPv6 addresses
    #[serde(default = "default_ipv6_prefix")]
    pub ipv6: u8,
}

impl Prefixes {
    /// Create a prefix pair
    pub fn new(ipv4: u8, ipv6: u8) -> Self {
        Self { ipv4, ipv6 }
    }

    /// Validate prefix lengths against their address width
    pub fn validate(&self) -> Result<()> {
        if self.ipv4 > 32 {
            return Err(Error::config(format!(
                "IPv4 prefix length must be between 0 and 32. Got: {}",
                self.ipv4
            )));
        }
        if self.ipv6 > 128 {
            return Err(Error::config(format!(
                "IPv6 prefix length must be between 0 and 128. Got: {}",
                self.ipv6
            )));
        }
        Ok(())
    }

    /// Prefix length applied to the family of `address`
    pub fn prefix_for(&self, address: &IpAddr) -> u8 {
        match address {
            IpAddr::V4(_) => self.ipv4,
            IpAddr::V6(_) => self.ipv6,
        }
    }

    /// Network covered by a ban on `address`
    ///
    /// Host bits below the prefix are cleared, so `198.51.100.23` with a /24
    /// yields `198.51.100.0/24`.
    pub fn network(&self, address: IpAddr) -> Result<IpNet> {
        let prefix = self.prefix_for(&address);
        IpNet::new(address, prefix)
            .map(|net| net.trunc())
            .map_err(|e| Error::config(format!("Invalid prefix /{} for {}: {}", prefix, address, e)))
    }
}

impl Default for Prefixes {
    fn default() -> Self {
        Self {
            ipv4: default_ipv4_prefix(),
            ipv6: default_ipv6_prefix(),
        }
    }
}

/// Ban policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanConfig {
    /// How long a ban lasts after the most recent detection (in seconds)
    #[serde(default = "default_ban_duration_secs")]
    pub duration_secs: u64,
}

impl BanConfig {
    /// Validate the ban policy
    pub fn validate(&self) -> Result<()> {
        if self.duration_secs == 0 {
            return Err(Error::config("Ban duration must be > 0"));
        }
        if i64::try_from(self.duration_secs).is_err() {
            return Err(Error::config("Ban duration is too large"));
        }
        Ok(())
    }
}

impl Default for BanConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_ban_duration_secs(),
        }
    }
}

/// Extraction rule configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Also ban on `Invalid user ... from <addr>` lines
    #[serde(default)]
    pub match_invalid_user: bool,

    /// Additional regular expressions, each with exactly one capture group
    /// holding the source address. Tried after the built-in rules.
    #[serde(default)]
    pub extra_patterns: Vec<String>,
}

/// Event loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Period of the expiry sweep (in seconds)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Capacity of the queue between the log source and the engine
    ///
    /// When full, the log source waits until the engine catches up.
    /// Lines are never dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Capacity of the engine event channel
    ///
    /// When full, new engine events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the event loop configuration
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == 0 {
            return Err(Error::config("Sweep interval must be > 0"));
        }
        if self.queue_capacity == 0 {
            return Err(Error::config("Queue capacity must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }

    /// Sweep period as a `Duration`
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            queue_capacity: default_queue_capacity(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_journal_path() -> PathBuf {
    PathBuf::from(DEFAULT_JOURNAL_PATH)
}

fn default_identifier() -> String {
    SSHD_SYSLOG_IDENTIFIER.to_string()
}

fn default_replay_lines() -> usize {
    1
}

fn default_db_path() -> String {
    DEFAULT_DB_PATH.to_string()
}

fn default_ipv4_prefix() -> u8 {
    32
}

fn default_ipv6_prefix() -> u8 {
    64
}

fn default_ban_duration_secs() -> u64 {
    30 * 60
}

fn default_sweep_interval_secs() -> u64 {
    10
}

fn default_queue_capacity() -> usize {
    10
}

fn default_event_channel_capacity() -> usize {
    100
}
