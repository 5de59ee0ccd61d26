//! Command line and environment configuration

use blackhole_core::BlackholeConfig;
use blackhole_core::config::{
    BanConfig, DEFAULT_DB_PATH, DEFAULT_JOURNAL_PATH, DetectionConfig, EngineConfig,
    LogSourceConfig, Prefixes, SSHD_SYSLOG_IDENTIFIER, StoreConfig,
};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(
    name = "blackholed",
    version,
    about = "Blackhole hosts that fail SSH authentication",
    long_about = "blackholed follows the sshd entries of the systemd journal. Every failed login\ninstalls a blackhole route for the source network and records the ban in SQLite.\nBans are lifted once they have been quiet for the blacklist duration.",
    after_help = "EXAMPLES:\n  Defaults (/32 and /64, 30 minutes): blackholed\n  Ban whole /24s for a day:           blackholed --ipv4-prefix 24 --blacklist-duration 1d\n  Also ban unknown user probes:       blackholed --match-invalid-user"
)]
pub struct Cli {
    #[arg(
        long,
        env = "BLACKHOLE_JOURNAL_PATH",
        default_value = DEFAULT_JOURNAL_PATH,
        help = "Directory of the systemd journal to follow"
    )]
    pub journal_path: PathBuf,

    #[arg(
        long,
        env = "BLACKHOLE_DB",
        default_value = DEFAULT_DB_PATH,
        help = "SQLite database holding active bans (':memory:' keeps nothing)"
    )]
    pub db: String,

    #[arg(
        long,
        env = "BLACKHOLE_IPV4_PREFIX",
        default_value = "32",
        value_parser = clap::value_parser!(u8).range(0..=32),
        help = "Prefix length of the network blackholed for an IPv4 offender"
    )]
    pub ipv4_prefix: u8,

    #[arg(
        long,
        env = "BLACKHOLE_IPV6_PREFIX",
        default_value = "64",
        value_parser = clap::value_parser!(u8).range(0..=128),
        help = "Prefix length of the network blackholed for an IPv6 offender"
    )]
    pub ipv6_prefix: u8,

    #[arg(
        long,
        env = "BLACKHOLE_BLACKLIST_DURATION",
        default_value = "30m",
        value_parser = humantime::parse_duration,
        help = "How long a ban lasts after the last failed login (e.g. 30m, 2h, 1d)"
    )]
    pub blacklist_duration: Duration,

    #[arg(
        long,
        env = "BLACKHOLE_SWEEP_INTERVAL",
        default_value = "10s",
        value_parser = humantime::parse_duration,
        help = "How often expired bans are lifted"
    )]
    pub sweep_interval: Duration,

    #[arg(
        long,
        env = "BLACKHOLE_QUEUE_CAPACITY",
        default_value = "10",
        help = "Journal lines buffered while a ban or sweep is in progress"
    )]
    pub queue_capacity: usize,

    #[arg(
        long,
        env = "BLACKHOLE_REPLAY_LINES",
        default_value = "1",
        help = "Most recent journal lines processed again at startup"
    )]
    pub replay_lines: usize,

    #[arg(
        long,
        env = "BLACKHOLE_MATCH_INVALID_USER",
        help = "Also ban on 'Invalid user ... from <addr>' lines"
    )]
    pub match_invalid_user: bool,

    #[arg(
        long = "pattern",
        env = "BLACKHOLE_PATTERNS",
        value_delimiter = '\n',
        help = "Additional regex with one capture group holding the address (repeatable)\nThe environment variable takes one regex per line"
    )]
    pub patterns: Vec<String>,

    #[arg(
        long,
        env = "BLACKHOLE_LOG_LEVEL",
        default_value = "info",
        help = "Log level: trace, debug, info, warn or error"
    )]
    pub log_level: Level,
}

impl Cli {
    /// Build the engine configuration from the parsed arguments
    pub fn to_config(&self) -> BlackholeConfig {
        BlackholeConfig {
            log_source: LogSourceConfig {
                journal_path: self.journal_path.clone(),
                identifier: SSHD_SYSLOG_IDENTIFIER.to_string(),
                replay_lines: self.replay_lines,
            },
            store: StoreConfig {
                path: self.db.clone(),
            },
            prefixes: Prefixes::new(self.ipv4_prefix, self.ipv6_prefix),
            ban: BanConfig {
                duration_secs: self.blacklist_duration.as_secs(),
            },
            detection: DetectionConfig {
                match_invalid_user: self.match_invalid_user,
                extra_patterns: self.patterns.clone(),
            },
            engine: EngineConfig {
                sweep_interval_secs: self.sweep_interval.as_secs(),
                queue_capacity: self.queue_capacity,
                ..EngineConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("blackholed").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).unwrap().to_config();

        assert_eq!(config.log_source.journal_path, PathBuf::from("/var/log/journal"));
        assert_eq!(config.log_source.replay_lines, 1);
        assert_eq!(config.store.path, "/var/lib/blackhole.db");
        assert_eq!(config.prefixes, Prefixes::new(32, 64));
        assert_eq!(config.ban.duration_secs, 1800);
        assert_eq!(config.engine.sweep_interval_secs, 10);
        assert_eq!(config.engine.queue_capacity, 10);
        assert!(!config.detection.match_invalid_user);
        assert!(config.detection.extra_patterns.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_humantime_durations() {
        let cli = parse(&["--blacklist-duration", "1h 30m", "--sweep-interval", "1m"]).unwrap();
        let config = cli.to_config();

        assert_eq!(config.ban.duration_secs, 5400);
        assert_eq!(config.engine.sweep_interval_secs, 60);
    }

    #[test]
    fn test_prefix_ranges_enforced() {
        assert!(parse(&["--ipv4-prefix", "33"]).is_err());
        assert!(parse(&["--ipv6-prefix", "129"]).is_err());

        let cli = parse(&["--ipv4-prefix", "24", "--ipv6-prefix", "48"]).unwrap();
        assert_eq!(cli.to_config().prefixes, Prefixes::new(24, 48));
    }

    #[test]
    fn test_repeatable_patterns() {
        let cli = parse(&[
            "--pattern",
            r"Did not receive identification string from (\S+)",
            "--pattern",
            r"Bad protocol version identification .* from (\S+)",
        ])
        .unwrap();

        assert_eq!(cli.to_config().detection.extra_patterns.len(), 2);
    }

    #[test]
    fn test_pattern_with_counted_repetition_kept_whole() {
        let pattern = r"from (\d{1,3}\.\S+) port";
        let cli = parse(&["--pattern", pattern]).unwrap();

        assert_eq!(cli.patterns, vec![pattern.to_string()]);
        assert!(
            blackhole_core::PatternSet::from_config(&cli.to_config().detection).is_ok()
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(parse(&["--blacklist-duration", "soon"]).is_err());
        assert!(parse(&["--log-level", "loud"]).is_err());
        assert!(parse(&["--queue-capacity", "-1"]).is_err());
    }

    #[test]
    fn test_sub_second_sweep_fails_validation() {
        let config = parse(&["--sweep-interval", "500ms"]).unwrap().to_config();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        assert_eq!(parse(&["--log-level", "debug"]).unwrap().log_level, Level::DEBUG);
        assert_eq!(parse(&[]).unwrap().log_level, Level::INFO);
    }
}
