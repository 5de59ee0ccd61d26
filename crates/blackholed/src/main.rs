// # blackholed - SSH Blackhole Daemon
//
// The blackholed daemon is responsible for:
// 1. Reading configuration from flags and environment variables
// 2. Initializing logging and the runtime
// 3. Opening the ban store, the route backend and the journal
// 4. Running the ban engine until SIGINT/SIGTERM
//
// All ban logic lives in blackhole-core; this binary only wires it up.
//
// ## Configuration
//
// Every flag has an environment variable counterpart:
//
// - `--journal-path` / `BLACKHOLE_JOURNAL_PATH`
// - `--db` / `BLACKHOLE_DB`
// - `--ipv4-prefix` / `BLACKHOLE_IPV4_PREFIX`
// - `--ipv6-prefix` / `BLACKHOLE_IPV6_PREFIX`
// - `--blacklist-duration` / `BLACKHOLE_BLACKLIST_DURATION`
// - `--sweep-interval` / `BLACKHOLE_SWEEP_INTERVAL`
// - `--queue-capacity` / `BLACKHOLE_QUEUE_CAPACITY`
// - `--replay-lines` / `BLACKHOLE_REPLAY_LINES`
// - `--match-invalid-user` / `BLACKHOLE_MATCH_INVALID_USER`
// - `--pattern` / `BLACKHOLE_PATTERNS`
// - `--log-level` / `BLACKHOLE_LOG_LEVEL`
//
// ## Example
//
// ```bash
// export BLACKHOLE_DB=/var/lib/blackhole/bans.db
// export BLACKHOLE_IPV4_PREFIX=24
//
// blackholed --blacklist-duration 2h
// ```

mod cli;

use anyhow::{Context, Result};
use blackhole_core::traits::{BanStore, LogLines, LogSource, RouteController};
use blackhole_core::{BanEngine, BlackholeConfig};
use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use cli::Cli;

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlackholeExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<BlackholeExitCode> for ExitCode {
    fn from(code: BlackholeExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help and --version are not errors
            return if e.use_stderr() {
                BlackholeExitCode::ConfigError.into()
            } else {
                BlackholeExitCode::CleanShutdown.into()
            };
        }
    };

    let config = cli.to_config();
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return BlackholeExitCode::ConfigError.into();
    }

    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return BlackholeExitCode::ConfigError.into();
    }

    info!("Starting blackholed");
    info!(
        journal = %config.log_source.journal_path.display(),
        db = %config.store.path,
        ipv4_prefix = config.prefixes.ipv4,
        ipv6_prefix = config.prefixes.ipv6,
        ban_secs = config.ban.duration_secs,
        "Configuration loaded"
    );

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return BlackholeExitCode::RuntimeError.into();
        }
    };

    rt.block_on(run_daemon(config)).into()
}

/// Run the daemon and classify how it ended
async fn run_daemon(config: BlackholeConfig) -> BlackholeExitCode {
    let (engine, source) = match start(&config).await {
        Ok(parts) => parts,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            return BlackholeExitCode::ConfigError;
        }
    };

    match engine.run(&source).await {
        Ok(()) => {
            info!("Shut down cleanly");
            BlackholeExitCode::CleanShutdown
        }
        Err(e) if !source.was_watched() => {
            error!("Startup failed: {}", e);
            BlackholeExitCode::ConfigError
        }
        Err(e) => {
            error!("Daemon error: {}", e);
            BlackholeExitCode::RuntimeError
        }
    }
}

/// Build every component; any failure here is a startup error
async fn start(config: &BlackholeConfig) -> Result<(BanEngine, StartupProbe)> {
    let store = open_store(config).await?;
    let routes = open_routes(config)?;
    let source = StartupProbe::new(open_log_source(config)?);

    let (engine, _events) =
        BanEngine::new(store, routes, config).context("Failed to create ban engine")?;

    Ok((engine, source))
}

#[cfg(feature = "sqlite")]
async fn open_store(config: &BlackholeConfig) -> Result<Box<dyn BanStore>> {
    let store = blackhole_store_sqlite::SqliteBanStore::open(&config.store.path)
        .await
        .with_context(|| format!("Failed to open ban store at {}", config.store.path))?;
    Ok(Box::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_store(_config: &BlackholeConfig) -> Result<Box<dyn BanStore>> {
    tracing::warn!("Built without SQLite support, bans will not survive a restart");
    Ok(Box::new(blackhole_core::MemoryBanStore::new()))
}

#[cfg(feature = "netlink")]
fn open_routes(config: &BlackholeConfig) -> Result<Box<dyn RouteController>> {
    let routes = blackhole_route_netlink::NetlinkRouteController::new(config.prefixes)
        .context("Failed to open route backend")?;
    Ok(Box::new(routes))
}

#[cfg(not(feature = "netlink"))]
fn open_routes(config: &BlackholeConfig) -> Result<Box<dyn RouteController>> {
    tracing::warn!("Built without netlink support, routes are only simulated");
    Ok(Box::new(blackhole_core::MemoryRouteTable::new(config.prefixes)))
}

#[cfg(feature = "journal")]
fn open_log_source(config: &BlackholeConfig) -> Result<Box<dyn LogSource>> {
    let source = blackhole_journal::JournalLogSource::new(
        &config.log_source,
        config.engine.queue_capacity,
    )
    .context("Failed to configure journal source")?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "journal"))]
fn open_log_source(_config: &BlackholeConfig) -> Result<Box<dyn LogSource>> {
    anyhow::bail!("Built without journal support, no log source available")
}

/// Log source wrapper that remembers whether `watch()` succeeded
///
/// Lets the daemon tell an unreachable journal (startup error) from one that
/// went away later (runtime error).
struct StartupProbe {
    inner: Box<dyn LogSource>,
    watched: AtomicBool,
}

impl StartupProbe {
    fn new(inner: Box<dyn LogSource>) -> Self {
        Self {
            inner,
            watched: AtomicBool::new(false),
        }
    }

    fn was_watched(&self) -> bool {
        self.watched.load(Ordering::SeqCst)
    }
}

impl LogSource for StartupProbe {
    fn watch(&self) -> blackhole_core::Result<LogLines> {
        let lines = self.inner.watch()?;
        self.watched.store(true, Ordering::SeqCst);
        Ok(lines)
    }

    fn source_name(&self) -> &'static str {
        self.inner.source_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unreachable;

    impl LogSource for Unreachable {
        fn watch(&self) -> blackhole_core::Result<LogLines> {
            Err(blackhole_core::Error::log_source("journalctl not found"))
        }

        fn source_name(&self) -> &'static str {
            "unreachable"
        }
    }

    struct Empty;

    impl LogSource for Empty {
        fn watch(&self) -> blackhole_core::Result<LogLines> {
            Ok(Box::pin(tokio_stream::iter(Vec::<String>::new())))
        }

        fn source_name(&self) -> &'static str {
            "empty"
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(BlackholeExitCode::CleanShutdown as u8, 0);
        assert_eq!(BlackholeExitCode::ConfigError as u8, 1);
        assert_eq!(BlackholeExitCode::RuntimeError as u8, 2);
    }

    #[test]
    fn test_probe_records_successful_watch() {
        let probe = StartupProbe::new(Box::new(Empty));
        assert!(!probe.was_watched());
        assert!(probe.watch().is_ok());
        assert!(probe.was_watched());
    }

    #[test]
    fn test_probe_ignores_failed_watch() {
        let probe = StartupProbe::new(Box::new(Unreachable));
        assert!(probe.watch().is_err());
        assert!(!probe.was_watched());
        assert_eq!(probe.source_name(), "unreachable");
    }
}
