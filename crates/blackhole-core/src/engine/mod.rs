//! Core ban engine
//!
//! The BanEngine is responsible for:
//! - Extracting offending addresses from log lines via PatternSet
//! - Recording bans in the BanStore
//! - Installing and removing blackhole routes via RouteController
//! - Sweeping expired bans on a fixed interval
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  LogSource  │─── line (bounded queue) ───┐
//! └─────────────┘                            │
//! ┌─────────────┐                            ▼
//! │   Ticker    │─── tick ──────────▶ ┌──────────────┐
//! └─────────────┘                     │  BanEngine   │
//!                                     └──────────────┘
//!                                            │
//!         ┌──────────────────────────────────┼─────────────────────┐
//!         │                                  │                     │
//!         ▼                                  ▼                     ▼
//! ┌─────────────┐                   ┌─────────────────┐     ┌─────────────┐
//! │  BanStore   │                   │ RouteController │     │   Events    │
//! │ (record)    │                   │ (blackhole)     │     │  (notify)   │
//! └─────────────┘                   └─────────────────┘     └─────────────┘
//! ```
//!
//! ## Event Flow
//!
//! Log line:
//! 1. PatternSet extracts the source address (no match: done)
//! 2. BanStore upsert with `now + ban duration`
//! 3. RouteController installs the blackhole route
//!
//! Tick:
//! 1. BanStore returns addresses with `expires_at < now`
//! 2. For each: remove the route, then delete the record
//!
//! The record is always written before the route is added and the route is
//! always removed before the record is deleted. A crash in between leaves a
//! record without a route, never a route without a record.
//!
//! All work happens on the task calling [`BanEngine::run`], one event at a
//! time, so the store and route backend never see concurrent calls.

use crate::clock::{Clock, SystemClock};
use crate::config::{BlackholeConfig, Prefixes};
use crate::error::{Error, Result};
use crate::patterns::PatternSet;
use crate::traits::{BanRecord, BanStore, LogSource, RouteController};
use ipnet::IpNet;
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// Operation that failed while handling an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// BanStore::upsert
    Upsert,
    /// BanStore::query_expired
    QueryExpired,
    /// BanStore::delete
    Delete,
    /// BanStore::list
    List,
    /// RouteController::add_blackhole
    AddRoute,
    /// RouteController::remove_blackhole
    RemoveRoute,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Upsert => "db(upsert)",
            Operation::QueryExpired => "db(query_expired)",
            Operation::Delete => "db(delete)",
            Operation::List => "db(list)",
            Operation::AddRoute => "route(add)",
            Operation::RemoveRoute => "route(del)",
        };
        f.write_str(name)
    }
}

/// Events emitted by the BanEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started {
        bans: usize,
    },

    /// New ban recorded and route installed
    BanRecorded {
        address: IpAddr,
        network: IpNet,
        expires_at: i64,
    },

    /// Existing ban extended by a new detection
    BanRefreshed {
        address: IpAddr,
        network: IpNet,
        expires_at: i64,
    },

    /// Ban lifted by the expiry sweep
    BanExpired {
        address: IpAddr,
        network: IpNet,
    },

    /// A store or route operation failed; the event was abandoned
    OperationFailed {
        address: Option<IpAddr>,
        operation: Operation,
        error: String,
    },

    /// Startup reconciliation finished
    Reconciled {
        restored: usize,
        pending_expiry: usize,
    },

    /// Engine stopped
    Stopped {
        reason: String,
    },
}

/// Outcome of one expiry sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Addresses returned by the expiry query
    pub expired: usize,
    /// Bans fully lifted (route gone, record deleted)
    pub revoked: usize,
    /// Bans left in place because an operation failed
    pub failed: usize,
}

/// Outcome of startup reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Unexpired bans whose route was re-installed
    pub restored: usize,
    /// Unexpired bans whose route was already present
    pub already_present: usize,
    /// Expired bans left for the first sweep
    pub pending_expiry: usize,
    /// Unexpired bans whose route could not be installed
    pub failed: usize,
}

/// Core ban engine
///
/// ## Lifecycle
///
/// 1. Create with [`BanEngine::new()`]
/// 2. Start with [`BanEngine::run()`]
/// 3. Engine runs until SIGINT/SIGTERM or until the log source goes away
/// 4. The ban store is closed on every exit path
///
/// ## Threading
///
/// The engine handles one event at a time on the task that runs it.
/// Lines wait in the log source's bounded queue while a sweep runs and
/// vice versa.
pub struct BanEngine {
    /// Extraction rules
    patterns: PatternSet,

    /// Authoritative ban records
    store: Box<dyn BanStore>,

    /// Blackhole route backend
    routes: Box<dyn RouteController>,

    /// Prefix lengths (for logging the affected network)
    prefixes: Prefixes,

    /// Ban duration (in seconds)
    ban_duration_secs: i64,

    /// Expiry sweep period
    sweep_interval: Duration,

    /// Time source
    clock: Arc<dyn Clock>,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl BanEngine {
    /// Create a new ban engine
    ///
    /// # Parameters
    ///
    /// - `store`: Ban store implementation
    /// - `routes`: Route controller implementation
    /// - `config`: Blackhole configuration
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        store: Box<dyn BanStore>,
        routes: Box<dyn RouteController>,
        config: &BlackholeConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let patterns = PatternSet::from_config(&config.detection)?;
        let ban_duration_secs = i64::try_from(config.ban.duration_secs)
            .map_err(|_| Error::config("Ban duration is too large"))?;

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);

        let engine = Self {
            patterns,
            store,
            routes,
            prefixes: config.prefixes,
            ban_duration_secs,
            sweep_interval: config.engine.sweep_interval(),
            clock: Arc::new(SystemClock),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the extraction rules
    pub fn with_patterns(mut self, patterns: PatternSet) -> Self {
        self.patterns = patterns;
        self
    }

    /// Handle one raw log line
    ///
    /// # Returns
    ///
    /// - `Ok(Some(record))`: the ban that was created or refreshed
    /// - `Ok(None)`: the line matched no rule
    /// - `Err(Error)`: a store or route operation failed; the line is abandoned
    pub async fn handle_log_line(&self, line: &str) -> Result<Option<BanRecord>> {
        let Some(address) = self.patterns.extract(line) else {
            return Ok(None);
        };

        let network = self.prefixes.network(address)?;
        let expires_at = self.clock.now_unix_sec() + self.ban_duration_secs;

        // Only picks the event kind; a failed read must not cost the ban
        let refreshed = match self.store.get(address).await {
            Ok(existing) => existing.is_some(),
            Err(e) => {
                warn!(%address, error = %e, "Failed to look up existing ban, recording anyway");
                false
            }
        };

        let record = BanRecord::new(address, expires_at);
        match record.expires_at_utc() {
            Some(until) => info!(%address, %until, "Recording ban"),
            None => info!(%address, expires_at, "Recording ban"),
        }

        self.store
            .upsert(address, expires_at)
            .await
            .map_err(|e| self.failed(Some(address), Operation::Upsert, e))?;

        match self.routes.add_blackhole(address).await {
            Ok(()) => {}
            Err(e) if e.is_route_conflict() => {
                debug!(%address, %network, "Blackhole route already installed");
            }
            Err(e) => return Err(self.failed(Some(address), Operation::AddRoute, e)),
        }

        let event = if refreshed {
            EngineEvent::BanRefreshed {
                address,
                network,
                expires_at,
            }
        } else {
            EngineEvent::BanRecorded {
                address,
                network,
                expires_at,
            }
        };
        self.emit_event(event);

        Ok(Some(record))
    }

    /// Lift every ban that expired before `now`
    ///
    /// Per-address failures are logged and counted; the record stays in the
    /// store so the next sweep tries again. A failing expiry query aborts the
    /// sweep with an error.
    pub async fn handle_tick(&self, now: i64) -> Result<SweepReport> {
        let expired = self
            .store
            .query_expired(now)
            .await
            .map_err(|e| self.failed(None, Operation::QueryExpired, e))?;

        let mut report = SweepReport {
            expired: expired.len(),
            ..SweepReport::default()
        };

        if expired.is_empty() {
            return Ok(report);
        }

        // Networks still covered by a live ban keep their route.
        let active_networks = self.active_networks(now).await?;

        for address in expired {
            info!(%address, "Expiring ban");
            let network = self.prefixes.network(address)?;

            if active_networks.contains(&network) {
                debug!(%address, %network, "Network still banned by another address, keeping route");
            } else {
                match self.routes.remove_blackhole(address).await {
                    Ok(()) => {}
                    Err(Error::RouteMissing(_)) => {
                        warn!(%address, %network, "Blackhole route already absent");
                    }
                    Err(e) => {
                        self.failed(Some(address), Operation::RemoveRoute, e);
                        report.failed += 1;
                        continue;
                    }
                }
            }

            if let Err(e) = self.store.delete(address).await {
                self.failed(Some(address), Operation::Delete, e);
                report.failed += 1;
                continue;
            }

            report.revoked += 1;
            self.emit_event(EngineEvent::BanExpired { address, network });
        }

        Ok(report)
    }

    /// Re-install routes for every unexpired ban in the store
    ///
    /// Repairs records left without a route (crash between upsert and route
    /// add, or routes lost across a reboot). Expired records are left for the
    /// first sweep.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let now = self.clock.now_unix_sec();
        let records = self
            .store
            .list()
            .await
            .map_err(|e| self.failed(None, Operation::List, e))?;

        let mut report = ReconcileReport::default();

        for record in records {
            if record.is_expired(now) {
                report.pending_expiry += 1;
                continue;
            }

            match self.routes.add_blackhole(record.address).await {
                Ok(()) => report.restored += 1,
                Err(e) if e.is_route_conflict() => report.already_present += 1,
                Err(e) => {
                    self.failed(Some(record.address), Operation::AddRoute, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            restored = report.restored,
            already_present = report.already_present,
            pending_expiry = report.pending_expiry,
            failed = report.failed,
            "Reconciled stored bans with route table"
        );
        self.emit_event(EngineEvent::Reconciled {
            restored: report.restored,
            pending_expiry: report.pending_expiry,
        });

        Ok(report)
    }

    /// Run the engine
    ///
    /// Follows `source` and sweeps expired bans until SIGINT/SIGTERM.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: Fatal error (log source unreachable or closed)
    pub async fn run(&self, source: &dyn LogSource) -> Result<()> {
        self.run_internal(source, None).await
    }

    /// Run the engine with a programmatic shutdown signal
    ///
    /// With `None`, behaves like [`run()`](Self::run). With `Some(rx)`, the
    /// engine stops when `rx` completes (a message or a dropped sender) and
    /// ignores OS signals.
    pub async fn run_with_shutdown(
        &self,
        source: &dyn LogSource,
        shutdown_rx: Option<tokio::sync::oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.run_internal(source, shutdown_rx).await
    }

    async fn run_internal(
        &self,
        source: &dyn LogSource,
        shutdown_rx: Option<tokio::sync::oneshot::Receiver<()>>,
    ) -> Result<()> {
        let result = self.event_loop(source, shutdown_rx).await;

        if let Err(e) = self.store.close().await {
            error!(error = %e, "Failed to close ban store");
            if result.is_ok() {
                return Err(e);
            }
        }
        info!("Ban store closed, engine stopped");

        result
    }

    async fn event_loop(
        &self,
        source: &dyn LogSource,
        shutdown_rx: Option<tokio::sync::oneshot::Receiver<()>>,
    ) -> Result<()> {
        let bans = match self.store.list().await {
            Ok(bans) => bans.len(),
            Err(e) => {
                warn!(error = %e, "Failed to count stored bans at startup");
                0
            }
        };
        self.emit_event(EngineEvent::Started { bans });
        info!(
            bans,
            routes = self.routes.backend_name(),
            source = source.source_name(),
            "Engine started"
        );

        if let Err(e) = self.reconcile().await {
            warn!(error = %e, "Startup reconciliation failed, continuing");
        }

        let mut lines = source.watch()?;

        let mut ticker = tokio::time::interval_at(Instant::now() + self.sweep_interval, self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                    "shutdown signal"
                }
                None => wait_for_os_signal().await,
            }
        };
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Handle log lines
                line = lines.next() => {
                    match line {
                        Some(line) => {
                            if let Err(e) = self.handle_log_line(&line).await {
                                debug!(error = %e, "Log line abandoned");
                            }
                        }
                        None => {
                            error!("Log source closed");
                            self.emit_event(EngineEvent::Stopped {
                                reason: "Log source closed".to_string(),
                            });
                            return Err(Error::log_source(format!(
                                "{} stream ended",
                                source.source_name()
                            )));
                        }
                    }
                }

                // Handle expiry sweep
                _ = ticker.tick() => {
                    let now = self.clock.now_unix_sec();
                    match self.handle_tick(now).await {
                        Ok(report) if report.expired > 0 => {
                            debug!(
                                expired = report.expired,
                                revoked = report.revoked,
                                failed = report.failed,
                                "Sweep finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => debug!(error = %e, "Sweep abandoned"),
                    }
                }

                // Handle shutdown signal
                reason = &mut shutdown => {
                    info!(reason, "Shutdown signal received");
                    self.emit_event(EngineEvent::Stopped {
                        reason: reason.to_string(),
                    });
                    return Ok(());
                }
            }
        }
    }

    /// Networks covered by bans that are still in force at `now`
    async fn active_networks(&self, now: i64) -> Result<HashSet<IpNet>> {
        let records = self
            .store
            .list()
            .await
            .map_err(|e| self.failed(None, Operation::List, e))?;

        records
            .into_iter()
            .filter(|record| !record.is_expired(now))
            .map(|record| self.prefixes.network(record.address))
            .collect()
    }

    /// Log a failed operation, emit the matching event and hand the error back
    fn failed(&self, address: Option<IpAddr>, operation: Operation, err: Error) -> Error {
        match address {
            Some(address) => error!(%address, %operation, error = %err, "Operation failed"),
            None => error!(%operation, error = %err, "Operation failed"),
        }
        self.emit_event(EngineEvent::OperationFailed {
            address,
            operation,
            error: err.to_string(),
        });
        err
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
            // Nobody is listening
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_os_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        _ => {
            warn!("Failed to install signal handlers, falling back to CTRL-C");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

/// Wait for CTRL-C
#[cfg(not(unix))]
async fn wait_for_os_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "SIGINT"
}
