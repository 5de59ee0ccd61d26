//! Minimal embedding example for blackhole-core
//!
//! This example demonstrates using blackhole-core as a library in a custom
//! application: log lines come from the application, routes are printed
//! instead of installed, and the engine lifecycle is fully managed by the
//! application.

use async_trait::async_trait;
use blackhole_core::traits::{LogLines, LogSource, RouteController};
use blackhole_core::{
    BanEngine, BlackholeConfig, Clock, ManualClock, MemoryBanStore, Prefixes, Result,
};
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Log source fed by the application
struct EmbeddedLogSource {
    rx: Mutex<Option<mpsc::Receiver<String>>>,
}

impl EmbeddedLogSource {
    fn new(capacity: usize) -> (Self, mpsc::Sender<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl LogSource for EmbeddedLogSource {
    fn watch(&self) -> Result<LogLines> {
        let rx = self
            .rx
            .lock()
            .map_err(|_| blackhole_core::Error::log_source("lock poisoned"))?
            .take()
            .ok_or_else(|| blackhole_core::Error::log_source("already watched"))?;
        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }

    fn source_name(&self) -> &'static str {
        "embedded"
    }
}

/// Route controller that only prints what it would do
struct PrintingRoutes {
    prefixes: Prefixes,
}

#[async_trait]
impl RouteController for PrintingRoutes {
    async fn add_blackhole(&self, address: IpAddr) -> Result<()> {
        println!("[Embedded] ip route add blackhole {}", self.prefixes.network(address)?);
        Ok(())
    }

    async fn remove_blackhole(&self, address: IpAddr) -> Result<()> {
        println!("[Embedded] ip route del blackhole {}", self.prefixes.network(address)?);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "printing"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    println!("=== Embedded blackhole-core Example ===\n");

    // Create configuration
    let mut config = BlackholeConfig::new();
    config.prefixes = Prefixes::new(24, 64);
    config.ban.duration_secs = 60;
    config.engine.sweep_interval_secs = 1;

    // Create custom components
    let (source, line_tx) = EmbeddedLogSource::new(config.engine.queue_capacity);
    let store = MemoryBanStore::new();
    let routes = PrintingRoutes {
        prefixes: config.prefixes,
    };
    let clock = ManualClock::new(1_700_000_000);

    // Create engine
    println!("1. Creating engine...");
    let (engine, mut event_rx) =
        BanEngine::new(Box::new(store.clone()), Box::new(routes), &config)?;
    let engine = engine.with_clock(Arc::new(clock.clone()));

    // Spawn event listener (optional)
    let event_listener = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            println!("[Event] {:?}", event);
        }
    });

    // Run engine in background
    println!("2. Starting engine in background...");
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let engine_handle =
        tokio::spawn(async move { engine.run_with_shutdown(&source, Some(shutdown_rx)).await });

    println!("3. Feeding log lines...");
    for line in [
        "Failed password for invalid user admin from 203.0.113.7 port 51514 ssh2",
        "Accepted publickey for deploy from 192.0.2.10 port 40022 ssh2",
        "Failed publickey for git from 2001:db8::42 port 2222 ssh2",
    ] {
        let _ = line_tx.send(line.to_string()).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    println!("\n4. Moving the clock past the ban duration...");
    clock.advance(61);
    println!("   now = {}", clock.now_unix_sec());
    tokio::time::sleep(Duration::from_millis(1500)).await;

    println!("\n5. Stopping engine...");
    let _ = shutdown_tx.send(());
    match engine_handle.await {
        Ok(result) => result?,
        Err(e) => println!("Engine task failed: {}", e),
    }
    let _ = tokio::time::timeout(Duration::from_millis(100), event_listener).await;

    println!("\n6. Engine stopped cleanly, {} ban(s) left.", store.len().await);

    Ok(())
}
