//! Test doubles and common utilities for architecture contract tests
//!
//! This module provides minimal test doubles that record how the engine
//! drives its collaborators, so the tests can assert on ordering and
//! failure handling without touching the kernel or the disk.

#![allow(dead_code)]

use async_trait::async_trait;
use blackhole_core::error::{Error, Result};
use blackhole_core::traits::{BanRecord, BanStore, LogLines, LogSource, RouteController};
use blackhole_core::{BlackholeConfig, MemoryBanStore, Prefixes};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Start of simulated time in contract tests
pub const T0: i64 = 1_700_000_000;

/// Canonical failed-login line from the end-to-end scenario
pub const ADMIN_LINE: &str =
    "Failed password for invalid user admin from 203.0.113.7 port 51514 ssh2";

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

pub fn failed_password(addr: &str) -> String {
    format!("Failed password for root from {} port 40022 ssh2", addr)
}

/// A log source whose lines are pushed by the test through a bounded queue
pub struct ControlledLogSource {
    rx: Mutex<Option<mpsc::Receiver<String>>>,
    watch_call_count: Arc<AtomicUsize>,
}

impl ControlledLogSource {
    /// Create a controlled source with a queue of `capacity` lines
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        let source = Self {
            rx: Mutex::new(Some(rx)),
            watch_call_count: Arc::new(AtomicUsize::new(0)),
        };
        (source, tx)
    }

    /// Get the number of times watch() was called
    pub fn watch_call_count(&self) -> usize {
        self.watch_call_count.load(Ordering::SeqCst)
    }
}

impl LogSource for ControlledLogSource {
    fn watch(&self) -> Result<LogLines> {
        self.watch_call_count.fetch_add(1, Ordering::SeqCst);

        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .expect("watch() can only be called once");

        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }

    fn source_name(&self) -> &'static str {
        "controlled"
    }
}

/// A log source that never emits anything and never ends
pub struct IdleLogSource;

impl LogSource for IdleLogSource {
    fn watch(&self) -> Result<LogLines> {
        Ok(Box::pin(tokio_stream::pending::<String>()))
    }

    fn source_name(&self) -> &'static str {
        "idle"
    }
}

/// A log source that cannot be reached
pub struct UnreachableLogSource;

impl LogSource for UnreachableLogSource {
    fn watch(&self) -> Result<LogLines> {
        Err(Error::log_source("journal not found"))
    }

    fn source_name(&self) -> &'static str {
        "unreachable"
    }
}

/// A route call observed by [`RecordingRoutes`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteCall {
    Add(IpAddr),
    Remove(IpAddr),
}

/// A route controller that records every call and can be told to fail
///
/// Keeps a set of installed addresses (host granularity) and reports
/// `RouteExists`/`RouteMissing` like the kernel would.
#[derive(Clone, Default)]
pub struct RecordingRoutes {
    calls: Arc<Mutex<Vec<RouteCall>>>,
    installed: Arc<Mutex<BTreeSet<IpAddr>>>,
    fail_add: Arc<AtomicBool>,
    fail_remove: Arc<AtomicBool>,
}

impl RecordingRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RouteCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn installed(&self) -> Vec<IpAddr> {
        self.installed.lock().unwrap().iter().copied().collect()
    }

    pub fn set_fail_add(&self, fail: bool) {
        self.fail_add.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RouteController for RecordingRoutes {
    async fn add_blackhole(&self, address: IpAddr) -> Result<()> {
        self.calls.lock().unwrap().push(RouteCall::Add(address));
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(Error::route("Operation not permitted (os error 1)"));
        }
        if !self.installed.lock().unwrap().insert(address) {
            return Err(Error::route_exists(address.to_string()));
        }
        Ok(())
    }

    async fn remove_blackhole(&self, address: IpAddr) -> Result<()> {
        self.calls.lock().unwrap().push(RouteCall::Remove(address));
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(Error::route("Operation not permitted (os error 1)"));
        }
        if !self.installed.lock().unwrap().remove(&address) {
            return Err(Error::route_missing(address.to_string()));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "recording"
    }
}

/// A ban store wrapping [`MemoryBanStore`] with injectable failures
#[derive(Clone, Default)]
pub struct FlakyBanStore {
    inner: MemoryBanStore,
    fail_upsert: Arc<AtomicBool>,
    fail_query: Arc<AtomicBool>,
    fail_delete: Arc<AtomicBool>,
    fail_read: Arc<AtomicBool>,
    upsert_call_count: Arc<AtomicUsize>,
    delete_call_count: Arc<AtomicUsize>,
    close_call_count: Arc<AtomicUsize>,
}

impl FlakyBanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The backing memory store (shares state)
    pub fn memory(&self) -> MemoryBanStore {
        self.inner.clone()
    }

    pub fn set_fail_upsert(&self, fail: bool) {
        self.fail_upsert.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_query(&self, fail: bool) {
        self.fail_query.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Fail `get` and `list`
    pub fn set_fail_read(&self, fail: bool) {
        self.fail_read.store(fail, Ordering::SeqCst);
    }

    pub fn upsert_call_count(&self) -> usize {
        self.upsert_call_count.load(Ordering::SeqCst)
    }

    pub fn delete_call_count(&self) -> usize {
        self.delete_call_count.load(Ordering::SeqCst)
    }

    pub fn close_call_count(&self) -> usize {
        self.close_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BanStore for FlakyBanStore {
    async fn upsert(&self, address: IpAddr, expires_at: i64) -> Result<()> {
        self.upsert_call_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_upsert.load(Ordering::SeqCst) {
            return Err(Error::store("database is locked"));
        }
        self.inner.upsert(address, expires_at).await
    }

    async fn query_expired(&self, now: i64) -> Result<Vec<IpAddr>> {
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(Error::store("disk I/O error"));
        }
        self.inner.query_expired(now).await
    }

    async fn delete(&self, address: IpAddr) -> Result<()> {
        self.delete_call_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Error::store("database is locked"));
        }
        self.inner.delete(address).await
    }

    async fn get(&self, address: IpAddr) -> Result<Option<BanRecord>> {
        if self.fail_read.load(Ordering::SeqCst) {
            return Err(Error::store("disk I/O error"));
        }
        self.inner.get(address).await
    }

    async fn list(&self) -> Result<Vec<BanRecord>> {
        if self.fail_read.load(Ordering::SeqCst) {
            return Err(Error::store("disk I/O error"));
        }
        self.inner.list().await
    }

    async fn close(&self) -> Result<()> {
        self.close_call_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Helper to create a minimal configuration for testing
pub fn minimal_config() -> BlackholeConfig {
    let mut config = BlackholeConfig::new();
    config.store.path = ":memory:".to_string();
    config.prefixes = Prefixes::default();
    config
}
