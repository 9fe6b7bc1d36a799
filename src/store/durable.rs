//! # Durable Store
//!
//! Key-value persistence contract used for checkpoints and batch records, plus the
//! in-memory implementation used by default and in tests.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("Record not found: {key}")]
    NotFound { key: String },
    #[error("Storage backend failure: {0}")]
    Backend(String),
    #[error("Record serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(error: serde_json::Error) -> Self {
        StorageError::Serialization(error.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Contract for the persistence layer behind the context and batch stores
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Fetch a live (non-expired) record
    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Write a record with no expiry, replacing any previous value
    async fn put(&self, key: &str, value: Value) -> StorageResult<()>;

    /// Write a record that expires after `ttl`
    async fn put_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> StorageResult<()>;

    /// Remove a record, returning whether it existed
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    fn backend_name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// `DashMap`-backed store with TTL expiry
///
/// Expired records are hidden from `get` immediately and evicted by a sweep that
/// writes trigger at most once per sweep interval.
#[derive(Debug)]
pub struct InMemoryDurableStore {
    entries: DashMap<String, StoredEntry>,
    sweep_interval: Duration,
    last_sweep: Mutex<Instant>,
}

impl Default for InMemoryDurableStore {
    fn default() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            sweep_interval,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Purge expired records if the last sweep is older than the sweep interval
    fn maybe_sweep(&self) {
        let now = Instant::now();
        {
            let mut last_sweep = self.last_sweep.lock();
            if now.duration_since(*last_sweep) < self.sweep_interval {
                return;
            }
            *last_sweep = now;
        }
        self.purge_expired();
    }

    /// Drop every expired record, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!(purged = purged, "Purged expired records");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: Value) -> StorageResult<()> {
        self.maybe_sweep();
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn put_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> StorageResult<()> {
        self.maybe_sweep();
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    fn backend_name(&self) -> &'static str {
        "in_memory"
    }
}
