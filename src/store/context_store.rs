//! # Context Store
//!
//! Addressable checkpoint storage for [`Context`]s on top of a [`DurableStore`].
//!
//! Writes to the same context are serialized through a per-context async lock.
//! `update_field` rewrites a single path, and the orchestrator's own writes go
//! through [`ContextStore::commit`] and [`ContextStore::finalize`], which replace only
//! the paths that writer changed. Concurrent writers on different paths therefore
//! never lose each other's changes. No retry logic lives here: backend failures
//! surface as [`StorageError`].

use crate::config::RetentionConfig;
use crate::models::{Context, ContextData, Delta, FieldChange};
use crate::state_machine::ContextState;
use crate::store::durable::{DurableStore, StorageError, StorageResult};
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Handle returned by `save_checkpoint`; identical to the context id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CheckpointId(pub Uuid);

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CheckpointId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

pub struct ContextStore {
    store: Arc<dyn DurableStore>,
    retention: RetentionConfig,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl ContextStore {
    pub fn new(store: Arc<dyn DurableStore>, retention: RetentionConfig) -> Self {
        Self {
            store,
            retention,
            locks: DashMap::new(),
        }
    }

    fn key(context_id: Uuid) -> String {
        format!("context:{context_id}")
    }

    fn lock_for(&self, context_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(context_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Persist the full context state, overwriting any earlier checkpoint
    ///
    /// Use [`ContextStore::commit`] for a context that other writers may touch.
    #[instrument(skip(self, context), fields(context_id = %context.id, status = %context.status))]
    pub async fn save_checkpoint(&self, context: &Context) -> StorageResult<CheckpointId> {
        let lock = self.lock_for(context.id);
        let _guard = lock.lock().await;
        let record = serde_json::to_value(context)?;
        self.store.put(&Self::key(context.id), record).await?;
        debug!(next_step = context.next_step, "Context checkpoint saved");
        Ok(CheckpointId(context.id))
    }

    /// Checkpoint a running context, writing only the data paths in `delta`
    ///
    /// Every other path keeps its stored value. Lifecycle fields (status, history,
    /// `next_step`) come from `context`. On return `context.data` mirrors the stored
    /// record, including fields written by other writers.
    #[instrument(skip(self, context, delta), fields(context_id = %context.id, changed = delta.len()))]
    pub async fn commit(
        &self,
        context: &mut Context,
        delta: &Delta,
    ) -> StorageResult<CheckpointId> {
        let lock = self.lock_for(context.id);
        let _guard = lock.lock().await;

        self.merge_stored(context, delta).await?;
        let record = serde_json::to_value(&*context)?;
        self.store.put(&Self::key(context.id), record).await?;
        debug!(next_step = context.next_step, "Context checkpoint committed");
        Ok(CheckpointId(context.id))
    }

    /// Rebase `context.data` onto the stored record, keeping only `delta`'s paths
    async fn merge_stored(&self, context: &mut Context, delta: &Delta) -> StorageResult<()> {
        let Some(record) = self.store.get(&Self::key(context.id)).await? else {
            return Ok(());
        };
        let stored: Context = serde_json::from_value(record)?;
        let mut data = stored.data;
        for path in delta.keys() {
            match context.data.get(path) {
                Some(value) => {
                    data.insert(path.clone(), value.clone());
                }
                None => {
                    data.remove(path);
                }
            }
        }
        context.data = data;
        Ok(())
    }

    pub async fn load_checkpoint(&self, checkpoint_id: CheckpointId) -> StorageResult<Context> {
        let key = Self::key(checkpoint_id.0);
        let record = self
            .store
            .get(&key)
            .await?
            .ok_or(StorageError::NotFound { key })?;
        Ok(serde_json::from_value(record)?)
    }

    /// Write one field of a stored context
    #[instrument(skip(self, value))]
    pub async fn update_field(
        &self,
        context_id: Uuid,
        path: &str,
        value: Value,
    ) -> StorageResult<FieldChange> {
        let lock = self.lock_for(context_id);
        let _guard = lock.lock().await;

        let key = Self::key(context_id);
        let record = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| StorageError::NotFound { key: key.clone() })?;
        let mut context: Context = serde_json::from_value(record)?;

        let old = context.set(path, value.clone()).unwrap_or(Value::Null);
        self.store.put(&key, serde_json::to_value(&context)?).await?;

        Ok(FieldChange { old, new: value })
    }

    /// Per-path differences between two snapshots; absent paths read as `null`
    pub fn diff(old: &ContextData, new: &ContextData) -> Delta {
        let mut delta = Delta::new();

        for (path, new_value) in new {
            match old.get(path) {
                Some(old_value) if old_value == new_value => {}
                Some(old_value) => {
                    delta.insert(
                        path.clone(),
                        FieldChange {
                            old: old_value.clone(),
                            new: new_value.clone(),
                        },
                    );
                }
                None => {
                    delta.insert(
                        path.clone(),
                        FieldChange {
                            old: Value::Null,
                            new: new_value.clone(),
                        },
                    );
                }
            }
        }

        for (path, old_value) in old {
            if !new.contains_key(path) {
                delta.insert(
                    path.clone(),
                    FieldChange {
                        old: old_value.clone(),
                        new: Value::Null,
                    },
                );
            }
        }

        delta
    }

    /// Save a terminal context with the retention TTL for its status
    ///
    /// Data is taken from the stored record; everything this writer produced was
    /// already committed step by step.
    #[instrument(skip(self, context), fields(context_id = %context.id, status = %context.status))]
    pub async fn finalize(&self, context: &mut Context) -> StorageResult<CheckpointId> {
        let ttl = match context.status {
            ContextState::Completed => self.retention.completed_ttl(),
            _ => self.retention.failed_ttl(),
        };
        {
            let lock = self.lock_for(context.id);
            let _guard = lock.lock().await;
            self.merge_stored(context, &Delta::new()).await?;
            let record = serde_json::to_value(&*context)?;
            self.store
                .put_with_ttl(&Self::key(context.id), record, ttl)
                .await?;
        }
        self.locks.remove(&context.id);
        debug!(ttl_secs = ttl.as_secs(), "Context finalized");
        Ok(CheckpointId(context.id))
    }

    /// Drop the write lock of a context no writer will touch again
    pub fn release(&self, context_id: Uuid) {
        self.locks.remove(&context_id);
    }

    pub async fn delete(&self, context_id: Uuid) -> StorageResult<bool> {
        let deleted = self.store.delete(&Self::key(context_id)).await?;
        self.locks.remove(&context_id);
        Ok(deleted)
    }
}
