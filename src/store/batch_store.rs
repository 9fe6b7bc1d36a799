//! Persistence of batch runs and their final results.

use crate::config::RetentionConfig;
use crate::models::BatchRecord;
use crate::state_machine::BatchState;
use crate::store::durable::{DurableStore, StorageResult};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub struct BatchStore {
    store: Arc<dyn DurableStore>,
    retention: RetentionConfig,
}

impl BatchStore {
    pub fn new(store: Arc<dyn DurableStore>, retention: RetentionConfig) -> Self {
        Self { store, retention }
    }

    fn key(batch_id: Uuid) -> String {
        format!("batch:{batch_id}")
    }

    /// Save a record; terminal records get the retention TTL for their state
    pub async fn save(&self, record: &BatchRecord) -> StorageResult<()> {
        let key = Self::key(record.run.batch_id);
        let value = serde_json::to_value(record)?;
        match record.run.state {
            BatchState::Completed => {
                self.store
                    .put_with_ttl(&key, value, self.retention.completed_ttl())
                    .await
            }
            BatchState::Failed | BatchState::Cancelled => {
                self.store
                    .put_with_ttl(&key, value, self.retention.failed_ttl())
                    .await
            }
            BatchState::Pending | BatchState::Processing => self.store.put(&key, value).await,
        }?;
        debug!(batch_id = %record.run.batch_id, state = %record.run.state, "Batch record saved");
        Ok(())
    }

    pub async fn load(&self, batch_id: Uuid) -> StorageResult<Option<BatchRecord>> {
        match self.store.get(&Self::key(batch_id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, batch_id: Uuid) -> StorageResult<bool> {
        self.store.delete(&Self::key(batch_id)).await
    }
}
