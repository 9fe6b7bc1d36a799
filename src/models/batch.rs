//! # Batch Models
//!
//! Submitted items, the persisted batch run record and the aggregated batch result.

use crate::models::context::{Context, ContextData};
use crate::orchestration::errors::{ErrorKind, FailureRecord};
use crate::state_machine::{
    determine_batch_target, BatchEvent, BatchState, ContextState, StateMachineResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Caller-supplied unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub item_id: String,
    #[serde(default)]
    pub data: ContextData,
}

impl BatchItem {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            data: ContextData::new(),
        }
    }

    pub fn with_field(mut self, path: impl Into<String>, value: Value) -> Self {
        self.data.insert(path.into(), value);
        self
    }
}

/// Item id paired with the context that tracks it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRunItem {
    pub item_id: String,
    pub context_id: Uuid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounters {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    /// Items stopped by cancellation
    pub skipped: u64,
}

impl BatchCounters {
    pub fn resolved(&self) -> u64 {
        self.completed + self.failed + self.skipped
    }
}

/// Persisted record of an accepted batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRun {
    pub batch_id: Uuid,
    pub template_id: String,
    pub items: Vec<BatchRunItem>,
    pub counters: BatchCounters,
    pub state: BatchState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchRun {
    pub fn new(template_id: impl Into<String>, items: Vec<BatchRunItem>) -> Self {
        Self::with_id(Uuid::new_v4(), template_id, items)
    }

    /// Run whose id was allocated up front, so contexts can reference it
    pub fn with_id(
        batch_id: Uuid,
        template_id: impl Into<String>,
        items: Vec<BatchRunItem>,
    ) -> Self {
        let now = Utc::now();
        Self {
            batch_id,
            template_id: template_id.into(),
            counters: BatchCounters {
                total: items.len() as u64,
                ..Default::default()
            },
            items,
            state: BatchState::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Apply a lifecycle event through the batch state machine
    pub fn transition(&mut self, event: BatchEvent) -> StateMachineResult<BatchState> {
        let target = determine_batch_target(self.state, &event)?;
        self.state = target;
        self.updated_at = Utc::now();
        if target.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        Ok(target)
    }
}

/// Final outcome of one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub item_id: String,
    pub context_id: Uuid,
    pub status: ContextState,
    pub error: Option<FailureRecord>,
    /// Final context; dropped from summary-mode results
    pub context: Option<Context>,
}

impl ItemOutcome {
    pub fn from_context(context: Context, error: Option<FailureRecord>) -> Self {
        Self {
            item_id: context.item_id.clone(),
            context_id: context.id,
            status: context.status,
            error,
            context: Some(context),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ContextState::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == ContextState::Failed
    }

    pub fn is_skipped(&self) -> bool {
        self.status == ContextState::Cancelled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchResultStatus {
    /// Every item completed
    Success,
    /// Some but not all items completed
    Partial,
    /// No item completed
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub item_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    /// completed / total, 1.0 for an empty batch
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: Uuid,
    pub status: BatchResultStatus,
    pub counters: BatchCounters,
    pub summary: BatchSummary,
    pub errors: Vec<ItemError>,
    pub skipped_items: Vec<String>,
    pub items: Vec<ItemOutcome>,
}

impl BatchResult {
    pub fn outcome_for(&self, item_id: &str) -> Option<&ItemOutcome> {
        self.items.iter().find(|outcome| outcome.item_id == item_id)
    }
}

/// What pollers see
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatusReport {
    pub batch_id: Uuid,
    pub template_id: String,
    pub state: BatchState,
    /// Present once the batch reached a terminal state
    pub result_status: Option<BatchResultStatus>,
    pub counters: BatchCounters,
    pub errors: Vec<ItemError>,
}

/// Stored form of a batch: the run plus its final result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub run: BatchRun,
    pub result: Option<BatchResult>,
}

impl BatchRecord {
    pub fn status_report(&self) -> BatchStatusReport {
        BatchStatusReport {
            batch_id: self.run.batch_id,
            template_id: self.run.template_id.clone(),
            state: self.run.state,
            result_status: self.result.as_ref().map(|r| r.status),
            counters: self
                .result
                .as_ref()
                .map(|r| r.counters)
                .unwrap_or(self.run.counters),
            errors: self
                .result
                .as_ref()
                .map(|r| r.errors.clone())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_counts_items() {
        let items = (0..3)
            .map(|i| BatchRunItem {
                item_id: format!("item-{i}"),
                context_id: Uuid::new_v4(),
            })
            .collect();
        let run = BatchRun::new("tmpl", items);
        assert_eq!(run.counters.total, 3);
        assert_eq!(run.counters.resolved(), 0);
        assert_eq!(run.state, BatchState::Pending);
    }

    #[test]
    fn test_terminal_transition_stamps_completion() {
        let mut run = BatchRun::new("tmpl", vec![]);
        run.transition(BatchEvent::Start).unwrap();
        assert!(run.completed_at.is_none());
        run.transition(BatchEvent::Complete).unwrap();
        assert_eq!(run.state, BatchState::Completed);
        assert!(run.completed_at.is_some());
    }
}
