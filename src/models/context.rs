//! # Processing Context
//!
//! Per-item state threaded through a template's steps. Field paths are flat strings
//! (`"analysis.keywords"`), so a context is a shallow path-addressed map rather than a
//! nested document.

use crate::orchestration::errors::ErrorKind;
use crate::state_machine::{determine_context_target, ContextEvent, ContextState, StateMachineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Flat path-addressed field storage
pub type ContextData = BTreeMap<String, Value>;

/// Old and new value of a single path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
}

/// Per-path changes between two context snapshots
pub type Delta = BTreeMap<String, FieldChange>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Failure,
}

/// Audit record of one step attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step: String,
    pub service: String,
    pub operation: String,
    /// 1-based attempt number for this step
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: StepOutcome,
    pub error_kind: Option<ErrorKind>,
    pub message: Option<String>,
    /// Fields written by the attempt (empty on failure)
    #[serde(default)]
    pub delta: Delta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub id: Uuid,
    pub item_id: String,
    pub template_id: String,
    pub batch_id: Option<Uuid>,
    pub data: ContextData,
    pub status: ContextState,
    pub history: Vec<HistoryEntry>,
    /// Index of the first step that has not committed yet
    pub next_step: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Context {
    pub fn new(
        item_id: impl Into<String>,
        template_id: impl Into<String>,
        batch_id: Option<Uuid>,
        data: ContextData,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            item_id: item_id.into(),
            template_id: template_id.into(),
            batch_id,
            data,
            status: ContextState::Created,
            history: Vec::new(),
            next_step: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a lifecycle event through the context state machine
    pub fn transition(&mut self, event: ContextEvent) -> StateMachineResult<ContextState> {
        let target = determine_context_target(self.status, &event)?;
        self.status = target;
        self.touch();
        Ok(target)
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.data.get(path)
    }

    /// Write a field, returning the previous value
    pub fn set(&mut self, path: impl Into<String>, value: Value) -> Option<Value> {
        self.touch();
        self.data.insert(path.into(), value)
    }

    pub fn record(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
        self.touch();
    }

    /// Number of recorded attempts for a step
    pub fn attempts_for(&self, step: &str) -> u32 {
        self.history.iter().filter(|entry| entry.step == step).count() as u32
    }

    pub fn last_entry(&self) -> Option<&HistoryEntry> {
        self.history.last()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
