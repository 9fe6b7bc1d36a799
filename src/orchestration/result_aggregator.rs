//! # Result Aggregator
//!
//! Collects item outcomes while a batch runs and folds them into a [`BatchResult`].
//!
//! Recording is idempotent per context: an outcome reported twice for the same
//! context is ignored, so each item contributes to exactly one counter. Counters are
//! readable at any time for status polling.

use crate::models::{
    AggregationMode, BatchCounters, BatchResult, BatchResultStatus, BatchRunItem, BatchSummary,
    ItemError, ItemOutcome,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug)]
pub struct ResultAggregator {
    batch_id: Uuid,
    total: u64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    outcomes: Mutex<Vec<ItemOutcome>>,
    recorded: Mutex<HashSet<Uuid>>,
}

impl ResultAggregator {
    pub fn new(batch_id: Uuid, total: usize) -> Self {
        Self {
            batch_id,
            total: total as u64,
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            outcomes: Mutex::new(Vec::with_capacity(total)),
            recorded: Mutex::new(HashSet::with_capacity(total)),
        }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Record one item's final outcome; returns false for a repeated context
    pub fn record(&self, outcome: ItemOutcome) -> bool {
        if !self.recorded.lock().insert(outcome.context_id) {
            warn!(
                batch_id = %self.batch_id,
                item_id = %outcome.item_id,
                "Ignoring duplicate item outcome"
            );
            return false;
        }

        if outcome.is_completed() {
            self.completed.fetch_add(1, Ordering::AcqRel);
        } else if outcome.is_skipped() {
            self.skipped.fetch_add(1, Ordering::AcqRel);
        } else {
            self.failed.fetch_add(1, Ordering::AcqRel);
        }
        self.outcomes.lock().push(outcome);
        true
    }

    pub fn counters(&self) -> BatchCounters {
        BatchCounters {
            total: self.total,
            completed: self.completed.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
            skipped: self.skipped.load(Ordering::Acquire),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.counters().resolved() >= self.total
    }

    /// Errors of the items that failed so far
    pub fn errors(&self) -> Vec<ItemError> {
        self.outcomes
            .lock()
            .iter()
            .filter_map(item_error)
            .collect()
    }

    /// Build the final result, ordering items as they appear in `order`
    pub fn finish(&self, mode: AggregationMode, order: &[BatchRunItem]) -> BatchResult {
        let positions: HashMap<Uuid, usize> = order
            .iter()
            .enumerate()
            .map(|(position, item)| (item.context_id, position))
            .collect();

        let mut outcomes = self.outcomes.lock().clone();
        outcomes.sort_by_key(|outcome| {
            positions
                .get(&outcome.context_id)
                .copied()
                .unwrap_or(usize::MAX)
        });

        let mut result = aggregate(self.batch_id, outcomes, mode);
        // Items never recorded still count towards the total
        result.counters.total = result.counters.total.max(self.total);
        result.summary = summarize(&result.counters);
        result.status = status_for(&result.counters);
        result
    }
}

/// Fold a set of final outcomes into a batch result
pub fn aggregate(batch_id: Uuid, outcomes: Vec<ItemOutcome>, mode: AggregationMode) -> BatchResult {
    let mut counters = BatchCounters {
        total: outcomes.len() as u64,
        ..Default::default()
    };
    let mut errors = Vec::new();
    let mut skipped_items = Vec::new();

    for outcome in &outcomes {
        if outcome.is_completed() {
            counters.completed += 1;
        } else if outcome.is_skipped() {
            counters.skipped += 1;
            skipped_items.push(outcome.item_id.clone());
        } else {
            counters.failed += 1;
            errors.extend(item_error(outcome));
        }
    }

    let items = match mode {
        AggregationMode::Detailed => outcomes,
        AggregationMode::Summary => outcomes
            .into_iter()
            .map(|outcome| ItemOutcome {
                context: None,
                ..outcome
            })
            .collect(),
    };

    BatchResult {
        batch_id,
        status: status_for(&counters),
        summary: summarize(&counters),
        counters,
        errors,
        skipped_items,
        items,
    }
}

fn status_for(counters: &BatchCounters) -> BatchResultStatus {
    if counters.completed == counters.total {
        BatchResultStatus::Success
    } else if counters.completed > 0 {
        BatchResultStatus::Partial
    } else {
        BatchResultStatus::Failure
    }
}

fn summarize(counters: &BatchCounters) -> BatchSummary {
    let success_rate = if counters.total == 0 {
        1.0
    } else {
        counters.completed as f64 / counters.total as f64
    };
    BatchSummary {
        total: counters.total,
        completed: counters.completed,
        failed: counters.failed,
        skipped: counters.skipped,
        success_rate,
    }
}

fn item_error(outcome: &ItemOutcome) -> Option<ItemError> {
    if !outcome.is_failed() {
        return None;
    }
    Some(match &outcome.error {
        Some(failure) => ItemError {
            item_id: outcome.item_id.clone(),
            kind: failure.kind,
            message: failure.to_string(),
        },
        None => ItemError {
            item_id: outcome.item_id.clone(),
            kind: crate::orchestration::errors::ErrorKind::Internal,
            message: "item failed without a recorded error".to_string(),
        },
    })
}
