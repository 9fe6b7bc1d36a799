//! # Retry Policy Engine
//!
//! Decides, per failed step attempt, whether the step is retried or the item fails.
//!
//! A step is retried iff the failure is retriable under the step's policy and the
//! attempts made so far are below `max_attempts`, so a step runs at most
//! `max(max_attempts, 1)` times. Every retry waiting out its backoff holds a
//! [`RetryTicket`] against a global, bounded retry queue. When the queue is full the
//! item is failed with [`ErrorKind::RetryQueueSaturated`] instead of waiting.

use crate::config::TaskerBatchConfig;
use crate::models::ProcessingStep;
use crate::orchestration::backoff_calculator::BackoffCalculator;
use crate::orchestration::error_classifier::{AllowListErrorClassifier, ErrorClassifier};
use crate::orchestration::errors::{ErrorKind, FailureRecord, StepError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of a retry decision
#[derive(Debug)]
pub enum RetryDecision {
    /// Wait `delay`, holding the ticket, then attempt again
    Retry { delay: Duration, ticket: RetryTicket },
    /// The item fails with this record
    GiveUp(FailureRecord),
}

/// Slot in the retry queue, released on drop
#[derive(Debug)]
pub struct RetryTicket {
    pending: Arc<AtomicUsize>,
}

impl Drop for RetryTicket {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct RetryPolicyEngine {
    classifier: Arc<dyn ErrorClassifier>,
    backoff: BackoffCalculator,
    capacity: usize,
    pending: Arc<AtomicUsize>,
}

impl std::fmt::Debug for RetryPolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicyEngine")
            .field("classifier", &self.classifier.classifier_name())
            .field("backoff", &self.backoff)
            .field("capacity", &self.capacity)
            .field("pending", &self.pending_retries())
            .finish()
    }
}

impl RetryPolicyEngine {
    pub fn new(config: &TaskerBatchConfig) -> Self {
        Self::with_classifier(config, Arc::new(AllowListErrorClassifier))
    }

    pub fn with_classifier(config: &TaskerBatchConfig, classifier: Arc<dyn ErrorClassifier>) -> Self {
        Self {
            classifier,
            backoff: BackoffCalculator::new(config.backoff.clone()),
            capacity: config.retry_queue.max_size,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Normalize a step error against the step's retry policy
    pub fn classify(&self, error: &StepError, step: &ProcessingStep) -> FailureRecord {
        self.classifier
            .classify(error, &step.retry_policy)
            .into_failure_record(Some(step.step_name().to_string()))
    }

    /// Whether another attempt is allowed after `attempt_count` attempts
    pub fn should_retry(
        &self,
        failure: &FailureRecord,
        step: &ProcessingStep,
        attempt_count: u32,
    ) -> bool {
        failure.retriable && attempt_count < step.retry_policy.max_attempts
    }

    /// Retry with a reserved queue slot, or give up with a terminal record
    pub fn decide(
        &self,
        failure: FailureRecord,
        step: &ProcessingStep,
        attempt_count: u32,
    ) -> RetryDecision {
        if !self.should_retry(&failure, step, attempt_count) {
            debug!(
                step = step.step_name(),
                attempt = attempt_count,
                max_attempts = step.retry_policy.max_attempts,
                kind = %failure.kind,
                "Step failure is terminal"
            );
            return RetryDecision::GiveUp(failure.into_terminal());
        }

        match self.try_reserve() {
            Some(ticket) => RetryDecision::Retry {
                delay: self.backoff.delay_for_attempt(attempt_count),
                ticket,
            },
            None => {
                warn!(
                    step = step.step_name(),
                    capacity = self.capacity,
                    "Retry queue saturated, failing item"
                );
                RetryDecision::GiveUp(FailureRecord::terminal(
                    ErrorKind::RetryQueueSaturated,
                    format!(
                        "{} (retry of: {})",
                        StepError::RetryQueueSaturated {
                            capacity: self.capacity
                        },
                        failure.message
                    ),
                    failure.step,
                ))
            }
        }
    }

    /// Claim a retry queue slot if one is free
    pub fn try_reserve(&self) -> Option<RetryTicket> {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                (pending < self.capacity).then_some(pending + 1)
            })
            .ok()
            .map(|_| RetryTicket {
                pending: self.pending.clone(),
            })
    }

    pub fn pending_retries(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
