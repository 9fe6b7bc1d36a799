//! # Batch Orchestrator
//!
//! Drives every item of a batch through its template.
//!
//! ## Execution model
//!
//! ```text
//! contexts ──▶ partition(chunk_size) ──▶ chunks (max_in_flight_chunks at a time)
//!                                          │
//!                                          ▼
//!                             Semaphore(max_parallel) per chunk
//!                                          │
//!                                          ▼
//!                    tokio::spawn(ItemDriver::drive) ──▶ ResultAggregator
//! ```
//!
//! Within an item, steps run strictly in template order and each step sees the
//! outputs committed by the ones before it. A context is checkpointed after every
//! committed step. A failure in one item never affects its siblings: the item's
//! task records its own outcome, and a task that panics is recorded as an
//! `internal` failure by the chunk, so every item resolves exactly once. The
//! panicked item's last checkpoint is settled as `failed` as well.
//!
//! Cancellation and the batch deadline stop new item starts and new retries.
//! In-flight step calls run to completion; the item then stops at the next step
//! boundary.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use serde_json::json;
//! use tasker_batch::config::TaskerBatchConfig;
//! use tasker_batch::models::{BatchItem, BatchResultStatus, ExecutionTemplate, ProcessingStep};
//! use tasker_batch::orchestration::{BatchOrchestrator, RetryPolicyEngine, StepExecutor};
//! use tasker_batch::registry::{InProcessService, ServiceOutputs, ServiceRegistry};
//! use tasker_batch::store::{ContextStore, InMemoryDurableStore};
//!
//! # tokio_test::block_on(async {
//! let config = TaskerBatchConfig::default();
//! let services = ServiceRegistry::builder()
//!     .register(Arc::new(InProcessService::new("counter").with_operation(
//!         "length",
//!         |inputs| async move {
//!             let length = inputs["text"].as_str().map(str::len).unwrap_or_default();
//!             Ok(ServiceOutputs::from([("length".to_string(), json!(length))]))
//!         },
//!     )))
//!     .build();
//! let retry_engine = Arc::new(RetryPolicyEngine::new(&config));
//! let executor = Arc::new(StepExecutor::new(services, retry_engine.clone(), Duration::from_secs(1)));
//! let context_store = Arc::new(ContextStore::new(
//!     Arc::new(InMemoryDurableStore::new()),
//!     config.retention.clone(),
//! ));
//! let orchestrator = BatchOrchestrator::new(executor, retry_engine, context_store, 1);
//!
//! let template = Arc::new(ExecutionTemplate::new(
//!     "measure",
//!     vec![ProcessingStep::new("counter", "length")
//!         .with_input("text", "source.text")
//!         .with_output("length", "stats.length")],
//! ));
//! let result = orchestrator
//!     .run_batch(template, vec![BatchItem::new("a").with_field("source.text", json!("four"))])
//!     .await
//!     .unwrap();
//!
//! assert_eq!(result.status, BatchResultStatus::Success);
//! # });
//! ```

use crate::error::Result;
use crate::logging::log_step_operation;
use crate::models::{
    BatchItem, BatchResult, BatchRunItem, Context, Delta, ExecutionTemplate, ItemOutcome,
    ProcessingStep,
};
use crate::orchestration::chunking::{partition, Chunk};
use crate::orchestration::errors::{ErrorKind, FailureRecord, StepError};
use crate::orchestration::result_aggregator::ResultAggregator;
use crate::orchestration::retry_engine::{RetryDecision, RetryPolicyEngine};
use crate::orchestration::step_executor::StepExecutor;
use crate::state_machine::{ContextEvent, ContextState};
use crate::store::{CheckpointId, ContextStore, StorageError};
use futures::stream::{self, FuturesUnordered, StreamExt};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub struct BatchOrchestrator {
    executor: Arc<StepExecutor>,
    retry_engine: Arc<RetryPolicyEngine>,
    context_store: Arc<ContextStore>,
    max_in_flight_chunks: NonZeroUsize,
}

impl std::fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("executor", &self.executor)
            .field("retry_engine", &self.retry_engine)
            .field("max_in_flight_chunks", &self.max_in_flight_chunks)
            .finish()
    }
}

impl BatchOrchestrator {
    pub fn new(
        executor: Arc<StepExecutor>,
        retry_engine: Arc<RetryPolicyEngine>,
        context_store: Arc<ContextStore>,
        max_in_flight_chunks: usize,
    ) -> Self {
        Self {
            executor,
            retry_engine,
            context_store,
            max_in_flight_chunks: NonZeroUsize::new(max_in_flight_chunks)
                .unwrap_or(NonZeroUsize::MIN),
        }
    }

    pub fn context_store(&self) -> &Arc<ContextStore> {
        &self.context_store
    }

    pub fn retry_engine(&self) -> &Arc<RetryPolicyEngine> {
        &self.retry_engine
    }

    /// Driver for items of one template sharing a cancellation scope and deadline
    pub fn item_driver(
        &self,
        template: Arc<ExecutionTemplate>,
        cancel: CancellationToken,
        deadline: Instant,
    ) -> ItemDriver {
        ItemDriver {
            template,
            executor: self.executor.clone(),
            retry_engine: self.retry_engine.clone(),
            context_store: self.context_store.clone(),
            cancel,
            deadline,
        }
    }

    /// Run fresh items to completion and aggregate their outcomes
    pub async fn run_batch(
        &self,
        template: Arc<ExecutionTemplate>,
        items: Vec<BatchItem>,
    ) -> Result<BatchResult> {
        template.validate()?;
        for item in &items {
            template.validate_item(item)?;
        }

        let batch_id = Uuid::new_v4();
        let contexts: Vec<Context> = items
            .into_iter()
            .map(|item| Context::new(item.item_id, &template.id, Some(batch_id), item.data))
            .collect();
        let order: Vec<BatchRunItem> = contexts
            .iter()
            .map(|context| BatchRunItem {
                item_id: context.item_id.clone(),
                context_id: context.id,
            })
            .collect();

        let aggregator = Arc::new(ResultAggregator::new(batch_id, contexts.len()));
        self.execute(
            template.clone(),
            contexts,
            aggregator.clone(),
            CancellationToken::new(),
        )
        .await;

        Ok(aggregator.finish(template.batch_config.result_aggregation_mode, &order))
    }

    /// Drive `contexts` to terminal states, recording each outcome in `aggregator`
    ///
    /// The batch deadline is measured from the call.
    #[instrument(skip_all, fields(
        batch_id = %aggregator.batch_id(),
        template_id = %template.id,
        items = contexts.len()
    ))]
    pub async fn execute(
        &self,
        template: Arc<ExecutionTemplate>,
        contexts: Vec<Context>,
        aggregator: Arc<ResultAggregator>,
        cancel: CancellationToken,
    ) {
        let deadline = Instant::now() + template.batch_config.timeout();
        let chunk_size =
            NonZeroUsize::new(template.batch_config.chunk_size).unwrap_or(NonZeroUsize::MIN);
        let max_parallel = template.batch_config.max_parallel.max(1);

        let driver = self.item_driver(template, cancel, deadline);
        let chunks = partition(contexts, chunk_size);
        info!(
            chunks = chunks.len(),
            chunk_size = chunk_size.get(),
            max_parallel,
            "Dispatching batch"
        );

        stream::iter(chunks)
            .map(|chunk| run_chunk(driver.clone(), chunk, aggregator.clone(), max_parallel))
            .buffer_unordered(self.max_in_flight_chunks.get())
            .collect::<Vec<()>>()
            .await;

        let counters = aggregator.counters();
        info!(
            completed = counters.completed,
            failed = counters.failed,
            skipped = counters.skipped,
            "Batch execution finished"
        );
    }
}

enum Slot {
    Ready(OwnedSemaphorePermit),
    Cancelled,
    Expired,
}

async fn run_chunk(
    driver: ItemDriver,
    chunk: Chunk<Context>,
    aggregator: Arc<ResultAggregator>,
    max_parallel: usize,
) {
    debug!(chunk_index = chunk.index, size = chunk.len(), "Chunk started");
    let semaphore = Arc::new(Semaphore::new(max_parallel));
    let mut in_flight = FuturesUnordered::new();

    for mut context in chunk.items {
        driver.enqueue(&mut context);

        let slot = if driver.cancel.is_cancelled() {
            Slot::Cancelled
        } else if driver.deadline_passed() {
            Slot::Expired
        } else {
            tokio::select! {
                biased;
                _ = driver.cancel.cancelled() => Slot::Cancelled,
                _ = tokio::time::sleep_until(driver.deadline) => Slot::Expired,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => Slot::Ready(permit),
                    // never closed
                    Err(_) => Slot::Cancelled,
                },
            }
        };

        match slot {
            Slot::Ready(permit) => {
                let item_driver = driver.clone();
                let recorder = aggregator.clone();
                let item_id = context.item_id.clone();
                let context_id = context.id;

                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    recorder.record(item_driver.drive(context).await);
                });
                in_flight.push(async move { (item_id, context_id, handle.await) });
            }
            Slot::Cancelled => {
                aggregator.record(driver.skip(context).await);
            }
            Slot::Expired => {
                aggregator.record(driver.fail(context, deadline_failure(None)).await);
            }
        }
    }

    while let Some((item_id, context_id, joined)) = in_flight.next().await {
        if let Err(join_error) = joined {
            error!(
                item_id = %item_id,
                context_id = %context_id,
                error = %join_error,
                "Item task aborted"
            );
            let failure = FailureRecord::terminal(
                ErrorKind::Internal,
                StepError::Internal(join_error.to_string()).to_string(),
                None,
            );
            let context = driver.settle_aborted(context_id, &failure).await;
            aggregator.record(ItemOutcome {
                item_id,
                context_id,
                status: ContextState::Failed,
                error: Some(failure),
                context,
            });
        }
    }
    debug!(chunk_index = chunk.index, "Chunk finished");
}

/// Runs single items through a template
#[derive(Clone)]
pub struct ItemDriver {
    template: Arc<ExecutionTemplate>,
    executor: Arc<StepExecutor>,
    retry_engine: Arc<RetryPolicyEngine>,
    context_store: Arc<ContextStore>,
    cancel: CancellationToken,
    deadline: Instant,
}

impl ItemDriver {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn deadline_passed(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn enqueue(&self, context: &mut Context) {
        if context.status == ContextState::Created {
            if let Err(error) = context.transition(ContextEvent::Enqueue) {
                warn!(item_id = %context.item_id, error = %error, "Failed to enqueue context");
            }
        }
    }

    /// Run the remaining steps of `context` and return its final outcome
    #[instrument(skip_all, fields(item_id = %context.item_id, context_id = %context.id))]
    pub async fn drive(&self, mut context: Context) -> ItemOutcome {
        self.enqueue(&mut context);
        let event = if context.status == ContextState::Processing {
            ContextEvent::Resume
        } else {
            ContextEvent::Start
        };
        if let Err(error) = context.transition(event) {
            warn!(status = %context.status, error = %error, "Context already resolved");
            return ItemOutcome::from_context(context, None);
        }

        if let Err(error) = self.context_store.commit(&mut context, &Delta::new()).await {
            return self.fail(context, storage_failure(error, None)).await;
        }

        let template = self.template.clone();
        while let Some(step) = template.steps.get(context.next_step) {
            if self.cancel.is_cancelled() {
                return self.skip(context).await;
            }
            if self.deadline_passed() {
                return self.fail(context, deadline_failure(Some(step))).await;
            }

            let delta = match self.run_step(&mut context, step).await {
                Ok(delta) => delta,
                Err(failure) => return self.fail(context, failure).await,
            };

            context.next_step += 1;
            if let Err(error) = self.context_store.commit(&mut context, &delta).await {
                return self
                    .fail(context, storage_failure(error, Some(step.step_name())))
                    .await;
            }
        }

        if let Err(error) = context.transition(ContextEvent::Complete) {
            let failure =
                FailureRecord::terminal(ErrorKind::Internal, error.to_string(), None);
            return self.fail(context, failure).await;
        }
        if let Err(error) = self.context_store.finalize(&mut context).await {
            // every step is already checkpointed; only the retention TTL is lost
            warn!(error = %error, "Failed to finalize completed context");
        }
        debug!(steps = template.steps.len(), "Item completed");
        ItemOutcome::from_context(context, None)
    }

    /// One step with its retry loop; attempts already in the history count
    async fn run_step(
        &self,
        context: &mut Context,
        step: &ProcessingStep,
    ) -> std::result::Result<Delta, FailureRecord> {
        let mut attempt = context.attempts_for(step.step_name());
        loop {
            attempt += 1;
            let failure = match self
                .executor
                .execute_step(context, step, attempt, Some(self.deadline))
                .await
            {
                Ok(delta) => return Ok(delta),
                Err(failure) => failure,
            };

            match self.retry_engine.decide(failure, step, attempt) {
                RetryDecision::GiveUp(record) => {
                    log_step_operation(
                        "step_failed",
                        &context.item_id,
                        step.step_name(),
                        attempt,
                        "failed",
                        Some(&record.to_string()),
                    );
                    return Err(record);
                }
                RetryDecision::Retry { delay, ticket } => {
                    log_step_operation(
                        "step_retry",
                        &context.item_id,
                        step.step_name(),
                        attempt,
                        "retrying",
                        Some(&format!("backoff {}ms", delay.as_millis())),
                    );
                    let interrupted = tokio::select! {
                        _ = self.cancel.cancelled() => Some(cancelled_failure(step)),
                        _ = tokio::time::sleep_until(self.deadline) => Some(deadline_failure(Some(step))),
                        _ = tokio::time::sleep(delay) => None,
                    };
                    drop(ticket);
                    if let Some(failure) = interrupted {
                        return Err(failure);
                    }
                }
            }
        }
    }

    /// Resolve an item as failed
    pub async fn fail(&self, mut context: Context, failure: FailureRecord) -> ItemOutcome {
        if let Err(error) = context.transition(ContextEvent::Fail(failure.to_string())) {
            warn!(item_id = %context.item_id, error = %error, "Invalid failure transition");
        }
        warn!(
            item_id = %context.item_id,
            kind = %failure.kind,
            error = %failure.message,
            "Item failed"
        );
        self.finalize_quietly(&mut context).await;
        ItemOutcome::from_context(context, Some(failure))
    }

    /// Resolve an item as skipped by cancellation
    pub async fn skip(&self, mut context: Context) -> ItemOutcome {
        if let Err(error) = context.transition(ContextEvent::Cancel) {
            warn!(item_id = %context.item_id, error = %error, "Invalid cancel transition");
        }
        debug!(item_id = %context.item_id, next_step = context.next_step, "Item skipped");
        self.finalize_quietly(&mut context).await;
        let failure = FailureRecord::terminal(
            ErrorKind::Cancelled,
            StepError::Cancelled("item not run to completion".to_string()).to_string(),
            self.template
                .steps
                .get(context.next_step)
                .map(|step| step.step_name().to_string()),
        );
        ItemOutcome::from_context(context, Some(failure))
    }

    /// Settle the stored record of an item whose task died mid-run
    ///
    /// The last checkpoint is moved to `failed` and given the failed-retention TTL.
    async fn settle_aborted(
        &self,
        context_id: Uuid,
        failure: &FailureRecord,
    ) -> Option<Context> {
        let mut context = match self
            .context_store
            .load_checkpoint(CheckpointId(context_id))
            .await
        {
            Ok(context) => context,
            Err(error) => {
                warn!(context_id = %context_id, error = %error, "No checkpoint for aborted item");
                self.context_store.release(context_id);
                return None;
            }
        };
        if !context.status.is_terminal() {
            if let Err(error) = context.transition(ContextEvent::Fail(failure.to_string())) {
                warn!(context_id = %context_id, error = %error, "Invalid failure transition");
            }
        }
        self.finalize_quietly(&mut context).await;
        Some(context)
    }

    async fn finalize_quietly(&self, context: &mut Context) {
        if let Err(error) = self.context_store.finalize(context).await {
            warn!(item_id = %context.item_id, error = %error, "Failed to persist terminal context");
        }
    }
}

fn storage_failure(error: StorageError, step: Option<&str>) -> FailureRecord {
    FailureRecord::terminal(
        ErrorKind::Storage,
        StepError::Storage(error.to_string()).to_string(),
        step.map(str::to_string),
    )
}

fn deadline_failure(step: Option<&ProcessingStep>) -> FailureRecord {
    FailureRecord::terminal(
        ErrorKind::Timeout,
        StepError::BatchTimeout.to_string(),
        step.map(|step| step.step_name().to_string()),
    )
}

fn cancelled_failure(step: &ProcessingStep) -> FailureRecord {
    FailureRecord::terminal(
        ErrorKind::Cancelled,
        StepError::Cancelled("retry suppressed".to_string()).to_string(),
        Some(step.step_name().to_string()),
    )
}
