//! # Batch Service
//!
//! The exposed surface of the crate: submit batches, poll their status, run single
//! items, and administer runs (cancel, await, resume, delete).
//!
//! `submit_batch` validates and persists the run, then returns its id immediately;
//! execution continues on a background task. While a batch runs, status is served
//! from live counters; once finished it is served from the [`BatchStore`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tasker_batch::config::TaskerBatchConfig;
//! use tasker_batch::models::BatchItem;
//! use tasker_batch::orchestration::BatchService;
//! use tasker_batch::registry::{InMemoryTemplateRegistry, ServiceRegistry};
//! use tasker_batch::store::InMemoryDurableStore;
//!
//! # async fn example() -> tasker_batch::error::Result<()> {
//! let service = BatchService::new(
//!     TaskerBatchConfig::default(),
//!     Arc::new(InMemoryTemplateRegistry::new()),
//!     ServiceRegistry::builder().build(),
//!     Arc::new(InMemoryDurableStore::new()),
//! )?;
//!
//! let batch_id = service
//!     .submit_batch("article_generation", vec![BatchItem::new("item-1")])
//!     .await?;
//! let result = service.await_batch(batch_id).await?;
//! println!("{:?}", result.status);
//! # Ok(())
//! # }
//! ```

use crate::config::TaskerBatchConfig;
use crate::error::{Result, TaskerBatchError};
use crate::logging::log_batch_operation;
use crate::models::{
    AggregationMode, BatchItem, BatchRecord, BatchResult, BatchRun, BatchRunItem,
    BatchStatusReport, Context, ExecutionTemplate, ItemOutcome, StepOutcome,
};
use crate::orchestration::batch_orchestrator::BatchOrchestrator;
use crate::orchestration::errors::{ErrorKind, FailureRecord};
use crate::orchestration::result_aggregator::ResultAggregator;
use crate::orchestration::retry_engine::RetryPolicyEngine;
use crate::orchestration::step_executor::StepExecutor;
use crate::registry::{ServiceRegistry, TemplateRegistry};
use crate::state_machine::{BatchEvent, BatchState, ContextState};
use crate::store::{BatchStore, CheckpointId, ContextStore, DurableStore};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Handle to the batch engine; cheap to clone
#[derive(Clone)]
pub struct BatchService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    templates: Arc<dyn TemplateRegistry>,
    services: ServiceRegistry,
    orchestrator: BatchOrchestrator,
    context_store: Arc<ContextStore>,
    batch_store: BatchStore,
    running: DashMap<Uuid, Arc<RunningBatch>>,
}

struct RunningBatch {
    run: Mutex<BatchRun>,
    mode: AggregationMode,
    cancel: CancellationToken,
    aggregator: Arc<ResultAggregator>,
    result: watch::Sender<Option<BatchResult>>,
}

impl RunningBatch {
    fn status_report(&self) -> BatchStatusReport {
        let run = self.run.lock();
        BatchStatusReport {
            batch_id: run.batch_id,
            template_id: run.template_id.clone(),
            state: run.state,
            result_status: self.result.borrow().as_ref().map(|result| result.status),
            counters: self.aggregator.counters(),
            errors: self.aggregator.errors(),
        }
    }
}

impl std::fmt::Debug for BatchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchService")
            .field("services", &self.inner.services)
            .field("orchestrator", &self.inner.orchestrator)
            .field("running", &self.inner.running.len())
            .finish()
    }
}

impl BatchService {
    /// Assemble the engine from its collaborators
    pub fn new(
        config: TaskerBatchConfig,
        templates: Arc<dyn TemplateRegistry>,
        services: ServiceRegistry,
        store: Arc<dyn DurableStore>,
    ) -> Result<Self> {
        config.validate()?;

        let retry_engine = Arc::new(RetryPolicyEngine::new(&config));
        let executor = Arc::new(StepExecutor::new(
            services.clone(),
            retry_engine.clone(),
            config.execution.default_step_timeout(),
        ));
        let context_store = Arc::new(ContextStore::new(store.clone(), config.retention.clone()));
        let orchestrator = BatchOrchestrator::new(
            executor,
            retry_engine,
            context_store.clone(),
            config.execution.max_in_flight_chunks,
        );

        info!(
            store = store.backend_name(),
            services = ?services.service_names(),
            retry_queue_capacity = config.retry_queue.max_size,
            "Batch service initialized"
        );

        Ok(Self {
            inner: Arc::new(ServiceInner {
                templates,
                services,
                orchestrator,
                context_store,
                batch_store: BatchStore::new(store, config.retention),
                running: DashMap::new(),
            }),
        })
    }

    /// Validate, persist and start a batch; returns as soon as the run is stored
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn submit_batch(&self, template_id: &str, items: Vec<BatchItem>) -> Result<Uuid> {
        let template = self.inner.templates.get_template(template_id).await?;
        self.validate_submission(&template, &items)?;

        let batch_id = Uuid::new_v4();
        let contexts: Vec<Context> = items
            .into_iter()
            .map(|item| Context::new(item.item_id, &template.id, Some(batch_id), item.data))
            .collect();
        let run = BatchRun::with_id(
            batch_id,
            &template.id,
            contexts
                .iter()
                .map(|context| BatchRunItem {
                    item_id: context.item_id.clone(),
                    context_id: context.id,
                })
                .collect(),
        );

        for (saved, context) in contexts.iter().enumerate() {
            if let Err(error) = self.inner.context_store.save_checkpoint(context).await {
                self.discard_contexts(&contexts[..saved]).await;
                return Err(error.into());
            }
        }
        let record = BatchRecord {
            run: run.clone(),
            result: None,
        };
        if let Err(error) = self.inner.batch_store.save(&record).await {
            self.discard_contexts(&contexts).await;
            return Err(error.into());
        }

        log_batch_operation(
            "submit",
            batch_id,
            &template.id,
            "pending",
            Some(&format!("{} items", contexts.len())),
        );
        self.launch(template, run, contexts, Vec::new());
        Ok(batch_id)
    }

    /// Current state and counters of a batch
    pub async fn get_batch_status(&self, batch_id: Uuid) -> Result<BatchStatusReport> {
        if let Some(running) = self.running(batch_id) {
            return Ok(running.status_report());
        }
        self.inner
            .batch_store
            .load(batch_id)
            .await?
            .map(|record| record.status_report())
            .ok_or(TaskerBatchError::BatchNotFound { batch_id })
    }

    /// Run one item through a template outside any batch
    #[instrument(skip(self, item), fields(item_id = %item.item_id))]
    pub async fn process_single(&self, template_id: &str, item: BatchItem) -> Result<ItemOutcome> {
        let template = self.inner.templates.get_template(template_id).await?;
        self.check_services(&template)?;
        template.validate_item(&item)?;

        let context = Context::new(item.item_id, &template.id, None, item.data);
        let deadline = Instant::now() + template.batch_config.timeout();
        let driver = self
            .inner
            .orchestrator
            .item_driver(template, CancellationToken::new(), deadline);
        Ok(driver.drive(context).await)
    }

    /// Stop starting new items and retries; in-flight steps finish first
    pub async fn cancel_batch(&self, batch_id: Uuid) -> Result<()> {
        if let Some(running) = self.running(batch_id) {
            running.cancel.cancel();
            let template_id = running.run.lock().template_id.clone();
            log_batch_operation("cancel", batch_id, &template_id, "cancelling", None);
            return Ok(());
        }
        match self.inner.batch_store.load(batch_id).await? {
            Some(record) => Err(TaskerBatchError::InvalidBatchState {
                batch_id,
                state: record.run.state.to_string(),
                action: "cancelled".to_string(),
            }),
            None => Err(TaskerBatchError::BatchNotFound { batch_id }),
        }
    }

    /// Wait for a batch to finish and return its result
    pub async fn await_batch(&self, batch_id: Uuid) -> Result<BatchResult> {
        if let Some(running) = self.running(batch_id) {
            let mut receiver = running.result.subscribe();
            loop {
                let current = receiver.borrow_and_update().clone();
                if let Some(result) = current {
                    return Ok(result);
                }
                if receiver.changed().await.is_err() {
                    break;
                }
            }
        }

        let record = self
            .inner
            .batch_store
            .load(batch_id)
            .await?
            .ok_or(TaskerBatchError::BatchNotFound { batch_id })?;
        record
            .result
            .ok_or_else(|| TaskerBatchError::InvalidBatchState {
                batch_id,
                state: record.run.state.to_string(),
                action: "awaited".to_string(),
            })
    }

    /// Restart an interrupted batch from its checkpoints
    ///
    /// Items already terminal keep their outcome; every other item continues from
    /// the first step its checkpoint has not committed.
    #[instrument(skip(self))]
    pub async fn resume_batch(&self, batch_id: Uuid) -> Result<()> {
        if self.inner.running.contains_key(&batch_id) {
            return Err(TaskerBatchError::InvalidBatchState {
                batch_id,
                state: BatchState::Processing.to_string(),
                action: "resumed".to_string(),
            });
        }
        let record = self
            .inner
            .batch_store
            .load(batch_id)
            .await?
            .ok_or(TaskerBatchError::BatchNotFound { batch_id })?;
        if record.run.state.is_terminal() {
            return Err(TaskerBatchError::InvalidBatchState {
                batch_id,
                state: record.run.state.to_string(),
                action: "resumed".to_string(),
            });
        }

        let template = self
            .inner
            .templates
            .get_template(&record.run.template_id)
            .await?;
        self.check_services(&template)?;

        let mut pending = Vec::new();
        let mut resolved = Vec::new();
        for item in &record.run.items {
            match self
                .inner
                .context_store
                .load_checkpoint(CheckpointId(item.context_id))
                .await
            {
                Ok(context) if context.status.is_terminal() => {
                    let failure = recovered_failure(&context);
                    resolved.push(ItemOutcome::from_context(context, failure));
                }
                Ok(context) => pending.push(context),
                Err(error) => {
                    warn!(item_id = %item.item_id, error = %error, "Checkpoint unavailable on resume");
                    resolved.push(ItemOutcome {
                        item_id: item.item_id.clone(),
                        context_id: item.context_id,
                        status: ContextState::Failed,
                        error: Some(FailureRecord::terminal(
                            ErrorKind::Storage,
                            error.to_string(),
                            None,
                        )),
                        context: None,
                    });
                }
            }
        }

        log_batch_operation(
            "resume",
            batch_id,
            &template.id,
            &record.run.state.to_string(),
            Some(&format!(
                "{} pending, {} already resolved",
                pending.len(),
                resolved.len()
            )),
        );
        self.launch(template, record.run, pending, resolved);
        Ok(())
    }

    /// Remove a finished batch and its contexts; false if it was not stored
    pub async fn delete_batch(&self, batch_id: Uuid) -> Result<bool> {
        if self.inner.running.contains_key(&batch_id) {
            return Err(TaskerBatchError::InvalidBatchState {
                batch_id,
                state: BatchState::Processing.to_string(),
                action: "deleted".to_string(),
            });
        }
        let Some(record) = self.inner.batch_store.load(batch_id).await? else {
            return Ok(false);
        };
        for item in &record.run.items {
            self.inner.context_store.delete(item.context_id).await?;
        }
        Ok(self.inner.batch_store.delete(batch_id).await?)
    }

    /// Store shared with the running items; `update_field` through it is safe mid-run
    pub fn context_store(&self) -> &Arc<ContextStore> {
        &self.inner.context_store
    }

    /// Ids of the batches executing in this process
    pub fn running_batches(&self) -> Vec<Uuid> {
        self.inner.running.iter().map(|entry| *entry.key()).collect()
    }

    fn running(&self, batch_id: Uuid) -> Option<Arc<RunningBatch>> {
        self.inner
            .running
            .get(&batch_id)
            .map(|entry| entry.value().clone())
    }

    fn validate_submission(&self, template: &ExecutionTemplate, items: &[BatchItem]) -> Result<()> {
        if items.is_empty() {
            return Err(TaskerBatchError::validation(
                "a batch must contain at least one item",
            ));
        }
        self.check_services(template)?;

        let mut seen = HashSet::with_capacity(items.len());
        for item in items {
            template.validate_item(item)?;
            if !seen.insert(item.item_id.as_str()) {
                return Err(TaskerBatchError::validation(format!(
                    "duplicate item_id '{}'",
                    item.item_id
                )));
            }
        }
        Ok(())
    }

    fn check_services(&self, template: &ExecutionTemplate) -> Result<()> {
        match template
            .services()
            .into_iter()
            .find(|service| !self.inner.services.contains(service))
        {
            Some(service) => Err(TaskerBatchError::UnknownService {
                service: service.to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn discard_contexts(&self, contexts: &[Context]) {
        for context in contexts {
            if let Err(error) = self.inner.context_store.delete(context.id).await {
                warn!(context_id = %context.id, error = %error, "Failed to discard context");
            }
        }
    }

    fn launch(
        &self,
        template: Arc<ExecutionTemplate>,
        run: BatchRun,
        pending: Vec<Context>,
        resolved: Vec<ItemOutcome>,
    ) {
        let batch_id = run.batch_id;
        let aggregator = Arc::new(ResultAggregator::new(batch_id, run.items.len()));
        for outcome in resolved {
            aggregator.record(outcome);
        }
        let (result, _) = watch::channel(None);
        let running = Arc::new(RunningBatch {
            run: Mutex::new(run),
            mode: template.batch_config.result_aggregation_mode,
            cancel: CancellationToken::new(),
            aggregator,
            result,
        });
        self.inner.running.insert(batch_id, running.clone());

        let service = self.clone();
        tokio::spawn(async move { service.drive(template, running, pending).await });
    }

    #[instrument(skip_all, fields(template_id = %template.id))]
    async fn drive(
        &self,
        template: Arc<ExecutionTemplate>,
        running: Arc<RunningBatch>,
        pending: Vec<Context>,
    ) {
        let started = {
            let mut run = running.run.lock();
            if let Err(error) = run.transition(BatchEvent::Start) {
                warn!(error = %error, "Invalid batch start transition");
            }
            BatchRecord {
                run: run.clone(),
                result: None,
            }
        };
        let batch_id = started.run.batch_id;
        if let Err(error) = self.inner.batch_store.save(&started).await {
            warn!(batch_id = %batch_id, error = %error, "Failed to persist batch start");
        }
        log_batch_operation("start", batch_id, &template.id, "processing", None);

        self.inner
            .orchestrator
            .execute(
                template.clone(),
                pending,
                running.aggregator.clone(),
                running.cancel.clone(),
            )
            .await;

        let record = {
            let mut run = running.run.lock();
            let result = running.aggregator.finish(running.mode, &run.items);
            run.counters = result.counters;

            let event = if running.cancel.is_cancelled() {
                BatchEvent::Cancel
            } else if result.counters.completed > 0 {
                BatchEvent::Complete
            } else {
                BatchEvent::Fail(format!(
                    "no item completed ({} failed, {} skipped)",
                    result.counters.failed, result.counters.skipped
                ))
            };
            if let Err(error) = run.transition(event) {
                warn!(error = %error, "Invalid batch completion transition");
            }
            BatchRecord {
                run: run.clone(),
                result: Some(result),
            }
        };

        let persisted = match self.inner.batch_store.save(&record).await {
            Ok(()) => true,
            Err(error) => {
                error!(batch_id = %batch_id, error = %error, "Failed to persist batch result");
                false
            }
        };

        let counters = record.run.counters;
        log_batch_operation(
            "finish",
            batch_id,
            &template.id,
            &record.run.state.to_string(),
            Some(&format!(
                "{} completed, {} failed, {} skipped of {}",
                counters.completed, counters.failed, counters.skipped, counters.total
            )),
        );

        // keep serving from memory when the result could not be stored
        if persisted {
            self.inner.running.remove(&batch_id);
        }
        running.result.send_replace(record.result);
    }
}

/// Failure reported for a context that was already terminal before a resume
fn recovered_failure(context: &Context) -> Option<FailureRecord> {
    match context.status {
        ContextState::Failed => Some(
            context
                .history
                .iter()
                .rev()
                .find(|entry| entry.outcome == StepOutcome::Failure)
                .map(|entry| {
                    FailureRecord::terminal(
                        entry.error_kind.unwrap_or(ErrorKind::Internal),
                        entry.message.clone().unwrap_or_default(),
                        Some(entry.step.clone()),
                    )
                })
                .unwrap_or_else(|| {
                    FailureRecord::terminal(
                        ErrorKind::Internal,
                        "failed before any step attempt was recorded",
                        None,
                    )
                }),
        ),
        ContextState::Cancelled => Some(FailureRecord::terminal(
            ErrorKind::Cancelled,
            "cancelled before resume",
            None,
        )),
        _ => None,
    }
}
