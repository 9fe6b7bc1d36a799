//! # Step Executor
//!
//! Runs one [`ProcessingStep`] attempt against one [`Context`].
//!
//! ## Attempt lifecycle
//!
//! 1. Resolve every `input_map` path against the context (`MissingField` if absent)
//! 2. Resolve the service adapter from the [`ServiceRegistry`] (`UnknownService`)
//! 3. Dispatch under the effective timeout: the step timeout, bounded by what is
//!    left of the batch deadline
//! 4. Stage every `output_map` value; a missing declared output (`ServiceContract`)
//!    fails the attempt before anything is written
//! 5. Commit the staged writes and append a history entry with the resulting delta
//!
//! Failed attempts write nothing to the context data but still append a history
//! entry, so the history holds one entry per attempt.

use crate::models::{Context, ContextData, Delta, HistoryEntry, ProcessingStep, StepOutcome};
use crate::orchestration::errors::{FailureRecord, StepError};
use crate::orchestration::retry_engine::RetryPolicyEngine;
use crate::registry::{ServiceInputs, ServiceRegistry};
use crate::store::ContextStore;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};

pub struct StepExecutor {
    services: ServiceRegistry,
    retry_engine: Arc<RetryPolicyEngine>,
    default_step_timeout: Duration,
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("services", &self.services)
            .field("default_step_timeout", &self.default_step_timeout)
            .finish()
    }
}

impl StepExecutor {
    pub fn new(
        services: ServiceRegistry,
        retry_engine: Arc<RetryPolicyEngine>,
        default_step_timeout: Duration,
    ) -> Self {
        Self {
            services,
            retry_engine,
            default_step_timeout,
        }
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Execute a single attempt of `step`, committing its outputs on success
    ///
    /// The returned [`FailureRecord`] is already classified against the step's retry
    /// policy; the caller decides whether to retry.
    #[instrument(skip(self, context, step, deadline), fields(
        item_id = %context.item_id,
        step = step.step_name()
    ))]
    pub async fn execute_step(
        &self,
        context: &mut Context,
        step: &ProcessingStep,
        attempt: u32,
        deadline: Option<Instant>,
    ) -> Result<Delta, FailureRecord> {
        let started_at = Utc::now();
        let started = Instant::now();

        let result = self.dispatch(context, step, deadline).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(writes) => {
                let before = context.data.clone();
                for (path, value) in writes {
                    context.set(path, value);
                }
                let delta = ContextStore::diff(&before, &context.data);

                context.record(HistoryEntry {
                    step: step.step_name().to_string(),
                    service: step.service.clone(),
                    operation: step.operation.clone(),
                    attempt,
                    started_at,
                    duration_ms,
                    outcome: StepOutcome::Success,
                    error_kind: None,
                    message: None,
                    delta: delta.clone(),
                });
                debug!(duration_ms, changed = delta.len(), "Step committed");
                Ok(delta)
            }
            Err(error) => {
                let failure = self.retry_engine.classify(&error, step);
                context.record(HistoryEntry {
                    step: step.step_name().to_string(),
                    service: step.service.clone(),
                    operation: step.operation.clone(),
                    attempt,
                    started_at,
                    duration_ms,
                    outcome: StepOutcome::Failure,
                    error_kind: Some(failure.kind),
                    message: Some(failure.message.clone()),
                    delta: Delta::new(),
                });
                debug!(
                    duration_ms,
                    kind = %failure.kind,
                    retriable = failure.retriable,
                    "Step attempt failed"
                );
                Err(failure)
            }
        }
    }

    /// Everything up to, but not including, the commit
    async fn dispatch(
        &self,
        context: &Context,
        step: &ProcessingStep,
        deadline: Option<Instant>,
    ) -> Result<Vec<(String, Value)>, StepError> {
        let inputs = resolve_inputs(&context.data, step)?;

        let adapter = self
            .services
            .resolve(&step.service)
            .ok_or_else(|| StepError::UnknownService {
                service: step.service.clone(),
            })?;

        let step_timeout = step.timeout().unwrap_or(self.default_step_timeout);
        let (timeout, bounded_by_deadline) = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(StepError::BatchTimeout);
                }
                (step_timeout.min(remaining), remaining < step_timeout)
            }
            None => (step_timeout, false),
        };

        let outputs = match tokio::time::timeout(
            timeout,
            adapter.invoke(&step.operation, inputs, timeout),
        )
        .await
        {
            Ok(Ok(outputs)) => outputs,
            Ok(Err(error)) => {
                return Err(StepError::from_service(&step.service, &step.operation, error))
            }
            Err(_) if bounded_by_deadline => return Err(StepError::BatchTimeout),
            Err(_) => {
                return Err(StepError::ServiceTimeout {
                    service: step.service.clone(),
                    operation: step.operation.clone(),
                    timeout,
                })
            }
        };

        step.output_map
            .iter()
            .map(|(output, path)| {
                outputs
                    .get(output)
                    .cloned()
                    .map(|value| (path.clone(), value))
                    .ok_or_else(|| StepError::ServiceContract {
                        service: step.service.clone(),
                        operation: step.operation.clone(),
                        output: output.clone(),
                    })
            })
            .collect()
    }
}

fn resolve_inputs(data: &ContextData, step: &ProcessingStep) -> Result<ServiceInputs, StepError> {
    step.input_map
        .iter()
        .map(|(input, path)| {
            data.get(path)
                .cloned()
                .map(|value| (input.clone(), value))
                .ok_or_else(|| StepError::MissingField {
                    input: input.clone(),
                    path: path.clone(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskerBatchConfig;
    use crate::orchestration::errors::ErrorKind;
    use crate::registry::{InProcessService, ServiceError, ServiceOutputs};
    use serde_json::json;

    fn executor() -> StepExecutor {
        let upper = InProcessService::new("text")
            .with_operation("upper", |inputs| async move {
                let text = inputs
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_uppercase();
                Ok(ServiceOutputs::from([("result".to_string(), json!(text))]))
            })
            .with_operation("silent", |_| async move { Ok(ServiceOutputs::new()) })
            .with_operation("down", |_| async move {
                Err(ServiceError::Unavailable("maintenance".into()))
            })
            .with_operation("slow", |_| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(ServiceOutputs::new())
            });

        let services = ServiceRegistry::builder().register(Arc::new(upper)).build();
        let engine = Arc::new(RetryPolicyEngine::new(&TaskerBatchConfig::default()));
        StepExecutor::new(services, engine, Duration::from_secs(5))
    }

    fn context() -> Context {
        let data = ContextData::from([("source.text".to_string(), json!("hello"))]);
        Context::new("item-1", "tmpl", None, data)
    }

    fn upper_step(operation: &str) -> ProcessingStep {
        ProcessingStep::new("text", operation)
            .named("shout")
            .with_input("text", "source.text")
            .with_output("result", "content.shout")
    }

    #[tokio::test]
    async fn test_successful_step_commits_outputs_and_history() {
        let executor = executor();
        let mut context = context();

        let delta = executor
            .execute_step(&mut context, &upper_step("upper"), 1, None)
            .await
            .unwrap();

        assert_eq!(context.get("content.shout"), Some(&json!("HELLO")));
        assert_eq!(delta["content.shout"].old, Value::Null);
        assert_eq!(delta["content.shout"].new, json!("HELLO"));

        let entry = context.last_entry().unwrap();
        assert_eq!(entry.outcome, StepOutcome::Success);
        assert_eq!(entry.attempt, 1);
        assert_eq!(entry.step, "shout");
    }

    #[tokio::test]
    async fn test_missing_input_fails_without_dispatch() {
        let executor = executor();
        let mut context = Context::new("item-2", "tmpl", None, ContextData::new());

        let failure = executor
            .execute_step(&mut context, &upper_step("upper"), 1, None)
            .await
            .unwrap_err();

        assert_eq!(failure.kind, ErrorKind::MissingField);
        assert!(!failure.retriable);
        assert_eq!(context.history.len(), 1);
        assert!(context.data.is_empty());
    }

    #[tokio::test]
    async fn test_missing_declared_output_writes_nothing() {
        let executor = executor();
        let mut context = context();
        let before = context.data.clone();

        let failure = executor
            .execute_step(&mut context, &upper_step("silent"), 1, None)
            .await
            .unwrap_err();

        assert_eq!(failure.kind, ErrorKind::ServiceContract);
        assert_eq!(context.data, before);
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let executor = executor();
        let mut context = context();
        let step = ProcessingStep::new("translator", "translate");

        let failure = executor
            .execute_step(&mut context, &step, 1, None)
            .await
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::UnknownService);
    }

    #[tokio::test]
    async fn test_unavailable_service_is_retriable_by_default() {
        let executor = executor();
        let mut context = context();

        let failure = executor
            .execute_step(&mut context, &upper_step("down"), 1, None)
            .await
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::ServiceUnavailable);
        assert!(failure.retriable);
        assert_eq!(failure.step.as_deref(), Some("shout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout_maps_to_service_timeout() {
        let executor = executor();
        let mut context = context();
        let step = upper_step("slow").with_timeout(Duration::from_millis(50));

        let failure = executor
            .execute_step(&mut context, &step, 1, None)
            .await
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::ServiceTimeout);
        assert!(failure.retriable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_deadline_bounds_step_timeout() {
        let executor = executor();
        let mut context = context();
        let step = upper_step("slow").with_timeout(Duration::from_secs(30));
        let deadline = Instant::now() + Duration::from_millis(20);

        let failure = executor
            .execute_step(&mut context, &step, 1, Some(deadline))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Timeout);
        assert!(!failure.retriable);
    }
}
