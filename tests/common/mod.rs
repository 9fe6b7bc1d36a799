//! Shared fixtures for integration tests
//!
//! Provides a scripted service adapter whose behavior is configured per item key,
//! a durable store that can be told to fail, and builders for the standard
//! extract -> generate template.

#![allow(dead_code)]

pub mod strategies;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tasker_batch::config::{BackoffConfig, TaskerBatchConfig};
use tasker_batch::models::{
    AggregationMode, BatchItem, ExecutionTemplate, ProcessingStep, RetryPolicy,
    TemplateBatchConfig,
};
use tasker_batch::orchestration::{BatchService, ErrorKind};
use tasker_batch::registry::{
    InMemoryTemplateRegistry, ServiceAdapter, ServiceError, ServiceInputs, ServiceOutputs,
    ServiceRegistry,
};
use tasker_batch::store::{DurableStore, InMemoryDurableStore, StorageError, StorageResult};

/// How a scripted service responds for one item key
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    /// Fail the first `times` calls, then succeed
    FailTimes { times: usize, error: ServiceError },
    AlwaysFail(ServiceError),
    /// Stall past any reasonable timeout on the first `times` calls
    HangTimes(usize),
    Hang,
    /// Succeed without any outputs
    OmitOutputs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub operation: String,
    pub key: String,
    pub inputs: ServiceInputs,
}

/// Service adapter that follows a per-key script and records every call
pub struct ScriptedService {
    name: String,
    behaviors: HashMap<String, Behavior>,
    delay: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviors: HashMap::new(),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_behavior(mut self, key: impl Into<String>, behavior: Behavior) -> Self {
        self.behaviors.insert(key.into(), behavior);
        self
    }

    /// Delay every call, simulating a slow dependency
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, key: &str) -> usize {
        self.calls.lock().iter().filter(|call| call.key == key).count()
    }

    fn succeed(&self, operation: &str, key: &str, inputs: &ServiceInputs) -> ServiceOutputs {
        let upstream: Vec<&str> = inputs
            .iter()
            .filter(|(name, _)| name.as_str() != "key")
            .filter_map(|(_, value)| value.as_str())
            .collect();
        ServiceOutputs::from([(
            "result".to_string(),
            json!(format!("{operation}[{key}]<-{}", upstream.join("|"))),
        )])
    }
}

#[async_trait]
impl ServiceAdapter for ScriptedService {
    fn service_name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        operation: &str,
        inputs: ServiceInputs,
        _timeout: Duration,
    ) -> Result<ServiceOutputs, ServiceError> {
        let key = inputs
            .get("key")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let call_number = {
            let mut calls = self.calls.lock();
            calls.push(RecordedCall {
                operation: operation.to_string(),
                key: key.clone(),
                inputs: inputs.clone(),
            });
            calls.iter().filter(|call| call.key == key).count()
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.behaviors.get(&key).cloned().unwrap_or(Behavior::Succeed) {
            Behavior::Succeed => Ok(self.succeed(operation, &key, &inputs)),
            Behavior::FailTimes { times, error } if call_number <= times => Err(error),
            Behavior::FailTimes { .. } => Ok(self.succeed(operation, &key, &inputs)),
            Behavior::AlwaysFail(error) => Err(error),
            Behavior::HangTimes(times) if call_number <= times => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok(self.succeed(operation, &key, &inputs))
            }
            Behavior::HangTimes(_) => Ok(self.succeed(operation, &key, &inputs)),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok(self.succeed(operation, &key, &inputs))
            }
            Behavior::OmitOutputs => Ok(ServiceOutputs::new()),
        }
    }
}

/// In-memory store whose context writes start failing after a number of successes
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: InMemoryDurableStore,
    context_writes_allowed: AtomicUsize,
}

impl FailingStore {
    pub fn failing_context_writes_after(allowed: usize) -> Self {
        Self {
            inner: InMemoryDurableStore::new(),
            context_writes_allowed: AtomicUsize::new(allowed),
        }
    }

    fn admit(&self, key: &str) -> StorageResult<()> {
        if !key.starts_with("context:") {
            return Ok(());
        }
        self.context_writes_allowed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .map(|_| ())
            .map_err(|_| StorageError::Backend("simulated write failure".to_string()))
    }
}

#[async_trait]
impl DurableStore for FailingStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Value) -> StorageResult<()> {
        self.admit(key)?;
        self.inner.put(key, value).await
    }

    async fn put_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> StorageResult<()> {
        self.admit(key)?;
        self.inner.put_with_ttl(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.inner.delete(key).await
    }

    fn backend_name(&self) -> &'static str {
        "failing-memory"
    }
}

/// Configuration with millisecond backoff and no jitter
pub fn fast_config() -> TaskerBatchConfig {
    TaskerBatchConfig {
        backoff: BackoffConfig {
            base_delay_ms: 1,
            max_delay_ms: 10,
            multiplier: 2.0,
            jitter_enabled: false,
            max_jitter: 0.0,
        },
        ..Default::default()
    }
}

/// extract (extractor) -> generate (writer); generate reads what extract wrote
pub fn article_template(
    chunk_size: usize,
    max_parallel: usize,
    max_attempts: u32,
) -> ExecutionTemplate {
    let policy = RetryPolicy::new(max_attempts, ErrorKind::default_retriable());
    ExecutionTemplate::new(
        "article_generation",
        vec![
            ProcessingStep::new("extractor", "extract")
                .named("extract")
                .with_input("key", "source.key")
                .with_input("topic", "source.topic")
                .with_output("result", "facts.summary")
                .with_retry_policy(policy.clone())
                .with_timeout(Duration::from_millis(100)),
            ProcessingStep::new("writer", "generate")
                .named("generate")
                .with_input("key", "source.key")
                .with_input("facts", "facts.summary")
                .with_output("result", "content.article")
                .with_retry_policy(policy)
                .with_timeout(Duration::from_millis(100)),
        ],
    )
    .with_batch_config(TemplateBatchConfig {
        chunk_size,
        max_parallel,
        timeout_ms: 10_000,
        result_aggregation_mode: AggregationMode::Detailed,
    })
}

/// Single-step template against the extractor
pub fn extract_only_template(batch_config: TemplateBatchConfig) -> ExecutionTemplate {
    ExecutionTemplate::new(
        "extract_only",
        vec![ProcessingStep::new("extractor", "extract")
            .named("extract")
            .with_input("key", "source.key")
            .with_output("result", "facts.summary")],
    )
    .with_batch_config(batch_config)
}

pub fn item(key: &str) -> BatchItem {
    BatchItem::new(key)
        .with_field("source.key", json!(key))
        .with_field("source.topic", json!(format!("topic of {key}")))
}

pub fn items(keys: &[&str]) -> Vec<BatchItem> {
    keys.iter().map(|key| item(key)).collect()
}

pub struct Harness {
    pub service: BatchService,
    pub templates: Arc<InMemoryTemplateRegistry>,
    pub extractor: Arc<ScriptedService>,
    pub writer: Arc<ScriptedService>,
}

impl Harness {
    pub fn new(extractor: ScriptedService, writer: ScriptedService) -> Self {
        Self::with_store(
            fast_config(),
            extractor,
            writer,
            Arc::new(InMemoryDurableStore::new()),
        )
    }

    pub fn with_store(
        config: TaskerBatchConfig,
        extractor: ScriptedService,
        writer: ScriptedService,
        store: Arc<dyn DurableStore>,
    ) -> Self {
        let extractor = Arc::new(extractor);
        let writer = Arc::new(writer);
        let services = ServiceRegistry::builder()
            .register(extractor.clone())
            .register(writer.clone())
            .build();
        let templates = Arc::new(InMemoryTemplateRegistry::new());
        let service = BatchService::new(config, templates.clone(), services, store)
            .expect("valid configuration");

        Self {
            service,
            templates,
            extractor,
            writer,
        }
    }

    pub fn register(&self, template: ExecutionTemplate) {
        self.templates
            .register(template)
            .expect("template registers");
    }
}
