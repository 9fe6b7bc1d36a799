//! # Execution Templates
//!
//! Declarative description of a named sequence of processing steps. A template is
//! validated once at registration and shared immutably (`Arc<ExecutionTemplate>`)
//! by every execution that references it.

use crate::error::{Result, TaskerBatchError};
use crate::models::BatchItem;
use crate::orchestration::errors::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// Template: ordered steps plus batch execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTemplate {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<ProcessingStep>,
    #[serde(default)]
    pub batch_config: TemplateBatchConfig,
}

/// How much detail the final batch result carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// Every item outcome, including its final context
    #[default]
    Detailed,
    /// Counters, summary and errors only
    Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateBatchConfig {
    pub chunk_size: usize,
    pub max_parallel: usize,
    /// Deadline for the whole batch
    pub timeout_ms: u64,
    pub result_aggregation_mode: AggregationMode,
}

impl Default for TemplateBatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            max_parallel: 4,
            timeout_ms: 300_000,
            result_aggregation_mode: AggregationMode::Detailed,
        }
    }
}

impl TemplateBatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed; 0 and 1 both mean a single attempt
    pub max_attempts: u32,
    #[serde(default = "ErrorKind::default_retriable")]
    pub retriable_error_kinds: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retriable_error_kinds: ErrorKind::default_retriable(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, retriable_error_kinds: Vec<ErrorKind>) -> Self {
        Self {
            max_attempts,
            retriable_error_kinds,
        }
    }

    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self::new(0, Vec::new())
    }

    pub fn allows(&self, kind: ErrorKind) -> bool {
        self.retriable_error_kinds.contains(&kind)
    }
}

/// One step: an operation on a named service with field mappings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStep {
    /// Identifier used in history; defaults to the operation name
    #[serde(default)]
    pub name: Option<String>,
    pub service: String,
    pub operation: String,
    /// service input name -> context field path
    #[serde(default)]
    pub input_map: BTreeMap<String, String>,
    /// service output name -> context field path
    #[serde(default)]
    pub output_map: BTreeMap<String, String>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Dispatch timeout, falls back to `execution.default_step_timeout_ms`
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ProcessingStep {
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            name: None,
            service: service.into(),
            operation: operation.into(),
            input_map: BTreeMap::new(),
            output_map: BTreeMap::new(),
            retry_policy: RetryPolicy::default(),
            timeout_ms: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_input(mut self, input: impl Into<String>, path: impl Into<String>) -> Self {
        self.input_map.insert(input.into(), path.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>, path: impl Into<String>) -> Self {
        self.output_map.insert(output.into(), path.into());
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn step_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.operation)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    fn validate(&self, index: usize) -> Result<()> {
        if self.service.trim().is_empty() {
            return Err(TaskerBatchError::validation(format!(
                "step {index}: service name must not be empty"
            )));
        }
        if self.operation.trim().is_empty() {
            return Err(TaskerBatchError::validation(format!(
                "step {index}: operation name must not be empty"
            )));
        }
        for (label, map) in [("input_map", &self.input_map), ("output_map", &self.output_map)] {
            for (name, path) in map {
                if name.trim().is_empty() || path.trim().is_empty() {
                    return Err(TaskerBatchError::validation(format!(
                        "step '{}': {label} entries must be non-empty paths (got '{name}' -> '{path}')",
                        self.step_name()
                    )));
                }
            }
        }
        if self.timeout_ms == Some(0) {
            return Err(TaskerBatchError::validation(format!(
                "step '{}': timeout_ms must be greater than zero",
                self.step_name()
            )));
        }
        Ok(())
    }
}

impl ExecutionTemplate {
    pub fn new(id: impl Into<String>, steps: Vec<ProcessingStep>) -> Self {
        Self {
            id: id.into(),
            description: None,
            steps,
            batch_config: TemplateBatchConfig::default(),
        }
    }

    pub fn with_batch_config(mut self, batch_config: TemplateBatchConfig) -> Self {
        self.batch_config = batch_config;
        self
    }

    /// Check structural invariants
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(TaskerBatchError::validation("template id must not be empty"));
        }
        if self.steps.is_empty() {
            return Err(TaskerBatchError::validation(format!(
                "template '{}' must declare at least one step",
                self.id
            )));
        }
        if self.batch_config.chunk_size == 0 {
            return Err(TaskerBatchError::validation(format!(
                "template '{}': chunk_size must be at least 1",
                self.id
            )));
        }
        if self.batch_config.max_parallel == 0 {
            return Err(TaskerBatchError::validation(format!(
                "template '{}': max_parallel must be at least 1",
                self.id
            )));
        }
        if self.batch_config.timeout_ms == 0 {
            return Err(TaskerBatchError::validation(format!(
                "template '{}': timeout_ms must be greater than zero",
                self.id
            )));
        }

        let mut names = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            step.validate(index)?;
            if !names.insert(step.step_name()) {
                return Err(TaskerBatchError::validation(format!(
                    "template '{}': duplicate step name '{}'",
                    self.id,
                    step.step_name()
                )));
            }
        }
        Ok(())
    }

    /// Input paths no earlier step writes; each item must supply them
    pub fn required_item_fields(&self) -> Vec<String> {
        let mut produced: HashSet<&str> = HashSet::new();
        let mut required: Vec<String> = Vec::new();

        for step in &self.steps {
            for path in step.input_map.values() {
                if !produced.contains(path.as_str()) && !required.contains(path) {
                    required.push(path.clone());
                }
            }
            produced.extend(step.output_map.values().map(String::as_str));
        }
        required
    }

    /// Reject items that cannot satisfy the template's inputs
    pub fn validate_item(&self, item: &BatchItem) -> Result<()> {
        if item.item_id.trim().is_empty() {
            return Err(TaskerBatchError::validation("item_id must not be empty"));
        }
        let missing: Vec<String> = self
            .required_item_fields()
            .into_iter()
            .filter(|path| !item.data.contains_key(path))
            .collect();
        if !missing.is_empty() {
            return Err(TaskerBatchError::validation(format!(
                "item '{}' is missing required fields for template '{}': {}",
                item.item_id,
                self.id,
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Names of every service the template dispatches to
    pub fn services(&self) -> Vec<&str> {
        let mut services: Vec<&str> = self.steps.iter().map(|s| s.service.as_str()).collect();
        services.sort_unstable();
        services.dedup();
        services
    }
}
