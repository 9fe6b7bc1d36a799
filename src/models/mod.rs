//! # Models
//!
//! Data definitions shared by the store, registry and orchestration layers.

pub mod batch;
pub mod context;
pub mod template;

pub use batch::{
    BatchCounters, BatchItem, BatchRecord, BatchResult, BatchResultStatus, BatchRun,
    BatchRunItem, BatchStatusReport, BatchSummary, ItemError, ItemOutcome,
};
pub use context::{Context, ContextData, Delta, FieldChange, HistoryEntry, StepOutcome};
pub use template::{
    AggregationMode, ExecutionTemplate, ProcessingStep, RetryPolicy, TemplateBatchConfig,
};
