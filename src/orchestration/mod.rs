//! # Orchestration Engine
//!
//! Executes batches of items through [`ExecutionTemplate`](crate::models::ExecutionTemplate)s.
//!
//! ## Core Components
//!
//! - **StepExecutor**: one step attempt against one context (input resolution, dispatch,
//!   output commit, history)
//! - **RetryPolicyEngine**: per-step retry decisions, backoff and the bounded retry queue
//! - **ErrorClassifier**: maps step errors to retriable or terminal failures
//! - **BatchOrchestrator**: chunking, bounded parallelism, cancellation and deadline
//! - **ResultAggregator**: exactly-once accounting of item outcomes into a batch result
//! - **BatchService**: the exposed submit / status / single-item surface
//!
//! ## Data flow
//!
//! ```text
//! submit_batch ──▶ BatchRun + Contexts persisted ──▶ BatchOrchestrator
//!                                                      │ chunks
//!                                                      ▼
//!                                         ItemDriver ──▶ StepExecutor ──▶ ServiceAdapter
//!                                              │  ▲          │
//!                                              │  └─ RetryPolicyEngine (backoff)
//!                                              ▼
//!                                      ResultAggregator ──▶ BatchResult
//! ```

pub mod backoff_calculator;
pub mod batch_orchestrator;
pub mod batch_service;
pub mod chunking;
pub mod error_classifier;
pub mod errors;
pub mod result_aggregator;
pub mod retry_engine;
pub mod step_executor;

pub use backoff_calculator::BackoffCalculator;
pub use batch_orchestrator::{BatchOrchestrator, ItemDriver};
pub use batch_service::BatchService;
pub use chunking::{chunk, Chunk};
pub use error_classifier::{
    AllowListErrorClassifier, Disposition, ErrorClassification, ErrorClassifier,
};
pub use errors::{ErrorKind, FailureRecord, StepError};
pub use result_aggregator::{aggregate, ResultAggregator};
pub use retry_engine::{RetryDecision, RetryPolicyEngine, RetryTicket};
pub use step_executor::StepExecutor;
