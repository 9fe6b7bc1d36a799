#![allow(clippy::doc_markdown)] // Allow technical terms in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tasker Batch
//!
//! Template-driven batch orchestration core.
//!
//! ## Overview
//!
//! A caller submits a batch of items against an [`ExecutionTemplate`]: an ordered list
//! of processing steps, each dispatching one operation on a named external service.
//! Every item gets its own [`Context`] that accumulates the outputs of completed steps,
//! so later steps read what earlier steps wrote. Items are split into chunks, run
//! with bounded parallelism, retried per step according to each step's retry policy,
//! and folded into a [`BatchResult`] with partial-failure semantics: one item failing
//! never fails its siblings.
//!
//! ## Module Organization
//!
//! - [`models`] - templates, contexts, batch runs and results
//! - [`store`] - durable key-value storage and context checkpointing
//! - [`registry`] - service adapters and published templates
//! - [`orchestration`] - step execution, retry policy, chunking, aggregation
//! - [`state_machine`] - context and batch lifecycle transitions
//! - [`config`] - layered configuration
//! - [`error`] - API errors
//! - [`logging`] - structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use tasker_batch::config::ConfigManager;
//! use tasker_batch::models::{BatchItem, ExecutionTemplate, ProcessingStep};
//! use tasker_batch::orchestration::BatchService;
//! use tasker_batch::registry::{InMemoryTemplateRegistry, InProcessService, ServiceOutputs, ServiceRegistry};
//! use tasker_batch::store::InMemoryDurableStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! tasker_batch::logging::init_structured_logging(&manager.config().logging);
//!
//! let templates = Arc::new(InMemoryTemplateRegistry::new());
//! templates.register(ExecutionTemplate::new(
//!     "shout",
//!     vec![ProcessingStep::new("text", "upper")
//!         .with_input("text", "source.text")
//!         .with_output("result", "content.upper")],
//! ))?;
//!
//! let services = ServiceRegistry::builder()
//!     .register(Arc::new(InProcessService::new("text").with_operation(
//!         "upper",
//!         |inputs| async move {
//!             let text = inputs["text"].as_str().unwrap_or_default().to_uppercase();
//!             Ok(ServiceOutputs::from([("result".to_string(), json!(text))]))
//!         },
//!     )))
//!     .build();
//!
//! let service = BatchService::new(
//!     manager.config().clone(),
//!     templates,
//!     services,
//!     Arc::new(InMemoryDurableStore::new()),
//! )?;
//!
//! let batch_id = service
//!     .submit_batch(
//!         "shout",
//!         vec![BatchItem::new("a").with_field("source.text", json!("hello"))],
//!     )
//!     .await?;
//! let result = service.await_batch(batch_id).await?;
//! println!("{:?}: {:?}", result.status, result.summary);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod state_machine;
pub mod store;

pub use config::{ConfigManager, TaskerBatchConfig};
pub use error::{Result, TaskerBatchError};
pub use models::{
    BatchItem, BatchResult, BatchResultStatus, BatchStatusReport, Context, ExecutionTemplate,
    ItemOutcome, ProcessingStep, RetryPolicy,
};
pub use orchestration::{BatchService, ErrorKind, FailureRecord};
