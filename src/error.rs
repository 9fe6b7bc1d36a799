//! Error types for the batch orchestration API.
//!
//! Step-level failures never surface here: they are normalized into
//! [`FailureRecord`](crate::orchestration::errors::FailureRecord)s inside the item outcome.
//! `TaskerBatchError` is reserved for calls that are rejected outright
//! (`submit_batch`, `process_single`, administrative operations).

use crate::config::ConfigurationError;
use crate::state_machine::StateMachineError;
use crate::store::StorageError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskerBatchError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Template not found: {template_id}")]
    TemplateNotFound { template_id: String },
    #[error("Template already registered: {template_id}")]
    TemplateAlreadyRegistered { template_id: String },
    #[error("Batch not found: {batch_id}")]
    BatchNotFound { batch_id: Uuid },
    #[error("Unknown service: {service}")]
    UnknownService { service: String },
    #[error("Batch {batch_id} is in state {state} and cannot be {action}")]
    InvalidBatchState {
        batch_id: Uuid,
        state: String,
        action: String,
    },
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),
    #[error("State machine error: {0}")]
    StateMachineError(#[from] StateMachineError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TaskerBatchError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }
}

impl From<serde_json::Error> for TaskerBatchError {
    fn from(error: serde_json::Error) -> Self {
        TaskerBatchError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

pub type Result<T> = std::result::Result<T, TaskerBatchError>;
