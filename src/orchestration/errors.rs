//! # Step Errors
//!
//! Error taxonomy for step execution.
//!
//! A [`StepError`] is what goes wrong while one step runs against one context. It is
//! never handed to the aggregator as-is: the executor normalizes it into a
//! [`FailureRecord`] carrying the [`ErrorKind`], a message and the retry decision.

use crate::registry::ServiceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Stable, serializable classification of a step failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed template or item data
    Validation,
    /// A declared input path is absent from the context
    MissingField,
    /// The service response lacks a declared output
    ServiceContract,
    /// The service could not be reached
    ServiceUnavailable,
    /// The step dispatch exceeded its timeout
    ServiceTimeout,
    /// The service reported a failure
    ServiceError,
    /// No adapter registered under the service name
    UnknownService,
    /// Too many retries already waiting
    RetryQueueSaturated,
    /// Context checkpointing failed
    Storage,
    /// The batch deadline passed
    Timeout,
    /// The batch was cancelled
    Cancelled,
    /// The item execution aborted unexpectedly
    Internal,
}

impl ErrorKind {
    /// Kinds that no allow-list can make retriable
    pub fn is_always_terminal(&self) -> bool {
        matches!(
            self,
            Self::Validation
                | Self::RetryQueueSaturated
                | Self::Storage
                | Self::Timeout
                | Self::Cancelled
                | Self::Internal
        )
    }

    /// Kinds retried when a step does not declare its own allow-list
    pub fn default_retriable() -> Vec<ErrorKind> {
        vec![Self::ServiceUnavailable, Self::ServiceTimeout]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::MissingField => "missing_field",
            Self::ServiceContract => "service_contract",
            Self::ServiceUnavailable => "service_unavailable",
            Self::ServiceTimeout => "service_timeout",
            Self::ServiceError => "service_error",
            Self::UnknownService => "unknown_service",
            Self::RetryQueueSaturated => "retry_queue_saturated",
            Self::Storage => "storage",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure raised while executing a single step attempt
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    #[error("Missing context field '{path}' for input '{input}'")]
    MissingField { input: String, path: String },

    #[error("Service {service}.{operation} did not return declared output '{output}'")]
    ServiceContract {
        service: String,
        operation: String,
        output: String,
    },

    #[error("Service {service} unavailable: {detail}")]
    ServiceUnavailable { service: String, detail: String },

    #[error("Service {service}.{operation} timed out after {timeout:?}")]
    ServiceTimeout {
        service: String,
        operation: String,
        timeout: Duration,
    },

    #[error("Service {service}.{operation} failed: {detail}")]
    Service {
        service: String,
        operation: String,
        detail: String,
    },

    #[error("Unknown service: {service}")]
    UnknownService { service: String },

    #[error("Retry queue saturated ({capacity} pending retries)")]
    RetryQueueSaturated { capacity: usize },

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Batch deadline exceeded")]
    BatchTimeout,

    #[error("Batch cancelled: {0}")]
    Cancelled(String),

    #[error("Item execution aborted: {0}")]
    Internal(String),
}

impl StepError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingField { .. } => ErrorKind::MissingField,
            Self::ServiceContract { .. } => ErrorKind::ServiceContract,
            Self::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            Self::ServiceTimeout { .. } => ErrorKind::ServiceTimeout,
            Self::Service { .. } => ErrorKind::ServiceError,
            Self::UnknownService { .. } => ErrorKind::UnknownService,
            Self::RetryQueueSaturated { .. } => ErrorKind::RetryQueueSaturated,
            Self::Storage(_) => ErrorKind::Storage,
            Self::BatchTimeout => ErrorKind::Timeout,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Lift a service adapter error into the step taxonomy
    pub fn from_service(service: &str, operation: &str, error: ServiceError) -> Self {
        match error {
            ServiceError::Unavailable(detail) => Self::ServiceUnavailable {
                service: service.to_string(),
                detail,
            },
            ServiceError::Timeout(timeout) => Self::ServiceTimeout {
                service: service.to_string(),
                operation: operation.to_string(),
                timeout,
            },
            ServiceError::Failed(detail) => Self::Service {
                service: service.to_string(),
                operation: operation.to_string(),
                detail,
            },
            ServiceError::UnknownOperation(op) => Self::Service {
                service: service.to_string(),
                operation: operation.to_string(),
                detail: format!("unknown operation '{op}'"),
            },
        }
    }
}

/// Normalized failure outcome reported for an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub retriable: bool,
    /// Step that produced the failure, absent for failures outside any step
    pub step: Option<String>,
}

impl FailureRecord {
    pub fn terminal(kind: ErrorKind, message: impl Into<String>, step: Option<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retriable: false,
            step,
        }
    }

    /// Same failure, no longer eligible for retry
    pub fn into_terminal(mut self) -> Self {
        self.retriable = false;
        self
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step {
            Some(step) => write!(f, "[{}] step '{}': {}", self.kind, step, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}
