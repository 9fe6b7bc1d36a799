//! # Step Failure Classification
//!
//! Decides whether a step failure is retriable or terminal.
//!
//! ## Overview
//!
//! Classification is allow-list driven: a failure is retriable only when its
//! [`ErrorKind`] appears in the step's `retry_policy.retriable_error_kinds`. Kinds that
//! describe the batch rather than the step (deadline, cancellation, storage, queue
//! saturation) are terminal no matter what the allow-list says.
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ StepError       │────▶│ ErrorClassifier │────▶│ FailureRecord   │
//! │ + RetryPolicy   │     │ (allow-list)    │     │ kind/retriable  │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use tasker_batch::models::RetryPolicy;
//! use tasker_batch::orchestration::error_classifier::{
//!     AllowListErrorClassifier, Disposition, ErrorClassifier,
//! };
//! use tasker_batch::orchestration::errors::StepError;
//!
//! let classifier = AllowListErrorClassifier;
//! let error = StepError::ServiceUnavailable {
//!     service: "writer".to_string(),
//!     detail: "connection refused".to_string(),
//! };
//!
//! let classification = classifier.classify(&error, &RetryPolicy::default());
//! assert_eq!(classification.disposition, Disposition::Retriable);
//! ```

use crate::models::RetryPolicy;
use crate::orchestration::errors::{ErrorKind, FailureRecord, StepError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Retriable,
    Terminal,
}

/// Result of error classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub disposition: Disposition,
    pub message: String,
}

impl ErrorClassification {
    pub fn is_retriable(&self) -> bool {
        self.disposition == Disposition::Retriable
    }

    /// Normalize into the outcome record reported for the item
    pub fn into_failure_record(self, step: Option<String>) -> FailureRecord {
        FailureRecord {
            kind: self.kind,
            retriable: self.is_retriable(),
            message: self.message,
            step,
        }
    }
}

/// Trait for error classification strategies
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &StepError, policy: &RetryPolicy) -> ErrorClassification;

    /// Get the classifier name for identification
    fn classifier_name(&self) -> &'static str;
}

/// Retriable iff the kind is allow-listed and not inherently terminal
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowListErrorClassifier;

impl ErrorClassifier for AllowListErrorClassifier {
    fn classify(&self, error: &StepError, policy: &RetryPolicy) -> ErrorClassification {
        let kind = error.kind();
        let disposition = if !kind.is_always_terminal() && policy.allows(kind) {
            Disposition::Retriable
        } else {
            Disposition::Terminal
        };

        ErrorClassification {
            kind,
            disposition,
            message: error.to_string(),
        }
    }

    fn classifier_name(&self) -> &'static str {
        "AllowListErrorClassifier"
    }
}
