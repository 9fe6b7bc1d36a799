use serde::{Deserialize, Serialize};

/// Events that can trigger context state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ContextEvent {
    /// Place the context into a chunk's queue
    Enqueue,
    /// Begin driving steps
    Start,
    /// Pick up a context left in `processing` by an interrupted run
    Resume,
    /// All steps committed
    Complete,
    /// Terminal failure with error message
    Fail(String),
    /// Stop because the batch was cancelled
    Cancel,
}

impl ContextEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Enqueue => "enqueue",
            Self::Start => "start",
            Self::Resume => "resume",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Cancel => "cancel",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Events that can trigger batch state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BatchEvent {
    /// Start dispatching chunks
    Start,
    /// All items resolved with at least one completion
    Complete,
    /// All items resolved without any completion
    Fail(String),
    /// Cancelled by the caller
    Cancel,
}

impl BatchEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Cancel => "cancel",
        }
    }
}
