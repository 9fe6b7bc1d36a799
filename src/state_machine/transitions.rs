//! Transition tables for context and batch lifecycles.

use super::errors::{StateMachineError, StateMachineResult};
use super::events::{BatchEvent, ContextEvent};
use super::states::{BatchState, ContextState};

/// Determine the target context state for an event, rejecting invalid transitions
pub fn determine_context_target(
    current_state: ContextState,
    event: &ContextEvent,
) -> StateMachineResult<ContextState> {
    let target = match (current_state, event) {
        (ContextState::Created, ContextEvent::Enqueue) => ContextState::Pending,

        (ContextState::Pending, ContextEvent::Start) => ContextState::Processing,
        (ContextState::Processing, ContextEvent::Resume) => ContextState::Processing,

        (ContextState::Processing, ContextEvent::Complete) => ContextState::Completed,

        // Pending items can fail without starting (batch deadline passed first)
        (ContextState::Processing, ContextEvent::Fail(_)) => ContextState::Failed,
        (ContextState::Pending, ContextEvent::Fail(_)) => ContextState::Failed,

        (ContextState::Created, ContextEvent::Cancel) => ContextState::Cancelled,
        (ContextState::Pending, ContextEvent::Cancel) => ContextState::Cancelled,
        (ContextState::Processing, ContextEvent::Cancel) => ContextState::Cancelled,

        (from_state, _) => {
            return Err(StateMachineError::InvalidTransition {
                from: from_state.to_string(),
                event: event.event_type().to_string(),
            })
        }
    };

    Ok(target)
}

/// Determine the target batch state for an event, rejecting invalid transitions
pub fn determine_batch_target(
    current_state: BatchState,
    event: &BatchEvent,
) -> StateMachineResult<BatchState> {
    let target = match (current_state, event) {
        (BatchState::Pending, BatchEvent::Start) => BatchState::Processing,
        // Resumed runs restart from processing
        (BatchState::Processing, BatchEvent::Start) => BatchState::Processing,

        (BatchState::Processing, BatchEvent::Complete) => BatchState::Completed,
        (BatchState::Processing, BatchEvent::Fail(_)) => BatchState::Failed,

        (BatchState::Pending, BatchEvent::Cancel) => BatchState::Cancelled,
        (BatchState::Processing, BatchEvent::Cancel) => BatchState::Cancelled,

        (from_state, _) => {
            return Err(StateMachineError::InvalidTransition {
                from: from_state.to_string(),
                event: event.event_type().to_string(),
            })
        }
    };

    Ok(target)
}
