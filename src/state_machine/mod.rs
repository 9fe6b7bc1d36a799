// State machines for context and batch lifecycles
//
// Contexts and batch runs are plain data owned by the orchestration run; these tables
// are the only place allowed to decide which status a given event leads to.

pub mod errors;
pub mod events;
pub mod states;
pub mod transitions;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::{BatchEvent, ContextEvent};
pub use states::{BatchState, ContextState};
pub use transitions::{determine_batch_target, determine_context_target};
