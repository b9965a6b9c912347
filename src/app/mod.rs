//! Orchestration core.
//!
//! - [`tool_call`]: per-call status machine
//! - [`apply_state`]: apply stream tracking and close resolution
//! - [`store`]: shared conversation history
//! - [`reconcile`]: end-of-turn history repair
//! - [`coordinator`]: ties the pieces together for one conversation

pub mod apply_state;
pub mod coordinator;
pub mod reconcile;
pub mod store;
pub mod tool_call;

pub use apply_state::{resolve_closed, ApplyResolution, ApplyStateRegistry, ApplyUpdate};
pub use coordinator::{Coordinator, TurnOutcome, APPLY_ERROR_MESSAGE};
pub use reconcile::{clear_last_empty_response, ReconcileReport};
pub use store::{AppendOutcome, ConversationHistoryStore};
pub use tool_call::{advance, cancellation_output, transition, Rejected, ToolCallEvent, CANCELLED_TOOL_RESULT};
