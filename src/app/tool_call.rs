//! Tool call lifecycle state machine.
//!
//! # State Machine
//!
//! ```text
//! ┌────────────┐  arguments complete  ┌───────────┐  dispatch  ┌─────────┐
//! │ generating │ ───────────────────▶ │ generated │ ─────────▶ │ calling │
//! └─────┬──────┘                      └─────┬─────┘            └────┬────┘
//!       │                                   │                       │
//!       │ fail (validation)                 │ fail (validation)     ├─ succeed ─▶ done
//!       ├──────────────────────────────────▶├──────────────────────▶├─ fail ────▶ errored
//!       │                                   │                       │
//!       └──────────── cancel ───────────────┴─────── cancel ────────┴──────────▶ canceled
//! ```
//!
//! Terminal states never change again. A rejected transition is logged and
//! leaves the state untouched: the same UI event may legitimately arrive
//! twice.

use std::fmt;

use tracing::{debug, warn};

use crate::types::message::ContextItem;
use crate::types::tool_call::{ToolCallState, ToolCallStatus};

/// Content of the result message synthesized for a canceled tool call.
pub const CANCELLED_TOOL_RESULT: &str = "Tool use was cancelled.";

/// Output attached to a tool call canceled without any other explanation.
#[must_use]
pub fn cancellation_output() -> Vec<ContextItem> {
    vec![ContextItem::new(
        "Tool Cancelled",
        "Tool call was cancelled",
        CANCELLED_TOOL_RESULT,
    )]
}

/// Something that happened to a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallEvent {
    /// The model finished streaming the arguments.
    ArgumentsComplete,
    /// Execution was dispatched.
    Dispatch,
    /// Execution finished successfully.
    Succeed,
    /// Validation or execution failed.
    Fail,
    /// The user or the system canceled the call.
    Cancel,
}

impl fmt::Display for ToolCallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ArgumentsComplete => "arguments_complete",
            Self::Dispatch => "dispatch",
            Self::Succeed => "succeed",
            Self::Fail => "fail",
            Self::Cancel => "cancel",
        };
        f.write_str(s)
    }
}

/// Why a transition was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejected {
    /// The call already reached a terminal status.
    AlreadyTerminal { status: ToolCallStatus },
    /// The event does not apply to the current status.
    InvalidTransition {
        from: ToolCallStatus,
        event: ToolCallEvent,
    },
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyTerminal { status } => {
                write!(f, "Tool call is already {status}")
            }
            Self::InvalidTransition { from, event } => {
                write!(f, "Invalid transition from {from} on {event}")
            }
        }
    }
}

impl std::error::Error for Rejected {}

/// Computes the next status for `event`.
///
/// # Errors
///
/// Returns [`Rejected`] when the transition is not allowed.
pub fn transition(current: ToolCallStatus, event: ToolCallEvent) -> Result<ToolCallStatus, Rejected> {
    use ToolCallEvent as E;
    use ToolCallStatus as S;

    if current.is_terminal() {
        return Err(Rejected::AlreadyTerminal { status: current });
    }

    match (current, event) {
        (S::Generating, E::ArgumentsComplete) => Ok(S::Generated),
        (S::Generated, E::Dispatch) => Ok(S::Calling),
        (S::Calling, E::Succeed) => Ok(S::Done),
        (S::Generating | S::Generated | S::Calling, E::Fail) => Ok(S::Errored),
        (_, E::Cancel) => Ok(S::Canceled),
        (from, event) => Err(Rejected::InvalidTransition { from, event }),
    }
}

/// Applies `event` to `state`.
///
/// Returns the new status, or `None` if the transition was rejected. A
/// rejection is logged as a warning and leaves `state` unchanged.
pub fn advance(state: &mut ToolCallState, event: ToolCallEvent) -> Option<ToolCallStatus> {
    match transition(state.status, event) {
        Ok(next) => {
            debug!(
                tool_call_id = %state.tool_call_id,
                from = %state.status,
                to = %next,
                %event,
                "Tool call transition"
            );
            state.status = next;
            Some(next)
        }
        Err(rejected) => {
            warn!(
                tool_call_id = %state.tool_call_id,
                status = %state.status,
                %event,
                reason = %rejected,
                "Ignoring tool call transition"
            );
            None
        }
    }
}
