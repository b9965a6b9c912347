//! Apply stream bookkeeping and its coupling to tool calls.
//!
//! The registry stores one [`ApplyState`] per stream id and enforces the
//! forward-only `not-started → streaming → done → closed` order. The first
//! `closed` update for a stream is reported exactly once; later updates for
//! that stream are dropped.
//!
//! Updates for [`EDIT_MODE_STREAM_ID`](crate::types::EDIT_MODE_STREAM_ID) are
//! kept apart and never touch tool calls.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::types::apply::{ApplyOutcome, ApplyState, ApplyStatus};
use crate::types::message::ContextItem;
use crate::types::tool_call::ToolCallStatus;

/// Result of feeding one update into the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyUpdate {
    /// The merged state; the stream is still open.
    Progress(ApplyState),
    /// The stream closed for the first time.
    Closed(ApplyState),
    /// Edit-mode progress.
    EditMode(ApplyState),
    /// Edit mode closed; the edit flow should exit.
    EditModeClosed(ApplyState),
    /// Duplicate or out-of-order update, dropped.
    Ignored,
}

/// Stores apply states by stream id.
#[derive(Debug, Default)]
pub struct ApplyStateRegistry {
    states: HashMap<String, ApplyState>,
    closed: HashSet<String>,
    edit_mode: Option<ApplyState>,
}

impl ApplyStateRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges an update into the stored state for its stream.
    pub fn update(&mut self, update: ApplyState) -> ApplyUpdate {
        if update.is_edit_mode() {
            return self.update_edit_mode(update);
        }

        if self.closed.contains(&update.stream_id) {
            warn!(stream_id = %update.stream_id, status = %update.status, "Update for closed apply stream");
            return ApplyUpdate::Ignored;
        }

        let merged = match self.states.get_mut(&update.stream_id) {
            Some(stored) => {
                if update.status < stored.status {
                    warn!(
                        stream_id = %update.stream_id,
                        from = %stored.status,
                        to = %update.status,
                        "Ignoring backwards apply transition"
                    );
                    return ApplyUpdate::Ignored;
                }
                stored.merge(&update);
                stored.clone()
            }
            None => {
                self.states.insert(update.stream_id.clone(), update.clone());
                update
            }
        };

        debug!(
            stream_id = %merged.stream_id,
            tool_call_id = ?merged.tool_call_id,
            status = %merged.status,
            "Apply state updated"
        );

        if merged.status == ApplyStatus::Closed {
            self.closed.insert(merged.stream_id.clone());
            ApplyUpdate::Closed(merged)
        } else {
            ApplyUpdate::Progress(merged)
        }
    }

    fn update_edit_mode(&mut self, update: ApplyState) -> ApplyUpdate {
        let merged = match self.edit_mode.as_mut() {
            Some(stored) => {
                stored.merge(&update);
                stored.clone()
            }
            None => update,
        };

        if merged.status == ApplyStatus::Closed {
            self.edit_mode = None;
            ApplyUpdate::EditModeClosed(merged)
        } else {
            self.edit_mode = Some(merged.clone());
            ApplyUpdate::EditMode(merged)
        }
    }

    /// Returns the state for a stream.
    #[must_use]
    pub fn get(&self, stream_id: &str) -> Option<&ApplyState> {
        self.states.get(stream_id)
    }

    /// Returns the open apply state for a tool call, if any.
    #[must_use]
    pub fn active_for_tool_call(&self, tool_call_id: &str) -> Option<&ApplyState> {
        self.states.values().find(|state| {
            state.tool_call_id.as_deref() == Some(tool_call_id) && !self.closed.contains(&state.stream_id)
        })
    }

    /// Returns true if the stream has closed.
    #[must_use]
    pub fn is_closed(&self, stream_id: &str) -> bool {
        self.closed.contains(stream_id)
    }

    /// Returns the current edit-mode apply state.
    #[must_use]
    pub fn edit_mode(&self) -> Option<&ApplyState> {
        self.edit_mode.as_ref()
    }

    /// Forgets streams whose tool call fails `keep`. Streams without a tool
    /// call and edit mode are left alone. Returns the number dropped.
    pub fn retain_tool_calls(&mut self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let before = self.states.len();
        self.states
            .retain(|_, state| state.tool_call_id.as_deref().map_or(true, &mut keep));
        let states = &self.states;
        self.closed.retain(|stream_id| states.contains_key(stream_id));
        before - self.states.len()
    }

    /// Number of tracked streams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// How a closed apply resolves its tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyResolution {
    /// Target status for the tool call.
    pub status: ToolCallStatus,
    /// Output attached to the tool call.
    pub output: Vec<ContextItem>,
    /// True when the user turned the edit down entirely.
    pub user_rejected: bool,
}

/// Maps a closed apply state to its tool call outcome.
#[must_use]
pub fn resolve_closed(apply: &ApplyState) -> ApplyResolution {
    let file = apply.filepath.as_deref().unwrap_or("the file");
    match apply.outcome() {
        ApplyOutcome::AllAccepted => ApplyResolution {
            status: ToolCallStatus::Done,
            output: vec![ContextItem::new(
                "Edit Applied",
                "Changes accepted",
                format!("The changes to {file} were applied and accepted by the user."),
            )],
            user_rejected: false,
        },
        ApplyOutcome::AllRejected => ApplyResolution {
            status: ToolCallStatus::Canceled,
            output: vec![ContextItem::new(
                "Edit Rejected",
                "Changes rejected",
                format!(
                    "The user rejected the changes to {file}. Do not retry the same edit. \
                     Ask the user how they would like to proceed instead."
                ),
            )],
            user_rejected: true,
        },
        ApplyOutcome::PartiallyAccepted { accepted, rejected } => ApplyResolution {
            status: ToolCallStatus::Done,
            output: vec![ContextItem::new(
                "Edit Partially Applied",
                "Some changes rejected",
                format!(
                    "The user accepted {accepted} of {} changes to {file} and rejected the rest. \
                     Confirm the next steps with the user before making further edits.",
                    accepted + rejected
                ),
            )],
            user_rejected: false,
        },
    }
}
