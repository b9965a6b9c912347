//! Conversation history store.
//!
//! The store is the single owner of the history. Every mutation runs under
//! one lock and is keyed by id, so concurrent tool call tasks never
//! read-modify-write the same entry.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::error::{FlowError, FlowResult};
use crate::types::message::{ChatMessage, HistoryItem};
use crate::types::tool_call::ToolCallState;

/// Outcome of [`ConversationHistoryStore::append_tool_result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// A new result message was pushed.
    Appended,
    /// A result for this tool call already exists.
    AlreadyPresent,
    /// No assistant message carries this tool call.
    UnknownToolCall,
}

/// Shared, transactional conversation history.
#[derive(Debug, Default)]
pub struct ConversationHistoryStore {
    items: Mutex<Vec<HistoryItem>>,
}

impl ConversationHistoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with existing history.
    #[must_use]
    pub fn from_items(items: Vec<HistoryItem>) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<HistoryItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a copy of the full history.
    #[must_use]
    pub fn snapshot(&self) -> Vec<HistoryItem> {
        self.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Appends an item.
    pub fn push(&self, item: HistoryItem) {
        debug!(role = %item.message.role, message_id = %item.message.id, "History push");
        self.lock().push(item);
    }

    /// Runs `f` with exclusive access to the history.
    pub fn transaction<R>(&self, f: impl FnOnce(&mut Vec<HistoryItem>) -> R) -> R {
        let mut items = self.lock();
        f(&mut items)
    }

    /// Returns a copy of the state for `tool_call_id`.
    #[must_use]
    pub fn find_tool_call(&self, tool_call_id: &str) -> Option<ToolCallState> {
        self.lock()
            .iter()
            .rev()
            .find_map(|item| item.tool_call_state(tool_call_id))
            .cloned()
    }

    /// Mutates the state for `tool_call_id` in place.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::ToolCallNotFound`] if no item carries the call.
    pub fn mutate_tool_call<R>(
        &self,
        tool_call_id: &str,
        f: impl FnOnce(&mut ToolCallState) -> R,
    ) -> FlowResult<R> {
        let mut items = self.lock();
        items
            .iter_mut()
            .rev()
            .find_map(|item| item.tool_call_state_mut(tool_call_id))
            .map(f)
            .ok_or_else(|| FlowError::tool_call_not_found(tool_call_id))
    }

    /// Returns true if a result message exists for `tool_call_id`.
    #[must_use]
    pub fn has_tool_result(&self, tool_call_id: &str) -> bool {
        self.lock().iter().any(|item| item.is_result_for(tool_call_id))
    }

    /// Appends a tool result message unless one already exists.
    pub fn append_tool_result(&self, tool_call_id: &str, content: impl Into<String>) -> AppendOutcome {
        let mut items = self.lock();

        if !items.iter().any(|item| item.tool_call_state(tool_call_id).is_some()) {
            warn!(tool_call_id = %tool_call_id, "No tool call found with ID");
            return AppendOutcome::UnknownToolCall;
        }
        if items.iter().any(|item| item.is_result_for(tool_call_id)) {
            info!(tool_call_id = %tool_call_id, "Tool result already exists for tool call");
            return AppendOutcome::AlreadyPresent;
        }

        let message = ChatMessage::tool_result(tool_call_id, content);
        debug!(tool_call_id = %tool_call_id, message_id = %message.id, "Appending tool result");
        items.push(HistoryItem::new(message));
        AppendOutcome::Appended
    }

    /// Removes the item with `message_id`. Returns true if it existed.
    pub fn remove_item(&self, message_id: &str) -> bool {
        let mut items = self.lock();
        let before = items.len();
        items.retain(|item| item.message.id != message_id);
        before != items.len()
    }

    /// Keeps only the items matching `keep`. Returns the number removed.
    pub fn retain(&self, keep: impl FnMut(&HistoryItem) -> bool) -> usize {
        let mut items = self.lock();
        let before = items.len();
        items.retain(keep);
        before - items.len()
    }
}
