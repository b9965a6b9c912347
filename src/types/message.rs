//! Conversation history types.
//!
//! History is an ordered list of [`HistoryItem`]s. Each item wraps one
//! [`ChatMessage`]; assistant items may also carry the state of the tool calls
//! that message requested, and tool items carry the `tool_call_id` they answer.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::tool_call::{ToolCall, ToolCallState};

/// Represents a participant role in a conversation.
///
/// # Examples
///
/// ```
/// use toolflow::types::message::Role;
///
/// assert_eq!(Role::Tool.to_string(), "tool");
/// let json = serde_json::to_string(&Role::Thinking).unwrap();
/// assert_eq!(json, "\"thinking\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human user sending messages
    User,
    /// Model responding to messages
    Assistant,
    /// Result of a tool call
    Tool,
    /// Model reasoning emitted before the answer
    Thinking,
    /// System prompt
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
            Role::Thinking => write!(f, "thinking"),
            Role::System => write!(f, "system"),
        }
    }
}

/// A single message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Unique message id.
    pub id: String,
    /// Who sent the message.
    pub role: Role,
    /// Plain text content.
    #[serde(default)]
    pub content: String,
    /// Tool calls requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool messages, the tool call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Creates a thinking message.
    #[must_use]
    pub fn thinking(content: impl Into<String>) -> Self {
        Self::with_role(Role::Thinking, content)
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Creates a tool result message answering `tool_call_id`.
    #[must_use]
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut message = Self::with_role(Role::Tool, content);
        message.tool_call_id = Some(tool_call_id.into());
        message
    }

    /// Adds tool calls to an assistant message.
    #[must_use]
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    /// Returns true if this is an assistant message with no text and no tool calls.
    #[must_use]
    pub fn is_empty_assistant(&self) -> bool {
        self.role == Role::Assistant && self.content.trim().is_empty() && self.tool_calls.is_empty()
    }
}

/// A piece of structured tool output.
///
/// Context items are rendered into plain text before they are placed in a
/// tool result message; see [`render_context_items`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextItem {
    pub name: String,
    pub description: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
}

impl ContextItem {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            content: content.into(),
            hidden: false,
        }
    }

    /// Marks the item as hidden from the user (still sent to the model).
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// Renders context items into the text of a tool result message.
#[must_use]
pub fn render_context_items(items: &[ContextItem]) -> String {
    items
        .iter()
        .map(|item| item.content.as_str())
        .filter(|content| !content.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub message: ChatMessage,
    /// State of each tool call requested by `message` (assistant items only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_states: Vec<ToolCallState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_items: Vec<ContextItem>,
}

impl HistoryItem {
    /// Wraps a message with no tool call state.
    #[must_use]
    pub fn new(message: ChatMessage) -> Self {
        Self {
            message,
            tool_call_states: Vec::new(),
            context_items: Vec::new(),
        }
    }

    /// Returns the state for `tool_call_id` if this item owns it.
    #[must_use]
    pub fn tool_call_state(&self, tool_call_id: &str) -> Option<&ToolCallState> {
        self.tool_call_states
            .iter()
            .find(|state| state.tool_call_id == tool_call_id)
    }

    /// Mutable variant of [`Self::tool_call_state`].
    pub fn tool_call_state_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolCallState> {
        self.tool_call_states
            .iter_mut()
            .find(|state| state.tool_call_id == tool_call_id)
    }

    /// Returns true if this is a tool result answering `tool_call_id`.
    #[must_use]
    pub fn is_result_for(&self, tool_call_id: &str) -> bool {
        self.message.role == Role::Tool && self.message.tool_call_id.as_deref() == Some(tool_call_id)
    }
}

impl From<ChatMessage> for HistoryItem {
    fn from(message: ChatMessage) -> Self {
        Self::new(message)
    }
}
