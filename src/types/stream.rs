//! Stream event types for LLM responses.
//!
//! A chat client yields these events while the model is generating. Tool
//! calls arrive in fragments:
//!
//! 1. `ToolCallStart` with the call id and function name
//! 2. Zero or more `ToolCallArgumentsDelta` events with JSON fragments
//! 3. `ToolCallComplete` once the arguments are complete
//!
//! The stream ends with `MessageComplete` or `Error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tool_call::ToolCall;

/// Events received during a streaming LLM response.
///
/// # Examples
///
/// ```rust
/// use toolflow::types::stream::ChatStreamEvent;
///
/// fn handle_event(event: ChatStreamEvent) {
///     match event {
///         ChatStreamEvent::ContentDelta { text } => print!("{}", text),
///         ChatStreamEvent::ToolCallStart { id, name, index } => {
///             println!("Tool call: {} ({}) at index {}", name, id, index);
///         }
///         _ => {}
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatStreamEvent {
    /// A delta containing new content text.
    ContentDelta { text: String },

    /// A delta of model reasoning.
    ThinkingDelta { text: String },

    /// A tool call is starting.
    ToolCallStart {
        id: String,
        name: String,
        /// Position of the call within the message.
        #[serde(default)]
        index: usize,
    },

    /// A fragment of JSON arguments for the call at `index`.
    ToolCallArgumentsDelta {
        #[serde(default)]
        index: usize,
        partial_json: String,
    },

    /// The arguments of the call at `index` are complete.
    ToolCallComplete {
        #[serde(default)]
        index: usize,
    },

    /// The message is complete.
    MessageComplete,

    /// An error occurred during streaming.
    Error { message: String },
}

impl ChatStreamEvent {
    /// Shorthand for a content delta.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::ContentDelta { text: text.into() }
    }

    /// Returns true if this is an error event.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Returns true if this event ends the message.
    #[must_use]
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::MessageComplete | Self::Error { .. })
    }

    /// Returns true if this is a tool call related event.
    #[must_use]
    pub fn is_tool_call(&self) -> bool {
        matches!(
            self,
            Self::ToolCallStart { .. }
                | Self::ToolCallArgumentsDelta { .. }
                | Self::ToolCallComplete { .. }
        )
    }
}

/// Accumulator for building a complete tool call from stream fragments.
#[derive(Debug, Clone, Default)]
pub struct ToolCallAccumulator {
    /// The tool call id (set on `ToolCallStart`).
    pub id: Option<String>,
    /// The function name (set on `ToolCallStart`).
    pub name: Option<String>,
    /// Accumulated JSON arguments.
    pub input_json: String,
}

impl ToolCallAccumulator {
    /// Creates a new empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializes the accumulator from a `ToolCallStart` event.
    pub fn start(&mut self, id: String, name: String) {
        self.id = Some(id);
        self.name = Some(name);
        self.input_json.clear();
    }

    /// Appends a JSON fragment.
    pub fn append_input(&mut self, partial_json: &str) {
        self.input_json.push_str(partial_json);
    }

    /// Parses the accumulated arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if the accumulated JSON is invalid.
    pub fn parse_input(&self) -> Result<Value, serde_json::Error> {
        if self.input_json.is_empty() {
            Ok(Value::Object(serde_json::Map::new()))
        } else {
            serde_json::from_str(&self.input_json)
        }
    }

    /// Returns the tool call accumulated so far, if one was started.
    #[must_use]
    pub fn to_tool_call(&self) -> Option<ToolCall> {
        Some(ToolCall::new(
            self.id.clone()?,
            self.name.clone()?,
            self.input_json.clone(),
        ))
    }

    /// Returns true if the accumulator has a tool call in progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_predicates() {
        assert!(ChatStreamEvent::Error {
            message: "x".into()
        }
        .is_error());
        assert!(ChatStreamEvent::MessageComplete.is_stop());
        assert!(!ChatStreamEvent::text("hi").is_stop());
        assert!(ChatStreamEvent::ToolCallComplete { index: 0 }.is_tool_call());
    }

    #[test]
    fn test_stream_event_tagged_serialization() {
        let event = ChatStreamEvent::ToolCallStart {
            id: "call_1".into(),
            name: "multi_edit".into(),
            index: 0,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"tool_call_start\""));

        let parsed: ChatStreamEvent =
            serde_json::from_str("{\"type\":\"tool_call_complete\"}").unwrap();
        assert_eq!(parsed, ChatStreamEvent::ToolCallComplete { index: 0 });
    }

    #[test]
    fn test_accumulator_builds_tool_call() {
        let mut acc = ToolCallAccumulator::new();
        assert!(acc.to_tool_call().is_none());

        acc.start("call_1".into(), "read_file".into());
        acc.append_input("{\"filepath\":");
        acc.append_input("\"a.rs\"}");

        assert!(acc.is_active());
        assert_eq!(acc.parse_input().unwrap()["filepath"], "a.rs");
        let call = acc.to_tool_call().unwrap();
        assert_eq!(call.function_name, "read_file");
        assert_eq!(call.raw_arguments, "{\"filepath\":\"a.rs\"}");
    }

    #[test]
    fn test_accumulator_parse_empty_input() {
        let acc = ToolCallAccumulator::new();
        assert!(acc.parse_input().unwrap().is_object());
    }
}
