//! Tool call data types.
//!
//! A [`ToolCall`] is the immutable request emitted by the model. A
//! [`ToolCallState`] wraps it with the mutable lifecycle status and output.
//! Status transitions are enforced by [`crate::app::tool_call`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::message::ContextItem;

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Opaque id, unique within a turn.
    pub id: String,
    /// Name of the requested tool.
    pub function_name: String,
    /// Arguments exactly as streamed by the model.
    #[serde(default)]
    pub raw_arguments: String,
}

impl ToolCall {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        function_name: impl Into<String>,
        raw_arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            function_name: function_name.into(),
            raw_arguments: raw_arguments.into(),
        }
    }

    /// Parses `raw_arguments` as JSON. Empty input parses as `{}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments are not valid JSON.
    pub fn parse_arguments(&self) -> Result<Value, serde_json::Error> {
        if self.raw_arguments.trim().is_empty() {
            Ok(Value::Object(serde_json::Map::new()))
        } else {
            serde_json::from_str(&self.raw_arguments)
        }
    }
}

/// Lifecycle status of a tool call.
///
/// ```text
/// generating -> generated -> calling -> done | errored | canceled
///      \____________\____________\______________/ (cancel)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCallStatus {
    /// Arguments are still streaming.
    Generating,
    /// Arguments are complete and parsed.
    Generated,
    /// Execution has been dispatched.
    Calling,
    Done,
    Errored,
    Canceled,
}

impl ToolCallStatus {
    /// Returns true for `done`, `errored` and `canceled`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Errored | Self::Canceled)
    }
}

impl fmt::Display for ToolCallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Generating => "generating",
            Self::Generated => "generated",
            Self::Calling => "calling",
            Self::Done => "done",
            Self::Errored => "errored",
            Self::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Mutable state of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallState {
    pub tool_call_id: String,
    pub tool_call: ToolCall,
    /// Arguments parsed from the model output.
    #[serde(default)]
    pub parsed_args: Value,
    /// Arguments after preprocessing (resolved paths, computed edits).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_args: Option<Value>,
    pub status: ToolCallStatus,
    /// Result or error output, set once the call finishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Vec<ContextItem>>,
}

impl ToolCallState {
    /// Creates a state in `generating` for a call whose arguments are still streaming.
    #[must_use]
    pub fn generating(tool_call: ToolCall) -> Self {
        Self {
            tool_call_id: tool_call.id.clone(),
            tool_call,
            parsed_args: Value::Object(serde_json::Map::new()),
            processed_args: None,
            status: ToolCallStatus::Generating,
            output: None,
        }
    }

    /// Returns the function name of the wrapped call.
    #[must_use]
    pub fn function_name(&self) -> &str {
        &self.tool_call.function_name
    }

    /// Returns processed arguments when present, parsed arguments otherwise.
    #[must_use]
    pub fn effective_args(&self) -> &Value {
        self.processed_args.as_ref().unwrap_or(&self.parsed_args)
    }
}
