//! Host message protocol.
//!
//! Every message crossing the channel is an [`Envelope`]: a message type, a
//! correlation id and a JSON payload. Requests are answered with an envelope
//! carrying the same id and a [`HostResponse`] payload; stream requests are
//! answered with a sequence of [`StreamChunk`] payloads.
//!
//! # Examples
//!
//! ```ignore
//! // Request
//! {"messageType": "readFile", "messageId": "5d0…", "data": {"filepath": "src/lib.rs"}}
//!
//! // Response
//! {"messageType": "readFile", "messageId": "5d0…", "data": {"status": "success", "content": "…"}}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{FlowError, FlowResult};
use crate::permissions::ToolPolicy;
use crate::tools::ToolDefinition;
use crate::types::message::{ChatMessage, ContextItem};
use crate::types::tool_call::ToolCall;

/// Message type names.
pub mod message_types {
    pub const TOOLS_CALL: &str = "tools/call";
    pub const APPLY_TO_FILE: &str = "applyToFile";
    pub const EVALUATE_POLICY: &str = "tools/evaluatePolicy";
    pub const READ_FILE: &str = "readFile";
    pub const RESOLVE_RELATIVE_PATH: &str = "resolveRelativePath";
    pub const STREAM_CHAT: &str = "llm/streamChat";
    pub const ABORT: &str = "abort";
    /// Sent by the host whenever an apply stream changes.
    pub const UPDATE_APPLY_STATE: &str = "updateApplyState";
}

/// A message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub message_type: String,
    pub message_id: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Creates an envelope with a fresh message id.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` cannot be serialized.
    pub fn new(message_type: impl Into<String>, data: impl Serialize) -> FlowResult<Self> {
        Ok(Self {
            message_type: message_type.into(),
            message_id: Uuid::new_v4().to_string(),
            data: serde_json::to_value(data)?,
        })
    }

    /// Creates a reply to `message_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` cannot be serialized.
    pub fn reply(
        message_type: impl Into<String>,
        message_id: impl Into<String>,
        data: impl Serialize,
    ) -> FlowResult<Self> {
        Ok(Self {
            message_type: message_type.into(),
            message_id: message_id.into(),
            data: serde_json::to_value(data)?,
        })
    }

    /// Deserializes the payload.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the payload has the wrong shape.
    pub fn data_as<T: DeserializeOwned>(&self) -> FlowResult<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            FlowError::transport_protocol(format!("invalid {} payload: {e}", self.message_type))
        })
    }
}

/// Payload answering a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HostResponse {
    Success {
        #[serde(default)]
        content: Value,
    },
    Error {
        error: String,
    },
}

impl HostResponse {
    /// Wraps a successful result.
    ///
    /// # Errors
    ///
    /// Returns an error if `content` cannot be serialized.
    pub fn success(content: impl Serialize) -> FlowResult<Self> {
        Ok(Self::Success {
            content: serde_json::to_value(content)?,
        })
    }

    /// Converts into the typed result of a `message_type` request.
    ///
    /// # Errors
    ///
    /// Returns a request error for error responses and a protocol error when
    /// the content has the wrong shape.
    pub fn into_result<T: DeserializeOwned>(self, message_type: &str) -> FlowResult<T> {
        match self {
            Self::Success { content } => serde_json::from_value(content).map_err(|e| {
                FlowError::transport_protocol(format!("invalid {message_type} response: {e}"))
            }),
            Self::Error { error } => Err(FlowError::transport_request(message_type, error)),
        }
    }
}

/// One message of a streamed response.
///
/// Intermediate chunks carry `content`. The final one has `done: true` and
/// the stream's return value, or `error`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamChunk {
    /// An intermediate chunk.
    #[must_use]
    pub fn content(content: Value) -> Self {
        Self {
            content: Some(content),
            ..Self::default()
        }
    }

    /// The final chunk.
    #[must_use]
    pub fn done(content: Option<Value>) -> Self {
        Self {
            done: true,
            content,
            error: None,
        }
    }

    /// A terminal error.
    #[must_use]
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

// ============================================================================
// Request payloads
// ============================================================================

/// `tools/call`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    pub tool_call: ToolCall,
}

/// Response to `tools/call`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResponse {
    #[serde(default)]
    pub context_items: Vec<ContextItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl ToolCallResponse {
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error_message.is_some()
    }
}

/// `applyToFile`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyToFileRequest {
    /// Full new file content.
    pub text: String,
    pub stream_id: String,
    pub filepath: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub is_search_and_replace: bool,
}

/// `tools/evaluatePolicy`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatePolicyRequest {
    pub tool_name: String,
    pub base_policy: ToolPolicy,
    #[serde(default)]
    pub args: Value,
}

/// Response to `tools/evaluatePolicy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatePolicyResponse {
    pub policy: ToolPolicy,
}

/// `readFile`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadFileRequest {
    pub filepath: String,
}

/// `resolveRelativePath`; answered with the resolved path or `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveRelativePathRequest {
    pub path: String,
}

/// `llm/streamChat`; streamed back as serialized
/// [`ChatStreamEvent`](crate::types::ChatStreamEvent)s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// `abort`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortRequest {
    pub message_id: String,
}
