//! Centralized error types for toolflow.
//!
//! This module provides a unified error type (`FlowError`) that encompasses
//! every failure the orchestration engine can observe: argument validation,
//! host round trips, the LLM stream, configuration and state bookkeeping.
//!
//! Failures inside a single tool call are never propagated as a `FlowError`
//! past the coordinator; they are rendered with [`FlowError::tool_output`]
//! and attached to that call's result message instead.
//!
//! # Example
//!
//! ```
//! use toolflow::error::{FlowError, FlowResult};
//!
//! fn require_tool(name: &str) -> FlowResult<()> {
//!     if name.is_empty() {
//!         return Err(FlowError::tool_not_found(name));
//!     }
//!     Ok(())
//! }
//!
//! match require_tool("") {
//!     Ok(()) => println!("found"),
//!     Err(e) => {
//!         assert_eq!(e.module(), "tools");
//!         assert!(e.is_validation());
//!     }
//! }
//! ```

use std::fmt;

use crate::edit::EditError;

/// Result type alias using `FlowError`.
pub type FlowResult<T> = Result<T, FlowError>;

/// Centralized error type for toolflow.
#[derive(Debug)]
pub enum FlowError {
    // ============== Edit Errors ==============
    /// A text edit failed validation or could not be applied.
    Edit(EditError),

    // ============== Tool Errors ==============
    /// No tool with this name is registered.
    ToolNotFound {
        /// The requested function name.
        name: String,
    },

    /// Tool arguments could not be parsed or are invalid.
    ToolArguments {
        /// The tool name.
        tool: String,
        /// Description of the problem.
        message: String,
    },

    /// The tool ran and reported a failure.
    ToolExecution {
        /// The tool name.
        tool: String,
        /// The failure reported by the executor.
        message: String,
    },

    // ============== Transport Errors ==============
    /// A `post` could not be delivered after every retry.
    TransportDelivery {
        /// The message type being posted.
        message_type: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// A request round trip failed.
    TransportRequest {
        /// The message type of the request.
        message_type: String,
        /// Description of the failure.
        message: String,
    },

    /// The peer sent something that does not fit the protocol.
    TransportProtocol {
        /// Description of the protocol error.
        message: String,
    },

    // ============== LLM Stream Errors ==============
    /// The LLM stream reported an error.
    LlmStream {
        /// Description of the stream error.
        message: String,
    },

    /// The operation was aborted through its cancellation token.
    Aborted,

    // ============== Orchestration Errors ==============
    /// A referenced tool call does not exist in history.
    ToolCallNotFound {
        /// The missing tool call id.
        tool_call_id: String,
    },

    /// A status transition was rejected by the state machine.
    InvalidTransition {
        /// The tool call or stream id.
        id: String,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    // ============== Config Errors ==============
    /// The configuration file could not be read.
    ConfigIo {
        /// The path being read.
        path: String,
        /// Description of the I/O error.
        message: String,
    },

    /// The configuration file could not be parsed.
    ConfigParse {
        /// The path being parsed.
        path: String,
        /// Description of the parse error.
        message: String,
    },

    // ============== Host Errors ==============
    /// A host-side file operation failed.
    HostIo {
        /// The path being accessed.
        path: String,
        /// Description of the I/O error.
        message: String,
    },

    // ============== Wrapped Errors ==============
    /// Error from anyhow or other sources.
    Other {
        /// The wrapped error message.
        message: String,
        /// The original error, if available.
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

// ============== Constructor Methods ==============

impl FlowError {
    /// Creates a tool-not-found error.
    #[must_use]
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound { name: name.into() }
    }

    /// Creates an invalid-arguments error.
    #[must_use]
    pub fn tool_arguments(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Creates an execution error.
    #[must_use]
    pub fn tool_execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Creates a delivery failure.
    #[must_use]
    pub fn transport_delivery(message_type: impl Into<String>, attempts: u32) -> Self {
        Self::TransportDelivery {
            message_type: message_type.into(),
            attempts,
        }
    }

    /// Creates a request failure.
    #[must_use]
    pub fn transport_request(message_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransportRequest {
            message_type: message_type.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[must_use]
    pub fn transport_protocol(message: impl Into<String>) -> Self {
        Self::TransportProtocol {
            message: message.into(),
        }
    }

    /// Creates an LLM stream error.
    #[must_use]
    pub fn llm_stream(message: impl Into<String>) -> Self {
        Self::LlmStream {
            message: message.into(),
        }
    }

    /// Creates a missing tool call error.
    #[must_use]
    pub fn tool_call_not_found(tool_call_id: impl Into<String>) -> Self {
        Self::ToolCallNotFound {
            tool_call_id: tool_call_id.into(),
        }
    }

    /// Creates a rejected transition error.
    #[must_use]
    pub fn invalid_transition(
        id: impl Into<String>,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            id: id.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Creates a config I/O error.
    #[must_use]
    pub fn config_io(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigIo {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a config parse error.
    #[must_use]
    pub fn config_parse(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigParse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a host I/O error.
    #[must_use]
    pub fn host_io(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HostIo {
            path: path.into(),
            message: message.into(),
        }
    }
}

// ============== Category Methods ==============

impl FlowError {
    /// Returns `true` if this error is potentially retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportDelivery { .. } | Self::TransportRequest { .. } | Self::LlmStream { .. }
        )
    }

    /// Returns `true` for argument problems the model can fix on its own.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Edit(_) | Self::ToolNotFound { .. } | Self::ToolArguments { .. }
        )
    }

    /// Returns `true` for failures reported to the user directly rather than
    /// folded into a tool result.
    #[must_use]
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::LlmStream { .. }
                | Self::TransportDelivery { .. }
                | Self::ConfigIo { .. }
                | Self::ConfigParse { .. }
        )
    }

    /// Returns the module name where this error originated.
    #[must_use]
    pub fn module(&self) -> &'static str {
        match self {
            Self::Edit(_) => "edit",

            Self::ToolNotFound { .. } | Self::ToolArguments { .. } | Self::ToolExecution { .. } => {
                "tools"
            }

            Self::TransportDelivery { .. }
            | Self::TransportRequest { .. }
            | Self::TransportProtocol { .. } => "transport",

            Self::LlmStream { .. } | Self::Aborted => "llm",

            Self::ToolCallNotFound { .. } | Self::InvalidTransition { .. } => "orchestration",

            Self::ConfigIo { .. } | Self::ConfigParse { .. } => "config",

            Self::HostIo { .. } => "host",

            Self::Other { .. } => "unknown",
        }
    }

    /// Renders the error as text for a tool result.
    ///
    /// Validation and execution errors are shown without the module prefix so
    /// the model sees the corrective message as-is.
    #[must_use]
    pub fn tool_output(&self) -> String {
        match self {
            Self::Edit(err) => err.to_string(),
            Self::ToolArguments { message, .. } | Self::ToolExecution { message, .. } => {
                message.clone()
            }
            Self::ToolNotFound { name } => format!("Tool \"{name}\" not found"),
            other => other.to_string(),
        }
    }
}

// ============== Display Implementation ==============

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Edit(err) => write!(f, "edit: {err}"),

            // Tool errors
            Self::ToolNotFound { name } => write!(f, "tools: tool '{name}' not found"),
            Self::ToolArguments { tool, message } => {
                write!(f, "tools: invalid arguments for '{tool}': {message}")
            }
            Self::ToolExecution { tool, message } => {
                write!(f, "tools: '{tool}' failed: {message}")
            }

            // Transport errors
            Self::TransportDelivery {
                message_type,
                attempts,
            } => write!(
                f,
                "transport: failed to post '{message_type}' after {attempts} attempts"
            ),
            Self::TransportRequest {
                message_type,
                message,
            } => write!(f, "transport: request '{message_type}' failed: {message}"),
            Self::TransportProtocol { message } => {
                write!(f, "transport: protocol error: {message}")
            }

            // LLM errors
            Self::LlmStream { message } => write!(f, "llm: stream error: {message}"),
            Self::Aborted => write!(f, "llm: aborted"),

            // Orchestration errors
            Self::ToolCallNotFound { tool_call_id } => {
                write!(f, "orchestration: tool call '{tool_call_id}' not found")
            }
            Self::InvalidTransition { id, from, to } => {
                write!(f, "orchestration: invalid transition for '{id}': {from} -> {to}")
            }

            // Config errors
            Self::ConfigIo { path, message } => {
                write!(f, "config: I/O error for '{path}': {message}")
            }
            Self::ConfigParse { path, message } => {
                write!(f, "config: parse error in '{path}': {message}")
            }

            // Host errors
            Self::HostIo { path, message } => write!(f, "host: I/O error for '{path}': {message}"),

            Self::Other { message, .. } => write!(f, "error: {message}"),
        }
    }
}

// ============== Error Implementation ==============

impl std::error::Error for FlowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Edit(err) => Some(err),
            Self::Other {
                source: Some(src), ..
            } => Some(src.as_ref()),
            _ => None,
        }
    }
}

// ============== Conversion Implementations ==============

impl From<EditError> for FlowError {
    fn from(err: EditError) -> Self {
        Self::Edit(err)
    }
}

impl From<anyhow::Error> for FlowError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            message: format!("{err:#}"),
            source: None,
        }
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        Self::TransportProtocol {
            message: err.to_string(),
        }
    }
}

// ============== Unit Tests ==============
