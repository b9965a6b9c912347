//! Core type definitions for toolflow.
//!
//! This module contains the data types shared by the orchestration engine,
//! organized into submodules by domain:
//!
//! - [`apply`] - Apply stream status and state
//! - [`config`] - Engine configuration
//! - [`message`] - Messages, context items and history items
//! - [`stream`] - LLM stream events
//! - [`tool_call`] - Tool calls and their lifecycle state
//!
//! # Re-exports
//!
//! Common types are re-exported at the module level for convenience:
//!
//! ```
//! use toolflow::types::{ChatMessage, HistoryItem, Role, ToolCallStatus};
//! ```

pub mod apply;
pub mod config;
pub mod message;
pub mod stream;
pub mod tool_call;

// Re-export common types for convenience
pub use apply::{ApplyOutcome, ApplyState, ApplyStatus, EDIT_MODE_STREAM_ID};
pub use config::EngineConfig;
pub use message::{render_context_items, ChatMessage, ContextItem, HistoryItem, Role};
pub use stream::{ChatStreamEvent, ToolCallAccumulator};
pub use tool_call::{ToolCall, ToolCallState, ToolCallStatus};
