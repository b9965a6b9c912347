//! Toolflow - tool-call and apply-state orchestration for IDE coding assistants.
//!
//! The crate drives an LLM's tool calls from the moment they stream in until
//! their results are back in the conversation: argument validation, approval
//! policy, dispatch to the editor host, coupling of edit tools to their apply
//! streams, cancellation and end-of-turn history repair.
//!
//! - [`app`] - coordinator, status machines, history store, reconciliation
//! - [`edit`] - search/replace matching and sequential patching
//! - [`tools`] - the tool registry and edit tool planning
//! - [`permissions`] - approval policies
//! - [`ide`] - host bridge and wire protocol
//! - [`api`] - LLM chat clients
//! - [`local`] - a file-system host for running without an editor
//! - [`types`] - shared data types and configuration

pub mod api;
pub mod app;
pub mod edit;
pub mod error;
pub mod ide;
pub mod local;
pub mod permissions;
pub mod tools;
pub mod types;

pub use app::{Coordinator, TurnOutcome};
pub use error::{FlowError, FlowResult};
pub use types::{ChatMessage, EngineConfig, HistoryItem, Role, ToolCallStatus};
