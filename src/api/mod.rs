//! LLM chat clients.
//!
//! The coordinator talks to the model through [`ChatClient`]. A client pushes
//! [`ChatStreamEvent`]s into the provided channel as they arrive and returns
//! once the response has ended.
//!
//! - [`MessengerChatClient`] streams through the host (`llm/streamChat`)
//! - [`ScriptedChatClient`] replays canned turns, for tests and `replay`

pub mod messenger_client;
pub mod scripted;

use std::future::Future;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::FlowResult;
use crate::ide::protocol::StreamChatRequest;
use crate::types::stream::ChatStreamEvent;

pub use messenger_client::MessengerChatClient;
pub use scripted::{Script, ScriptedChatClient};

/// A streaming chat completion backend.
pub trait ChatClient: Send + Sync {
    /// Streams one model response into `tx`.
    ///
    /// Returns `Err(FlowError::Aborted)` when `cancel` fires first. A closed
    /// receiver ends the stream early without error.
    fn stream_chat(
        &self,
        request: StreamChatRequest,
        tx: mpsc::Sender<ChatStreamEvent>,
        cancel: CancellationToken,
    ) -> impl Future<Output = FlowResult<()>> + Send;
}
