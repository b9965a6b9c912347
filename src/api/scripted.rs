//! Scripted chat client.
//!
//! Replays a fixed list of turns, one per `stream_chat` call, and records
//! every request it receives. Used by the `replay` command and throughout the
//! test suites.
//!
//! A replay script is YAML:
//!
//! ```yaml
//! prompt: Rename the constant
//! reject_edits: false
//! turns:
//!   - - type: content_delta
//!       text: "Renaming it now."
//!     - type: tool_call_start
//!       id: call_1
//!       name: single_find_and_replace
//!     - type: tool_call_arguments_delta
//!       partial_json: '{"filepath":"a.rs","old_string":"A","new_string":"B"}'
//!     - type: tool_call_complete
//!     - type: message_complete
//!   - - type: content_delta
//!       text: Done.
//! ```

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ChatClient;
use crate::error::{FlowError, FlowResult};
use crate::ide::protocol::StreamChatRequest;
use crate::types::stream::ChatStreamEvent;

/// A scripted session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    /// The user message that starts the session.
    pub prompt: String,
    /// Model responses, in order.
    pub turns: Vec<Vec<ChatStreamEvent>>,
    /// Reject every proposed edit instead of accepting it.
    #[serde(default)]
    pub reject_edits: bool,
}

impl Script {
    /// Parses a script from YAML text.
    ///
    /// # Errors
    ///
    /// Returns the YAML error if the text is not a valid script.
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Reads a script file.
    ///
    /// # Errors
    ///
    /// Returns a config error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> FlowResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FlowError::config_io(path.display().to_string(), e.to_string()))?;
        Self::from_yaml(&content)
            .map_err(|e| FlowError::config_parse(path.display().to_string(), e.to_string()))
    }
}

/// Replays canned turns.
#[derive(Debug, Default)]
pub struct ScriptedChatClient {
    turns: Mutex<VecDeque<Vec<ChatStreamEvent>>>,
    requests: Mutex<Vec<StreamChatRequest>>,
}

impl ScriptedChatClient {
    #[must_use]
    pub fn new(turns: Vec<Vec<ChatStreamEvent>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Number of `stream_chat` calls made so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Every request received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<StreamChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Turns not yet replayed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.turns.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl From<&Script> for ScriptedChatClient {
    fn from(script: &Script) -> Self {
        Self::new(script.turns.clone())
    }
}

impl ChatClient for ScriptedChatClient {
    async fn stream_chat(
        &self,
        request: StreamChatRequest,
        tx: mpsc::Sender<ChatStreamEvent>,
        cancel: CancellationToken,
    ) -> FlowResult<()> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        let turn = self
            .turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| FlowError::llm_stream("script exhausted"))?;
        debug!(events = turn.len(), "Replaying scripted turn");

        for event in turn {
            if cancel.is_cancelled() {
                return Err(FlowError::Aborted);
            }
            if let ChatStreamEvent::Error { message } = &event {
                return Err(FlowError::llm_stream(message.clone()));
            }
            if tx.send(event).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}
