//! Common test utilities and fixtures for toolflow.
//!
//! This module provides shared test infrastructure including:
//! - [`MemoryHost`], an in-memory [`HostBridge`]
//! - Scripted turn builders
//! - [`TestContext`] for tests that touch the file system

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use toolflow::error::{FlowError, FlowResult};
use toolflow::ide::protocol::{message_types, ApplyToFileRequest, ToolCallResponse};
use toolflow::ide::HostBridge;
use toolflow::permissions::ToolPolicy;
use toolflow::types::{ApplyState, ApplyStatus, ChatStreamEvent, ContextItem, ToolCall};

/// Workspace prefix for files held by [`MemoryHost`].
pub const WORKSPACE: &str = "/ws/";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An editor host that keeps everything in memory and records what it was
/// asked to do.
#[derive(Debug, Default)]
pub struct MemoryHost {
    files: Mutex<HashMap<String, String>>,
    applies: Mutex<Vec<ApplyToFileRequest>>,
    tool_calls: Mutex<Vec<ToolCall>>,
    policies: HashMap<String, ToolPolicy>,
    failing_policies: HashSet<String>,
    failing_tools: HashMap<String, String>,
    fail_apply: AtomicBool,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a workspace file at `path` (relative).
    pub fn with_file(self, path: &str, contents: &str) -> Self {
        lock(&self.files).insert(format!("{WORKSPACE}{path}"), contents.to_string());
        self
    }

    /// Makes `evaluate_policy` answer `policy` for `tool`.
    pub fn with_dynamic_policy(mut self, tool: &str, policy: ToolPolicy) -> Self {
        self.policies.insert(tool.to_string(), policy);
        self
    }

    /// Makes `evaluate_policy` fail for `tool`.
    pub fn with_failing_policy(mut self, tool: &str) -> Self {
        self.failing_policies.insert(tool.to_string());
        self
    }

    /// Makes host tool `tool` answer with an error response.
    pub fn with_failing_tool(mut self, tool: &str, message: &str) -> Self {
        self.failing_tools.insert(tool.to_string(), message.to_string());
        self
    }

    /// Makes every apply request fail.
    pub fn failing_apply(self) -> Self {
        self.fail_apply.store(true, Ordering::SeqCst);
        self
    }

    pub fn applies(&self) -> Vec<ApplyToFileRequest> {
        lock(&self.applies).clone()
    }

    pub fn tool_calls(&self) -> Vec<ToolCall> {
        lock(&self.tool_calls).clone()
    }

    /// Current contents of a workspace file.
    pub fn file(&self, path: &str) -> Option<String> {
        lock(&self.files).get(&format!("{WORKSPACE}{path}")).cloned()
    }
}

impl HostBridge for MemoryHost {
    async fn call_tool(&self, tool_call: &ToolCall) -> FlowResult<ToolCallResponse> {
        lock(&self.tool_calls).push(tool_call.clone());
        if let Some(message) = self.failing_tools.get(&tool_call.function_name) {
            return Ok(ToolCallResponse {
                error_message: Some(message.clone()),
                error_reason: Some("failed".to_string()),
                ..ToolCallResponse::default()
            });
        }
        Ok(ToolCallResponse {
            context_items: vec![ContextItem::new(
                &tool_call.function_name,
                "Tool output",
                format!("{} finished for {}", tool_call.function_name, tool_call.id),
            )],
            ..ToolCallResponse::default()
        })
    }

    async fn apply_to_file(&self, request: ApplyToFileRequest) -> FlowResult<()> {
        lock(&self.applies).push(request);
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(FlowError::transport_request(message_types::APPLY_TO_FILE, "host rejected apply"));
        }
        Ok(())
    }

    async fn evaluate_policy(&self, tool_name: &str, base_policy: ToolPolicy, _args: &Value) -> FlowResult<ToolPolicy> {
        if self.failing_policies.contains(tool_name) {
            return Err(FlowError::transport_request(message_types::EVALUATE_POLICY, "policy service down"));
        }
        Ok(self.policies.get(tool_name).copied().unwrap_or(base_policy))
    }

    async fn read_file(&self, filepath: &str) -> FlowResult<String> {
        lock(&self.files)
            .get(filepath)
            .cloned()
            .ok_or_else(|| FlowError::host_io(filepath, "no such file"))
    }

    async fn resolve_relative_path(&self, path: &str) -> FlowResult<Option<String>> {
        let uri = format!("{WORKSPACE}{path}");
        Ok(lock(&self.files).contains_key(&uri).then_some(uri))
    }
}

/// The apply state sequence a host emits for one accepted or rejected edit.
pub fn apply_sequence(request: &ApplyToFileRequest, accepted: usize, rejected: usize) -> Vec<ApplyState> {
    let state = |status| {
        let state = ApplyState::new(&request.stream_id, status).with_filepath(&request.filepath);
        match &request.tool_call_id {
            Some(id) => state.with_tool_call(id),
            None => state,
        }
    };
    vec![
        state(ApplyStatus::NotStarted),
        state(ApplyStatus::Streaming),
        state(ApplyStatus::Done),
        state(ApplyStatus::Closed).with_counts(accepted, rejected),
    ]
}

/// A model turn that calls the given tools, in order.
pub fn tool_turn(calls: &[(&str, &str, Value)]) -> Vec<ChatStreamEvent> {
    let mut events = vec![ChatStreamEvent::text("Working on it.")];
    for (index, (id, name, args)) in calls.iter().enumerate() {
        events.push(ChatStreamEvent::ToolCallStart {
            id: (*id).to_string(),
            name: (*name).to_string(),
            index,
        });
        let json = args.to_string();
        let (head, tail) = json.split_at(json.len() / 2);
        for partial in [head, tail] {
            events.push(ChatStreamEvent::ToolCallArgumentsDelta {
                index,
                partial_json: partial.to_string(),
            });
        }
        events.push(ChatStreamEvent::ToolCallComplete { index });
    }
    events.push(ChatStreamEvent::MessageComplete);
    events
}

/// A model turn that only answers with text.
pub fn text_turn(text: &str) -> Vec<ChatStreamEvent> {
    vec![ChatStreamEvent::text(text), ChatStreamEvent::MessageComplete]
}

/// Test context providing a temporary directory.
pub struct TestContext {
    pub temp_dir: tempfile::TempDir,
}

impl TestContext {
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            temp_dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }

    /// Creates a file in the temporary directory with the given content.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be created or written.
    pub fn create_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create parent dirs");
        }
        std::fs::write(&path, content).expect("failed to write file");
        path
    }

    /// Reads a file from the temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be read.
    pub fn read_file(&self, name: &str) -> String {
        std::fs::read_to_string(self.temp_dir.path().join(name)).expect("failed to read file")
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
