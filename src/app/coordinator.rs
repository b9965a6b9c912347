//! Orchestration coordinator.
//!
//! Drives one conversation: streams model responses into history, prepares
//! and dispatches the tool calls they contain, couples edit tool calls to
//! their apply streams and resumes the model once every call of a turn has a
//! result.
//!
//! # Turn lifecycle
//!
//! ```text
//! submit()
//!    │
//!    ▼
//! ┌──────────────┐  no tool calls   ┌───────────┐
//! │  Streaming   │ ───────────────▶ │ Completed │
//! └──────┬───────┘                  └───────────┘
//!        │ tool calls generated
//!        ▼
//! ┌──────────────┐  any ask         ┌──────────────────┐  approve / reject
//! │  Preparing   │ ───────────────▶ │ AwaitingApproval │ ──────────────────┐
//! │ plan, policy │                  └──────────────────┘                   │
//! └──────┬───────┘                                                         │
//!        │ all auto                                                        │
//!        ▼                                                                 │
//! ┌──────────────┐  edit in flight  ┌───────────────┐  apply closed        │
//! │ Dispatching  │ ───────────────▶ │ AwaitingApply │ ─────────────────────┤
//! └──────┬───────┘                  └───────────────┘                      │
//!        │ every call terminal                                             │
//!        ▼                                                                 │
//! ┌──────────────┐ ◀───────────────────────────────────────────────────────┘
//! │   Resume     │ ── user rejected ──▶ Halted
//! └──────┬───────┘
//!        │ depth + 1
//!        └──────────▶ Streaming
//! ```
//!
//! Each turn resumes at most once. Calls of a batch run concurrently; every
//! history mutation goes through [`ConversationHistoryStore`] keyed by tool
//! call id.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::apply_state::{resolve_closed, ApplyStateRegistry, ApplyUpdate};
use super::reconcile::{self, ReconcileReport};
use super::store::ConversationHistoryStore;
use super::tool_call::{advance, cancellation_output, ToolCallEvent};
use crate::api::ChatClient;
use crate::error::{FlowError, FlowResult};
use crate::ide::protocol::StreamChatRequest;
use crate::ide::HostBridge;
use crate::permissions::{BatchDecision, PolicyEvaluator, ToolPolicy};
use crate::tools::edit_tools::{merge_plan, plan_edit, EditPlan};
use crate::tools::{EditTool, RegisteredTool, ToolKind, ToolRegistry};
use crate::types::apply::{ApplyState, ApplyStatus};
use crate::types::config::EngineConfig;
use crate::types::message::{render_context_items, ChatMessage, ContextItem, HistoryItem};
use crate::types::stream::ChatStreamEvent;
use crate::types::tool_call::{ToolCall, ToolCallState, ToolCallStatus};

const EVENT_BUFFER: usize = 64;

/// Result content for a tool call whose apply request failed.
pub const APPLY_ERROR_MESSAGE: &str = "Error editing file: failed to apply changes to file.\n\nPlease try again with correct args or notify the user and request further instructions.";

/// Where a turn stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model answered without calling tools.
    Completed,
    /// The batch is paused until the user approves or rejects these calls.
    AwaitingApproval { tool_call_ids: Vec<String> },
    /// These calls are still running, usually waiting for their apply stream
    /// to close.
    AwaitingApply { tool_call_ids: Vec<String> },
    /// The user rejected a tool call; the model was not resumed.
    Halted,
    /// The resumption depth limit was reached.
    DepthExceeded,
    /// The turn was aborted and history reconciled.
    Aborted,
}

enum ResumeDecision {
    Continue,
    Halted,
    Wait(TurnOutcome),
    AlreadyResumed,
    Aborted,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Output for a call that failed validation or execution.
fn error_output(tool_name: &str, error: &FlowError) -> Vec<ContextItem> {
    vec![ContextItem::new(
        "Tool Call Error",
        "Tool call failed",
        format!(
            "{tool_name} failed with the message: {}\n\nPlease try something else or request further instructions.",
            error.tool_output()
        ),
    )]
}

/// Output for a call refused by policy.
fn policy_violation_output(state: &ToolCallState) -> Vec<ContextItem> {
    let command = state
        .effective_args()
        .get("command")
        .and_then(Value::as_str)
        .unwrap_or_else(|| state.function_name());
    vec![ContextItem::new(
        "Security Policy Violation",
        "Command Disabled",
        format!(
            "This command has been disabled by security policy:\n\n{command}\n\n\
             This command cannot be executed as it may pose a security risk."
        ),
    )]
}

fn apply_error_output() -> Vec<ContextItem> {
    vec![ContextItem::new(
        "Apply Error",
        "Failed to apply changes",
        APPLY_ERROR_MESSAGE,
    )]
}

// ============================================================================
// Response streaming
// ============================================================================

/// Bookkeeping for one streamed response.
#[derive(Debug, Default)]
struct ResponseState {
    /// Stream index to tool call id.
    calls: HashMap<usize, String>,
    thinking_id: Option<String>,
    error: Option<String>,
}

fn item_mut<'a>(items: &'a mut [HistoryItem], message_id: &str) -> Option<&'a mut HistoryItem> {
    items.iter_mut().rev().find(|item| item.message.id == message_id)
}

impl ResponseState {
    fn apply(&mut self, items: &mut Vec<HistoryItem>, assistant_id: &str, event: ChatStreamEvent) {
        match event {
            ChatStreamEvent::ContentDelta { text } => {
                if let Some(item) = item_mut(items, assistant_id) {
                    item.message.content.push_str(&text);
                }
            }
            ChatStreamEvent::ThinkingDelta { text } => self.append_thinking(items, assistant_id, &text),
            ChatStreamEvent::ToolCallStart { id, name, index } => {
                let Some(item) = item_mut(items, assistant_id) else {
                    return;
                };
                if item.tool_call_state(&id).is_some() {
                    warn!(tool_call_id = %id, "Duplicate tool call start");
                    return;
                }
                debug!(tool_call_id = %id, tool = %name, index, "Tool call started");
                let call = ToolCall::new(&id, name, "");
                item.message.tool_calls.push(call.clone());
                item.tool_call_states.push(ToolCallState::generating(call));
                self.calls.insert(index, id);
            }
            ChatStreamEvent::ToolCallArgumentsDelta { index, partial_json } => {
                let Some(id) = self.calls.get(&index) else {
                    warn!(index, "Arguments for unknown tool call index");
                    return;
                };
                let Some(item) = item_mut(items, assistant_id) else {
                    return;
                };
                if let Some(call) = item.message.tool_calls.iter_mut().find(|call| &call.id == id) {
                    call.raw_arguments.push_str(&partial_json);
                }
                if let Some(state) = item.tool_call_state_mut(id) {
                    state.tool_call.raw_arguments.push_str(&partial_json);
                }
            }
            ChatStreamEvent::ToolCallComplete { index } => {
                if let Some(id) = self.calls.get(&index) {
                    complete_arguments(items, assistant_id, id);
                } else {
                    warn!(index, "Completion for unknown tool call index");
                }
            }
            ChatStreamEvent::MessageComplete => {}
            ChatStreamEvent::Error { message } => self.error = Some(message),
        }
    }

    fn append_thinking(&mut self, items: &mut Vec<HistoryItem>, assistant_id: &str, text: &str) {
        if let Some(item) = self.thinking_id.as_deref().and_then(|id| item_mut(items, id)) {
            item.message.content.push_str(text);
            return;
        }
        let Some(position) = items.iter().rposition(|item| item.message.id == assistant_id) else {
            return;
        };
        let message = ChatMessage::thinking(text);
        self.thinking_id = Some(message.id.clone());
        items.insert(position, HistoryItem::new(message));
    }
}

/// Parses the streamed arguments of a `generating` call.
///
/// Unparseable arguments fail the call and append its result.
fn complete_arguments(items: &mut Vec<HistoryItem>, assistant_id: &str, tool_call_id: &str) {
    let Some(state) = item_mut(items, assistant_id).and_then(|item| item.tool_call_state_mut(tool_call_id)) else {
        return;
    };
    if state.status != ToolCallStatus::Generating {
        return;
    }

    match state.tool_call.parse_arguments() {
        Ok(args) => {
            state.parsed_args = args;
            advance(state, ToolCallEvent::ArgumentsComplete);
        }
        Err(e) => {
            let name = state.function_name().to_string();
            warn!(tool_call_id = %tool_call_id, tool = %name, error = %e, "Invalid tool call arguments");
            let error = FlowError::tool_arguments(&name, format!("Invalid JSON arguments: {e}"));
            let output = error_output(&name, &error);
            let content = render_context_items(&output);
            advance(state, ToolCallEvent::Fail);
            state.output = Some(output);
            items.push(HistoryItem::new(ChatMessage::tool_result(tool_call_id, content)));
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Drives tool calls and apply streams for one conversation.
pub struct Coordinator<H, L> {
    host: H,
    llm: L,
    history: ConversationHistoryStore,
    applies: Mutex<ApplyStateRegistry>,
    policy: PolicyEvaluator,
    tools: ToolRegistry,
    config: EngineConfig,
    /// Approval decision per tool call.
    decisions: Mutex<HashMap<String, ToolPolicy>>,
    /// Assistant messages whose turn already resumed.
    resumed: Mutex<HashSet<String>>,
    /// Tool calls the user turned down.
    user_rejected: Mutex<HashSet<String>>,
    depth: AtomicU32,
    cancel: Mutex<CancellationToken>,
}

impl<H, L> std::fmt::Debug for Coordinator<H, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("history_len", &self.history.len())
            .field("tools", &self.tools.len())
            .field("depth", &self.depth.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<H: HostBridge, L: ChatClient> Coordinator<H, L> {
    /// Creates a coordinator with the built-in tools and empty history.
    #[must_use]
    pub fn new(host: H, llm: L, config: EngineConfig) -> Self {
        Self {
            host,
            llm,
            history: ConversationHistoryStore::new(),
            applies: Mutex::new(ApplyStateRegistry::new()),
            policy: PolicyEvaluator::from_config(&config),
            tools: ToolRegistry::builtin(),
            config,
            decisions: Mutex::new(HashMap::new()),
            resumed: Mutex::new(HashSet::new()),
            user_rejected: Mutex::new(HashSet::new()),
            depth: AtomicU32::new(0),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Replaces the tool registry.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Seeds the history.
    #[must_use]
    pub fn with_history(mut self, items: Vec<HistoryItem>) -> Self {
        self.history = ConversationHistoryStore::from_items(items);
        self
    }

    #[must_use]
    pub fn history(&self) -> &ConversationHistoryStore {
        &self.history
    }

    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    #[must_use]
    pub fn llm(&self) -> &L {
        &self.llm
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Depth of the most recent model response.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::SeqCst)
    }

    /// Returns the stored state of an apply stream.
    #[must_use]
    pub fn apply_state(&self, stream_id: &str) -> Option<ApplyState> {
        lock(&self.applies).get(stream_id).cloned()
    }

    /// Returns the open apply stream of a tool call.
    #[must_use]
    pub fn active_apply_for(&self, tool_call_id: &str) -> Option<ApplyState> {
        lock(&self.applies).active_for_tool_call(tool_call_id).cloned()
    }

    /// Returns the edit-mode apply state while edit mode is active.
    #[must_use]
    pub fn edit_mode(&self) -> Option<ApplyState> {
        lock(&self.applies).edit_mode().cloned()
    }

    /// Token for work started by a user decision or host event.
    ///
    /// An abort that already fired does not carry over to new work.
    fn begin_work(&self) -> CancellationToken {
        let mut token = lock(&self.cancel);
        if token.is_cancelled() {
            debug!("Replacing cancelled token");
            *token = CancellationToken::new();
        }
        token.clone()
    }

    /// Adds a user message and runs the conversation until it needs input.
    ///
    /// # Errors
    ///
    /// Returns the stream error when the model response fails. History is
    /// reconciled first.
    pub async fn submit(&self, prompt: impl Into<String>) -> FlowResult<TurnOutcome> {
        let cancel = {
            let mut token = lock(&self.cancel);
            *token = CancellationToken::new();
            token.clone()
        };
        self.history.push(ChatMessage::user(prompt).into());
        self.run_from(0, &cancel).await
    }

    /// Cancels the running stream and any pending host tool call.
    ///
    /// Cancelling twice, or after the turn ended, does nothing. Calls paused
    /// for approval stay paused.
    pub fn abort(&self) {
        let token = lock(&self.cancel);
        if !token.is_cancelled() {
            info!("Aborting current turn");
            token.cancel();
        }
    }

    /// Runs end-of-turn reconciliation on the history and forgets the
    /// bookkeeping of anything no longer in it.
    pub fn clear_last_empty_response(&self) -> ReconcileReport {
        let report = self.history.transaction(reconcile::clear_last_empty_response);
        self.prune_bookkeeping();
        report
    }

    /// Drops every item after `message_id`, then reconciles.
    ///
    /// Returns the number of items removed.
    pub fn truncate_history_to(&self, message_id: &str) -> usize {
        let mut keep = true;
        let removed = self.history.retain(|item| {
            let kept = keep;
            if item.message.id == message_id {
                keep = false;
            }
            kept
        });
        if removed > 0 {
            info!(message_id = %message_id, removed, "Truncated history");
            self.clear_last_empty_response();
        }
        removed
    }

    /// Deletes one history item, then reconciles.
    ///
    /// Results of tool calls the item carried become orphans and are removed
    /// with it.
    pub fn delete_message(&self, message_id: &str) -> bool {
        if !self.history.remove_item(message_id) {
            warn!(message_id = %message_id, "Delete for unknown message");
            return false;
        }
        info!(message_id = %message_id, "Deleted message");
        self.clear_last_empty_response();
        true
    }

    fn prune_bookkeeping(&self) {
        let (messages, calls) = self.history.transaction(|items| {
            let messages: HashSet<String> = items.iter().map(|item| item.message.id.clone()).collect();
            let calls: HashSet<String> = items
                .iter()
                .flat_map(|item| item.tool_call_states.iter().map(|state| state.tool_call_id.clone()))
                .collect();
            (messages, calls)
        });

        lock(&self.decisions).retain(|id, _| calls.contains(id));
        lock(&self.user_rejected).retain(|id| calls.contains(id));
        lock(&self.resumed).retain(|id| messages.contains(id));
        let streams = lock(&self.applies).retain_tool_calls(|id| calls.contains(id));
        if streams > 0 {
            debug!(streams, "Dropped apply streams of removed tool calls");
        }
    }

    async fn run_from(&self, mut depth: u32, cancel: &CancellationToken) -> FlowResult<TurnOutcome> {
        loop {
            if depth >= self.config.max_depth {
                warn!(depth, max_depth = self.config.max_depth, "Tool loop depth limit reached");
                return Ok(TurnOutcome::DepthExceeded);
            }
            self.depth.store(depth, Ordering::SeqCst);

            let assistant_id = match self.stream_response(cancel.clone()).await {
                Ok(id) => id,
                Err(FlowError::Aborted) => {
                    self.clear_last_empty_response();
                    return Ok(TurnOutcome::Aborted);
                }
                Err(e) => {
                    warn!(error = %e, depth, "Model response failed");
                    self.clear_last_empty_response();
                    return Err(e);
                }
            };

            if self.calls_of(&assistant_id).is_empty() {
                info!(depth, "Turn completed");
                return Ok(TurnOutcome::Completed);
            }

            self.run_batch(&assistant_id, cancel).await;

            match self.claim_resume(&assistant_id, cancel) {
                ResumeDecision::Continue => {
                    depth += 1;
                    info!(depth, "Resuming after tool calls");
                }
                ResumeDecision::Halted => return Ok(TurnOutcome::Halted),
                ResumeDecision::Wait(outcome) => return Ok(outcome),
                ResumeDecision::AlreadyResumed => return Ok(TurnOutcome::Completed),
                ResumeDecision::Aborted => {
                    self.clear_last_empty_response();
                    return Ok(TurnOutcome::Aborted);
                }
            }
        }
    }

    /// Streams one model response into a new assistant item.
    async fn stream_response(&self, cancel: CancellationToken) -> FlowResult<String> {
        let messages = self
            .history
            .snapshot()
            .into_iter()
            .map(|item| item.message)
            .collect();
        let request = StreamChatRequest {
            messages,
            tools: self.tools.definitions(),
        };

        let assistant = ChatMessage::assistant("");
        let assistant_id = assistant.id.clone();
        self.history.push(assistant.into());

        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let consume = async {
            let mut response = ResponseState::default();
            while let Some(event) = rx.recv().await {
                self.history
                    .transaction(|items| response.apply(items, &assistant_id, event));
            }
            response
        };
        let (result, response) = tokio::join!(self.llm.stream_chat(request, tx, cancel), consume);
        result?;
        if let Some(message) = response.error {
            return Err(FlowError::llm_stream(message));
        }

        self.history.transaction(|items| {
            let pending: Vec<String> = item_mut(items, &assistant_id)
                .map(|item| {
                    item.tool_call_states
                        .iter()
                        .filter(|state| state.status == ToolCallStatus::Generating)
                        .map(|state| state.tool_call_id.clone())
                        .collect()
                })
                .unwrap_or_default();
            for id in pending {
                complete_arguments(items, &assistant_id, &id);
            }
        });

        debug!(message_id = %assistant_id, "Model response complete");
        Ok(assistant_id)
    }

    fn calls_of(&self, assistant_id: &str) -> Vec<ToolCallState> {
        self.history.transaction(|items| {
            item_mut(items, assistant_id)
                .map(|item| item.tool_call_states.clone())
                .unwrap_or_default()
        })
    }

    fn owner_of(&self, tool_call_id: &str) -> Option<String> {
        self.history.transaction(|items| {
            items
                .iter()
                .rev()
                .find(|item| item.tool_call_state(tool_call_id).is_some())
                .map(|item| item.message.id.clone())
        })
    }

    // ========================================================================
    // Batch preparation and dispatch
    // ========================================================================

    async fn run_batch(&self, assistant_id: &str, cancel: &CancellationToken) {
        let generated: Vec<ToolCallState> = self
            .calls_of(assistant_id)
            .into_iter()
            .filter(|state| state.status == ToolCallStatus::Generated)
            .collect();

        let prepared = join_all(generated.iter().map(|state| self.prepare_call(state))).await;
        let decision = BatchDecision::from_policies(prepared.into_iter().flatten().collect());

        {
            let mut decisions = lock(&self.decisions);
            for id in &decision.auto_approved {
                decisions.insert(id.clone(), ToolPolicy::Auto);
            }
            for id in &decision.pending_approval {
                decisions.insert(id.clone(), ToolPolicy::Ask);
            }
        }

        for id in &decision.rejected {
            if let Some(state) = self.history.find_tool_call(id) {
                info!(tool_call_id = %id, tool = %state.function_name(), "Tool call refused by policy");
                self.finish_call(id, ToolCallEvent::Cancel, policy_violation_output(&state));
            }
        }

        if !decision.continue_streaming {
            info!(
                pending = decision.pending_approval.len(),
                auto = decision.auto_approved.len(),
                "Waiting for tool call approval"
            );
            return;
        }

        join_all(decision.to_dispatch().iter().map(|id| self.dispatch(id, cancel))).await;
    }

    /// Validates and enhances arguments, then resolves the policy.
    ///
    /// Returns `None` when the call failed preparation.
    async fn prepare_call(&self, state: &ToolCallState) -> Option<(String, ToolPolicy)> {
        let id = &state.tool_call_id;
        let tool = match self.tools.resolve(state.function_name()) {
            Ok(tool) => tool,
            Err(e) => {
                warn!(tool_call_id = %id, error = %e, "Unknown tool");
                self.fail_call(id, state.function_name(), &e);
                return None;
            }
        };

        let args = match tool.kind {
            ToolKind::Edit(edit) => match plan_edit(edit, &state.parsed_args, &self.host).await {
                Ok(plan) => {
                    let processed = merge_plan(&state.parsed_args, &plan);
                    let stored = processed.clone();
                    if let Err(e) = self
                        .history
                        .mutate_tool_call(id, move |state| state.processed_args = Some(stored))
                    {
                        warn!(tool_call_id = %id, error = %e, "Tool call vanished during preparation");
                        return None;
                    }
                    processed
                }
                Err(e) => {
                    warn!(tool_call_id = %id, error = %e, "Tool call failed validation");
                    self.fail_call(id, state.function_name(), &e);
                    return None;
                }
            },
            ToolKind::Host => state.parsed_args.clone(),
        };

        let policy = self.resolve_policy(tool, &args).await;
        Some((id.clone(), policy))
    }

    async fn resolve_policy(&self, tool: &RegisteredTool, args: &Value) -> ToolPolicy {
        let name = tool.definition.name.as_str();
        let base = self.policy.base_policy(name, Some(tool.default_policy));
        let dynamic = if base == ToolPolicy::Never {
            None
        } else {
            Some(self.host.evaluate_policy(name, base, args).await)
        };
        let policy = PolicyEvaluator::tighten(base, dynamic);
        debug!(tool = %name, %base, %policy, "Resolved tool policy");
        policy
    }

    async fn dispatch(&self, tool_call_id: &str, cancel: &CancellationToken) {
        let state = match self
            .history
            .mutate_tool_call(tool_call_id, |state| {
                advance(state, ToolCallEvent::Dispatch).map(|_| state.clone())
            }) {
            Ok(Some(state)) => state,
            Ok(None) => return,
            Err(e) => {
                warn!(tool_call_id = %tool_call_id, error = %e, "Cannot dispatch tool call");
                return;
            }
        };

        let kind = match self.tools.resolve(state.function_name()) {
            Ok(tool) => tool.kind,
            Err(e) => {
                self.fail_call(tool_call_id, state.function_name(), &e);
                return;
            }
        };

        info!(tool_call_id = %tool_call_id, tool = %state.function_name(), "Dispatching tool call");
        match kind {
            ToolKind::Host => self.call_host_tool(&state, cancel).await,
            ToolKind::Edit(edit) => self.apply_for_edit_tool(edit, &state).await,
        }
    }

    async fn call_host_tool(&self, state: &ToolCallState, cancel: &CancellationToken) {
        let id = &state.tool_call_id;
        let result = tokio::select! {
            result = self.host.call_tool(&state.tool_call) => result,
            () = cancel.cancelled() => Err(FlowError::Aborted),
        };

        match result {
            Ok(response) if response.is_error() => {
                let message = response.error_message.unwrap_or_default();
                warn!(tool_call_id = %id, error = %message, reason = ?response.error_reason, "Host tool failed");
                let error = FlowError::tool_execution(state.function_name(), message);
                self.fail_call(id, state.function_name(), &error);
            }
            Ok(response) => {
                self.finish_call(id, ToolCallEvent::Succeed, response.context_items);
            }
            Err(FlowError::Aborted) => {
                info!(tool_call_id = %id, "Host tool call aborted");
                self.finish_call(id, ToolCallEvent::Cancel, cancellation_output());
            }
            Err(e) => {
                warn!(tool_call_id = %id, error = %e, "Host tool request failed");
                self.fail_call(id, state.function_name(), &e);
            }
        }
    }

    /// Starts the apply stream for an edit. The call stays `calling` until
    /// the stream closes.
    async fn apply_for_edit_tool(&self, edit: EditTool, state: &ToolCallState) {
        let id = &state.tool_call_id;
        let plan = match EditPlan::from_processed_args(edit, state.effective_args()) {
            Ok(plan) => plan,
            Err(e) => {
                self.fail_call(id, state.function_name(), &e);
                return;
            }
        };

        let stream_id = Uuid::new_v4().to_string();
        let initial = ApplyState::new(&stream_id, ApplyStatus::NotStarted)
            .with_tool_call(id)
            .with_filepath(&plan.file_uri);
        lock(&self.applies).update(initial);

        if let Err(e) = self.host.apply_to_file(plan.apply_request(&stream_id, id)).await {
            self.handle_apply_error(id, &stream_id, &e);
        }
    }

    fn handle_apply_error(&self, tool_call_id: &str, stream_id: &str, error: &FlowError) {
        if lock(&self.applies).is_closed(stream_id) {
            debug!(tool_call_id = %tool_call_id, stream_id, "Apply error after stream closed");
            return;
        }
        warn!(tool_call_id = %tool_call_id, stream_id, error = %error, "Apply request failed");

        match self.history.find_tool_call(tool_call_id) {
            Some(state) if state.status == ToolCallStatus::Calling => {
                self.finish_call(tool_call_id, ToolCallEvent::Fail, apply_error_output());
            }
            _ => debug!(tool_call_id = %tool_call_id, "Suppressing apply error for finished tool call"),
        }
    }

    /// Moves a call to a terminal status, records its output and appends the
    /// result message. Returns false when the transition was refused.
    fn finish_call(&self, tool_call_id: &str, event: ToolCallEvent, output: Vec<ContextItem>) -> bool {
        let rendered = self.history.mutate_tool_call(tool_call_id, |state| {
            advance(state, event)?;
            let content = render_context_items(&output);
            state.output = Some(output);
            Some(content)
        });

        match rendered {
            Ok(Some(content)) => {
                self.history.append_tool_result(tool_call_id, content);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(tool_call_id = %tool_call_id, error = %e, "Cannot finish tool call");
                false
            }
        }
    }

    fn fail_call(&self, tool_call_id: &str, tool_name: &str, error: &FlowError) -> bool {
        self.finish_call(tool_call_id, ToolCallEvent::Fail, error_output(tool_name, error))
    }

    // ========================================================================
    // Resumption
    // ========================================================================

    fn claim_resume(&self, assistant_id: &str, cancel: &CancellationToken) -> ResumeDecision {
        let states = self.calls_of(assistant_id);

        let awaiting: Vec<String> = states
            .iter()
            .filter(|state| state.status == ToolCallStatus::Generated)
            .map(|state| state.tool_call_id.clone())
            .collect();
        if !awaiting.is_empty() {
            return ResumeDecision::Wait(TurnOutcome::AwaitingApproval {
                tool_call_ids: awaiting,
            });
        }

        let running: Vec<String> = states
            .iter()
            .filter(|state| !state.status.is_terminal())
            .map(|state| state.tool_call_id.clone())
            .collect();
        if !running.is_empty() {
            debug!(running = running.len(), "Tool calls still running");
            return ResumeDecision::Wait(TurnOutcome::AwaitingApply {
                tool_call_ids: running,
            });
        }

        for state in &states {
            if !self.history.has_tool_result(&state.tool_call_id) {
                let content = state
                    .output
                    .as_deref()
                    .map(render_context_items)
                    .unwrap_or_default();
                self.history.append_tool_result(&state.tool_call_id, content);
            }
        }

        if !lock(&self.resumed).insert(assistant_id.to_string()) {
            debug!(message_id = %assistant_id, "Turn already resumed");
            return ResumeDecision::AlreadyResumed;
        }

        if cancel.is_cancelled() {
            info!(message_id = %assistant_id, "Not resuming aborted turn");
            return ResumeDecision::Aborted;
        }

        let rejected = {
            let rejected = lock(&self.user_rejected);
            states.iter().any(|state| rejected.contains(&state.tool_call_id))
        };
        if rejected && !self.config.continue_after_rejection {
            info!(message_id = %assistant_id, "Not resuming after user rejection");
            return ResumeDecision::Halted;
        }

        ResumeDecision::Continue
    }

    async fn resume_if_ready(&self, assistant_id: &str, cancel: &CancellationToken) -> FlowResult<Option<TurnOutcome>> {
        match self.claim_resume(assistant_id, cancel) {
            ResumeDecision::Continue => {
                let depth = self.depth() + 1;
                info!(depth, "Resuming after tool calls");
                self.run_from(depth, cancel).await.map(Some)
            }
            ResumeDecision::Halted => Ok(Some(TurnOutcome::Halted)),
            ResumeDecision::Wait(outcome) => Ok(Some(outcome)),
            ResumeDecision::AlreadyResumed => Ok(None),
            ResumeDecision::Aborted => {
                self.clear_last_empty_response();
                Ok(Some(TurnOutcome::Aborted))
            }
        }
    }

    async fn resume_for_call(&self, tool_call_id: &str, cancel: &CancellationToken) -> FlowResult<Option<TurnOutcome>> {
        match self.owner_of(tool_call_id) {
            Some(owner) => self.resume_if_ready(&owner, cancel).await,
            None => Ok(None),
        }
    }

    /// Dispatches the auto-approved calls of a paused batch once no call of
    /// that batch waits for approval.
    async fn release_batch(&self, tool_call_id: &str, cancel: &CancellationToken) {
        let Some(owner) = self.owner_of(tool_call_id) else {
            return;
        };
        let states = self.calls_of(&owner);

        let ready: Vec<String> = {
            let decisions = lock(&self.decisions);
            let generated = states
                .iter()
                .filter(|state| state.status == ToolCallStatus::Generated);
            let asking = generated
                .clone()
                .any(|state| decisions.get(&state.tool_call_id) != Some(&ToolPolicy::Auto));
            if asking {
                Vec::new()
            } else {
                generated.map(|state| state.tool_call_id.clone()).collect()
            }
        };

        if !ready.is_empty() {
            debug!(count = ready.len(), "Releasing paused batch");
            join_all(ready.iter().map(|id| self.dispatch(id, cancel))).await;
        }
    }

    // ========================================================================
    // User decisions and host events
    // ========================================================================

    /// Approves a call waiting for approval and dispatches it.
    ///
    /// Returns where the turn stands afterwards, or `None` if nothing changed.
    ///
    /// # Errors
    ///
    /// Returns the stream error if resuming the model fails.
    pub async fn approve_tool_call(&self, tool_call_id: &str) -> FlowResult<Option<TurnOutcome>> {
        let Some(state) = self.history.find_tool_call(tool_call_id) else {
            warn!(tool_call_id = %tool_call_id, "Approval for unknown tool call");
            return Ok(None);
        };
        if state.status != ToolCallStatus::Generated {
            warn!(tool_call_id = %tool_call_id, status = %state.status, "Tool call is not awaiting approval");
            return Ok(None);
        }

        info!(tool_call_id = %tool_call_id, "Tool call approved");
        lock(&self.decisions).insert(tool_call_id.to_string(), ToolPolicy::Auto);
        let cancel = self.begin_work();
        self.dispatch(tool_call_id, &cancel).await;
        self.release_batch(tool_call_id, &cancel).await;
        self.resume_for_call(tool_call_id, &cancel).await
    }

    /// Rejects a call waiting for approval.
    ///
    /// # Errors
    ///
    /// Returns the stream error if resuming the model fails.
    pub async fn reject_tool_call(&self, tool_call_id: &str) -> FlowResult<Option<TurnOutcome>> {
        match self.history.find_tool_call(tool_call_id) {
            Some(state) if state.status == ToolCallStatus::Generated => {
                self.cancel_tool_call(tool_call_id).await
            }
            Some(state) => {
                warn!(tool_call_id = %tool_call_id, status = %state.status, "Tool call is not awaiting approval");
                Ok(None)
            }
            None => {
                warn!(tool_call_id = %tool_call_id, "Rejection for unknown tool call");
                Ok(None)
            }
        }
    }

    /// Cancels a call in any non-terminal status.
    ///
    /// A cancellation result is appended unless the call already has one.
    /// Cancelling a finished call is a no-op. Sibling calls keep running.
    ///
    /// # Errors
    ///
    /// Returns the stream error if resuming the model fails.
    pub async fn cancel_tool_call(&self, tool_call_id: &str) -> FlowResult<Option<TurnOutcome>> {
        if !self.finish_call(tool_call_id, ToolCallEvent::Cancel, cancellation_output()) {
            return Ok(None);
        }
        info!(tool_call_id = %tool_call_id, "Tool call canceled by user");
        lock(&self.user_rejected).insert(tool_call_id.to_string());
        let cancel = self.begin_work();
        self.release_batch(tool_call_id, &cancel).await;
        self.resume_for_call(tool_call_id, &cancel).await
    }

    /// Feeds an apply state update from the host.
    ///
    /// The first `closed` update of a stream finishes its tool call and may
    /// resume the model. Everything else only updates bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns the stream error if resuming the model fails.
    pub async fn handle_apply_state_update(&self, update: ApplyState) -> FlowResult<Option<TurnOutcome>> {
        let update = lock(&self.applies).update(update);
        let closed = match update {
            ApplyUpdate::Closed(state) => state,
            ApplyUpdate::EditModeClosed(state) => {
                info!(
                    accepted = ?state.num_accepted,
                    rejected = ?state.num_rejected,
                    "Edit mode apply closed, leaving edit mode"
                );
                return Ok(None);
            }
            ApplyUpdate::Progress(_) | ApplyUpdate::EditMode(_) | ApplyUpdate::Ignored => return Ok(None),
        };

        let Some(tool_call_id) = closed.tool_call_id.clone() else {
            debug!(stream_id = %closed.stream_id, "Closed apply stream has no tool call");
            return Ok(None);
        };
        match self.history.find_tool_call(&tool_call_id) {
            Some(state) if state.status == ToolCallStatus::Calling => {}
            Some(state) => {
                debug!(tool_call_id = %tool_call_id, status = %state.status, "Apply closed for finished tool call");
                return Ok(None);
            }
            None => {
                warn!(tool_call_id = %tool_call_id, stream_id = %closed.stream_id, "Apply closed for unknown tool call");
                return Ok(None);
            }
        }

        let resolution = resolve_closed(&closed);
        let event = match resolution.status {
            ToolCallStatus::Canceled => ToolCallEvent::Cancel,
            ToolCallStatus::Errored => ToolCallEvent::Fail,
            _ => ToolCallEvent::Succeed,
        };
        info!(
            tool_call_id = %tool_call_id,
            stream_id = %closed.stream_id,
            status = %resolution.status,
            "Apply closed"
        );
        if self.finish_call(&tool_call_id, event, resolution.output) && resolution.user_rejected {
            lock(&self.user_rejected).insert(tool_call_id.clone());
        }

        let cancel = self.begin_work();
        self.resume_for_call(&tool_call_id, &cancel).await
    }
}
