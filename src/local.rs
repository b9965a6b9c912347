//! Local file-system host.
//!
//! [`LocalHost`] implements [`HostBridge`] over a workspace directory so the
//! engine can run without an editor: files are read and written with
//! `tokio::fs`, and every apply emits the full apply state sequence
//! (`not-started` → `streaming` → `done` → `closed`) on a channel. Whether the
//! user "accepts" the hunks is fixed up front by an [`ApplyDecision`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use similar::TextDiff;
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{FlowError, FlowResult};
use crate::ide::protocol::{message_types, ApplyToFileRequest, ToolCallResponse};
use crate::ide::HostBridge;
use crate::permissions::ToolPolicy;
use crate::tools::names;
use crate::types::apply::{ApplyState, ApplyStatus};
use crate::types::message::ContextItem;
use crate::types::tool_call::ToolCall;

/// How a local apply resolves its hunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ApplyDecision {
    /// Accept every hunk and write the file.
    #[default]
    Accept,
    /// Reject every hunk and leave the file untouched.
    Reject,
}

/// Number of changed regions between two texts.
#[must_use]
pub fn count_hunks(old: &str, new: &str) -> usize {
    TextDiff::from_lines(old, new).grouped_ops(0).len()
}

/// Unified diff of `old` against `new`, labelled with `path`.
#[must_use]
pub fn unified_diff(path: &str, old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    filepath: String,
}

/// A host backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct LocalHost {
    root: PathBuf,
    decision: ApplyDecision,
    updates: mpsc::UnboundedSender<ApplyState>,
}

impl LocalHost {
    /// Creates a host rooted at `root` that reports apply progress on `updates`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, updates: mpsc::UnboundedSender<ApplyState>) -> Self {
        Self {
            root: root.into(),
            decision: ApplyDecision::default(),
            updates,
        }
    }

    #[must_use]
    pub fn with_decision(mut self, decision: ApplyDecision) -> Self {
        self.decision = decision;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn emit(&self, state: ApplyState) -> FlowResult<()> {
        self.updates.send(state).map_err(|_| {
            FlowError::transport_request(message_types::UPDATE_APPLY_STATE, "apply state receiver closed")
        })
    }

    async fn read_file_tool(&self, tool_call: &ToolCall) -> FlowResult<ToolCallResponse> {
        let args: ReadFileArgs = tool_call
            .parse_arguments()
            .and_then(serde_json::from_value)
            .map_err(|e| FlowError::tool_arguments(names::READ_FILE, e.to_string()))?;

        match fs::read_to_string(self.resolve(&args.filepath)).await {
            Ok(contents) => Ok(ToolCallResponse {
                context_items: vec![ContextItem::new(&args.filepath, "File contents", contents)],
                ..ToolCallResponse::default()
            }),
            Err(e) => Ok(ToolCallResponse {
                error_message: Some(format!("Could not read {}: {e}", args.filepath)),
                error_reason: Some("read_failed".to_string()),
                ..ToolCallResponse::default()
            }),
        }
    }
}

impl HostBridge for LocalHost {
    async fn call_tool(&self, tool_call: &ToolCall) -> FlowResult<ToolCallResponse> {
        match tool_call.function_name.as_str() {
            names::READ_FILE => self.read_file_tool(tool_call).await,
            names::RUN_TERMINAL_COMMAND => Ok(ToolCallResponse {
                error_message: Some("Terminal commands are not available in a local session".to_string()),
                error_reason: Some("unsupported".to_string()),
                ..ToolCallResponse::default()
            }),
            other => Err(FlowError::tool_not_found(other)),
        }
    }

    async fn apply_to_file(&self, request: ApplyToFileRequest) -> FlowResult<()> {
        let path = self.resolve(&request.filepath);
        let original = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(FlowError::host_io(path.display().to_string(), e.to_string())),
        };
        let hunks = count_hunks(&original, &request.text);

        let base = |status| {
            let state = ApplyState::new(&request.stream_id, status).with_filepath(&request.filepath);
            match &request.tool_call_id {
                Some(id) => state.with_tool_call(id),
                None => state,
            }
        };

        self.emit(base(ApplyStatus::NotStarted))?;
        self.emit(base(ApplyStatus::Streaming))?;
        let mut done = base(ApplyStatus::Done);
        done.num_diffs = Some(hunks);
        done.original_file_content = Some(original);
        done.file_content = Some(request.text.clone());
        self.emit(done)?;

        let closed = match self.decision {
            ApplyDecision::Accept => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .await
                        .map_err(|e| FlowError::host_io(parent.display().to_string(), e.to_string()))?;
                }
                fs::write(&path, &request.text)
                    .await
                    .map_err(|e| FlowError::host_io(path.display().to_string(), e.to_string()))?;
                info!(path = %path.display(), hunks, "Applied edit");
                base(ApplyStatus::Closed).with_counts(hunks, 0)
            }
            ApplyDecision::Reject => {
                info!(path = %path.display(), hunks, "Rejected edit");
                base(ApplyStatus::Closed).with_counts(0, hunks.max(1))
            }
        };
        self.emit(closed)
    }

    async fn evaluate_policy(&self, tool_name: &str, base_policy: ToolPolicy, _args: &Value) -> FlowResult<ToolPolicy> {
        debug!(tool = %tool_name, policy = %base_policy, "Local host keeps static policy");
        Ok(base_policy)
    }

    async fn read_file(&self, filepath: &str) -> FlowResult<String> {
        let path = self.resolve(filepath);
        fs::read_to_string(&path)
            .await
            .map_err(|e| FlowError::host_io(path.display().to_string(), e.to_string()))
    }

    async fn resolve_relative_path(&self, path: &str) -> FlowResult<Option<String>> {
        let candidate = self.resolve(path);
        match fs::metadata(&candidate).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(candidate.display().to_string())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FlowError::host_io(candidate.display().to_string(), e.to_string())),
        }
    }
}
