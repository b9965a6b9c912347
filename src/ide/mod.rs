//! Host integration.
//!
//! The engine runs next to an editor host that owns files, executes host-side
//! tools, applies edits to live buffers and may evaluate tool policies. All
//! of that is reached through the [`HostBridge`] trait; [`Messenger`] is the
//! implementation that talks to a real host over a [`Channel`].
//!
//! # Architecture
//!
//! ```text
//! Coordinator ──HostBridge──▶ Messenger ──Channel──▶ host process
//!      ▲                          │
//!      └──── updateApplyState ◀───┘ Messenger::receive()
//! ```

pub mod messenger;
pub mod protocol;

use std::future::Future;

use serde_json::Value;

use crate::error::FlowResult;
use crate::permissions::ToolPolicy;
use crate::types::tool_call::ToolCall;

pub use messenger::{Channel, ChannelError, Messenger, StreamItem};
pub use protocol::{
    message_types, ApplyToFileRequest, Envelope, EvaluatePolicyRequest, EvaluatePolicyResponse,
    HostResponse, ReadFileRequest, ResolveRelativePathRequest, StreamChunk, ToolCallRequest,
    ToolCallResponse,
};

/// Operations the engine needs from the editor host.
pub trait HostBridge: Send + Sync {
    /// Executes a host-side tool.
    fn call_tool(&self, tool_call: &ToolCall) -> impl Future<Output = FlowResult<ToolCallResponse>> + Send;

    /// Starts applying new content to a file.
    ///
    /// Resolves once the host accepted the request. Progress and the final
    /// accept/reject counts arrive later as apply state updates.
    fn apply_to_file(&self, request: ApplyToFileRequest) -> impl Future<Output = FlowResult<()>> + Send;

    /// Asks the host for an argument-aware policy.
    fn evaluate_policy(
        &self,
        tool_name: &str,
        base_policy: ToolPolicy,
        args: &Value,
    ) -> impl Future<Output = FlowResult<ToolPolicy>> + Send;

    /// Reads a file.
    fn read_file(&self, filepath: &str) -> impl Future<Output = FlowResult<String>> + Send;

    /// Resolves a workspace-relative path to an existing file.
    fn resolve_relative_path(&self, path: &str) -> impl Future<Output = FlowResult<Option<String>>> + Send;
}

impl<C: Channel> HostBridge for Messenger<C> {
    async fn call_tool(&self, tool_call: &ToolCall) -> FlowResult<ToolCallResponse> {
        let request = ToolCallRequest {
            tool_call: tool_call.clone(),
        };
        self.request(message_types::TOOLS_CALL, request).await
    }

    async fn apply_to_file(&self, request: ApplyToFileRequest) -> FlowResult<()> {
        let _: Value = self.request(message_types::APPLY_TO_FILE, request).await?;
        Ok(())
    }

    async fn evaluate_policy(
        &self,
        tool_name: &str,
        base_policy: ToolPolicy,
        args: &Value,
    ) -> FlowResult<ToolPolicy> {
        let request = EvaluatePolicyRequest {
            tool_name: tool_name.to_string(),
            base_policy,
            args: args.clone(),
        };
        let response: EvaluatePolicyResponse =
            self.request(message_types::EVALUATE_POLICY, request).await?;
        Ok(response.policy)
    }

    async fn read_file(&self, filepath: &str) -> FlowResult<String> {
        let request = ReadFileRequest {
            filepath: filepath.to_string(),
        };
        self.request(message_types::READ_FILE, request).await
    }

    async fn resolve_relative_path(&self, path: &str) -> FlowResult<Option<String>> {
        let request = ResolveRelativePathRequest {
            path: path.to_string(),
        };
        self.request(message_types::RESOLVE_RELATIVE_PATH, request).await
    }
}
