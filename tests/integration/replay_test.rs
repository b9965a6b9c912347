//! Scripted sessions against a real directory through the local host.

use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

use crate::common::TestContext;
use toolflow::api::{Script, ScriptedChatClient};
use toolflow::local::{ApplyDecision, LocalHost};
use toolflow::permissions::ToolPolicy;
use toolflow::types::ApplyState;
use toolflow::{Coordinator, EngineConfig, ToolCallStatus, TurnOutcome};

const RENAME_SCRIPT: &str = r#"
prompt: Rename the limit constant
turns:
  - - type: content_delta
      text: "Renaming it now."
    - type: tool_call_start
      id: call_1
      name: single_find_and_replace
      index: 0
    - type: tool_call_arguments_delta
      index: 0
      partial_json: '{"filepath":"src/limits.rs",'
    - type: tool_call_arguments_delta
      index: 0
      partial_json: '"old_string":"MAX","new_string":"LIMIT"}'
    - type: tool_call_complete
      index: 0
    - type: message_complete
  - - type: content_delta
      text: Done.
    - type: message_complete
"#;

/// Runs a script to completion, approving every call and feeding every
/// apply update back.
async fn run(ctx: &TestContext, script: &Script, decision: ApplyDecision, config: EngineConfig) -> (TurnOutcome, Coordinator<LocalHost, ScriptedChatClient>) {
    let (tx, mut updates) = mpsc::unbounded_channel::<ApplyState>();
    let host = LocalHost::new(ctx.path(), tx).with_decision(decision);
    let coordinator = Coordinator::new(host, ScriptedChatClient::from(script), config);

    let mut outcome = coordinator.submit(script.prompt.as_str()).await.unwrap();
    for _ in 0..16 {
        let next = match &outcome {
            TurnOutcome::AwaitingApproval { tool_call_ids } => {
                let mut next = None;
                for id in tool_call_ids {
                    if let Some(result) = coordinator.approve_tool_call(id).await.unwrap() {
                        next = Some(result);
                    }
                }
                next
            }
            TurnOutcome::AwaitingApply { .. } => {
                let mut next = None;
                while let Ok(update) = updates.try_recv() {
                    if let Some(result) = coordinator.handle_apply_state_update(update).await.unwrap() {
                        next = Some(result);
                    }
                }
                next
            }
            _ => break,
        };
        outcome = next.expect("session stalled");
    }
    (outcome, coordinator)
}

#[tokio::test]
async fn test_replay_accepts_edit_and_writes_file() {
    let ctx = TestContext::new();
    ctx.create_file("src/limits.rs", "pub const MAX: usize = 8;\n");
    let script = Script::from_yaml(RENAME_SCRIPT).unwrap();

    let (outcome, coordinator) = run(&ctx, &script, ApplyDecision::Accept, EngineConfig::default()).await;

    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(ctx.read_file("src/limits.rs"), "pub const LIMIT: usize = 8;\n");
    assert_eq!(coordinator.history().find_tool_call("call_1").unwrap().status, ToolCallStatus::Done);
    assert_eq!(coordinator.llm().remaining(), 0);
}

#[tokio::test]
async fn test_replay_rejected_edit_halts() {
    let ctx = TestContext::new();
    ctx.create_file("src/limits.rs", "pub const MAX: usize = 8;\n");
    let script = Script::from_yaml(RENAME_SCRIPT).unwrap();
    let config = EngineConfig::default().with_policy("single_*", ToolPolicy::Auto);

    let (outcome, coordinator) = run(&ctx, &script, ApplyDecision::Reject, config).await;

    assert_eq!(outcome, TurnOutcome::Halted);
    assert_eq!(ctx.read_file("src/limits.rs"), "pub const MAX: usize = 8;\n");
    let state = coordinator.history().find_tool_call("call_1").unwrap();
    assert_eq!(state.status, ToolCallStatus::Canceled);
    assert_eq!(coordinator.llm().remaining(), 1);
}

#[tokio::test]
async fn test_replay_missing_file_reports_error_to_model() {
    let ctx = TestContext::new();
    let script = Script::from_yaml(RENAME_SCRIPT).unwrap();

    let (outcome, coordinator) = run(&ctx, &script, ApplyDecision::Accept, EngineConfig::default()).await;

    assert_eq!(outcome, TurnOutcome::Completed);
    let state = coordinator.history().find_tool_call("call_1").unwrap();
    assert_eq!(state.status, ToolCallStatus::Errored);
    let resumed = &coordinator.llm().requests()[1];
    let result = resumed
        .messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("call_1"))
        .unwrap();
    assert!(result.content.contains("File src/limits.rs does not exist"));
}

#[tokio::test]
async fn test_history_serializes_to_yaml() {
    let ctx = TestContext::new();
    ctx.create_file("src/limits.rs", "pub const MAX: usize = 8;\n");
    let script = Script::from_yaml(RENAME_SCRIPT).unwrap();

    let (_, coordinator) = run(&ctx, &script, ApplyDecision::Accept, EngineConfig::default()).await;

    let yaml = serde_yaml::to_string(&coordinator.history().snapshot()).unwrap();
    assert!(yaml.contains("Rename the limit constant"));
    assert!(yaml.contains("call_1"));
    assert!(yaml.contains("status: done"));
}
