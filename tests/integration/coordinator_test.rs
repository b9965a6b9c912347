//! End-to-end coordinator tests with a scripted model and an in-memory host.

use std::collections::HashMap;

use pretty_assertions::assert_eq;
use serde_json::json;

use crate::common::{apply_sequence, text_turn, tool_turn, MemoryHost};
use toolflow::api::ScriptedChatClient;
use toolflow::app::CANCELLED_TOOL_RESULT;
use toolflow::permissions::ToolPolicy;
use toolflow::tools::names;
use toolflow::types::{render_context_items, HistoryItem, Role, ToolCallState};
use toolflow::{Coordinator, EngineConfig, ToolCallStatus, TurnOutcome};

type TestCoordinator = Coordinator<MemoryHost, ScriptedChatClient>;

fn coordinator(host: MemoryHost, turns: Vec<Vec<toolflow::types::ChatStreamEvent>>, config: EngineConfig) -> TestCoordinator {
    Coordinator::new(host, ScriptedChatClient::new(turns), config)
}

fn auto_edits() -> EngineConfig {
    EngineConfig::default()
        .with_policy(names::SINGLE_FIND_AND_REPLACE, ToolPolicy::Auto)
        .with_policy(names::MULTI_EDIT, ToolPolicy::Auto)
        .with_policy(names::SEARCH_AND_REPLACE_IN_FILE, ToolPolicy::Auto)
}

fn call(coordinator: &TestCoordinator, id: &str) -> ToolCallState {
    coordinator.history().find_tool_call(id).unwrap()
}

fn output(state: &ToolCallState) -> String {
    render_context_items(state.output.as_deref().unwrap_or_default())
}

fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(ToString::to_string).collect()
}

/// Every tool message answers a known call and no call has two results.
fn assert_results_consistent(items: &[HistoryItem]) {
    let mut results: HashMap<String, usize> = HashMap::new();
    for item in items.iter().filter(|item| item.message.role == Role::Tool) {
        let id = item.message.tool_call_id.clone().unwrap();
        assert!(
            items.iter().any(|other| other.tool_call_state(&id).is_some()),
            "orphan result for {id}"
        );
        *results.entry(id).or_default() += 1;
    }
    assert!(results.values().all(|count| *count == 1), "duplicate results: {results:?}");
}

async fn close(coordinator: &TestCoordinator, index: usize, accepted: usize, rejected: usize) -> Option<TurnOutcome> {
    let request = coordinator.host().applies()[index].clone();
    let mut last = None;
    for state in apply_sequence(&request, accepted, rejected) {
        last = coordinator.handle_apply_state_update(state).await.unwrap();
    }
    last
}

#[tokio::test]
async fn test_diff_block_edit_applies_and_resumes() {
    let host = MemoryHost::new().with_file("consts.rs", "const a = 1;\nconst b = 2;");
    let diff = "<<<<<<< SEARCH\na = 1\n=======\na = 100\n>>>>>>> REPLACE";
    let coordinator = coordinator(
        host,
        vec![
            tool_turn(&[(
                "c1",
                names::SEARCH_AND_REPLACE_IN_FILE,
                json!({"filepath": "consts.rs", "diffs": [diff]}),
            )]),
            text_turn("Updated a."),
        ],
        auto_edits(),
    );

    let outcome = coordinator.submit("set a to 100").await.unwrap();
    assert_eq!(outcome, TurnOutcome::AwaitingApply { tool_call_ids: ids(&["c1"]) });

    let applies = coordinator.host().applies();
    assert_eq!(applies.len(), 1);
    assert_eq!(applies[0].filepath, "/ws/consts.rs");
    assert_eq!(applies[0].text, "const a = 100;\nconst b = 2;");
    assert_eq!(applies[0].tool_call_id.as_deref(), Some("c1"));
    assert!(applies[0].is_search_and_replace);

    let processed = call(&coordinator, "c1").processed_args.unwrap();
    assert_eq!(processed["editingFileContents"], "const a = 1;\nconst b = 2;");

    assert_eq!(close(&coordinator, 0, 1, 0).await, Some(TurnOutcome::Completed));
    let state = call(&coordinator, "c1");
    assert_eq!(state.status, ToolCallStatus::Done);
    assert!(output(&state).contains("applied and accepted"));
    assert_eq!(coordinator.llm().call_count(), 2);
}

#[tokio::test]
async fn test_ambiguous_edit_errors_without_apply() {
    let host = MemoryHost::new().with_file("dup.rs", "let x = 1;\nlet x = 1;\n");
    let coordinator = coordinator(
        host,
        vec![
            tool_turn(&[(
                "c1",
                names::MULTI_EDIT,
                json!({"filepath": "dup.rs", "edits": [{"old_string": "let x = 1;", "new_string": "let x = 2;"}]}),
            )]),
            text_turn("I need more context."),
        ],
        auto_edits(),
    );

    assert_eq!(coordinator.submit("bump x").await.unwrap(), TurnOutcome::Completed);
    assert!(coordinator.host().applies().is_empty());
    assert_eq!(coordinator.host().file("dup.rs").unwrap(), "let x = 1;\nlet x = 1;\n");

    let state = call(&coordinator, "c1");
    assert_eq!(state.status, ToolCallStatus::Errored);
    assert!(output(&state).contains("appears 2 times"));
    assert!(output(&state).contains("replace_all=true"));
}

#[tokio::test]
async fn test_partial_acceptance_completes_with_guidance() {
    let host = MemoryHost::new().with_file("a.rs", "one\ntwo\nthree\n");
    let coordinator = coordinator(
        host,
        vec![
            tool_turn(&[(
                "c1",
                names::SINGLE_FIND_AND_REPLACE,
                json!({"filepath": "a.rs", "old_string": "two", "new_string": "2"}),
            )]),
            text_turn("Noted."),
        ],
        auto_edits(),
    );
    coordinator.submit("edit").await.unwrap();

    assert_eq!(close(&coordinator, 0, 1, 1).await, Some(TurnOutcome::Completed));
    let state = call(&coordinator, "c1");
    assert_eq!(state.status, ToolCallStatus::Done);
    assert!(output(&state).contains("accepted 1 of 2 changes"));
}

#[tokio::test]
async fn test_batch_resumes_once_after_every_apply_closes() {
    let host = MemoryHost::new()
        .with_file("a.rs", "fn a() {}\n")
        .with_file("b.rs", "fn b() {}\n");
    let coordinator = coordinator(
        host,
        vec![
            tool_turn(&[
                (
                    "c1",
                    names::SINGLE_FIND_AND_REPLACE,
                    json!({"filepath": "a.rs", "old_string": "fn a()", "new_string": "fn alpha()"}),
                ),
                (
                    "c2",
                    names::SINGLE_FIND_AND_REPLACE,
                    json!({"filepath": "b.rs", "old_string": "fn b()", "new_string": "fn beta()"}),
                ),
            ]),
            text_turn("Renamed both."),
        ],
        auto_edits(),
    );

    let outcome = coordinator.submit("rename").await.unwrap();
    assert_eq!(outcome, TurnOutcome::AwaitingApply { tool_call_ids: ids(&["c1", "c2"]) });
    let applies = coordinator.host().applies();
    assert_eq!(applies.len(), 2);
    let first = applies.iter().position(|a| a.tool_call_id.as_deref() == Some("c1")).unwrap();
    let second = 1 - first;

    assert_eq!(
        close(&coordinator, first, 1, 0).await,
        Some(TurnOutcome::AwaitingApply { tool_call_ids: ids(&["c2"]) })
    );
    assert_eq!(coordinator.llm().call_count(), 1);

    assert_eq!(close(&coordinator, second, 1, 0).await, Some(TurnOutcome::Completed));
    assert_eq!(coordinator.llm().call_count(), 2);

    let resumed = &coordinator.llm().requests()[1];
    let results = resumed.messages.iter().filter(|m| m.role == Role::Tool).count();
    assert_eq!(results, 2);
}

#[tokio::test]
async fn test_dynamic_policy_only_tightens() {
    let host = MemoryHost::new()
        .with_dynamic_policy(names::READ_FILE, ToolPolicy::Ask)
        .with_dynamic_policy(names::RUN_TERMINAL_COMMAND, ToolPolicy::Auto);
    let coordinator = coordinator(
        host,
        vec![tool_turn(&[
            ("c1", names::READ_FILE, json!({"filepath": "a.rs"})),
            ("c2", names::RUN_TERMINAL_COMMAND, json!({"command": "make"})),
        ])],
        EngineConfig::default(),
    );

    let outcome = coordinator.submit("build").await.unwrap();
    assert_eq!(outcome, TurnOutcome::AwaitingApproval { tool_call_ids: ids(&["c1", "c2"]) });
    assert!(coordinator.host().tool_calls().is_empty());
}

#[tokio::test]
async fn test_failed_policy_evaluation_refuses_call() {
    let host = MemoryHost::new().with_failing_policy(names::READ_FILE);
    let coordinator = coordinator(
        host,
        vec![
            tool_turn(&[("c1", names::READ_FILE, json!({"filepath": "secret.env"}))]),
            text_turn("Cannot read it."),
        ],
        EngineConfig::default(),
    );

    assert_eq!(coordinator.submit("read").await.unwrap(), TurnOutcome::Completed);
    assert!(coordinator.host().tool_calls().is_empty());
    let state = call(&coordinator, "c1");
    assert_eq!(state.status, ToolCallStatus::Canceled);
    assert!(output(&state).contains("disabled by security policy"));
}

#[tokio::test]
async fn test_sibling_failure_is_isolated() {
    let host = MemoryHost::new().with_failing_tool(names::RUN_TERMINAL_COMMAND, "exit status 2");
    let config = EngineConfig::default().with_policy(names::RUN_TERMINAL_COMMAND, ToolPolicy::Auto);
    let coordinator = coordinator(
        host,
        vec![
            tool_turn(&[
                ("c1", names::RUN_TERMINAL_COMMAND, json!({"command": "make"})),
                ("c2", names::READ_FILE, json!({"filepath": "Makefile"})),
            ]),
            text_turn("The build failed."),
        ],
        config,
    );

    assert_eq!(coordinator.submit("build").await.unwrap(), TurnOutcome::Completed);
    let failed = call(&coordinator, "c1");
    assert_eq!(failed.status, ToolCallStatus::Errored);
    assert!(output(&failed).contains("exit status 2"));
    assert_eq!(call(&coordinator, "c2").status, ToolCallStatus::Done);
    assert_eq!(coordinator.llm().call_count(), 2);
}

#[tokio::test]
async fn test_rejecting_one_call_halts_after_batch() {
    let coordinator = coordinator(
        MemoryHost::new(),
        vec![tool_turn(&[
            ("c1", names::RUN_TERMINAL_COMMAND, json!({"command": "rm -rf target"})),
            ("c2", names::RUN_TERMINAL_COMMAND, json!({"command": "cargo build"})),
        ])],
        EngineConfig::default(),
    );
    coordinator.submit("rebuild").await.unwrap();

    let after_reject = coordinator.reject_tool_call("c1").await.unwrap();
    assert_eq!(after_reject, Some(TurnOutcome::AwaitingApproval { tool_call_ids: ids(&["c2"]) }));
    assert_eq!(call(&coordinator, "c1").status, ToolCallStatus::Canceled);

    let after_approve = coordinator.approve_tool_call("c2").await.unwrap();
    assert_eq!(after_approve, Some(TurnOutcome::Halted));
    let executed: Vec<String> = coordinator.host().tool_calls().into_iter().map(|c| c.id).collect();
    assert_eq!(executed, ids(&["c2"]));
    assert_eq!(coordinator.llm().call_count(), 1);
}

#[tokio::test]
async fn test_cancel_during_apply_ignores_late_close() {
    let host = MemoryHost::new().with_file("a.rs", "old\n");
    let coordinator = coordinator(
        host,
        vec![tool_turn(&[(
            "c1",
            names::SINGLE_FIND_AND_REPLACE,
            json!({"filepath": "a.rs", "old_string": "old", "new_string": "new"}),
        )])],
        auto_edits(),
    );
    coordinator.submit("edit").await.unwrap();

    assert_eq!(coordinator.cancel_tool_call("c1").await.unwrap(), Some(TurnOutcome::Halted));
    assert_eq!(close(&coordinator, 0, 1, 0).await, None);

    let state = call(&coordinator, "c1");
    assert_eq!(state.status, ToolCallStatus::Canceled);
    assert_eq!(output(&state), CANCELLED_TOOL_RESULT);

    coordinator.clear_last_empty_response();
    assert_results_consistent(&coordinator.history().snapshot());
    assert_eq!(coordinator.cancel_tool_call("c1").await.unwrap(), None);
    assert_results_consistent(&coordinator.history().snapshot());
}

#[tokio::test]
async fn test_apply_failure_errors_call_and_resumes() {
    let host = MemoryHost::new().with_file("a.rs", "old\n").failing_apply();
    let coordinator = coordinator(
        host,
        vec![
            tool_turn(&[(
                "c1",
                names::SINGLE_FIND_AND_REPLACE,
                json!({"filepath": "a.rs", "old_string": "old", "new_string": "new"}),
            )]),
            text_turn("The edit could not be applied."),
        ],
        auto_edits(),
    );

    assert_eq!(coordinator.submit("edit").await.unwrap(), TurnOutcome::Completed);
    let state = call(&coordinator, "c1");
    assert_eq!(state.status, ToolCallStatus::Errored);
    assert!(output(&state).starts_with("Error editing file: failed to apply changes to file."));
}

#[tokio::test]
async fn test_unknown_tool_errors() {
    let coordinator = coordinator(
        MemoryHost::new(),
        vec![
            tool_turn(&[("c1", "teleport", json!({"to": "mars"}))]),
            text_turn("That tool does not exist."),
        ],
        EngineConfig::default(),
    );

    assert_eq!(coordinator.submit("go").await.unwrap(), TurnOutcome::Completed);
    let state = call(&coordinator, "c1");
    assert_eq!(state.status, ToolCallStatus::Errored);
    assert!(output(&state).contains("Tool \"teleport\" not found"));
}

#[tokio::test]
async fn test_multi_edit_creates_new_file() {
    let coordinator = coordinator(
        MemoryHost::new(),
        vec![
            tool_turn(&[(
                "c1",
                names::MULTI_EDIT,
                json!({"filepath": "src/new.rs", "edits": [{"old_string": "", "new_string": "pub fn new() {}\n"}]}),
            )]),
            text_turn("Created."),
        ],
        auto_edits(),
    );

    coordinator.submit("create").await.unwrap();
    let applies = coordinator.host().applies();
    assert_eq!(applies[0].filepath, "src/new.rs");
    assert_eq!(applies[0].text, "pub fn new() {}\n");
    assert_eq!(close(&coordinator, 0, 1, 0).await, Some(TurnOutcome::Completed));
}

#[tokio::test]
async fn test_history_messages_and_states_agree() {
    let coordinator = coordinator(
        MemoryHost::new(),
        vec![
            tool_turn(&[
                ("c1", names::READ_FILE, json!({"filepath": "a"})),
                ("c2", names::READ_FILE, json!({"filepath": "b"})),
            ]),
            text_turn("Done."),
        ],
        EngineConfig::default(),
    );
    coordinator.submit("read").await.unwrap();

    let history = coordinator.history().snapshot();
    let assistant = history
        .iter()
        .find(|item| !item.tool_call_states.is_empty())
        .unwrap();
    assert_eq!(assistant.message.content, "Working on it.");
    let message_ids: Vec<&str> = assistant.message.tool_calls.iter().map(|c| c.id.as_str()).collect();
    let state_ids: Vec<&str> = assistant.tool_call_states.iter().map(|s| s.tool_call_id.as_str()).collect();
    assert_eq!(message_ids, vec!["c1", "c2"]);
    assert_eq!(message_ids, state_ids);
    for (message_call, state) in assistant.message.tool_calls.iter().zip(&assistant.tool_call_states) {
        assert_eq!(message_call.raw_arguments, state.tool_call.raw_arguments);
    }
    assert_results_consistent(&history);

    let roles: Vec<Role> = history.iter().map(|item| item.message.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Assistant]
    );
}
