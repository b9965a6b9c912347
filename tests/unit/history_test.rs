//! History store and reconciliation through the public API.

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use toolflow::app::{clear_last_empty_response, AppendOutcome, ConversationHistoryStore};
use toolflow::types::{ChatMessage, HistoryItem, Role, ToolCall, ToolCallState, ToolCallStatus};

fn assistant_with_calls(ids: &[String]) -> HistoryItem {
    let calls: Vec<ToolCall> = ids.iter().map(|id| ToolCall::new(id, "read_file", "{}")).collect();
    let mut item = HistoryItem::new(ChatMessage::assistant("").with_tool_calls(calls.clone()));
    item.tool_call_states = calls.into_iter().map(ToolCallState::generating).collect();
    item
}

#[test]
fn test_append_tool_result_is_idempotent() {
    let store = ConversationHistoryStore::from_items(vec![
        ChatMessage::user("hi").into(),
        assistant_with_calls(&["c1".to_string()]),
    ]);

    assert_eq!(store.append_tool_result("c1", "ok"), AppendOutcome::Appended);
    assert_eq!(store.append_tool_result("c1", "again"), AppendOutcome::AlreadyPresent);
    assert_eq!(store.append_tool_result("c9", "stray"), AppendOutcome::UnknownToolCall);
    assert_eq!(store.len(), 3);
}

#[test]
fn test_unanswered_calls_are_canceled() {
    let mut items = vec![
        ChatMessage::user("hi").into(),
        assistant_with_calls(&["c1".to_string(), "c2".to_string()]),
        ChatMessage::tool_result("c1", "ok").into(),
    ];

    let report = clear_last_empty_response(&mut items);
    assert_eq!(report.canceled, vec!["c2".to_string()]);

    let state = items[1].tool_call_state("c2").unwrap();
    assert_eq!(state.status, ToolCallStatus::Canceled);
    let results: Vec<&str> = items
        .iter()
        .filter(|item| item.message.role == Role::Tool)
        .filter_map(|item| item.message.tool_call_id.as_deref())
        .collect();
    assert_eq!(results, vec!["c1", "c2"]);
}

proptest! {
    #[test]
    fn prop_reconciled_history_has_one_result_per_call(
        calls in 1usize..4,
        answered in proptest::collection::vec(0usize..6, 0..8),
        orphans in proptest::collection::vec("[x-z][0-9]", 0..3),
    ) {
        let ids: Vec<String> = (0..calls).map(|i| format!("c{i}")).collect();
        let mut items: Vec<HistoryItem> = vec![ChatMessage::user("go").into(), assistant_with_calls(&ids)];
        for index in answered {
            items.push(ChatMessage::tool_result(format!("c{index}"), "out").into());
        }
        for orphan in orphans {
            items.push(ChatMessage::tool_result(orphan, "stray").into());
        }

        clear_last_empty_response(&mut items);

        for id in &ids {
            let count = items.iter().filter(|item| item.is_result_for(id)).count();
            prop_assert_eq!(count, 1);
        }
        for item in items.iter().filter(|item| item.message.role == Role::Tool) {
            let id = item.message.tool_call_id.as_deref().unwrap();
            prop_assert!(ids.iter().any(|known| known == id));
        }
    }
}
