//! End-of-turn history reconciliation.
//!
//! After an interrupted turn the history can hold a dangling empty assistant
//! message, tool calls that never got a result, or results whose tool call
//! was removed. [`clear_last_empty_response`] repairs all three so that every
//! tool call has exactly one result and every result answers a known call.

use std::collections::HashSet;

use tracing::{info, warn};

use super::tool_call::{advance, cancellation_output, ToolCallEvent, CANCELLED_TOOL_RESULT};
use crate::types::message::{ChatMessage, HistoryItem, Role};

/// What reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Id of the trailing message that was removed.
    pub removed_trailing: Option<String>,
    /// Tool calls that received a synthesized cancellation result.
    pub canceled: Vec<String>,
    /// Ids of tool messages removed as orphans or duplicates.
    pub removed_results: Vec<String>,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.removed_trailing.is_none() && self.canceled.is_empty() && self.removed_results.is_empty()
    }
}

/// Repairs `items` after a turn ends.
///
/// Histories shorter than two items are left untouched.
pub fn clear_last_empty_response(items: &mut Vec<HistoryItem>) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    if items.len() < 2 {
        return report;
    }

    if let Some(last) = items.last() {
        let message = &last.message;
        if message.role == Role::Thinking || message.is_empty_assistant() {
            report.removed_trailing = Some(message.id.clone());
            items.pop();
        }
    }

    remove_orphan_results(items, &mut report);
    cancel_unanswered_calls(items, &mut report);

    if !report.is_noop() {
        info!(
            removed_trailing = report.removed_trailing.is_some(),
            canceled = report.canceled.len(),
            removed_results = report.removed_results.len(),
            "Reconciled history"
        );
    }
    report
}

fn remove_orphan_results(items: &mut Vec<HistoryItem>, report: &mut ReconcileReport) {
    let known: HashSet<String> = items
        .iter()
        .filter(|item| item.message.role == Role::Assistant)
        .flat_map(|item| item.message.tool_calls.iter().map(|call| call.id.clone()))
        .collect();

    let mut answered = HashSet::new();
    items.retain(|item| {
        if item.message.role != Role::Tool {
            return true;
        }
        let keep = match item.message.tool_call_id.as_deref() {
            Some(id) if known.contains(id) => answered.insert(id.to_string()),
            _ => false,
        };
        if !keep {
            warn!(
                message_id = %item.message.id,
                tool_call_id = ?item.message.tool_call_id,
                "Removing orphan tool result"
            );
            report.removed_results.push(item.message.id.clone());
        }
        keep
    });
}

fn cancel_unanswered_calls(items: &mut Vec<HistoryItem>, report: &mut ReconcileReport) {
    let mut index = 0;
    while index < items.len() {
        if items[index].message.role != Role::Assistant {
            index += 1;
            continue;
        }

        let call_ids: Vec<String> = items[index]
            .message
            .tool_calls
            .iter()
            .map(|call| call.id.clone())
            .collect();

        // Results for this message follow it directly.
        let mut insert_at = index + 1;
        while insert_at < items.len() && items[insert_at].message.role == Role::Tool {
            insert_at += 1;
        }

        for id in call_ids {
            if items.iter().any(|item| item.is_result_for(&id)) {
                continue;
            }

            if let Some(state) = items[index].tool_call_state_mut(&id) {
                if !state.status.is_terminal() {
                    advance(state, ToolCallEvent::Cancel);
                }
                if state.output.is_none() {
                    state.output = Some(cancellation_output());
                }
            }

            items.insert(insert_at, HistoryItem::new(ChatMessage::tool_result(&id, CANCELLED_TOOL_RESULT)));
            insert_at += 1;
            report.canceled.push(id);
        }

        index = insert_at;
    }
}
