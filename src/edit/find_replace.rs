//! Find/replace validation and sequential patch application.
//!
//! Edits and blocks are applied in order, each one against the output of the
//! previous step. Reordering edits can change the result.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::blocks::SearchReplaceBlock;
use super::matcher::{find_search_match, find_search_matches};
use super::EditError;

/// One `old_string`/`new_string` pair as sent by the model.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EditOperation {
    #[serde(default)]
    pub old_string: Option<String>,
    #[serde(default)]
    pub new_string: Option<String>,
    #[serde(default)]
    pub replace_all: bool,
}

impl EditOperation {
    /// Creates an edit replacing a single occurrence.
    #[must_use]
    pub fn new(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            old_string: Some(old.into()),
            new_string: Some(new.into()),
            replace_all: false,
        }
    }

    /// Sets `replace_all`.
    #[must_use]
    pub fn replace_all(mut self, replace_all: bool) -> Self {
        self.replace_all = replace_all;
        self
    }
}

/// Checks that an edit carries both strings and that they differ.
///
/// An empty `old_string` is accepted (it means "insert at start" or "create").
///
/// # Errors
///
/// Returns `MissingOldString`, `MissingNewString` or `IdenticalStrings`,
/// annotated with `edit_index` when given.
pub fn validate_single_edit(
    old_string: Option<&str>,
    new_string: Option<&str>,
    edit_index: Option<usize>,
) -> Result<(), EditError> {
    let Some(old) = old_string else {
        return Err(EditError::MissingOldString { edit_index });
    };
    let Some(new) = new_string else {
        return Err(EditError::MissingNewString { edit_index });
    };
    if old == new {
        return Err(EditError::IdenticalStrings { edit_index });
    }
    Ok(())
}

/// Decides whether a multi-edit creates a new file.
///
/// Returns `true` when the first edit has an empty `old_string`. A creating
/// multi-edit must contain exactly one edit, and only the first edit may have
/// an empty `old_string`.
///
/// # Errors
///
/// * `InvalidArguments` when `edits` is empty.
/// * `SubsequentEditsOnCreate` when a creating edit is followed by others.
/// * `EmptyNonFirstEdit` for an empty `old_string` after the first edit.
pub fn validate_creating_for_multi_edit(edits: &[EditOperation]) -> Result<bool, EditError> {
    let Some(first) = edits.first() else {
        return Err(EditError::InvalidArguments(
            "edits array is required and must contain at least one edit".to_string(),
        ));
    };

    let is_creating = first.old_string.as_deref() == Some("");
    if is_creating && edits.len() > 1 {
        return Err(EditError::SubsequentEditsOnCreate);
    }

    for (index, edit) in edits.iter().enumerate().skip(1) {
        if edit.old_string.as_deref() == Some("") {
            return Err(EditError::EmptyNonFirstEdit { edit_index: index });
        }
    }

    Ok(is_creating)
}

/// Replaces `old_string` with `new_string` in `content`.
///
/// Matching is exact. Without `replace_all`, `old_string` must occur exactly
/// once. An empty `old_string` inserts `new_string` at the start.
///
/// # Errors
///
/// `StringNotFound` or `MultipleOccurrences`, annotated with `edit_index`.
pub fn perform_find_and_replace(
    content: &str,
    old_string: &str,
    new_string: &str,
    replace_all: bool,
    edit_index: Option<usize>,
) -> Result<String, EditError> {
    if old_string.is_empty() {
        return Ok(format!("{new_string}{content}"));
    }

    let count = content.matches(old_string).count();
    if count == 0 {
        return Err(EditError::StringNotFound {
            search: old_string.to_string(),
            edit_index,
        });
    }

    if replace_all {
        return Ok(content.replace(old_string, new_string));
    }

    if count > 1 {
        return Err(EditError::MultipleOccurrences {
            search: old_string.to_string(),
            count,
            edit_index,
        });
    }

    Ok(content.replacen(old_string, new_string, 1))
}

/// Applies a list of edits in order, each to the previous result.
///
/// All edits are validated before any is applied. On error the input content
/// is left untouched (nothing is returned).
///
/// # Errors
///
/// The first validation or application error, annotated with its edit index.
pub fn apply_edits_sequentially(content: &str, edits: &[EditOperation]) -> Result<String, EditError> {
    for (index, edit) in edits.iter().enumerate() {
        validate_single_edit(edit.old_string.as_deref(), edit.new_string.as_deref(), Some(index))?;
    }

    let mut current = content.to_string();
    for (index, edit) in edits.iter().enumerate() {
        let old = edit.old_string.as_deref().unwrap_or_default();
        let new = edit.new_string.as_deref().unwrap_or_default();
        current = perform_find_and_replace(&current, old, new, edit.replace_all, Some(index))?;
    }
    Ok(current)
}

/// Applies parsed search/replace blocks in order.
///
/// Incomplete blocks are skipped. Each block's search text is located with
/// the tiered matcher against the output of the previous block. A block whose
/// search text matches more than once (by any tier) is ambiguous and fails
/// the whole operation.
///
/// # Errors
///
/// `SearchBlockNotFound` (1-based block number) or `MultipleOccurrences`.
pub fn apply_blocks_sequentially(
    content: &str,
    blocks: &[SearchReplaceBlock],
) -> Result<String, EditError> {
    let mut current = content.to_string();

    for (index, block) in blocks.iter().enumerate() {
        if !block.is_complete {
            debug!(block = index + 1, "Skipping incomplete block");
            continue;
        }

        let Some(found) = find_search_match(&current, &block.search_content) else {
            return Err(EditError::SearchBlockNotFound {
                block: index + 1,
                search: block.search_content.clone(),
            });
        };

        if !block.search_content.trim().is_empty() {
            let count = find_search_matches(&current, &block.search_content).len();
            if count > 1 {
                return Err(EditError::MultipleOccurrences {
                    search: block.search_content.clone(),
                    count,
                    edit_index: None,
                });
            }
        }

        if found.strategy.is_fuzzy() {
            info!(
                block = index + 1,
                strategy = %found.strategy,
                "Search block matched without an exact hit"
            );
        }
        debug!(
            block = index + 1,
            strategy = %found.strategy,
            start = found.start_index,
            end = found.end_index,
            "Applying search/replace block"
        );

        let mut next = String::with_capacity(current.len() + block.replacement().len());
        next.push_str(&current[..found.start_index]);
        next.push_str(block.replacement());
        next.push_str(&current[found.end_index..]);
        current = next;
    }

    Ok(current)
}
