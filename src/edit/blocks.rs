//! Parsing of free-form search/replace diff text.
//!
//! The expected shape is the conventional conflict-marker format:
//!
//! ```text
//! <<<<<<< SEARCH
//! old text
//! =======
//! new text
//! >>>>>>> REPLACE
//! ```
//!
//! A block that never reaches its closing marker is returned with
//! `is_complete == false` and must not be applied.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::EditError;

static SEARCH_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*<{7}\s*(SEARCH)?\s*$").expect("valid regex"));
static DIVIDER_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*={7}\s*$").expect("valid regex"));
static REPLACE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*>{7}\s*(REPLACE)?\s*$").expect("valid regex"));

/// One search/replace pair parsed from diff text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchReplaceBlock {
    /// Text to locate in the file.
    pub search_content: String,
    /// Replacement text. `None` is treated as the empty string (deletion).
    pub replace_content: Option<String>,
    /// False when the block is missing its closing marker.
    pub is_complete: bool,
}

impl SearchReplaceBlock {
    /// Creates a complete block.
    #[must_use]
    pub fn new(search: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            search_content: search.into(),
            replace_content: Some(replace.into()),
            is_complete: true,
        }
    }

    /// Returns the replacement text, treating a missing replacement as deletion.
    #[must_use]
    pub fn replacement(&self) -> &str {
        self.replace_content.as_deref().unwrap_or("")
    }
}

enum ParseState {
    Outside,
    Search(Vec<String>),
    Replace(Vec<String>, Vec<String>),
}

/// Parses every search/replace block in `text`, complete or not.
///
/// Lines outside a block (prose, code fences) are ignored.
#[must_use]
pub fn parse_all_search_replace_blocks(text: &str) -> Vec<SearchReplaceBlock> {
    let mut blocks = Vec::new();
    let mut state = ParseState::Outside;

    for line in text.lines() {
        state = match state {
            ParseState::Outside => {
                if SEARCH_MARKER.is_match(line) {
                    ParseState::Search(Vec::new())
                } else {
                    ParseState::Outside
                }
            }
            ParseState::Search(search) => {
                if DIVIDER_MARKER.is_match(line) {
                    ParseState::Replace(search, Vec::new())
                } else if SEARCH_MARKER.is_match(line) {
                    blocks.push(incomplete(search, None));
                    ParseState::Search(Vec::new())
                } else if REPLACE_MARKER.is_match(line) {
                    blocks.push(incomplete(search, None));
                    ParseState::Outside
                } else {
                    let mut search = search;
                    search.push(line.to_string());
                    ParseState::Search(search)
                }
            }
            ParseState::Replace(search, replace) => {
                if REPLACE_MARKER.is_match(line) {
                    blocks.push(SearchReplaceBlock {
                        search_content: search.join("\n"),
                        replace_content: Some(replace.join("\n")),
                        is_complete: true,
                    });
                    ParseState::Outside
                } else if SEARCH_MARKER.is_match(line) {
                    blocks.push(incomplete(search, Some(replace)));
                    ParseState::Search(Vec::new())
                } else {
                    let mut replace = replace;
                    replace.push(line.to_string());
                    ParseState::Replace(search, replace)
                }
            }
        };
    }

    match state {
        ParseState::Outside => {}
        ParseState::Search(search) => blocks.push(incomplete(search, None)),
        ParseState::Replace(search, replace) => blocks.push(incomplete(search, Some(replace))),
    }

    blocks
}

fn incomplete(search: Vec<String>, replace: Option<Vec<String>>) -> SearchReplaceBlock {
    SearchReplaceBlock {
        search_content: search.join("\n"),
        replace_content: replace.map(|r| r.join("\n")),
        is_complete: false,
    }
}

/// Complete blocks collected from one or more diff texts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDiffs {
    /// Complete blocks, in diff order then block order.
    pub blocks: Vec<SearchReplaceBlock>,
    /// Number of incomplete blocks that were dropped.
    pub dropped: usize,
}

/// Parses each diff and keeps only complete blocks.
///
/// # Errors
///
/// * [`EditError::NoCompleteBlocks`] with `diff: None` when `diffs` is empty.
/// * [`EditError::NoCompleteBlocks`] with the 1-based diff number when a diff
///   yields no complete block at all.
pub fn collect_complete_blocks(diffs: &[String]) -> Result<ParsedDiffs, EditError> {
    if diffs.is_empty() {
        return Err(EditError::NoCompleteBlocks { diff: None });
    }

    let mut parsed = ParsedDiffs::default();
    for (index, diff) in diffs.iter().enumerate() {
        let all = parse_all_search_replace_blocks(diff);
        let total = all.len();
        let complete: Vec<_> = all.into_iter().filter(|b| b.is_complete).collect();

        if complete.is_empty() {
            return Err(EditError::NoCompleteBlocks {
                diff: Some(index + 1),
            });
        }

        let dropped = total - complete.len();
        if dropped > 0 {
            warn!(
                diff = index + 1,
                dropped,
                usable = complete.len(),
                "Dropping incomplete search/replace blocks"
            );
        }
        parsed.dropped += dropped;
        parsed.blocks.extend(complete);
    }

    debug!(
        blocks = parsed.blocks.len(),
        dropped = parsed.dropped,
        "Collected search/replace blocks"
    );
    Ok(parsed)
}
