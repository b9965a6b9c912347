//! Text editing primitives: search-block matching, diff-block parsing and
//! sequential find/replace application.
//!
//! Everything in this module is pure. No file I/O happens here; callers read
//! the current content, run it through these functions and hand the result to
//! the apply pipeline.

pub mod blocks;
pub mod find_replace;
pub mod matcher;

pub use blocks::{collect_complete_blocks, parse_all_search_replace_blocks, ParsedDiffs, SearchReplaceBlock};
pub use find_replace::{
    apply_blocks_sequentially, apply_edits_sequentially, perform_find_and_replace,
    validate_creating_for_multi_edit, validate_single_edit, EditOperation,
};
pub use matcher::{find_search_match, find_search_matches, MatchStrategy, SearchMatch};

/// Appended to the multiple-occurrence error so the model knows how to recover.
pub const FOUND_MULTIPLE_FIND_STRINGS_ERROR: &str = "Either provide a more specific string with surrounding context to make it unique, or use replace_all=true to replace all occurrences.";

/// Reported when an edit other than the first has an empty `old_string`.
pub const EMPTY_NON_FIRST_EDIT_MESSAGE: &str = "contains empty old_string. Only the first edit can contain an empty old_string, which is only used for file creation.";

/// Errors raised while validating or applying a text edit.
///
/// Messages are addressed to the model: they say what was wrong and how to
/// fix the arguments.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    #[error("{}old_string is required", prefix(.edit_index))]
    MissingOldString { edit_index: Option<usize> },

    #[error("{}new_string is required", prefix(.edit_index))]
    MissingNewString { edit_index: Option<usize> },

    #[error("{}old_string and new_string must be different", prefix(.edit_index))]
    IdenticalStrings { edit_index: Option<usize> },

    #[error("{}string not found in file: \"{search}\"", prefix(.edit_index))]
    StringNotFound {
        search: String,
        edit_index: Option<usize>,
    },

    #[error(
        "{}String \"{search}\" appears {count} times in the file. {}",
        prefix(.edit_index),
        FOUND_MULTIPLE_FIND_STRINGS_ERROR
    )]
    MultipleOccurrences {
        search: String,
        count: usize,
        edit_index: Option<usize>,
    },

    #[error("edit at index {edit_index}: {}", EMPTY_NON_FIRST_EDIT_MESSAGE)]
    EmptyNonFirstEdit { edit_index: usize },

    #[error("cannot make subsequent edits on a file you are creating")]
    SubsequentEditsOnCreate,

    /// `block` is 1-based.
    #[error("Search content not found in block {block}:\n{search}")]
    SearchBlockNotFound { block: usize, search: String },

    #[error("No complete search/replace blocks found in {}", diff_label(.diff))]
    NoCompleteBlocks { diff: Option<usize> },

    #[error("File {path} does not exist")]
    FileNotFound { path: String },

    /// A multi-edit targets a missing file without creating it.
    #[error(
        "file {path} does not exist. If you are trying to edit it, correct the filepath. \
         If you are trying to create it, you must pass old_string=\"\""
    )]
    EditTargetMissing { path: String },

    #[error("file {path} already exists, cannot create new file")]
    FileAlreadyExists { path: String },

    #[error("{0}")]
    InvalidArguments(String),
}

impl EditError {
    /// Returns the same error annotated with an edit index.
    #[must_use]
    pub fn at_index(self, index: usize) -> Self {
        match self {
            Self::MissingOldString { .. } => Self::MissingOldString {
                edit_index: Some(index),
            },
            Self::MissingNewString { .. } => Self::MissingNewString {
                edit_index: Some(index),
            },
            Self::IdenticalStrings { .. } => Self::IdenticalStrings {
                edit_index: Some(index),
            },
            Self::StringNotFound { search, .. } => Self::StringNotFound {
                search,
                edit_index: Some(index),
            },
            Self::MultipleOccurrences { search, count, .. } => Self::MultipleOccurrences {
                search,
                count,
                edit_index: Some(index),
            },
            other => other,
        }
    }
}

fn prefix(edit_index: &Option<usize>) -> String {
    edit_index
        .map(|i| format!("edit at index {i}: "))
        .unwrap_or_default()
}

fn diff_label(diff: &Option<usize>) -> String {
    diff.map_or_else(|| "any diffs".to_string(), |d| format!("diff {d}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_without_index() {
        let err = EditError::StringNotFound {
            search: "xyz".into(),
            edit_index: None,
        };
        assert_eq!(err.to_string(), "string not found in file: \"xyz\"");
    }

    #[test]
    fn test_messages_with_index() {
        let err = EditError::MissingOldString { edit_index: None }.at_index(2);
        assert_eq!(err.to_string(), "edit at index 2: old_string is required");
    }

    #[test]
    fn test_multiple_occurrences_message() {
        let err = EditError::MultipleOccurrences {
            search: "Hello".into(),
            count: 3,
            edit_index: None,
        };
        assert_eq!(
            err.to_string(),
            format!("String \"Hello\" appears 3 times in the file. {FOUND_MULTIPLE_FIND_STRINGS_ERROR}")
        );
    }

    #[test]
    fn test_at_index_leaves_unindexed_variants() {
        let err = EditError::SubsequentEditsOnCreate.at_index(4);
        assert_eq!(err, EditError::SubsequentEditsOnCreate);
    }
}
