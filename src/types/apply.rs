//! Apply state types.
//!
//! An [`ApplyState`] describes one attempt to write an edit into a file or
//! open buffer, keyed by `stream_id`. Updates arrive as partial snapshots and
//! are merged into the stored state with [`ApplyState::merge`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stream id reserved for the interactive single-shot edit flow.
pub const EDIT_MODE_STREAM_ID: &str = "edit-mode";

/// Lifecycle status of an apply stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyStatus {
    /// Request dispatched, nothing written yet.
    NotStarted,
    /// Diff is being streamed into the buffer.
    Streaming,
    /// Content fully written, hunks awaiting resolution.
    Done,
    /// Every hunk has been accepted or rejected.
    Closed,
}

impl fmt::Display for ApplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not-started",
            Self::Streaming => "streaming",
            Self::Done => "done",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// State of one apply stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyState {
    pub stream_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub status: ApplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
    /// Number of hunks in the applied diff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_diffs: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_accepted: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_rejected: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_file_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_content: Option<String>,
}

impl ApplyState {
    /// Creates a bare state with only id and status set.
    #[must_use]
    pub fn new(stream_id: impl Into<String>, status: ApplyStatus) -> Self {
        Self {
            stream_id: stream_id.into(),
            tool_call_id: None,
            status,
            filepath: None,
            num_diffs: None,
            num_accepted: None,
            num_rejected: None,
            original_file_content: None,
            file_content: None,
        }
    }

    #[must_use]
    pub fn with_tool_call(mut self, tool_call_id: impl Into<String>) -> Self {
        self.tool_call_id = Some(tool_call_id.into());
        self
    }

    #[must_use]
    pub fn with_filepath(mut self, filepath: impl Into<String>) -> Self {
        self.filepath = Some(filepath.into());
        self
    }

    /// Sets hunk resolution counts.
    #[must_use]
    pub fn with_counts(mut self, accepted: usize, rejected: usize) -> Self {
        self.num_accepted = Some(accepted);
        self.num_rejected = Some(rejected);
        self
    }

    /// Returns true if this state belongs to the interactive edit flow.
    #[must_use]
    pub fn is_edit_mode(&self) -> bool {
        self.stream_id == EDIT_MODE_STREAM_ID
    }

    /// Overlays the fields present in `update` onto `self`.
    ///
    /// Fields missing from `update` keep their stored value.
    pub fn merge(&mut self, update: &ApplyState) {
        self.status = update.status;
        if update.tool_call_id.is_some() {
            self.tool_call_id.clone_from(&update.tool_call_id);
        }
        if update.filepath.is_some() {
            self.filepath.clone_from(&update.filepath);
        }
        if update.num_diffs.is_some() {
            self.num_diffs = update.num_diffs;
        }
        if update.num_accepted.is_some() {
            self.num_accepted = update.num_accepted;
        }
        if update.num_rejected.is_some() {
            self.num_rejected = update.num_rejected;
        }
        if update.original_file_content.is_some() {
            self.original_file_content.clone_from(&update.original_file_content);
        }
        if update.file_content.is_some() {
            self.file_content.clone_from(&update.file_content);
        }
    }

    /// Classifies how the user resolved the hunks.
    ///
    /// Missing counts are read as zero; a closed apply with nothing rejected
    /// counts as fully accepted.
    #[must_use]
    pub fn outcome(&self) -> ApplyOutcome {
        let accepted = self.num_accepted.unwrap_or(0);
        let rejected = self.num_rejected.unwrap_or(0);
        match (accepted, rejected) {
            (_, 0) => ApplyOutcome::AllAccepted,
            (0, _) => ApplyOutcome::AllRejected,
            _ => ApplyOutcome::PartiallyAccepted { accepted, rejected },
        }
    }
}

/// How the hunks of a closed apply were resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    AllAccepted,
    AllRejected,
    PartiallyAccepted { accepted: usize, rejected: usize },
}
