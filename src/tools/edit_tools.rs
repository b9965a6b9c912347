//! Argument validation and planning for the edit tools.
//!
//! Planning runs while a call is `generated`, before any policy decision. It
//! resolves the target path, reads the current contents once and computes the
//! complete new contents. The result is merged into the call's processed
//! arguments, so dispatch only has to hand the plan to the apply pipeline.
//!
//! ```text
//! parsed args ─▶ validate ─▶ resolve path ─▶ read file ─▶ patch ─▶ EditPlan
//!                   │              │             │           │
//!                   └──────────────┴─────────────┴───────────┴─▶ FlowError
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::EditTool;
use crate::edit::{
    apply_blocks_sequentially, apply_edits_sequentially, collect_complete_blocks,
    perform_find_and_replace, validate_creating_for_multi_edit, validate_single_edit, EditError,
    EditOperation,
};
use crate::error::{FlowError, FlowResult};
use crate::ide::protocol::ApplyToFileRequest;
use crate::ide::HostBridge;

/// Arguments of `single_find_and_replace`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SingleEditArgs {
    #[serde(default)]
    pub filepath: Option<String>,
    #[serde(default)]
    pub old_string: Option<String>,
    #[serde(default)]
    pub new_string: Option<String>,
    #[serde(default)]
    pub replace_all: bool,
}

/// Arguments of `multi_edit`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MultiEditArgs {
    #[serde(default)]
    pub filepath: Option<String>,
    #[serde(default)]
    pub edits: Option<Vec<EditOperation>>,
}

/// Arguments of `search_and_replace_in_file`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SearchReplaceArgs {
    #[serde(default)]
    pub filepath: Option<String>,
    #[serde(default)]
    pub diffs: Option<Vec<String>>,
}

/// A fully computed edit, ready for the apply pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditPlan {
    /// Resolved target. For a file being created this is the requested path.
    pub file_uri: String,
    /// Contents before the edit. Empty for a file being created.
    pub editing_file_contents: String,
    pub new_content: String,
}

impl EditPlan {
    /// Recovers a plan from processed arguments written by [`merge_plan`].
    ///
    /// # Errors
    ///
    /// Returns a tool argument error when the plan fields are missing.
    pub fn from_processed_args(tool: EditTool, args: &Value) -> FlowResult<Self> {
        serde_json::from_value(args.clone()).map_err(|e| {
            FlowError::tool_arguments(tool.name(), format!("edit was not prepared: {e}"))
        })
    }

    /// Builds the `applyToFile` request for this plan.
    #[must_use]
    pub fn apply_request(&self, stream_id: impl Into<String>, tool_call_id: impl Into<String>) -> ApplyToFileRequest {
        ApplyToFileRequest {
            text: self.new_content.clone(),
            stream_id: stream_id.into(),
            filepath: self.file_uri.clone(),
            tool_call_id: Some(tool_call_id.into()),
            is_search_and_replace: true,
        }
    }
}

/// Returns `args` with the plan fields added.
#[must_use]
pub fn merge_plan(args: &Value, plan: &EditPlan) -> Value {
    let mut merged = match args {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    merged.insert("fileUri".to_string(), Value::String(plan.file_uri.clone()));
    merged.insert(
        "editingFileContents".to_string(),
        Value::String(plan.editing_file_contents.clone()),
    );
    merged.insert("newContent".to_string(), Value::String(plan.new_content.clone()));
    Value::Object(merged)
}

fn parse_args<T: for<'de> Deserialize<'de>>(tool: EditTool, args: &Value) -> FlowResult<T> {
    serde_json::from_value(args.clone())
        .map_err(|e| FlowError::tool_arguments(tool.name(), e.to_string()))
}

fn require_filepath(tool: EditTool, filepath: Option<String>) -> FlowResult<String> {
    filepath
        .filter(|path| !path.is_empty())
        .ok_or_else(|| FlowError::tool_arguments(tool.name(), "filepath is required"))
}

/// Validates `args` for `tool` and computes the resulting edit.
///
/// # Errors
///
/// Returns the validation or I/O failure. Messages are written for the model.
pub async fn plan_edit<H: HostBridge>(tool: EditTool, args: &Value, host: &H) -> FlowResult<EditPlan> {
    let plan = match tool {
        EditTool::SingleFindAndReplace => plan_single(args, host).await?,
        EditTool::MultiEdit => plan_multi(args, host).await?,
        EditTool::SearchAndReplaceInFile => plan_search_replace(args, host).await?,
    };
    debug!(
        tool = tool.name(),
        file = %plan.file_uri,
        before = plan.editing_file_contents.len(),
        after = plan.new_content.len(),
        "Planned edit"
    );
    Ok(plan)
}

async fn plan_single<H: HostBridge>(args: &Value, host: &H) -> FlowResult<EditPlan> {
    let tool = EditTool::SingleFindAndReplace;
    let args: SingleEditArgs = parse_args(tool, args)?;
    let filepath = require_filepath(tool, args.filepath)?;
    validate_single_edit(args.old_string.as_deref(), args.new_string.as_deref(), None)?;

    let file_uri = host
        .resolve_relative_path(&filepath)
        .await?
        .ok_or(EditError::FileNotFound { path: filepath })?;
    let contents = host.read_file(&file_uri).await?;

    let new_content = perform_find_and_replace(
        &contents,
        args.old_string.as_deref().unwrap_or_default(),
        args.new_string.as_deref().unwrap_or_default(),
        args.replace_all,
        None,
    )?;

    Ok(EditPlan {
        file_uri,
        editing_file_contents: contents,
        new_content,
    })
}

async fn plan_multi<H: HostBridge>(args: &Value, host: &H) -> FlowResult<EditPlan> {
    let tool = EditTool::MultiEdit;
    let args: MultiEditArgs = parse_args(tool, args)?;
    let filepath = require_filepath(tool, args.filepath)?;
    let edits = args.edits.unwrap_or_default();

    let is_creating = validate_creating_for_multi_edit(&edits)?;
    for (index, edit) in edits.iter().enumerate() {
        validate_single_edit(edit.old_string.as_deref(), edit.new_string.as_deref(), Some(index))?;
    }

    let resolved = host.resolve_relative_path(&filepath).await?;

    if is_creating {
        if resolved.is_some() {
            return Err(EditError::FileAlreadyExists { path: filepath }.into());
        }
        let new_content = edits
            .first()
            .and_then(|edit| edit.new_string.clone())
            .unwrap_or_default();
        return Ok(EditPlan {
            file_uri: filepath,
            editing_file_contents: String::new(),
            new_content,
        });
    }

    let file_uri = resolved.ok_or(EditError::EditTargetMissing { path: filepath })?;
    let contents = host.read_file(&file_uri).await?;
    let new_content = apply_edits_sequentially(&contents, &edits)?;

    Ok(EditPlan {
        file_uri,
        editing_file_contents: contents,
        new_content,
    })
}

async fn plan_search_replace<H: HostBridge>(args: &Value, host: &H) -> FlowResult<EditPlan> {
    let tool = EditTool::SearchAndReplaceInFile;
    let args: SearchReplaceArgs = parse_args(tool, args)?;
    let filepath = require_filepath(tool, args.filepath)?;

    let file_uri = host
        .resolve_relative_path(&filepath)
        .await?
        .ok_or(EditError::FileNotFound { path: filepath })?;

    let parsed = collect_complete_blocks(&args.diffs.unwrap_or_default())?;

    let contents = host.read_file(&file_uri).await.map_err(|e| {
        FlowError::tool_execution(
            tool.name(),
            format!("Failed to apply search and replace: {}", e.tool_output()),
        )
    })?;
    let new_content = apply_blocks_sequentially(&contents, &parsed.blocks)?;

    Ok(EditPlan {
        file_uri,
        editing_file_contents: contents,
        new_content,
    })
}
