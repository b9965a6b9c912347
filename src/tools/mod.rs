//! Tool registry.
//!
//! The set of tools is closed and resolved once when the coordinator is
//! built. Each registered tool knows its definition (sent to the model), its
//! default policy and how it executes:
//!
//! - [`ToolKind::Edit`] tools are planned locally and applied through the
//!   host's apply pipeline (see [`edit_tools`])
//! - [`ToolKind::Host`] tools are executed by the host with a `tools/call`
//!   round trip
//!
//! # Example
//!
//! ```rust
//! use toolflow::tools::{names, EditTool, ToolKind, ToolRegistry};
//!
//! let registry = ToolRegistry::builtin();
//! let tool = registry.resolve(names::MULTI_EDIT).unwrap();
//! assert_eq!(tool.kind, ToolKind::Edit(EditTool::MultiEdit));
//! assert!(registry.resolve("no_such_tool").is_err());
//! ```

pub mod edit_tools;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{FlowError, FlowResult};
use crate::permissions::ToolPolicy;

/// Built-in tool names.
pub mod names {
    pub const SINGLE_FIND_AND_REPLACE: &str = "single_find_and_replace";
    pub const MULTI_EDIT: &str = "multi_edit";
    pub const SEARCH_AND_REPLACE_IN_FILE: &str = "search_and_replace_in_file";
    pub const READ_FILE: &str = "read_file";
    pub const RUN_TERMINAL_COMMAND: &str = "run_terminal_command";
}

/// A tool definition sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    /// The unique name of the tool.
    pub name: String,

    /// What the tool does. The model uses this to decide when to call it.
    pub description: String,

    /// JSON Schema for the arguments.
    pub input_schema: Value,
}

impl ToolDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// The file-editing tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditTool {
    /// One `old_string`/`new_string` pair.
    SingleFindAndReplace,
    /// A list of pairs applied in order.
    MultiEdit,
    /// SEARCH/REPLACE blocks parsed from free-form diffs.
    SearchAndReplaceInFile,
}

impl EditTool {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::SingleFindAndReplace => names::SINGLE_FIND_AND_REPLACE,
            Self::MultiEdit => names::MULTI_EDIT,
            Self::SearchAndReplaceInFile => names::SEARCH_AND_REPLACE_IN_FILE,
        }
    }

    #[must_use]
    pub fn definition(self) -> ToolDefinition {
        match self {
            Self::SingleFindAndReplace => ToolDefinition::new(
                self.name(),
                "Replace one exact string in an existing file. old_string must occur exactly \
                 once unless replace_all is true.",
                json!({
                    "type": "object",
                    "properties": {
                        "filepath": {"type": "string", "description": "Path of the file, relative to the workspace"},
                        "old_string": {"type": "string", "description": "The exact text to replace"},
                        "new_string": {"type": "string", "description": "The replacement text"},
                        "replace_all": {"type": "boolean", "description": "Replace every occurrence"}
                    },
                    "required": ["filepath", "old_string", "new_string"]
                }),
            ),
            Self::MultiEdit => ToolDefinition::new(
                self.name(),
                "Make several find-and-replace edits to one file. Edits are applied in order, \
                 each to the result of the previous one. To create a file, pass a single edit \
                 with an empty old_string.",
                json!({
                    "type": "object",
                    "properties": {
                        "filepath": {"type": "string", "description": "Path of the file, relative to the workspace"},
                        "edits": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "old_string": {"type": "string"},
                                    "new_string": {"type": "string"},
                                    "replace_all": {"type": "boolean"}
                                },
                                "required": ["old_string", "new_string"]
                            }
                        }
                    },
                    "required": ["filepath", "edits"]
                }),
            ),
            Self::SearchAndReplaceInFile => ToolDefinition::new(
                self.name(),
                "Edit an existing file with SEARCH/REPLACE blocks:\n\
                 <<<<<<< SEARCH\n[exact existing content]\n=======\n[new content]\n>>>>>>> REPLACE\n\
                 Blocks are applied in order. Each SEARCH section must match exactly one place.",
                json!({
                    "type": "object",
                    "properties": {
                        "filepath": {"type": "string", "description": "Path of the file, relative to the workspace"},
                        "diffs": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "One or more texts containing SEARCH/REPLACE blocks"
                        }
                    },
                    "required": ["filepath", "diffs"]
                }),
            ),
        }
    }
}

/// How a tool executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Planned locally, applied by the host's diff pipeline.
    Edit(EditTool),
    /// Executed by the host.
    Host,
}

/// A tool known to the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub kind: ToolKind,
    /// Policy used when no rule matches.
    pub default_policy: ToolPolicy,
}

/// The closed set of tools available to the model.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The edit tools plus the standard host tools.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new()
            .with_edit_tool(EditTool::SingleFindAndReplace)
            .with_edit_tool(EditTool::MultiEdit)
            .with_edit_tool(EditTool::SearchAndReplaceInFile)
            .with_host_tool(
                ToolDefinition::new(
                    names::READ_FILE,
                    "Read the contents of a file in the workspace.",
                    json!({
                        "type": "object",
                        "properties": {
                            "filepath": {"type": "string", "description": "Path of the file, relative to the workspace"}
                        },
                        "required": ["filepath"]
                    }),
                ),
                ToolPolicy::Auto,
            )
            .with_host_tool(
                ToolDefinition::new(
                    names::RUN_TERMINAL_COMMAND,
                    "Run a shell command in the workspace and return its output.",
                    json!({
                        "type": "object",
                        "properties": {
                            "command": {"type": "string", "description": "The command to run"}
                        },
                        "required": ["command"]
                    }),
                ),
                ToolPolicy::Ask,
            )
    }

    fn register(mut self, tool: RegisteredTool) -> Self {
        match self.index.get(&tool.definition.name) {
            Some(&position) => self.tools[position] = tool,
            None => {
                self.index.insert(tool.definition.name.clone(), self.tools.len());
                self.tools.push(tool);
            }
        }
        self
    }

    /// Registers an edit tool. Edits ask for approval by default.
    #[must_use]
    pub fn with_edit_tool(self, tool: EditTool) -> Self {
        self.register(RegisteredTool {
            definition: tool.definition(),
            kind: ToolKind::Edit(tool),
            default_policy: ToolPolicy::Ask,
        })
    }

    /// Registers a host-executed tool. Replaces a tool with the same name.
    #[must_use]
    pub fn with_host_tool(self, definition: ToolDefinition, default_policy: ToolPolicy) -> Self {
        self.register(RegisteredTool {
            definition,
            kind: ToolKind::Host,
            default_policy,
        })
    }

    /// Looks a tool up by name.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::ToolNotFound`] for unknown names.
    pub fn resolve(&self, name: &str) -> FlowResult<&RegisteredTool> {
        self.index
            .get(name)
            .map(|&position| &self.tools[position])
            .ok_or_else(|| FlowError::tool_not_found(name))
    }

    /// Definitions for every tool, in registration order.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|tool| tool.definition.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
