//! Tool approval policies.
//!
//! Decides, per tool call, whether execution may proceed automatically, must
//! wait for the user, or is refused outright, and folds a batch of per-call
//! decisions into a single "keep going or pause" decision.
//!
//! # Architecture
//!
//! ```text
//! Tool call reaches `generated`
//!     ↓
//! PolicyEvaluator::base_policy()      rules → tool default → config default
//!     ↓
//! PolicyEvaluator::tighten()          host may only make it stricter
//!     ↓
//! BatchDecision::from_policies()
//!     ├─ any Ask       → pause the whole batch
//!     ├─ Never         → cancel that call immediately
//!     └─ all Auto      → dispatch every call in parallel
//! ```
//!
//! # Example
//!
//! ```
//! use toolflow::permissions::{BatchDecision, PolicyEvaluator, ToolPolicy};
//!
//! let evaluator = PolicyEvaluator::new(ToolPolicy::Ask).with_rule("read_*", ToolPolicy::Auto);
//!
//! let batch = BatchDecision::from_policies(vec![
//!     ("c1".to_string(), evaluator.base_policy("read_file", None)),
//!     ("c2".to_string(), evaluator.base_policy("edit_existing_file", None)),
//! ]);
//! assert!(!batch.continue_streaming);
//! assert_eq!(batch.pending_approval, vec!["c2".to_string()]);
//! ```

pub mod patterns;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::FlowResult;
use crate::types::config::EngineConfig;
use patterns::matches_pattern;

/// How a tool may be executed.
///
/// Variants are ordered from most to least lenient, so `max` of two policies
/// is the stricter one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPolicy {
    /// Run without asking.
    #[serde(alias = "allowedWithoutPermission")]
    Auto,
    /// Ask the user first.
    #[serde(alias = "allowedWithPermission")]
    Ask,
    /// Never run.
    #[serde(alias = "disabled")]
    Never,
}

impl fmt::Display for ToolPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Ask => write!(f, "ask"),
            Self::Never => write!(f, "never"),
        }
    }
}

/// A policy rule keyed by a tool name pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Pattern to match tool names (e.g. `read_*`).
    pub tool: String,
    pub policy: ToolPolicy,
}

impl PolicyRule {
    #[must_use]
    pub fn new(tool: impl Into<String>, policy: ToolPolicy) -> Self {
        Self {
            tool: tool.into(),
            policy,
        }
    }

    #[must_use]
    pub fn matches(&self, tool_name: &str) -> bool {
        matches_pattern(&self.tool, tool_name)
    }
}

/// Resolves the policy for individual tool calls.
#[derive(Debug, Clone)]
pub struct PolicyEvaluator {
    rules: Vec<PolicyRule>,
    default_policy: ToolPolicy,
}

impl Default for PolicyEvaluator {
    fn default() -> Self {
        Self::new(ToolPolicy::Ask)
    }
}

impl PolicyEvaluator {
    /// Creates an evaluator with no rules.
    #[must_use]
    pub fn new(default_policy: ToolPolicy) -> Self {
        Self {
            rules: Vec::new(),
            default_policy,
        }
    }

    /// Creates an evaluator from the engine configuration.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            rules: config.policies.clone(),
            default_policy: config.default_policy,
        }
    }

    /// Adds a rule. Earlier rules win.
    #[must_use]
    pub fn with_rule(mut self, tool: impl Into<String>, policy: ToolPolicy) -> Self {
        self.rules.push(PolicyRule::new(tool, policy));
        self
    }

    /// Returns all rules.
    #[must_use]
    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// Resolves the static policy for a tool.
    ///
    /// The first matching rule wins, then the tool's own default, then the
    /// configured default.
    #[must_use]
    pub fn base_policy(&self, tool_name: &str, tool_default: Option<ToolPolicy>) -> ToolPolicy {
        if let Some(rule) = self.rules.iter().find(|rule| rule.matches(tool_name)) {
            debug!(tool = %tool_name, rule = %rule.tool, policy = %rule.policy, "Policy from rule");
            return rule.policy;
        }
        let policy = tool_default.unwrap_or(self.default_policy);
        debug!(tool = %tool_name, policy = %policy, "Policy from default");
        policy
    }

    /// Combines the static policy with a host-evaluated one.
    ///
    /// The host can only make the policy stricter. A failed evaluation
    /// resolves to [`ToolPolicy::Never`]. `None` means no dynamic evaluation
    /// was performed.
    #[must_use]
    pub fn tighten(base: ToolPolicy, dynamic: Option<FlowResult<ToolPolicy>>) -> ToolPolicy {
        match dynamic {
            None => base,
            Some(Ok(dynamic)) => base.max(dynamic),
            Some(Err(e)) => {
                warn!(error = %e, "Dynamic policy evaluation failed, refusing tool");
                ToolPolicy::Never
            }
        }
    }
}

/// The combined decision for one batch of tool calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDecision {
    /// Calls that may run now.
    pub auto_approved: Vec<String>,
    /// Calls waiting for the user.
    pub pending_approval: Vec<String>,
    /// Calls refused by policy.
    pub rejected: Vec<String>,
    /// True when nothing waits for approval and the auto-approved calls
    /// should be dispatched.
    pub continue_streaming: bool,
}

impl BatchDecision {
    /// Partitions `(tool_call_id, policy)` pairs.
    ///
    /// Any call needing approval pauses the whole batch: no call is
    /// dispatched until the user has seen all of them.
    #[must_use]
    pub fn from_policies(policies: Vec<(String, ToolPolicy)>) -> Self {
        let mut decision = Self::default();
        for (id, policy) in policies {
            match policy {
                ToolPolicy::Auto => decision.auto_approved.push(id),
                ToolPolicy::Ask => decision.pending_approval.push(id),
                ToolPolicy::Never => decision.rejected.push(id),
            }
        }
        decision.continue_streaming = decision.pending_approval.is_empty();
        decision
    }

    /// Returns the calls to dispatch immediately.
    #[must_use]
    pub fn to_dispatch(&self) -> &[String] {
        if self.continue_streaming {
            &self.auto_approved
        } else {
            &[]
        }
    }
}
