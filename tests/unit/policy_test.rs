//! Policy resolution from configuration.

use pretty_assertions::assert_eq;

use toolflow::error::FlowError;
use toolflow::permissions::{BatchDecision, PolicyEvaluator, ToolPolicy};
use toolflow::tools::{names, ToolRegistry};
use toolflow::EngineConfig;

use crate::common::TestContext;

const CONFIG: &str = r#"
default_policy = "ask"
continue_after_rejection = true

[[policies]]
tool = "read_*"
policy = "auto"

[[policies]]
tool = "run_terminal_command"
policy = "disabled"
"#;

fn evaluator() -> PolicyEvaluator {
    let ctx = TestContext::new();
    let path = ctx.create_file("toolflow.toml", CONFIG);
    let config = EngineConfig::load(&path).unwrap();
    assert!(config.continue_after_rejection);
    PolicyEvaluator::from_config(&config)
}

#[test]
fn test_rules_override_tool_defaults() {
    let evaluator = evaluator();
    let registry = ToolRegistry::builtin();

    let policy_for = |name: &str| {
        let tool = registry.resolve(name).unwrap();
        evaluator.base_policy(name, Some(tool.default_policy))
    };

    assert_eq!(policy_for(names::READ_FILE), ToolPolicy::Auto);
    assert_eq!(policy_for(names::RUN_TERMINAL_COMMAND), ToolPolicy::Never);
    assert_eq!(policy_for(names::MULTI_EDIT), ToolPolicy::Ask);
    assert_eq!(evaluator.base_policy("mcp__search", None), ToolPolicy::Ask);
}

#[test]
fn test_dynamic_result_never_loosens() {
    assert_eq!(PolicyEvaluator::tighten(ToolPolicy::Ask, Some(Ok(ToolPolicy::Auto))), ToolPolicy::Ask);
    assert_eq!(PolicyEvaluator::tighten(ToolPolicy::Auto, Some(Ok(ToolPolicy::Ask))), ToolPolicy::Ask);
    assert_eq!(
        PolicyEvaluator::tighten(ToolPolicy::Auto, Some(Err(FlowError::llm_stream("down")))),
        ToolPolicy::Never
    );
    assert_eq!(PolicyEvaluator::tighten(ToolPolicy::Auto, None), ToolPolicy::Auto);
}

#[test]
fn test_single_ask_pauses_batch() {
    let decision = BatchDecision::from_policies(vec![
        ("c1".to_string(), ToolPolicy::Auto),
        ("c2".to_string(), ToolPolicy::Ask),
        ("c3".to_string(), ToolPolicy::Never),
    ]);
    assert!(!decision.continue_streaming);
    assert!(decision.to_dispatch().is_empty());
    assert_eq!(decision.rejected, vec!["c3".to_string()]);

    let decision = BatchDecision::from_policies(vec![
        ("c1".to_string(), ToolPolicy::Auto),
        ("c3".to_string(), ToolPolicy::Never),
    ]);
    assert!(decision.continue_streaming);
    assert_eq!(decision.to_dispatch(), ["c1".to_string()]);
}

#[test]
fn test_broken_config_file_is_reported() {
    let ctx = TestContext::new();
    let path = ctx.create_file("bad.toml", "max_depth = \"many\"");
    let err = EngineConfig::load(&path).unwrap_err();
    assert!(matches!(err, FlowError::ConfigParse { .. }));
    assert!(err.is_user_facing());
}
