//! Tool-name globs used by policy rules.
//!
//! `*` matches any run of characters (including none), `?` exactly one.
//! Anything else is literal and matching is case-sensitive. A pattern
//! without wildcards is compared as a plain string.
//!
//! # Examples
//!
//! ```
//! use toolflow::permissions::patterns::matches_pattern;
//!
//! assert!(matches_pattern("read_file", "read_file"));
//! assert!(matches_pattern("read_*", "read_currently_open_file"));
//! assert!(matches_pattern("mcp__*", "mcp__github__create_issue"));
//! assert!(!matches_pattern("edit_?", "edit_file"));
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Compiled globs, keyed by pattern text.
static GLOB_CACHE: Lazy<Mutex<HashMap<String, Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Globs beyond this many are compiled on every use.
const GLOB_CACHE_LIMIT: usize = 100;

/// Checks whether `tool_name` matches the glob `pattern`.
#[must_use]
pub fn matches_pattern(pattern: &str, tool_name: &str) -> bool {
    if !is_glob(pattern) {
        return pattern == tool_name;
    }
    glob_regex(pattern).is_some_and(|regex| regex.is_match(tool_name))
}

/// Returns true if the pattern contains `*` or `?`.
#[must_use]
pub fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

fn glob_regex(pattern: &str) -> Option<Regex> {
    if let Some(regex) = GLOB_CACHE.lock().unwrap_or_else(PoisonError::into_inner).get(pattern) {
        return Some(regex.clone());
    }

    let regex = Regex::new(&glob_to_regex(pattern)).ok()?;
    let mut cache = GLOB_CACHE.lock().unwrap_or_else(PoisonError::into_inner);
    if cache.len() < GLOB_CACHE_LIMIT {
        cache.insert(pattern.to_string(), regex.clone());
    }
    Some(regex)
}

/// Anchored regex source for a glob; literal runs go through `regex::escape`.
fn glob_to_regex(pattern: &str) -> String {
    let mut source = String::from("^");
    let mut literal = String::new();
    for c in pattern.chars() {
        let wildcard = match c {
            '*' => ".*",
            '?' => ".",
            _ => {
                literal.push(c);
                continue;
            }
        };
        source.push_str(&regex::escape(&literal));
        literal.clear();
        source.push_str(wildcard);
    }
    source.push_str(&regex::escape(&literal));
    source.push('$');
    source
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern_is_exact() {
        assert!(matches_pattern("read_file", "read_file"));
        assert!(!matches_pattern("read_file", "read_file_range"));
        assert!(!matches_pattern("Read_File", "read_file"));
    }

    #[test]
    fn test_star_matches_any_run() {
        assert!(matches_pattern("read_*", "read_file"));
        assert!(matches_pattern("*_file", "create_new_file"));
        assert!(matches_pattern("*", "run_terminal_command"));
        assert!(matches_pattern("read*", "read"));
        assert!(!matches_pattern("read_*", "view_diff"));
    }

    #[test]
    fn test_question_matches_one_char() {
        assert!(matches_pattern("edit_v?", "edit_v2"));
        assert!(!matches_pattern("edit_v?", "edit_v"));
        assert!(!matches_pattern("edit_v?", "edit_v10"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        assert!(matches_pattern("mcp.server.*", "mcp.server.search"));
        assert!(!matches_pattern("mcp.server.*", "mcpXserverXsearch"));
        assert!(matches_pattern("tool(1)*", "tool(1)-extra"));
    }

    #[test]
    fn test_glob_to_regex_source() {
        assert_eq!(glob_to_regex("single_*"), "^single_.*$");
        assert_eq!(glob_to_regex("a.b?"), r"^a\.b.$");
    }

    #[test]
    fn test_compiled_globs_are_cached() {
        for _ in 0..3 {
            assert!(matches_pattern("cache_*_entry", "cache_hit_entry"));
        }
        let cache = GLOB_CACHE.lock().unwrap();
        assert!(cache.contains_key("cache_*_entry"));
    }
}
