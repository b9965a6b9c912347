//! Tiered search-block matching.
//!
//! Locates a search block inside file content. Strategies are tried from the
//! strictest to the most tolerant and the first one that produces a span wins:
//!
//! 1. Empty search (matches at offset 0, used for prepend / file creation)
//! 2. Exact substring
//! 3. Trimmed search text
//! 4. ASCII case-insensitive
//! 5. Whitespace-ignored (all whitespace removed from both sides)
//!
//! All offsets are byte offsets into the original content and always fall on
//! `char` boundaries, so `&content[m.start_index..m.end_index]` is safe.
//!
//! # Examples
//!
//! ```
//! use toolflow::edit::matcher::{find_search_match, MatchStrategy};
//!
//! let content = "fn main() {\n    println!(\"hi\");\n}";
//! let m = find_search_match(content, "println!(\"hi\");").unwrap();
//! assert_eq!(m.strategy, MatchStrategy::Exact);
//! assert_eq!(&content[m.start_index..m.end_index], "println!(\"hi\");");
//! ```

use std::fmt;

/// The strategy that produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchStrategy {
    /// The search text was empty (or whitespace only).
    EmptySearch,
    /// Byte-for-byte substring match.
    Exact,
    /// Match of the search text with surrounding whitespace trimmed.
    Trimmed,
    /// ASCII case-insensitive match.
    CaseInsensitive,
    /// Match ignoring every whitespace character.
    WhitespaceIgnored,
}

impl MatchStrategy {
    /// Returns true for strategies that tolerate differences from the search text.
    #[must_use]
    pub fn is_fuzzy(self) -> bool {
        matches!(
            self,
            Self::Trimmed | Self::CaseInsensitive | Self::WhitespaceIgnored
        )
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EmptySearch => "emptySearch",
            Self::Exact => "exactMatch",
            Self::Trimmed => "trimmedMatch",
            Self::CaseInsensitive => "caseInsensitiveMatch",
            Self::WhitespaceIgnored => "whitespaceIgnoredMatch",
        };
        f.write_str(name)
    }
}

/// A located span. `end_index` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchMatch {
    /// Byte offset of the first matched byte.
    pub start_index: usize,
    /// Byte offset one past the last matched byte.
    pub end_index: usize,
    /// Which strategy produced the span.
    pub strategy: MatchStrategy,
}

impl SearchMatch {
    fn offset(self, by: usize) -> Self {
        Self {
            start_index: self.start_index + by,
            end_index: self.end_index + by,
            strategy: self.strategy,
        }
    }
}

type Strategy = fn(&str, &str) -> Option<(usize, usize)>;

/// Ordered list of strategies tried after the empty-search check.
const STRATEGIES: [(Strategy, MatchStrategy); 4] = [
    (exact_match, MatchStrategy::Exact),
    (trimmed_match, MatchStrategy::Trimmed),
    (case_insensitive_match, MatchStrategy::CaseInsensitive),
    (whitespace_ignored_match, MatchStrategy::WhitespaceIgnored),
];

fn exact_match(content: &str, search: &str) -> Option<(usize, usize)> {
    content.find(search).map(|i| (i, i + search.len()))
}

fn trimmed_match(content: &str, search: &str) -> Option<(usize, usize)> {
    let trimmed = search.trim();
    content.find(trimmed).map(|i| (i, i + trimmed.len()))
}

fn case_insensitive_match(content: &str, search: &str) -> Option<(usize, usize)> {
    // ASCII lowering keeps byte lengths, so offsets map straight back.
    let lower_content = content.to_ascii_lowercase();
    let lower_search = search.to_ascii_lowercase();
    lower_content
        .find(&lower_search)
        .map(|i| (i, i + search.len()))
}

fn whitespace_ignored_match(content: &str, search: &str) -> Option<(usize, usize)> {
    let stripped_search: String = search.chars().filter(|c| !c.is_whitespace()).collect();
    if stripped_search.is_empty() {
        return None;
    }

    // origin[k] is the byte offset in `content` of the char covering stripped byte k.
    let mut stripped = String::with_capacity(content.len());
    let mut origin = Vec::with_capacity(content.len());
    for (offset, c) in content.char_indices() {
        if c.is_whitespace() {
            continue;
        }
        stripped.push(c);
        origin.extend(std::iter::repeat(offset).take(c.len_utf8()));
    }

    let found = stripped.find(&stripped_search)?;
    let start = origin[found];
    let last = origin[found + stripped_search.len() - 1];
    let last_len = content[last..].chars().next().map_or(0, char::len_utf8);
    Some((start, last + last_len))
}

/// Finds the first match of `search` in `content`.
///
/// Returns `None` when no strategy produces a match. A `None` is a hard
/// failure for the caller: the block cannot be applied.
#[must_use]
pub fn find_search_match(content: &str, search: &str) -> Option<SearchMatch> {
    if search.trim().is_empty() {
        return Some(SearchMatch {
            start_index: 0,
            end_index: 0,
            strategy: MatchStrategy::EmptySearch,
        });
    }

    STRATEGIES.iter().find_map(|(strategy, name)| {
        strategy(content, search).map(|(start_index, end_index)| SearchMatch {
            start_index,
            end_index,
            strategy: *name,
        })
    })
}

/// Finds every non-overlapping match of `search` in `content`.
///
/// Each subsequent match is searched for in the content after the previous
/// match, using the same tiered strategies. Used for uniqueness checks: more
/// than one match means the search block is ambiguous.
#[must_use]
pub fn find_search_matches(content: &str, search: &str) -> Vec<SearchMatch> {
    if search.trim().is_empty() {
        return vec![SearchMatch {
            start_index: 0,
            end_index: 0,
            strategy: MatchStrategy::EmptySearch,
        }];
    }

    let mut matches: Vec<SearchMatch> = Vec::new();
    let mut offset = 0;

    while offset < content.len() {
        let Some(found) = find_search_match(&content[offset..], search) else {
            break;
        };
        let adjusted = found.offset(offset);

        // Zero-width or non-advancing matches would loop forever.
        if adjusted.end_index <= offset
            || matches
                .last()
                .is_some_and(|prev| adjusted.start_index <= prev.start_index)
        {
            break;
        }

        matches.push(adjusted);
        offset = adjusted.end_index;
    }

    matches
}
