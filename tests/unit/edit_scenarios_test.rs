//! Search/replace behavior through the public edit API.

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use toolflow::edit::{
    apply_blocks_sequentially, collect_complete_blocks, find_search_match, perform_find_and_replace, EditError,
    SearchReplaceBlock,
};

#[test]
fn test_single_block_replacement() {
    let content = "const a = 1;\nconst b = 2;";
    let blocks = [SearchReplaceBlock::new("a = 1", "a = 100")];
    let result = apply_blocks_sequentially(content, &blocks).unwrap();
    assert_eq!(result, "const a = 100;\nconst b = 2;");
}

#[test]
fn test_repeated_search_is_ambiguous() {
    let content = "x = 1;\nx = 1;\n";
    let err = perform_find_and_replace(content, "x = 1;", "x = 2;", false, None).unwrap_err();
    assert!(matches!(err, EditError::MultipleOccurrences { count: 2, .. }));

    let all = perform_find_and_replace(content, "x = 1;", "x = 2;", true, None).unwrap();
    assert_eq!(all, "x = 2;\nx = 2;\n");
}

#[test]
fn test_block_order_changes_result() {
    let content = "alpha";
    let first = SearchReplaceBlock::new("alpha", "beta");
    let second = SearchReplaceBlock::new("beta", "gamma");

    let forward = apply_blocks_sequentially(content, &[first.clone(), second.clone()]).unwrap();
    assert_eq!(forward, "gamma");

    let backward = apply_blocks_sequentially(content, &[second, first]);
    assert!(matches!(backward, Err(EditError::SearchBlockNotFound { block: 1, .. })));
}

#[test]
fn test_diff_text_to_result() {
    let diff = "<<<<<<< SEARCH\nfn old() {}\n=======\nfn new() {}\n>>>>>>> REPLACE\n\
                <<<<<<< SEARCH\nold();\n=======\nnew();\n>>>>>>> REPLACE";
    let parsed = collect_complete_blocks(&[diff.to_string()]).unwrap();
    assert_eq!(parsed.blocks.len(), 2);
    assert_eq!(parsed.dropped, 0);

    let result = apply_blocks_sequentially("fn old() {}\nfn main() { old(); }\n", &parsed.blocks).unwrap();
    assert_eq!(result, "fn new() {}\nfn main() { new(); }\n");
}

#[test]
fn test_diff_without_complete_block() {
    let diff = "<<<<<<< SEARCH\nfn old() {}\n=======\nfn new() {}";
    let err = collect_complete_blocks(&[diff.to_string()]).unwrap_err();
    assert_eq!(err, EditError::NoCompleteBlocks { diff: Some(1) });
}

proptest! {
    #[test]
    fn prop_unique_search_is_located_and_consumed(
        prefix in "[a-m ]{0,20}",
        needle in "[n-z]{3,8}",
        suffix in "[a-m ]{0,20}",
    ) {
        let content = format!("{prefix}{needle}{suffix}");
        let found = find_search_match(&content, &needle).unwrap();
        prop_assert_eq!(&content[found.start_index..found.end_index], needle.as_str());

        let replaced = apply_blocks_sequentially(&content, &[SearchReplaceBlock::new(needle.clone(), "0")]).unwrap();
        prop_assert!(find_search_match(&replaced, &needle).is_none());
    }
}
