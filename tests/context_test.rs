use kiln::context::{into_variables, merge_context, Variables};
use serde_json::json;

fn vars(value: serde_json::Value) -> Variables {
    into_variables(value).unwrap()
}

#[test]
fn test_merge_is_idempotent() {
    let a = vars(json!({"k": {"x": 1}, "list": [1, 2], "s": "v"}));
    let once = merge_context([&a], &Variables::new());
    let twice = merge_context([&a, &a], &Variables::new());
    assert_eq!(once, twice);
    assert_eq!(once, a);
}

#[test]
fn test_later_mapping_wins_without_deep_merge() {
    let a = vars(json!({"k": {"x": 1}, "only_a": true}));
    let b = vars(json!({"k": {"y": 2}}));
    let merged = merge_context([&a, &b], &Variables::new());
    assert_eq!(merged["k"], json!({"y": 2}));
    assert_eq!(merged["only_a"], json!(true));
}

#[test]
fn test_overrides_always_win() {
    let a = vars(json!({"k": {"x": 1}, "other": 1}));
    let overrides = vars(json!({"k": "v"}));
    let merged = merge_context([&a], &overrides);
    assert_eq!(merged["k"], json!("v"));
    assert_eq!(merged["other"], json!(1));
}

#[test]
fn test_merge_keeps_first_seen_key_order() {
    let a = vars(json!({"first": 1, "second": 2}));
    let b = vars(json!({"third": 3, "first": 10}));
    let merged = merge_context([&a, &b], &Variables::new());
    let keys: Vec<&str> = merged.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["first", "second", "third"]);
    assert_eq!(merged["first"], json!(10));
}

#[test]
fn test_merge_of_nothing_is_the_overrides() {
    let overrides = vars(json!({"only": "inline"}));
    let merged = merge_context(std::iter::empty::<&Variables>(), &overrides);
    assert_eq!(merged, overrides);
}
