//! Variable context construction.

use indexmap::IndexMap;

/// Ordered mapping from variable name to value.
pub type Variables = IndexMap<String, serde_json::Value>;

/// Folds `mappings` into a single context and overlays `overrides`.
///
/// Merging is shallow: on a key collision the later value replaces the
/// earlier one entirely, nested mappings included. `overrides` are applied
/// last with the same rule, so they always win.
pub fn merge_context<'a, I>(mappings: I, overrides: &Variables) -> Variables
where
    I: IntoIterator<Item = &'a Variables>,
{
    let mut context = Variables::new();
    for mapping in mappings {
        for (key, value) in mapping {
            context.insert(key.clone(), value.clone());
        }
    }
    for (key, value) in overrides {
        context.insert(key.clone(), value.clone());
    }
    context
}

/// Converts a parsed document into variables. `null` is treated as an
/// empty document; any other non-mapping value is rejected.
pub fn into_variables(value: serde_json::Value) -> Option<Variables> {
    match value {
        serde_json::Value::Null => Some(Variables::new()),
        serde_json::Value::Object(map) => Some(map.into_iter().collect()),
        _ => None,
    }
}
