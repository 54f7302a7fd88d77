//! Projection of items onto a subset of attribute paths.
//!
//! Projection happens after retrieval: the full item is always read, then
//! trimmed before it is returned.

use crate::value::{AttributeValue, Item, resolve_path};

/// Keep only `paths` (dot-separated). An empty list keeps everything.
pub fn apply_projection(item: &Item, paths: &[String]) -> Item {
    if paths.is_empty() {
        return item.clone();
    }
    let mut result = Item::new();
    for path in paths {
        if let Some(value) = resolve_path(item, path) {
            insert_path(&mut result, path, value.clone());
        }
    }
    result
}

/// Copy the attributes an index projection keeps: every key attribute plus
/// the projected non-key attributes.
pub fn project_for_index(item: &Item, key_names: &[&str], non_key: Option<&[String]>) -> Item {
    match non_key {
        None => item.clone(),
        Some(extra) => item
            .iter()
            .filter(|(name, _)| key_names.contains(&name.as_str()) || extra.contains(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
    }
}

fn insert_path(target: &mut Item, path: &str, value: AttributeValue) {
    let mut segments = path.split('.').peekable();
    let mut current = target;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }
        let child = current
            .entry(segment.to_string())
            .or_insert_with(|| AttributeValue::Map(Item::new()));
        match child {
            AttributeValue::Map(inner) => current = inner,
            _ => return,
        }
    }
}
