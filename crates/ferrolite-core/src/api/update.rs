//! Update actions for `UpdateItem`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::KeySchema;
use crate::value::{AttributeValue, Item, add_numbers, number_set_contains};

/// One clause of an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
    /// Set the attribute at a dot-separated path. Every parent map must exist.
    /// With `if_not_exists`, an existing value is left alone.
    Set {
        path: String,
        value: AttributeValue,
        #[serde(default)]
        if_not_exists: bool,
    },
    /// Remove the attribute at a path. Missing paths are a no-op.
    Remove { path: String },
    /// Increment a number or union into a set. Missing attributes are initialized.
    Add { path: String, value: AttributeValue },
    /// Subtract elements from a set. An emptied set removes the attribute.
    Delete { path: String, value: AttributeValue },
}

impl UpdateAction {
    pub fn set(path: impl Into<String>, value: AttributeValue) -> Self {
        UpdateAction::Set {
            path: path.into(),
            value,
            if_not_exists: false,
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        UpdateAction::Remove { path: path.into() }
    }

    pub fn add(path: impl Into<String>, value: AttributeValue) -> Self {
        UpdateAction::Add {
            path: path.into(),
            value,
        }
    }

    pub fn delete(path: impl Into<String>, value: AttributeValue) -> Self {
        UpdateAction::Delete {
            path: path.into(),
            value,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            UpdateAction::Set { path, .. }
            | UpdateAction::Remove { path }
            | UpdateAction::Add { path, .. }
            | UpdateAction::Delete { path, .. } => path,
        }
    }

    fn top_level(&self) -> &str {
        let path = self.path();
        path.split('.').next().unwrap_or(path)
    }
}

fn invalid(path: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidUpdate {
        path: path.to_string(),
        message: message.into(),
    }
}

/// Reject malformed action lists before the current item is read.
///
/// Key attributes cannot be targeted, paths must be well-formed and distinct,
/// and ADD/DELETE operands must have a type those actions accept.
pub fn validate_actions(actions: &[UpdateAction], schema: &KeySchema) -> Result<(), ValidationError> {
    if actions.is_empty() {
        return Err(ValidationError::InvalidParameter(
            "update requires at least one action".into(),
        ));
    }
    let mut seen = BTreeSet::new();
    for action in actions {
        let path = action.path();
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(invalid(path, "malformed attribute path"));
        }
        if schema.is_key_attribute(action.top_level()) {
            return Err(ValidationError::KeyAttributeUpdate(action.top_level().to_string()));
        }
        if !seen.insert(path) {
            return Err(invalid(path, "two actions target the same path"));
        }
        match action {
            UpdateAction::Set { value, .. } => value.validate(path)?,
            UpdateAction::Remove { .. } => {}
            UpdateAction::Add { value, .. } => {
                value.validate(path)?;
                if !matches!(value, AttributeValue::Number(_)) && !value.is_set() {
                    return Err(invalid(path, "ADD requires a number or a set"));
                }
            }
            UpdateAction::Delete { value, .. } => {
                value.validate(path)?;
                if !value.is_set() {
                    return Err(invalid(path, "DELETE requires a set"));
                }
            }
        }
    }
    Ok(())
}

/// Apply `actions` in order, returning the top-level attribute names touched.
pub fn apply_updates(
    item: &mut Item,
    actions: &[UpdateAction],
) -> Result<BTreeSet<String>, ValidationError> {
    let mut touched = BTreeSet::new();
    for action in actions {
        let path = action.path();
        let segments: Vec<&str> = path.split('.').collect();
        match action {
            UpdateAction::Set {
                value,
                if_not_exists,
                ..
            } => {
                if *if_not_exists && get_mut(item, &segments).is_some() {
                    continue;
                }
                set_path(item, &segments, value.clone(), path)?;
            }
            UpdateAction::Remove { .. } => remove_path(item, &segments),
            UpdateAction::Add { value, .. } => match get_mut(item, &segments) {
                Some(existing) => add_into(existing, value, path)?,
                None => set_path(item, &segments, value.clone(), path)?,
            },
            UpdateAction::Delete { value, .. } => {
                let emptied = match get_mut(item, &segments) {
                    Some(existing) => subtract_from(existing, value, path)?,
                    None => false,
                };
                if emptied {
                    remove_path(item, &segments);
                }
            }
        }
        touched.insert(action.top_level().to_string());
    }
    Ok(touched)
}

fn get_mut<'a>(item: &'a mut Item, segments: &[&str]) -> Option<&'a mut AttributeValue> {
    let (first, rest) = segments.split_first()?;
    let mut current = item.get_mut(*first)?;
    for segment in rest {
        match current {
            AttributeValue::Map(m) => current = m.get_mut(*segment)?,
            _ => return None,
        }
    }
    Some(current)
}

fn set_path(
    map: &mut BTreeMap<String, AttributeValue>,
    segments: &[&str],
    value: AttributeValue,
    path: &str,
) -> Result<(), ValidationError> {
    match segments {
        [] => Err(invalid(path, "empty path")),
        [leaf] => {
            map.insert(leaf.to_string(), value);
            Ok(())
        }
        [head, rest @ ..] => {
            let child = map
                .get_mut(*head)
                .ok_or_else(|| invalid(path, format!("document path '{head}' does not exist")))?;
            match child {
                AttributeValue::Map(inner) => set_path(inner, rest, value, path),
                other => Err(invalid(
                    path,
                    format!("'{head}' is of type {} and cannot hold attributes", other.type_name()),
                )),
            }
        }
    }
}

fn remove_path(map: &mut BTreeMap<String, AttributeValue>, segments: &[&str]) {
    match segments {
        [] => {}
        [leaf] => {
            map.remove(*leaf);
        }
        [head, rest @ ..] => {
            if let Some(AttributeValue::Map(inner)) = map.get_mut(*head) {
                remove_path(inner, rest);
            }
        }
    }
}

fn add_into(
    existing: &mut AttributeValue,
    value: &AttributeValue,
    path: &str,
) -> Result<(), ValidationError> {
    match (existing, value) {
        (AttributeValue::Number(current), AttributeValue::Number(delta)) => {
            *current = add_numbers(current, delta).map_err(|err| invalid(path, err.to_string()))?;
        }
        (AttributeValue::StringSet(set), AttributeValue::StringSet(extra)) => {
            for s in extra {
                if !set.contains(s) {
                    set.push(s.clone());
                }
            }
        }
        (AttributeValue::NumberSet(set), AttributeValue::NumberSet(extra)) => {
            for n in extra {
                if !number_set_contains(set, n) {
                    set.push(n.clone());
                }
            }
        }
        (AttributeValue::BinarySet(set), AttributeValue::BinarySet(extra)) => {
            for b in extra {
                if !set.contains(b) {
                    set.push(b.clone());
                }
            }
        }
        (existing, value) => {
            return Err(invalid(
                path,
                format!(
                    "ADD of {} to existing {} is not supported",
                    value.type_name(),
                    existing.type_name()
                ),
            ));
        }
    }
    Ok(())
}

/// Returns true when the set became empty.
fn subtract_from(
    existing: &mut AttributeValue,
    value: &AttributeValue,
    path: &str,
) -> Result<bool, ValidationError> {
    let emptied = match (existing, value) {
        (AttributeValue::StringSet(set), AttributeValue::StringSet(remove)) => {
            set.retain(|s| !remove.contains(s));
            set.is_empty()
        }
        (AttributeValue::NumberSet(set), AttributeValue::NumberSet(remove)) => {
            set.retain(|n| !number_set_contains(remove, n));
            set.is_empty()
        }
        (AttributeValue::BinarySet(set), AttributeValue::BinarySet(remove)) => {
            set.retain(|b| !remove.contains(b));
            set.is_empty()
        }
        (existing, value) => {
            return Err(invalid(
                path,
                format!(
                    "DELETE of {} from existing {} is not supported",
                    value.type_name(),
                    existing.type_name()
                ),
            ));
        }
    };
    Ok(emptied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KeyDefinition, KeyType};

    fn schema() -> KeySchema {
        KeySchema {
            partition_key: KeyDefinition::new("pk", KeyType::String),
            sort_key: None,
        }
    }

    fn base() -> Item {
        Item::from([
            ("pk".to_string(), AttributeValue::s("a")),
            ("count".to_string(), AttributeValue::n(5)),
            (
                "tags".to_string(),
                AttributeValue::StringSet(vec!["red".into(), "blue".into()]),
            ),
        ])
    }

    #[test]
    fn test_set_and_nested_set() {
        let mut item = base();
        item.insert("address".into(), AttributeValue::Map(BTreeMap::new()));
        let touched = apply_updates(
            &mut item,
            &[
                UpdateAction::set("name", AttributeValue::s("Alice")),
                UpdateAction::set("address.city", AttributeValue::s("Oslo")),
            ],
        )
        .unwrap();
        assert_eq!(item["name"], AttributeValue::s("Alice"));
        let AttributeValue::Map(address) = &item["address"] else {
            panic!("expected map");
        };
        assert_eq!(address["city"], AttributeValue::s("Oslo"));
        assert!(touched.contains("address"));
    }

    #[test]
    fn test_set_if_not_exists() {
        let mut item = base();
        apply_updates(
            &mut item,
            &[UpdateAction::Set {
                path: "count".into(),
                value: AttributeValue::n(0),
                if_not_exists: true,
            }],
        )
        .unwrap();
        assert_eq!(item["count"], AttributeValue::n(5));
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let mut item = base();
        let err = apply_updates(&mut item, &[UpdateAction::set("count.x", AttributeValue::n(1))]);
        assert!(matches!(err, Err(ValidationError::InvalidUpdate { .. })));
    }

    #[test]
    fn test_set_under_missing_parent_fails() {
        let mut item = base();
        let err = apply_updates(&mut item, &[UpdateAction::set("address.city", AttributeValue::s("Oslo"))]);
        assert!(matches!(err, Err(ValidationError::InvalidUpdate { .. })));
        assert!(!item.contains_key("address"));

        let err = apply_updates(&mut item, &[UpdateAction::add("stats.hits", AttributeValue::n(1))]);
        assert!(matches!(err, Err(ValidationError::InvalidUpdate { .. })));
    }

    #[test]
    fn test_add_is_exact() {
        let mut item = base();
        apply_updates(&mut item, &[UpdateAction::add("ratio", AttributeValue::n("0.1"))]).unwrap();
        apply_updates(&mut item, &[UpdateAction::add("ratio", AttributeValue::n("0.2"))]).unwrap();
        assert_eq!(item["ratio"], AttributeValue::n("0.3"));

        item.insert("big".into(), AttributeValue::n("100000000000000000000"));
        apply_updates(&mut item, &[UpdateAction::add("big", AttributeValue::n(1))]).unwrap();
        assert_eq!(item["big"], AttributeValue::n("100000000000000000001"));
    }

    #[test]
    fn test_add_number_and_initialize() {
        let mut item = base();
        apply_updates(
            &mut item,
            &[
                UpdateAction::add("count", AttributeValue::n(-2)),
                UpdateAction::add("visits", AttributeValue::n(1)),
            ],
        )
        .unwrap();
        assert_eq!(item["count"], AttributeValue::n(3));
        assert_eq!(item["visits"], AttributeValue::n(1));
    }

    #[test]
    fn test_set_union_and_difference() {
        let mut item = base();
        apply_updates(
            &mut item,
            &[UpdateAction::add(
                "tags",
                AttributeValue::StringSet(vec!["red".into(), "green".into()]),
            )],
        )
        .unwrap();
        assert_eq!(
            item["tags"],
            AttributeValue::StringSet(vec!["red".into(), "blue".into(), "green".into()])
        );

        apply_updates(
            &mut item,
            &[UpdateAction::delete(
                "tags",
                AttributeValue::StringSet(vec!["red".into(), "blue".into(), "green".into()]),
            )],
        )
        .unwrap();
        assert!(!item.contains_key("tags"));
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut item = base();
        apply_updates(&mut item, &[UpdateAction::remove("nope.deeper")]).unwrap();
        apply_updates(&mut item, &[UpdateAction::remove("count")]).unwrap();
        assert!(!item.contains_key("count"));
    }

    #[test]
    fn test_validate_actions() {
        let s = schema();
        assert!(matches!(
            validate_actions(&[UpdateAction::set("pk", AttributeValue::s("b"))], &s),
            Err(ValidationError::KeyAttributeUpdate(_))
        ));
        assert!(validate_actions(&[], &s).is_err());
        assert!(validate_actions(&[UpdateAction::remove("a..b")], &s).is_err());
        assert!(
            validate_actions(
                &[UpdateAction::remove("a"), UpdateAction::set("a", AttributeValue::n(1))],
                &s
            )
            .is_err()
        );
        assert!(validate_actions(&[UpdateAction::add("a", AttributeValue::s("x"))], &s).is_err());
        assert!(validate_actions(&[UpdateAction::delete("a", AttributeValue::n(1))], &s).is_err());
        assert!(validate_actions(&[UpdateAction::set("data.pk", AttributeValue::n(1))], &s).is_ok());
    }
}
