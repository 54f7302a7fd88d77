//! Condition and filter expressions.
//!
//! One tree type serves conditional writes, query/scan filters and key-free
//! predicates. Trees arrive already parsed; [`ConditionExpr::validate`] checks
//! their shape before any storage access, after which evaluation cannot fail.

use std::borrow::Cow;
use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::value::{AttributeValue, Item, compare_values, resolve_path, values_equal};

/// Maximum nesting depth for condition expressions.
pub const MAX_EXPRESSION_DEPTH: usize = 16;

/// Maximum number of candidates in an `In` list.
pub const MAX_IN_CANDIDATES: usize = 100;

const TYPE_NAMES: [&str; 10] = ["S", "N", "B", "SS", "NS", "BS", "L", "M", "BOOL", "NULL"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionExpr {
    // Operands
    /// Dot-separated path into the item.
    Path(String),
    /// A literal value.
    Value(AttributeValue),
    /// `size(path)`: string/binary length or element count.
    Size(String),

    // Comparisons
    Eq(Box<ConditionExpr>, Box<ConditionExpr>),
    Ne(Box<ConditionExpr>, Box<ConditionExpr>),
    Lt(Box<ConditionExpr>, Box<ConditionExpr>),
    Le(Box<ConditionExpr>, Box<ConditionExpr>),
    Gt(Box<ConditionExpr>, Box<ConditionExpr>),
    Ge(Box<ConditionExpr>, Box<ConditionExpr>),
    Between(Box<ConditionExpr>, Box<ConditionExpr>, Box<ConditionExpr>),
    In(Box<ConditionExpr>, Vec<ConditionExpr>),

    // Functions
    BeginsWith(Box<ConditionExpr>, Box<ConditionExpr>),
    Contains(Box<ConditionExpr>, Box<ConditionExpr>),
    AttributeExists(String),
    AttributeNotExists(String),
    AttributeType(String, String),

    // Boolean logic
    And(Vec<ConditionExpr>),
    Or(Vec<ConditionExpr>),
    Not(Box<ConditionExpr>),
}

fn invalid(message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidExpression(message.into())
}

fn validate_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(invalid(format!("invalid attribute path '{path}'")));
    }
    Ok(())
}

impl ConditionExpr {
    pub fn path(path: impl Into<String>) -> Self {
        ConditionExpr::Path(path.into())
    }

    pub fn value(value: AttributeValue) -> Self {
        ConditionExpr::Value(value)
    }

    /// `path = value`
    pub fn eq(path: impl Into<String>, value: AttributeValue) -> Self {
        ConditionExpr::Eq(
            Box::new(Self::path(path)),
            Box::new(Self::value(value)),
        )
    }

    pub fn exists(path: impl Into<String>) -> Self {
        ConditionExpr::AttributeExists(path.into())
    }

    pub fn not_exists(path: impl Into<String>) -> Self {
        ConditionExpr::AttributeNotExists(path.into())
    }

    pub fn and(exprs: Vec<ConditionExpr>) -> Self {
        ConditionExpr::And(exprs)
    }

    fn is_operand(&self) -> bool {
        matches!(
            self,
            ConditionExpr::Path(_) | ConditionExpr::Value(_) | ConditionExpr::Size(_)
        )
    }

    /// Check the tree's shape. Must pass before [`ConditionExpr::eval`] is called.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_predicate(1)
    }

    fn validate_predicate(&self, depth: usize) -> Result<(), ValidationError> {
        if depth > MAX_EXPRESSION_DEPTH {
            return Err(invalid(format!(
                "expression depth exceeds maximum of {MAX_EXPRESSION_DEPTH}"
            )));
        }
        match self {
            ConditionExpr::Path(_) | ConditionExpr::Value(_) | ConditionExpr::Size(_) => {
                Err(invalid("operand cannot be used as a condition"))
            }
            ConditionExpr::Eq(l, r)
            | ConditionExpr::Ne(l, r)
            | ConditionExpr::Lt(l, r)
            | ConditionExpr::Le(l, r)
            | ConditionExpr::Gt(l, r)
            | ConditionExpr::Ge(l, r)
            | ConditionExpr::BeginsWith(l, r)
            | ConditionExpr::Contains(l, r) => {
                l.validate_operand()?;
                r.validate_operand()
            }
            ConditionExpr::Between(v, lo, hi) => {
                v.validate_operand()?;
                lo.validate_operand()?;
                hi.validate_operand()
            }
            ConditionExpr::In(v, candidates) => {
                if candidates.is_empty() || candidates.len() > MAX_IN_CANDIDATES {
                    return Err(invalid(format!(
                        "IN requires between 1 and {MAX_IN_CANDIDATES} candidates"
                    )));
                }
                v.validate_operand()?;
                candidates.iter().try_for_each(Self::validate_operand)
            }
            ConditionExpr::AttributeExists(p) | ConditionExpr::AttributeNotExists(p) => {
                validate_path(p)
            }
            ConditionExpr::AttributeType(p, type_name) => {
                validate_path(p)?;
                if !TYPE_NAMES.contains(&type_name.as_str()) {
                    return Err(invalid(format!("unknown attribute type '{type_name}'")));
                }
                Ok(())
            }
            ConditionExpr::And(exprs) | ConditionExpr::Or(exprs) => {
                if exprs.is_empty() {
                    return Err(invalid("AND/OR requires at least one operand"));
                }
                exprs
                    .iter()
                    .try_for_each(|e| e.validate_predicate(depth + 1))
            }
            ConditionExpr::Not(inner) => inner.validate_predicate(depth + 1),
        }
    }

    fn validate_operand(&self) -> Result<(), ValidationError> {
        match self {
            ConditionExpr::Path(p) | ConditionExpr::Size(p) => validate_path(p),
            ConditionExpr::Value(v) => v.validate("literal"),
            _ => Err(invalid("expected a path, value or size() as operand")),
        }
    }

    /// Evaluate against `item` (pass an empty item for "no current item").
    ///
    /// Missing attributes and mismatched types make comparisons false.
    pub fn eval(&self, item: &Item) -> bool {
        match self {
            ConditionExpr::Path(_) | ConditionExpr::Value(_) | ConditionExpr::Size(_) => false,
            ConditionExpr::Eq(l, r) => both(item, l, r, values_equal),
            ConditionExpr::Ne(l, r) => !both(item, l, r, values_equal),
            ConditionExpr::Lt(l, r) => ordered(item, l, r, |o| o == Ordering::Less),
            ConditionExpr::Le(l, r) => ordered(item, l, r, |o| o != Ordering::Greater),
            ConditionExpr::Gt(l, r) => ordered(item, l, r, |o| o == Ordering::Greater),
            ConditionExpr::Ge(l, r) => ordered(item, l, r, |o| o != Ordering::Less),
            ConditionExpr::Between(v, lo, hi) => {
                ordered(item, v, lo, |o| o != Ordering::Less)
                    && ordered(item, v, hi, |o| o != Ordering::Greater)
            }
            ConditionExpr::In(v, candidates) => match v.resolve(item) {
                Some(value) => candidates
                    .iter()
                    .filter_map(|c| c.resolve(item))
                    .any(|c| values_equal(&value, &c)),
                None => false,
            },
            ConditionExpr::BeginsWith(l, r) => both(item, l, r, |v, prefix| match (v, prefix) {
                (AttributeValue::String(s), AttributeValue::String(p)) => s.starts_with(p.as_str()),
                (AttributeValue::Binary(b), AttributeValue::Binary(p)) => b.starts_with(p),
                _ => false,
            }),
            ConditionExpr::Contains(l, r) => both(item, l, r, contains),
            ConditionExpr::AttributeExists(p) => resolve_path(item, p).is_some(),
            ConditionExpr::AttributeNotExists(p) => resolve_path(item, p).is_none(),
            ConditionExpr::AttributeType(p, type_name) => {
                resolve_path(item, p).is_some_and(|v| v.type_name() == type_name)
            }
            ConditionExpr::And(exprs) => exprs.iter().all(|e| e.eval(item)),
            ConditionExpr::Or(exprs) => exprs.iter().any(|e| e.eval(item)),
            ConditionExpr::Not(inner) => !inner.eval(item),
        }
    }

    fn resolve<'a>(&'a self, item: &'a Item) -> Option<Cow<'a, AttributeValue>> {
        match self {
            ConditionExpr::Path(p) => resolve_path(item, p).map(Cow::Borrowed),
            ConditionExpr::Value(v) => Some(Cow::Borrowed(v)),
            ConditionExpr::Size(p) => {
                let size = match resolve_path(item, p)? {
                    AttributeValue::String(s) => s.chars().count(),
                    AttributeValue::Binary(b) => b.len(),
                    AttributeValue::StringSet(s) | AttributeValue::NumberSet(s) => s.len(),
                    AttributeValue::BinarySet(s) => s.len(),
                    AttributeValue::List(l) => l.len(),
                    AttributeValue::Map(m) => m.len(),
                    _ => return None,
                };
                Some(Cow::Owned(AttributeValue::n(size)))
            }
            _ => None,
        }
    }
}

fn both(
    item: &Item,
    l: &ConditionExpr,
    r: &ConditionExpr,
    f: impl Fn(&AttributeValue, &AttributeValue) -> bool,
) -> bool {
    match (l.resolve(item), r.resolve(item)) {
        (Some(a), Some(b)) => f(&a, &b),
        _ => false,
    }
}

fn ordered(
    item: &Item,
    l: &ConditionExpr,
    r: &ConditionExpr,
    accept: impl Fn(Ordering) -> bool,
) -> bool {
    match (l.resolve(item), r.resolve(item)) {
        (Some(a), Some(b)) => compare_values(&a, &b).is_some_and(accept),
        _ => false,
    }
}

fn contains(haystack: &AttributeValue, needle: &AttributeValue) -> bool {
    match (haystack, needle) {
        (AttributeValue::String(s), AttributeValue::String(n)) => s.contains(n.as_str()),
        (AttributeValue::Binary(b), AttributeValue::Binary(n)) => {
            n.is_empty() || b.windows(n.len()).any(|w| w == n.as_slice())
        }
        (AttributeValue::StringSet(set), AttributeValue::String(n)) => set.contains(n),
        (AttributeValue::NumberSet(set), AttributeValue::Number(n)) => {
            crate::value::number_set_contains(set, n)
        }
        (AttributeValue::BinarySet(set), AttributeValue::Binary(n)) => set.contains(n),
        (AttributeValue::List(list), n) => list.iter().any(|v| values_equal(v, n)),
        _ => false,
    }
}
