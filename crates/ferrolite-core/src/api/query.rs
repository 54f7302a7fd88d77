//! Key conditions, range bounds and page collection for Query and Scan.

use std::collections::BTreeMap;
use std::ops::Bound;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::api::condition::ConditionExpr;
use crate::api::key_utils::attribute_to_key_value;
use crate::encoding::composite::{
    decode_component, encode_begins_with, encode_key, encode_prefix, prefix_successor,
};
use crate::error::{Error, ValidationError};
use crate::types::{KeySchema, KeyType, MAX_PAGE_BYTES};
use crate::value::{AttributeValue, Item, item_size};

/// Condition on the sort key of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKeyCondition {
    Eq(AttributeValue),
    Lt(AttributeValue),
    Le(AttributeValue),
    Gt(AttributeValue),
    Ge(AttributeValue),
    Between(AttributeValue, AttributeValue),
    BeginsWith(AttributeValue),
}

/// Partition key equality plus an optional sort key condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyCondition {
    pub partition_key: AttributeValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<SortKeyCondition>,
}

impl KeyCondition {
    pub fn partition(value: AttributeValue) -> Self {
        Self {
            partition_key: value,
            sort_key: None,
        }
    }

    pub fn with_sort(mut self, condition: SortKeyCondition) -> Self {
        self.sort_key = Some(condition);
        self
    }
}

/// A byte range over encoded keys.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    pub start: Bound<Vec<u8>>,
    pub end: Bound<Vec<u8>>,
}

impl KeyRange {
    pub fn full() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    fn half_open(start: Vec<u8>, end: Option<Vec<u8>>) -> Self {
        Self {
            start: Bound::Included(start),
            end: end.map_or(Bound::Unbounded, Bound::Excluded),
        }
    }

    /// Narrow the range to keys strictly after (or before, when `reverse`) `cursor`.
    ///
    /// A cursor outside the range leaves that side untouched.
    pub fn resume_after(mut self, cursor: Vec<u8>, reverse: bool) -> Self {
        if reverse {
            let tighter = match &self.end {
                Bound::Included(k) | Bound::Excluded(k) => cursor <= *k,
                Bound::Unbounded => true,
            };
            if tighter {
                self.end = Bound::Excluded(cursor);
            }
        } else {
            let tighter = match &self.start {
                Bound::Included(k) | Bound::Excluded(k) => cursor >= *k,
                Bound::Unbounded => true,
            };
            if tighter {
                self.start = Bound::Excluded(cursor);
            }
        }
        self
    }

    fn is_empty(&self) -> bool {
        let (lo, lo_inclusive) = match &self.start {
            Bound::Included(k) => (k, true),
            Bound::Excluded(k) => (k, false),
            Bound::Unbounded => return false,
        };
        let (hi, hi_inclusive) = match &self.end {
            Bound::Included(k) => (k, true),
            Bound::Excluded(k) => (k, false),
            Bound::Unbounded => return false,
        };
        lo > hi || (lo == hi && !(lo_inclusive && hi_inclusive))
    }
}

fn with_inclusive_tail(mut key: Vec<u8>) -> Vec<u8> {
    key.push(0xFF);
    key
}

/// Validate a key condition against `schema` and turn it into a byte range.
///
/// The range covers both plain table keys and index entry keys, whose
/// encoded primary key suffix always starts below `0xFF`.
pub fn compute_key_range(condition: &KeyCondition, schema: &KeySchema) -> Result<KeyRange, Error> {
    let pk = attribute_to_key_value(&condition.partition_key, &schema.partition_key)?;
    let prefix = encode_prefix(&pk)?;
    let partition_end = prefix_successor(&prefix);

    let Some(sort_condition) = &condition.sort_key else {
        return Ok(KeyRange::half_open(prefix, partition_end));
    };
    let sk_def = schema.sort_key.as_ref().ok_or_else(|| {
        ValidationError::InvalidParameter("sort key condition on a key schema without a sort key".into())
    })?;
    let sk = |value: &AttributeValue| -> Result<Vec<u8>, Error> {
        let kv = attribute_to_key_value(value, sk_def)?;
        Ok(encode_key(&pk, Some(&kv))?)
    };

    let range = match sort_condition {
        SortKeyCondition::Eq(v) => {
            let start = sk(v)?;
            let end = with_inclusive_tail(start.clone());
            KeyRange::half_open(start, Some(end))
        }
        SortKeyCondition::Lt(v) => KeyRange::half_open(prefix, Some(sk(v)?)),
        SortKeyCondition::Le(v) => KeyRange::half_open(prefix, Some(with_inclusive_tail(sk(v)?))),
        SortKeyCondition::Gt(v) => KeyRange::half_open(with_inclusive_tail(sk(v)?), partition_end),
        SortKeyCondition::Ge(v) => KeyRange::half_open(sk(v)?, partition_end),
        SortKeyCondition::Between(lo, hi) => {
            let start = sk(lo)?;
            let end = with_inclusive_tail(sk(hi)?);
            if start > end {
                return Err(ValidationError::InvalidParameter(
                    "BETWEEN lower bound is greater than upper bound".into(),
                )
                .into());
            }
            KeyRange::half_open(start, Some(end))
        }
        SortKeyCondition::BeginsWith(v) => {
            if sk_def.key_type == KeyType::Number {
                return Err(ValidationError::InvalidParameter(
                    "begins_with is not supported on number sort keys".into(),
                )
                .into());
            }
            let kv = attribute_to_key_value(v, sk_def)?;
            let mut start = prefix.clone();
            start.extend_from_slice(&encode_begins_with(&kv)?);
            let end = prefix_successor(&start);
            KeyRange::half_open(start, end)
        }
    };
    Ok(range)
}

/// Parallel scan segment of an encoded key, derived from its leading component.
pub fn segment_of(key: &[u8], total_segments: u32) -> u32 {
    let leading = match decode_component(key) {
        Ok((_, used)) => &key[..used],
        Err(_) => key,
    };
    (xxh3_64(leading) % u64::from(total_segments.max(1))) as u32
}

/// Page shape shared by queries and scans.
pub struct PageRequest<'a> {
    pub range: KeyRange,
    pub reverse: bool,
    pub limit: Option<usize>,
    pub filter: Option<&'a ConditionExpr>,
    pub segment: Option<(u32, u32)>,
}

/// Items that passed the filter, plus what the caller needs for paging.
#[derive(Debug, Default)]
pub struct Page {
    pub items: Vec<Item>,
    pub scanned_count: usize,
    pub evaluated_bytes: usize,
    /// Last evaluated item when more items remain in range.
    pub last_evaluated: Option<Item>,
}

/// Walk `entries` over `request.range`, stopping at the limit or the page byte cap.
pub fn collect_page(entries: &BTreeMap<Vec<u8>, Item>, request: &PageRequest<'_>) -> Page {
    let mut page = Page::default();
    if request.range.is_empty() || request.limit == Some(0) {
        return page;
    }
    let range = (request.range.start.clone(), request.range.end.clone());
    let iter: Box<dyn Iterator<Item = (&Vec<u8>, &Item)> + '_> = if request.reverse {
        Box::new(entries.range(range).rev())
    } else {
        Box::new(entries.range(range))
    };
    let mut iter = iter
        .filter(|(key, _)| {
            request
                .segment
                .is_none_or(|(segment, total)| segment_of(key, total) == segment)
        })
        .peekable();

    while let Some((_, item)) = iter.next() {
        page.scanned_count += 1;
        page.evaluated_bytes += item_size(item);
        if request.filter.is_none_or(|f| f.eval(item)) {
            page.items.push(item.clone());
        }
        let full = request.limit.is_some_and(|l| page.scanned_count >= l)
            || page.evaluated_bytes >= MAX_PAGE_BYTES;
        if full {
            if iter.peek().is_some() {
                page.last_evaluated = Some(item.clone());
            }
            break;
        }
    }
    page
}
