//! Query and Scan over a table or one of its indexes.

use std::sync::Arc;

use crate::api::key_utils::{build_index_key, encode_primary_key, key_attributes};
use crate::api::projection::apply_projection;
use crate::api::query::{KeyRange, Page, PageRequest, collect_page, compute_key_range};
use crate::catalog::TableHandle;
use crate::error::{Error, ResourceError, ValidationError};
use crate::index::SecondaryIndex;
use crate::throughput::{ThroughputLimiter, read_units};
use crate::types::{IndexKind, KeySchema};
use crate::value::Item;

use super::dispatcher::{Phase, Trace};
use super::engine::EngineInner;
use super::items::capacity;
use super::request::{PageOutput, QueryInput, ReturnConsumedCapacity, ScanInput, Select};

/// The ordered map a read walks.
enum Source {
    Table {
        schema: KeySchema,
    },
    Index {
        index: Arc<SecondaryIndex>,
        table_schema: KeySchema,
    },
}

impl Source {
    fn resolve(handle: &TableHandle, index_name: Option<&str>, consistent: bool) -> Result<Self, Error> {
        let table_schema = handle.key_schema();
        let Some(name) = index_name else {
            return Ok(Source::Table {
                schema: table_schema,
            });
        };
        let index = handle.index(name).ok_or_else(|| ResourceError::IndexNotFound {
            table: handle.name().to_string(),
            index: name.to_string(),
        })?;
        if index.is_creating() {
            return Err(ValidationError::InvalidParameter(format!(
                "index '{name}' is still being created"
            ))
            .into());
        }
        if consistent && index.definition().kind == IndexKind::Global {
            return Err(ValidationError::InvalidParameter(
                "consistent reads are not supported on global secondary indexes".into(),
            )
            .into());
        }
        Ok(Source::Index {
            index,
            table_schema,
        })
    }

    /// Key schema the key condition applies to.
    fn schema(&self) -> &KeySchema {
        match self {
            Source::Table { schema } => schema,
            Source::Index { index, .. } => index.index_schema(),
        }
    }

    fn cursor_key(&self, start: &Item) -> Result<Vec<u8>, Error> {
        let invalid = |e: Error| -> Error { ValidationError::InvalidCursor(e.to_string()).into() };
        match self {
            Source::Table { schema } => encode_primary_key(start, schema).map_err(invalid),
            Source::Index {
                index,
                table_schema,
            } => {
                let primary = encode_primary_key(start, table_schema).map_err(invalid)?;
                build_index_key(index.index_schema(), start, &primary)
                    .map_err(invalid)?
                    .ok_or_else(|| {
                        ValidationError::InvalidCursor("missing index key attributes".into()).into()
                    })
            }
        }
    }

    /// Key attributes identifying `item` as a resume point.
    fn last_key(&self, item: &Item) -> Item {
        match self {
            Source::Table { schema } => key_attributes(item, schema),
            Source::Index {
                index,
                table_schema,
            } => {
                let mut key = key_attributes(item, table_schema);
                key.extend(key_attributes(item, index.index_schema()));
                key
            }
        }
    }

    fn collect(&self, handle: &TableHandle, request: &PageRequest<'_>) -> Page {
        match self {
            Source::Table { .. } => collect_page(handle.data().entries(), request),
            Source::Index { index, .. } => collect_page(&index.entries(), request),
        }
    }

    /// Run `f` on the limiter this read draws on, if the source is provisioned.
    ///
    /// Global indexes with their own throughput use it; everything else uses
    /// the table's.
    fn with_limiter(
        &self,
        handle: &TableHandle,
        f: impl FnOnce(&ThroughputLimiter) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let limiters = handle.limiters();
        let limiter = match self {
            Source::Index { index, .. } => limiters
                .indexes
                .get(index.name())
                .or(limiters.table.as_ref()),
            Source::Table { .. } => limiters.table.as_ref(),
        };
        match limiter {
            Some(limiter) => f(limiter),
            None => Ok(()),
        }
    }
}

struct Shape<'a> {
    projection: Option<&'a [String]>,
    select: Select,
    consistent: bool,
    return_consumed_capacity: ReturnConsumedCapacity,
}

fn read_page(
    inner: &EngineInner,
    handle: &TableHandle,
    source: &Source,
    request: &PageRequest<'_>,
    shape: Shape<'_>,
) -> Result<PageOutput, Error> {
    let metered = inner.config.enforce_throughput;
    if metered {
        source.with_limiter(handle, ThroughputLimiter::admit_read)?;
    }
    let page = source.collect(handle, request);
    let units = read_units(page.evaluated_bytes, shape.consistent);
    if metered {
        source.with_limiter(handle, |limiter| {
            limiter.charge_read(units);
            Ok(())
        })?;
    }

    let count = page.items.len();
    let last_evaluated_key = page.last_evaluated.as_ref().map(|item| source.last_key(item));
    let items = match (shape.select, shape.projection) {
        (Select::Count, _) => Vec::new(),
        (Select::AllAttributes, Some(paths)) => page
            .items
            .iter()
            .map(|item| apply_projection(item, paths))
            .collect(),
        (Select::AllAttributes, None) => page.items,
    };
    Ok(PageOutput {
        items,
        count,
        scanned_count: page.scanned_count,
        last_evaluated_key,
        consumed_capacity: capacity(shape.return_consumed_capacity, handle.name(), units),
    })
}

/// Items of one partition in key order, optionally narrowed by a sort key
/// condition.
pub(crate) fn query(inner: &EngineInner, trace: &Trace, input: QueryInput) -> Result<PageOutput, Error> {
    trace.enter(Phase::TableLookup);
    let handle = inner.catalog.get_for_items(&input.table_name)?;
    let source = Source::resolve(&handle, input.index_name.as_deref(), input.consistent_read)?;

    trace.enter(Phase::Executing);
    let reverse = !input.scan_index_forward;
    let mut range = compute_key_range(&input.key_condition, source.schema())?;
    if let Some(start) = &input.exclusive_start_key {
        range = range.resume_after(source.cursor_key(start)?, reverse);
    }
    let request = PageRequest {
        range,
        reverse,
        limit: input.limit,
        filter: input.filter.as_ref(),
        segment: None,
    };
    read_page(
        inner,
        &handle,
        &source,
        &request,
        Shape {
            projection: input.projection.as_deref(),
            select: input.select,
            consistent: input.consistent_read,
            return_consumed_capacity: input.return_consumed_capacity,
        },
    )
}

/// Every item of the table or index, or of one parallel scan segment.
pub(crate) fn scan(inner: &EngineInner, trace: &Trace, input: ScanInput) -> Result<PageOutput, Error> {
    trace.enter(Phase::TableLookup);
    let handle = inner.catalog.get_for_items(&input.table_name)?;
    let source = Source::resolve(&handle, input.index_name.as_deref(), input.consistent_read)?;

    trace.enter(Phase::Executing);
    let mut range = KeyRange::full();
    if let Some(start) = &input.exclusive_start_key {
        range = range.resume_after(source.cursor_key(start)?, false);
    }
    let request = PageRequest {
        range,
        reverse: false,
        limit: input.limit,
        filter: input.filter.as_ref(),
        segment: input.segment.zip(input.total_segments),
    };
    read_page(
        inner,
        &handle,
        &source,
        &request,
        Shape {
            projection: input.projection.as_deref(),
            select: input.select,
            consistent: input.consistent_read,
            return_consumed_capacity: input.return_consumed_capacity,
        },
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::thread;
    use std::time::Duration;

    use crate::api::Engine;
    use crate::api::condition::ConditionExpr;
    use crate::api::query::SortKeyCondition;
    use crate::api::update::UpdateAction;
    use crate::config::EngineConfig;
    use crate::error::ErrorKind;
    use crate::types::{
        IndexConsistency, IndexDefinition, IndexKind, KeyDefinition, KeyType, Projection,
        ProjectionType,
    };
    use crate::value::{AttributeValue, Item};

    fn status_index(consistency: IndexConsistency) -> IndexDefinition {
        IndexDefinition {
            index_name: "by_status".into(),
            kind: IndexKind::Global,
            partition_key: KeyDefinition::new("status", KeyType::String),
            sort_key: Some(KeyDefinition::new("total", KeyType::Number)),
            projection: Projection {
                projection_type: ProjectionType::KeysOnly,
                non_key_attributes: vec![],
            },
            consistency,
            provisioned_throughput: None,
        }
    }

    fn recent_index() -> IndexDefinition {
        IndexDefinition {
            index_name: "by_total".into(),
            kind: IndexKind::Local,
            partition_key: KeyDefinition::new("customer", KeyType::String),
            sort_key: Some(KeyDefinition::new("total", KeyType::Number)),
            projection: Projection::default(),
            consistency: IndexConsistency::Strong,
            provisioned_throughput: None,
        }
    }

    fn orders(engine: &Engine, consistency: IndexConsistency) {
        engine
            .create_table("orders")
            .partition_key("customer", KeyType::String)
            .sort_key("seq", KeyType::Number)
            .index(status_index(consistency))
            .index(recent_index())
            .execute()
            .unwrap();
    }

    fn order(customer: &str, seq: i64, status: &str, total: i64) -> Item {
        Item::from([
            ("customer".to_string(), AttributeValue::s(customer)),
            ("seq".to_string(), AttributeValue::n(seq)),
            ("status".to_string(), AttributeValue::s(status)),
            ("total".to_string(), AttributeValue::n(total)),
        ])
    }

    fn seqs(items: &[Item]) -> Vec<AttributeValue> {
        items.iter().map(|item| item["seq"].clone()).collect()
    }

    fn seeded(consistency: IndexConsistency) -> Engine {
        let engine = Engine::in_memory().unwrap();
        orders(&engine, consistency);
        for seq in 1..=10 {
            let status = if seq % 2 == 0 { "open" } else { "closed" };
            engine
                .put_item("orders")
                .item(order("alice", seq, status, 100 - seq))
                .execute()
                .unwrap();
        }
        engine
            .put_item("orders")
            .item(order("bob", 1, "open", 5))
            .execute()
            .unwrap();
        engine
    }

    #[test]
    fn test_query_in_key_order_and_reverse() {
        let engine = seeded(IndexConsistency::Strong);
        let page = engine
            .query("orders")
            .partition_key(AttributeValue::s("alice"))
            .execute()
            .unwrap();
        assert_eq!(page.count, 10);
        assert_eq!(seqs(&page.items), (1..=10).map(AttributeValue::n).collect::<Vec<_>>());

        let page = engine
            .query("orders")
            .partition_key(AttributeValue::s("alice"))
            .sort_key(SortKeyCondition::Between(AttributeValue::n(3), AttributeValue::n(5)))
            .scan_forward(false)
            .execute()
            .unwrap();
        assert_eq!(
            seqs(&page.items),
            vec![AttributeValue::n(5), AttributeValue::n(4), AttributeValue::n(3)]
        );
    }

    #[test]
    fn test_query_pagination_with_cursor() {
        let engine = seeded(IndexConsistency::Strong);
        let mut seen = Vec::new();
        let mut start = None;
        loop {
            let mut builder = engine
                .query("orders")
                .partition_key(AttributeValue::s("alice"))
                .sort_key(SortKeyCondition::Gt(AttributeValue::n(2)))
                .limit(3);
            if let Some(key) = start.take() {
                builder = builder.exclusive_start_key(key);
            }
            let page = builder.execute().unwrap();
            seen.extend(seqs(&page.items));
            match page.last_evaluated_key {
                Some(key) => start = Some(key),
                None => break,
            }
        }
        assert_eq!(seen, (3..=10).map(AttributeValue::n).collect::<Vec<_>>());
    }

    #[test]
    fn test_limit_counts_items_before_filter() {
        let engine = seeded(IndexConsistency::Strong);
        let page = engine
            .query("orders")
            .partition_key(AttributeValue::s("alice"))
            .filter(ConditionExpr::eq("status", AttributeValue::s("open")))
            .limit(4)
            .execute()
            .unwrap();
        assert_eq!(page.scanned_count, 4);
        assert_eq!(seqs(&page.items), vec![AttributeValue::n(2), AttributeValue::n(4)]);
        assert!(page.last_evaluated_key.is_some());
    }

    #[test]
    fn test_count_and_projection() {
        let engine = seeded(IndexConsistency::Strong);
        let page = engine
            .query("orders")
            .partition_key(AttributeValue::s("alice"))
            .count()
            .execute()
            .unwrap();
        assert_eq!(page.count, 10);
        assert!(page.items.is_empty());

        let page = engine
            .query("orders")
            .partition_key(AttributeValue::s("bob"))
            .projection(["total"])
            .execute()
            .unwrap();
        assert_eq!(
            page.items,
            vec![Item::from([("total".to_string(), AttributeValue::n(5))])]
        );
    }

    #[test]
    fn test_global_index_query_and_cursor() {
        let engine = seeded(IndexConsistency::Strong);
        let page = engine
            .query("orders")
            .index("by_status")
            .partition_key(AttributeValue::s("open"))
            .limit(2)
            .execute()
            .unwrap();
        // Ascending by total: bob (5) first, then alice seq 10 (90).
        assert_eq!(page.items[0]["customer"], AttributeValue::s("bob"));
        assert_eq!(page.items[1]["seq"], AttributeValue::n(10));
        // KEYS_ONLY projection.
        assert_eq!(page.items[0].len(), 4);
        assert!(page.items[0].contains_key("status"));

        let cursor = page.last_evaluated_key.unwrap();
        assert_eq!(cursor.len(), 4);
        let rest = engine
            .query("orders")
            .index("by_status")
            .partition_key(AttributeValue::s("open"))
            .exclusive_start_key(cursor)
            .execute()
            .unwrap();
        assert_eq!(rest.count, 4);
        assert!(rest.last_evaluated_key.is_none());
    }

    #[test]
    fn test_local_index_orders_by_alternate_sort_key() {
        let engine = seeded(IndexConsistency::Strong);
        let page = engine
            .query("orders")
            .index("by_total")
            .partition_key(AttributeValue::s("alice"))
            .sort_key(SortKeyCondition::Le(AttributeValue::n(92)))
            .consistent_read(true)
            .execute()
            .unwrap();
        assert_eq!(
            seqs(&page.items),
            vec![AttributeValue::n(10), AttributeValue::n(9), AttributeValue::n(8)]
        );
    }

    #[test]
    fn test_consistent_read_on_global_index_rejected() {
        let engine = seeded(IndexConsistency::Strong);
        let err = engine
            .query("orders")
            .index("by_status")
            .partition_key(AttributeValue::s("open"))
            .consistent_read(true)
            .execute()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_index_has_no_dangling_entries() {
        let engine = seeded(IndexConsistency::Strong);
        let open = |engine: &Engine| {
            engine
                .query("orders")
                .index("by_status")
                .partition_key(AttributeValue::s("open"))
                .execute()
                .unwrap()
                .count
        };
        assert_eq!(open(&engine), 6);

        engine
            .delete_item("orders")
            .key("customer", AttributeValue::s("bob"))
            .key("seq", AttributeValue::n(1))
            .execute()
            .unwrap();
        assert_eq!(open(&engine), 5);

        // Removing the indexed attribute removes the entry in the same write.
        engine
            .update_item("orders")
            .key("customer", AttributeValue::s("alice"))
            .key("seq", AttributeValue::n(2))
            .action(UpdateAction::remove("status"))
            .execute()
            .unwrap();
        assert_eq!(open(&engine), 4);

        // Moving an item between index partitions.
        engine
            .update_item("orders")
            .key("customer", AttributeValue::s("alice"))
            .key("seq", AttributeValue::n(4))
            .action(UpdateAction::set("status", AttributeValue::s("closed")))
            .execute()
            .unwrap();
        assert_eq!(open(&engine), 3);
    }

    #[test]
    fn test_eventual_index_converges_within_bound() {
        let config = EngineConfig::in_memory().with_index_propagation_delay(150);
        let engine = Engine::open(config).unwrap();
        orders(&engine, IndexConsistency::Eventual);
        engine
            .put_item("orders")
            .item(order("carol", 1, "open", 7))
            .execute()
            .unwrap();

        let query = || {
            engine
                .query("orders")
                .index("by_status")
                .partition_key(AttributeValue::s("open"))
                .execute()
                .unwrap()
                .count
        };
        // The base write is visible at once, the index catches up later.
        assert_eq!(query(), 0);
        thread::sleep(Duration::from_millis(500));
        assert_eq!(query(), 1);

        engine
            .delete_item("orders")
            .key("customer", AttributeValue::s("carol"))
            .key("seq", AttributeValue::n(1))
            .execute()
            .unwrap();
        engine.flush_indexes();
        assert_eq!(query(), 0);
    }

    #[test]
    fn test_parallel_scan_segments_partition_items() {
        let engine = Engine::in_memory().unwrap();
        engine
            .create_table("events")
            .partition_key("id", KeyType::String)
            .execute()
            .unwrap();
        for i in 0..60 {
            engine
                .put_item("events")
                .attr("id", AttributeValue::s(format!("evt-{i}")))
                .execute()
                .unwrap();
        }

        let mut seen = BTreeSet::new();
        for segment in 0..4 {
            let page = engine.scan("events").segment(segment, 4).execute().unwrap();
            for item in page.items {
                let id = item["id"].as_str().unwrap().to_string();
                assert!(seen.insert(id), "item returned by two segments");
            }
        }
        assert_eq!(seen.len(), 60);
    }

    #[test]
    fn test_scan_pages_and_filter() {
        let engine = seeded(IndexConsistency::Strong);
        let mut total = 0;
        let mut start = None;
        loop {
            let mut builder = engine
                .scan("orders")
                .filter(ConditionExpr::eq("status", AttributeValue::s("open")))
                .limit(4);
            if let Some(key) = start.take() {
                builder = builder.exclusive_start_key(key);
            }
            let page = builder.execute().unwrap();
            total += page.count;
            match page.last_evaluated_key {
                Some(key) => start = Some(key),
                None => break,
            }
        }
        assert_eq!(total, 6);
    }
}
