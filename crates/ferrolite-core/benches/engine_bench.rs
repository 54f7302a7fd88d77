use criterion::{Criterion, criterion_group, criterion_main};
use ferrolite_core::api::{Engine, SortKeyCondition};
use ferrolite_core::config::{EngineConfig, SyncMode};
use ferrolite_core::types::KeyType;
use ferrolite_core::value::{AttributeValue, Item};
use std::thread;
use tempfile::tempdir;

fn item(id: &str, value: u64) -> Item {
    Item::from([
        ("id".to_string(), AttributeValue::s(id)),
        ("value".to_string(), AttributeValue::n(value)),
    ])
}

fn items_table(engine: &Engine) {
    engine
        .create_table("items")
        .partition_key("id", KeyType::String)
        .execute()
        .unwrap();
}

fn bench_put_item(c: &mut Criterion) {
    c.bench_function("put_item", |b| {
        let engine = Engine::in_memory().unwrap();
        items_table(&engine);

        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key_{i:08}");
            engine.put_item("items").item(item(&key, i)).execute().unwrap();
            i += 1;
        });
    });
}

fn bench_put_item_durable(c: &mut Criterion) {
    c.bench_function("put_item_durable_no_sync", |b| {
        let dir = tempdir().unwrap();
        let config = EngineConfig::durable(dir.path()).with_sync_mode(SyncMode::None);
        let engine = Engine::open(config).unwrap();
        items_table(&engine);

        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key_{i:08}");
            engine.put_item("items").item(item(&key, i)).execute().unwrap();
            i += 1;
        });
    });
}

fn bench_get_item(c: &mut Criterion) {
    c.bench_function("get_item", |b| {
        let engine = Engine::in_memory().unwrap();
        items_table(&engine);

        // Prepopulate with 100 items.
        for i in 0..100 {
            engine
                .put_item("items")
                .item(item(&format!("key_{i:04}"), i))
                .execute()
                .unwrap();
        }

        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key_{:04}", i % 100);
            let _item = engine
                .get_item("items")
                .key("id", AttributeValue::s(key))
                .execute()
                .unwrap();
            i += 1;
        });
    });
}

fn bench_range_query(c: &mut Criterion) {
    let engine = Engine::in_memory().unwrap();
    engine
        .create_table("events")
        .partition_key("stream", KeyType::String)
        .sort_key("seq", KeyType::Number)
        .execute()
        .unwrap();
    for seq in 0..1_000u64 {
        engine
            .put_item("events")
            .attr("stream", AttributeValue::s("s"))
            .attr("seq", AttributeValue::n(seq))
            .execute()
            .unwrap();
    }

    c.bench_function("range_query_100", |b| {
        b.iter(|| {
            let page = engine
                .query("events")
                .partition_key(AttributeValue::s("s"))
                .sort_key(SortKeyCondition::Between(
                    AttributeValue::n(400),
                    AttributeValue::n(499),
                ))
                .execute()
                .unwrap();
            assert_eq!(page.count, 100);
        });
    });
}

fn bench_concurrent_increments(c: &mut Criterion) {
    c.bench_function("concurrent_increments_4x100", |b| {
        let engine = Engine::in_memory().unwrap();
        items_table(&engine);
        b.iter(|| {
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    let engine = engine.clone();
                    thread::spawn(move || {
                        for _ in 0..100 {
                            engine
                                .update_item("items")
                                .key("id", AttributeValue::s("counter"))
                                .action(ferrolite_core::api::UpdateAction::add(
                                    "value",
                                    AttributeValue::n(1),
                                ))
                                .execute()
                                .unwrap();
                        }
                    })
                })
                .collect();
            for worker in workers {
                worker.join().unwrap();
            }
        });
    });
}

criterion_group!(
    benches,
    bench_put_item,
    bench_put_item_durable,
    bench_get_item,
    bench_range_query,
    bench_concurrent_increments
);
criterion_main!(benches);
