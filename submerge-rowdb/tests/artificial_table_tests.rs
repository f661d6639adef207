use std::collections::BTreeMap;
use std::sync::Arc;

use submerge_rowdb::artificial_table::{ArtificialTable, ConflictBehavior};
use submerge_rowdb::memory_backend::MemoryBackend;
use submerge_rowdb::Value;
use tokio_util::sync::CancellationToken;

fn obj(pairs: &[(&str, Value)]) -> Value {
    let mut map = BTreeMap::new();
    for (k, v) in pairs {
        map.insert(k.to_string(), v.clone());
    }
    Value::Object(map)
}

#[test_log::test(tokio::test)]
async fn batched_insert_rejects_duplicates_but_keeps_going() {
    let backend = Arc::new(MemoryBackend::new("id"));
    let table = ArtificialTable::new(backend, 4, CancellationToken::new());

    let first_batch = vec![
        obj(&[("id", Value::Int(1)), ("v", Value::Str("a".to_string()))]),
        obj(&[("id", Value::Int(2)), ("v", Value::Str("b".to_string()))]),
    ];
    let stats = table.write_batched_insert(first_batch).await;
    assert_eq!(stats.inserted, 2);
    assert!(stats.errors.is_empty());

    let second_batch = vec![
        obj(&[("id", Value::Int(2)), ("v", Value::Str("c".to_string()))]),
        obj(&[("id", Value::Int(3)), ("v", Value::Str("d".to_string()))]),
    ];
    let stats = table.write_batched_insert(second_batch).await;
    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.errors.len(), 1);

    let row3 = table.read_row(&Value::Int(3)).await.unwrap();
    assert!(row3.is_some());
}

#[test_log::test(tokio::test)]
async fn batched_replace_overwrites_existing_rows() {
    let backend = Arc::new(MemoryBackend::new("id"));
    let table = ArtificialTable::new(backend, 4, CancellationToken::new());

    table
        .write_batched_insert(vec![obj(&[("id", Value::Int(1)), ("v", Value::Int(1))])])
        .await;

    let stats = table
        .write_batched_replace(
            vec![obj(&[("id", Value::Int(1)), ("v", Value::Int(2))])],
            ConflictBehavior::Replace,
        )
        .await;
    assert_eq!(stats.replaced, 1);

    let row = table.read_row(&Value::Int(1)).await.unwrap().unwrap();
    assert_eq!(row.get_field("v"), Some(&Value::Int(2)));
}

#[test_log::test(tokio::test)]
async fn conflict_behavior_update_merges_fields() {
    let backend = Arc::new(MemoryBackend::new("id"));
    let table = ArtificialTable::new(backend, 4, CancellationToken::new());

    table
        .write_batched_insert(vec![obj(&[
            ("id", Value::Int(1)),
            ("a", Value::Int(1)),
            ("b", Value::Int(1)),
        ])])
        .await;

    table
        .write_batched_replace(vec![obj(&[("id", Value::Int(1)), ("b", Value::Int(99))])], ConflictBehavior::Update)
        .await;

    let row = table.read_row(&Value::Int(1)).await.unwrap().unwrap();
    assert_eq!(row.get_field("a"), Some(&Value::Int(1)));
    assert_eq!(row.get_field("b"), Some(&Value::Int(99)));
}

#[test_log::test(tokio::test)]
async fn unsupported_surfaces_fail_fast() {
    let backend = Arc::new(MemoryBackend::new("id"));
    let table = ArtificialTable::new(backend, 4, CancellationToken::new());

    assert!(table.sindex_create("whatever").is_err());
    assert!(table.changefeed_subscribe().is_err());
    assert!(table.get_nearest(&Value::Int(0), 5).is_err());
}

#[test_log::test(tokio::test)]
async fn batched_insert_detects_duplicate_within_same_batch() {
    let backend = Arc::new(MemoryBackend::new("id"));
    let table = ArtificialTable::new(backend, 4, CancellationToken::new());

    let batch = vec![
        obj(&[("id", Value::Int(1)), ("v", Value::Str("a".to_string()))]),
        obj(&[("id", Value::Int(1)), ("v", Value::Str("b".to_string()))]),
    ];
    let stats = table.write_batched_insert(batch).await;
    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.errors.len(), 1);

    let row = table.read_row(&Value::Int(1)).await.unwrap().unwrap();
    assert_eq!(row.get_field("v"), Some(&Value::Str("a".to_string())));
}
