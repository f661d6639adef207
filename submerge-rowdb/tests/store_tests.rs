use std::collections::BTreeMap;

use submerge_rowdb::{IndexKeyFn, Region, Store, StoreConfig, Value};

fn obj(pairs: &[(&str, Value)]) -> Value {
    let mut map = BTreeMap::new();
    for (k, v) in pairs {
        map.insert(k.to_string(), v.clone());
    }
    Value::Object(map)
}

fn open_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.redb");
    let store = Store::create(path, StoreConfig::default()).unwrap();
    (store, dir)
}

#[test_log::test(tokio::test)]
async fn write_then_read_round_trips() {
    let (store, _dir) = open_store();
    let key = Value::Str("row-1".to_string());
    let row = obj(&[("id", key.clone()), ("name", Value::Str("alice".to_string()))]);

    let token = store.new_write_token();
    let guard = store.acquire_superblock_for_write(token, 2).await.unwrap();
    store.write(&guard, &key, Some(row.clone())).await.unwrap();
    drop(guard);

    let token = store.new_read_token();
    let guard = store.acquire_superblock_for_read(token).await.unwrap();
    let fetched = store.read(&guard, &key).unwrap();
    assert_eq!(fetched, Some(row));
}

#[test_log::test(tokio::test)]
async fn delete_removes_row() {
    let (store, _dir) = open_store();
    let key = Value::Str("row-1".to_string());
    let row = obj(&[("id", key.clone())]);

    let token = store.new_write_token();
    let guard = store.acquire_superblock_for_write(token, 2).await.unwrap();
    store.write(&guard, &key, Some(row)).await.unwrap();
    store.write(&guard, &key, None).await.unwrap();
    drop(guard);

    let token = store.new_read_token();
    let guard = store.acquire_superblock_for_read(token).await.unwrap();
    assert_eq!(store.read(&guard, &key).unwrap(), None);
}

#[test_log::test(tokio::test)]
async fn sindex_create_backfills_existing_rows_then_becomes_ready() {
    let (store, _dir) = open_store();

    let token = store.new_write_token();
    let guard = store.acquire_superblock_for_write(token, 2).await.unwrap();
    for i in 0..40u32 {
        let key = Value::Int(i as i64);
        let row = obj(&[("id", key.clone()), ("author", Value::Str(format!("author-{}", i % 3)))]);
        store.write(&guard, &key, Some(row)).await.unwrap();
    }
    drop(guard);

    store.add_sindex("by_author", IndexKeyFn::Field("author".to_string()), false).await.unwrap();

    // post-construction runs on the background drainer; give it a moment.
    for _ in 0..200 {
        if store.sindex_list().await.iter().any(|n| n == "by_author") {
            let rows = store.sindex_read("by_author", &Value::Str("author-0".to_string())).await;
            if rows.is_ok() {
                break;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let rows = store.sindex_read("by_author", &Value::Str("author-0".to_string())).await.unwrap();
    assert!(!rows.is_empty());
    assert!(rows.iter().all(|r| r.get_field("author") == Some(&Value::Str("author-0".to_string()))));
}

#[test_log::test(tokio::test)]
async fn drop_sindex_marks_deleted_immediately() {
    let (store, _dir) = open_store();
    store.add_sindex("by_x", IndexKeyFn::Field("x".to_string()), false).await.unwrap();
    store.drop_sindex("by_x").await.unwrap();

    let err = store.sindex_read("by_x", &Value::Int(0)).await.unwrap_err();
    assert!(err.to_string().contains("being deleted") || err.to_string().contains("deleted"));
}

#[test_log::test(tokio::test)]
async fn set_sindexes_reconciles_desired_set() {
    let (store, _dir) = open_store();
    store.add_sindex("keep", IndexKeyFn::Field("a".to_string()), false).await.unwrap();
    store.add_sindex("drop_me", IndexKeyFn::Field("b".to_string()), false).await.unwrap();

    store
        .set_sindexes(&[
            ("keep".to_string(), IndexKeyFn::Field("a".to_string()), false),
            ("new_one".to_string(), IndexKeyFn::Field("c".to_string()), false),
        ])
        .await
        .unwrap();

    let names = store.sindex_list().await;
    assert!(names.contains(&"keep".to_string()));
    assert!(names.contains(&"new_one".to_string()));
}

#[test_log::test(tokio::test)]
async fn reset_data_erases_region_in_bounded_passes() {
    let (store, _dir) = open_store();
    let config = StoreConfig { max_erased_per_pass: 3, ..StoreConfig::default() };
    let _ = config;

    let token = store.new_write_token();
    let guard = store.acquire_superblock_for_write(token, 2).await.unwrap();
    for i in 0..10u32 {
        let key = Value::Int(i as i64);
        store.write(&guard, &key, Some(obj(&[("id", key.clone())]))).await.unwrap();
    }
    drop(guard);

    let erased = store.reset_data(Region::universe()).await.unwrap();
    assert_eq!(erased, 10);

    let token = store.new_read_token();
    let guard = store.acquire_superblock_for_read(token).await.unwrap();
    assert_eq!(store.read(&guard, &Value::Int(0)).unwrap(), None);
}

#[test_log::test(tokio::test)]
async fn metainfo_set_preserves_universe_domain() {
    let (store, _dir) = open_store();
    let region = Region { start: b"m".to_vec(), end: Some(b"z".to_vec()) };
    store.update_metainfo(&region, b"token-a".to_vec()).unwrap();

    let metainfo = store.get_metainfo().unwrap();
    assert!(metainfo.is_universe_domain());
    assert!(metainfo.entries().iter().any(|(r, v)| *r == region && v == b"token-a"));
}

#[test_log::test(tokio::test)]
async fn row_count_tracks_inserts_and_deletes() {
    let (store, _dir) = open_store();
    let token = store.new_write_token();
    let guard = store.acquire_superblock_for_write(token, 2).await.unwrap();

    for i in 0..5u32 {
        let key = Value::Int(i as i64);
        store.write(&guard, &key, Some(obj(&[("id", key.clone())]))).await.unwrap();
    }
    assert_eq!(store.row_count().unwrap(), 5);

    store.write(&guard, &Value::Int(0), None).await.unwrap();
    assert_eq!(store.row_count().unwrap(), 4);
}

#[test_log::test(tokio::test)]
async fn sindex_progress_reaches_one_after_construction() {
    let (store, _dir) = open_store();
    let token = store.new_write_token();
    let guard = store.acquire_superblock_for_write(token, 2).await.unwrap();
    for i in 0..10u32 {
        let key = Value::Int(i as i64);
        store.write(&guard, &key, Some(obj(&[("id", key.clone())]))).await.unwrap();
    }
    drop(guard);

    store.add_sindex("by_id", IndexKeyFn::Field("id".to_string()), false).await.unwrap();

    for _ in 0..200 {
        if let Some(fraction) = store.sindex_progress("by_id").await {
            if fraction >= 1.0 {
                break;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    assert_eq!(store.sindex_progress("by_id").await, Some(1.0));
}
