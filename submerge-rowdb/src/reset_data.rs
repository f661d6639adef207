//! Bounded erase-and-reinitialize of a region, grounded on
//! `store_t::reset_data` / `maybe_drop_all_sindexes` (btree_store.cc:312-423).
//!
//! Runs as repeated bounded passes rather than one long-held write
//! transaction, so a reset over a large region doesn't starve other
//! operations waiting on the same store. Each pass erases up to
//! `max_per_pass` keys, zeroes the metainfo over the range it actually
//! touched, and fans the deletions out to every live secondary index, all
//! inside the one write transaction the pass commits.

use std::sync::Arc;

use redb::Database;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::datum::Value;
use crate::error::{Result, StoreError};
use crate::region::Region;
use crate::sindex::SindexManager;
use crate::sindex_clear;
use crate::sindex_update::{ModificationReport, SindexUpdatePipeline};
use crate::tables::{sindex_table_name, Metainfo, METAINFO_KEY, METAINFO_TABLE, PRIMARY_TABLE, ZERO_METAINFO};

/// Erases every primary row inside `region`, `max_per_pass` keys at a time.
/// Before the first pass, if zeroing `region` would leave no non-zero
/// region anywhere in the metainfo (the shard is losing all of its data),
/// every live secondary index is dropped first (`maybe_drop_all_sindexes`).
pub async fn reset_data(
    db: Arc<Database>,
    sindexes: Arc<SindexManager>,
    pipeline: Arc<SindexUpdatePipeline>,
    drainer: &TaskTracker,
    region: Region,
    max_per_pass: u64,
    sindex_chunk_size: usize,
) -> Result<u64> {
    maybe_drop_all_sindexes(&db, &sindexes, drainer, &region, sindex_chunk_size).await?;

    let mut total_erased = 0u64;
    loop {
        let runtimes = pipeline.runtimes_for_write().await;
        let erased = erase_one_pass(&db, &pipeline, &runtimes, &region, max_per_pass)?;
        total_erased += erased as u64;
        if (erased as u64) < max_per_pass {
            break;
        }
        tokio::task::yield_now().await;
    }
    info!(erased = total_erased, "reset_data complete");
    Ok(total_erased)
}

async fn maybe_drop_all_sindexes(
    db: &Arc<Database>,
    sindexes: &Arc<SindexManager>,
    drainer: &TaskTracker,
    region: &Region,
    chunk_size: usize,
) -> Result<()> {
    let losing_all_data = {
        let txn = db.begin_read()?;
        let table = txn.open_table(METAINFO_TABLE)?;
        let bytes = table.get(METAINFO_KEY)?.ok_or_else(|| StoreError::NotFound("metainfo".to_string()))?;
        let mut projected: Metainfo = crate::codec::decode(bytes.value());
        projected.set(region, ZERO_METAINFO.to_vec());
        projected.all_equal(&ZERO_METAINFO.to_vec())
    };
    if !losing_all_data {
        return Ok(());
    }

    for runtime in sindexes.list().await {
        let name = runtime.name();
        if let Ok(runtime) = sindexes.drop_sindex(&name).await {
            let id = runtime.record.lock().id;
            let table_name = sindex_table_name(id);
            sindex_clear::spawn_clear(drainer, db.clone(), sindexes.clone(), id, table_name, chunk_size);
        }
    }
    Ok(())
}

/// One bounded pass: erases up to `max_per_pass` keys from `region`, zeroes
/// the metainfo over the range actually touched, and applies a deletion mod
/// report to every index in `runtimes` - all inside one write transaction.
/// Returns the number of keys erased; `0` once `region` is exhausted.
fn erase_one_pass(
    db: &Database,
    pipeline: &SindexUpdatePipeline,
    runtimes: &[Arc<crate::sindex::SindexRuntime>],
    region: &Region,
    max_per_pass: u64,
) -> Result<usize> {
    let txn = db.begin_write()?;
    let deleted: Vec<(Vec<u8>, Value)> = {
        let mut table = txn.open_table(PRIMARY_TABLE)?;
        let entries: Vec<(Vec<u8>, Value)> = {
            let range = match &region.end {
                Some(end) => table.range::<&[u8]>(region.start.as_slice()..end.as_slice())?,
                None => table.range::<&[u8]>(region.start.as_slice()..)?,
            };
            range
                .take(max_per_pass as usize)
                .map(|entry| entry.map(|(k, v)| (k.value().to_vec(), crate::codec::decode::<Value>(v.value()))))
                .collect::<std::result::Result<_, _>>()?
        };
        for (key, _) in &entries {
            table.remove(key.as_slice())?;
        }
        entries
    };

    if !deleted.is_empty() {
        let deleted_range =
            Region { start: deleted.first().unwrap().0.clone(), end: Some(successor(&deleted.last().unwrap().0)) };

        let mut metainfo_table = txn.open_table(METAINFO_TABLE)?;
        let bytes = metainfo_table
            .get(METAINFO_KEY)?
            .ok_or_else(|| StoreError::NotFound("metainfo".to_string()))?
            .value()
            .to_vec();
        let mut metainfo: Metainfo = crate::codec::decode(&bytes);
        metainfo.set(&deleted_range, ZERO_METAINFO.to_vec());
        submerge_base::guarantee!(
            metainfo.is_universe_domain(),
            "metainfo lost universe coverage during reset_data"
        );
        let encoded = rmp_serde::to_vec(&metainfo)?;
        metainfo_table.insert(METAINFO_KEY, encoded.as_slice())?;
        drop(metainfo_table);

        for (key, old_value) in &deleted {
            let report = ModificationReport { primary_key: key.clone(), old_value: Some(old_value.clone()), new_value: None };
            pipeline.apply_in_txn(&txn, runtimes, &report)?;
        }
    }

    let count = deleted.len();
    txn.commit()?;
    Ok(count)
}

/// Smallest byte string greater than `key`: the exclusive end of the range
/// this pass actually touched.
fn successor(key: &[u8]) -> Vec<u8> {
    let mut next = key.to_vec();
    next.push(0);
    next
}
