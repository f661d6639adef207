//! Backfill: streaming a consistent snapshot of a region to a new or
//! recovering replica, grounded on `send_backfill` / `receive_backfill` /
//! `throttle_backfill_chunk` / `backfill_chunk_timestamp_t`
//! (btree_store.cc:214-310).
//!
//! Sending takes every live index's `backfill_postcon_lock` in read mode for
//! the duration of the snapshot so post-construction can't drop rows from
//! under a traversal that's already committed to a chunk boundary.
//! Throttling is a token-bucket: the receiver grants credits, the sender
//! blocks once it runs out. The receiver commits every chunk with HARD
//! durability, since a sender that has seen a chunk acknowledged won't
//! re-send it on a later retry.

use std::sync::Arc;

use redb::{Database, Durability};
use tokio::sync::Semaphore;

use crate::datum::Value;
use crate::error::Result;
use crate::region::Region;
use crate::sindex::SindexManager;
use crate::sindex_update::{ModificationReport, SindexUpdatePipeline};
use crate::tables::{IndexKeyFn, PRIMARY_TABLE, SindexState};

/// A single primary row within a backfill chunk, stamped with the recency
/// it was written under (or `None` if the store doesn't track one for it).
#[derive(Clone, Debug)]
pub struct BackfillRow {
    pub key: Vec<u8>,
    pub value: Value,
    pub recency: Option<u64>,
}

/// The timestamp used when a chunk reports no recency at all
/// (`backfill_chunk_timestamp_t::distant_past`).
pub const DISTANT_PAST: u64 = 0;

#[derive(Clone, Debug)]
pub enum BackfillChunk {
    /// A batch of live rows within the backfilled region.
    Rows(Vec<BackfillRow>),
    /// Informs the receiver this key no longer exists (used when the sender
    /// observes a delete racing the snapshot after its chunk boundary).
    Tombstone(Vec<u8>, Option<u64>),
    /// A contiguous sub-range has no data in it at all, distinct from a
    /// tombstoned key: the receiver should erase anything it holds in this
    /// range rather than expect individual per-key tombstones for it.
    DeleteRange(Region),
    /// The sender's secondary index catalog as of this snapshot, so the
    /// receiver's own catalog converges before the region is considered
    /// backfilled.
    Sindexes(Vec<(String, IndexKeyFn, bool)>),
    /// Marks the end of the stream for this region.
    Done,
}

impl BackfillChunk {
    /// The chunk's effective timestamp: the maximum recency among any rows
    /// it reports, or `DISTANT_PAST` if it carries none
    /// (`backfill_chunk_timestamp_t`).
    pub fn effective_timestamp(&self) -> u64 {
        match self {
            BackfillChunk::Rows(rows) => rows.iter().filter_map(|r| r.recency).max().unwrap_or(DISTANT_PAST),
            BackfillChunk::Tombstone(_, recency) => recency.unwrap_or(DISTANT_PAST),
            BackfillChunk::DeleteRange(_) | BackfillChunk::Sindexes(_) | BackfillChunk::Done => DISTANT_PAST,
        }
    }
}

/// Caps how many backfill chunks may be in flight unacknowledged, standing
/// in for `throttle_backfill_chunk`'s credit-based pacing.
pub struct BackfillThrottle {
    credits: Semaphore,
}

impl BackfillThrottle {
    pub fn new(max_in_flight: usize) -> Self {
        BackfillThrottle { credits: Semaphore::new(max_in_flight) }
    }

    /// Blocks until a credit is available, to be released once the receiver
    /// acknowledges the chunk this permit was drawn for.
    pub async fn acquire(&self) -> tokio::sync::SemaphorePermit<'_> {
        self.credits.acquire().await.expect("backfill throttle semaphore never closed")
    }
}

/// Streams `region` out of the primary table in bounded chunks, calling
/// `on_chunk` for each one. `on_chunk` returning an error aborts the send
/// (mirrors the interruptor check between chunks in `send_backfill`). A
/// `Sindexes` chunk carrying the current catalog goes out first so the
/// receiver can start reconciling indexes while rows are still streaming.
pub async fn send_backfill<F>(
    db: Arc<Database>,
    sindexes: Arc<SindexManager>,
    region: Region,
    chunk_size: usize,
    throttle: &BackfillThrottle,
    mut on_chunk: F,
) -> Result<()>
where
    F: FnMut(BackfillChunk) -> Result<()>,
{
    let runtimes = sindexes.list().await;
    let mut guards = Vec::with_capacity(runtimes.len());
    for runtime in &runtimes {
        guards.push(runtime.backfill_postcon_lock.read().await);
    }

    let catalog: Vec<(String, IndexKeyFn, bool)> = runtimes
        .iter()
        .filter(|r| r.state() != SindexState::Deleting)
        .map(|r| {
            let record = r.record.lock();
            (record.name.clone(), record.key_fn.clone(), record.multi)
        })
        .collect();
    on_chunk(BackfillChunk::Sindexes(catalog))?;

    let mut cursor = region.start.clone();
    loop {
        let _permit = throttle.acquire().await;

        let txn = db.begin_read()?;
        let table = txn.open_table(PRIMARY_TABLE)?;
        let mut batch = Vec::with_capacity(chunk_size);
        for entry in table.range::<&[u8]>(cursor.as_slice()..)? {
            let (key, value) = entry?;
            let key_bytes = key.value().to_vec();
            if let Some(end) = &region.end {
                if &key_bytes >= end {
                    break;
                }
            }
            let row: Value = crate::codec::decode(value.value());
            batch.push(BackfillRow { key: key_bytes, value: row, recency: None });
            if batch.len() >= chunk_size {
                break;
            }
        }

        if batch.is_empty() {
            on_chunk(BackfillChunk::Done)?;
            break;
        }
        cursor = {
            let mut next = batch.last().unwrap().key.clone();
            next.push(0);
            next
        };
        on_chunk(BackfillChunk::Rows(batch))?;
    }

    drop(guards);
    Ok(())
}

/// Applies a stream of chunks produced by `send_backfill` into the local
/// primary table (`receive_backfill`). Row and tombstone chunks upsert or
/// remove, `DeleteRange` erases a whole sub-range; all three fan their
/// change out to every live secondary index inside the same write
/// transaction as the primary-table change, and commit with HARD durability.
/// `Sindexes` chunks are handled by the caller (`Store::receive_backfill`),
/// since reconciling the catalog also needs to kick off post-construction
/// for anything new.
pub async fn receive_backfill(db: Arc<Database>, pipeline: Arc<SindexUpdatePipeline>, chunk: BackfillChunk) -> Result<bool> {
    match chunk {
        BackfillChunk::Rows(rows) => {
            let runtimes = pipeline.runtimes_for_write().await;
            let txn = db.begin_write()?;
            txn.set_durability(Durability::Immediate);
            {
                let mut table = txn.open_table(PRIMARY_TABLE)?;
                for row in &rows {
                    let bytes = rmp_serde::to_vec(&row.value)?;
                    table.insert(row.key.as_slice(), bytes.as_slice())?;
                }
            }
            for row in &rows {
                let report =
                    ModificationReport { primary_key: row.key.clone(), old_value: None, new_value: Some(row.value.clone()) };
                pipeline.apply_in_txn(&txn, &runtimes, &report)?;
            }
            txn.commit()?;
            Ok(false)
        }
        BackfillChunk::Tombstone(key, _recency) => {
            let runtimes = pipeline.runtimes_for_write().await;
            let txn = db.begin_write()?;
            txn.set_durability(Durability::Immediate);
            let old_value = {
                let mut table = txn.open_table(PRIMARY_TABLE)?;
                let old = table.get(key.as_slice())?.map(|v| crate::codec::decode::<Value>(v.value()));
                table.remove(key.as_slice())?;
                old
            };
            let report = ModificationReport { primary_key: key, old_value, new_value: None };
            pipeline.apply_in_txn(&txn, &runtimes, &report)?;
            txn.commit()?;
            Ok(false)
        }
        BackfillChunk::DeleteRange(region) => {
            let runtimes = pipeline.runtimes_for_write().await;
            let txn = db.begin_write()?;
            txn.set_durability(Durability::Immediate);
            let removed: Vec<(Vec<u8>, Value)> = {
                let mut table = txn.open_table(PRIMARY_TABLE)?;
                let entries: Vec<(Vec<u8>, Value)> = {
                    let range = match &region.end {
                        Some(end) => table.range::<&[u8]>(region.start.as_slice()..end.as_slice())?,
                        None => table.range::<&[u8]>(region.start.as_slice()..)?,
                    };
                    range
                        .map(|entry| entry.map(|(k, v)| (k.value().to_vec(), crate::codec::decode::<Value>(v.value()))))
                        .collect::<std::result::Result<_, _>>()?
                };
                for (key, _) in &entries {
                    table.remove(key.as_slice())?;
                }
                entries
            };
            for (key, old_value) in &removed {
                let report =
                    ModificationReport { primary_key: key.clone(), old_value: Some(old_value.clone()), new_value: None };
                pipeline.apply_in_txn(&txn, &runtimes, &report)?;
            }
            txn.commit()?;
            Ok(false)
        }
        // Reached only if a caller drives `receive_backfill` directly
        // instead of through `Store::receive_backfill`.
        BackfillChunk::Sindexes(_) => Ok(false),
        BackfillChunk::Done => Ok(true),
    }
}
