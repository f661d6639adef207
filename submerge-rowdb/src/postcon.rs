//! Secondary index post-construction: bringing a newly added index up to
//! date with the rows that existed before it was created. Grounded on the
//! construction half of `add_sindex`/`bring_sindexes_up_to_date`
//! (btree_store.cc:570-612) plus the mutual-exclusion contract against
//! backfill over the same index (`backfill_postcon_lock`).
//!
//! Protocol: take the per-index lock in write mode (excluding a concurrent
//! backfill over the same index), walk the primary table in bounded chunks
//! computing and inserting index entries, then mark the index ready. Each
//! chunk reads its slice of the primary table and writes the computed index
//! entries inside the *same* `redb` write transaction, so a row can't change
//! between being read for traversal and its index entry landing: `redb`
//! serializes write transactions, so no concurrent `Store::write` can slip
//! in between the two halves of a chunk.

use std::sync::Arc;

use redb::Database;
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::sindex::SindexManager;
use crate::tables::{sindex_table, sindex_table_name, IndexKeyFn, PRIMARY_TABLE};
use crate::datum::Value;

pub struct PostConstructionDriver {
    db: Arc<Database>,
    manager: Arc<SindexManager>,
    chunk_size: usize,
}

impl PostConstructionDriver {
    pub fn new(db: Arc<Database>, manager: Arc<SindexManager>, chunk_size: usize) -> Self {
        PostConstructionDriver { db, manager, chunk_size }
    }

    pub async fn run(&self, index_id: Uuid, index_name: &str, key_fn: &IndexKeyFn, multi: bool) -> Result<()> {
        let runtime = self
            .manager
            .by_name(index_name)
            .await
            .ok_or_else(|| crate::error::StoreError::NotFound(index_name.to_string()))?;
        let _guard = runtime.backfill_postcon_lock.write().await;

        let tracker = self.manager.progress.tracker_for(index_id);
        tracker.set_total(self.count_primary_rows()?);

        let table_name = sindex_table_name(index_id);
        let mut cursor: Option<Vec<u8>> = None;
        loop {
            let processed = self.traverse_chunk(&table_name, key_fn, multi, index_name, &mut cursor)?;
            tracker.add_done(processed as u64);
            if processed == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        self.manager.mark_index_up_to_date(index_name).await?;
        info!(index_name, "post-construction complete");
        Ok(())
    }

    fn count_primary_rows(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(PRIMARY_TABLE)?;
        Ok(table.len()?)
    }

    /// Processes up to `chunk_size` primary rows starting after `*cursor`,
    /// advancing `*cursor` in place. Returns the number of rows processed;
    /// `0` once the primary table has been exhausted.
    fn traverse_chunk(
        &self,
        table_name: &str,
        key_fn: &IndexKeyFn,
        multi: bool,
        index_name: &str,
        cursor: &mut Option<Vec<u8>>,
    ) -> Result<usize> {
        let txn = self.db.begin_write()?;

        let mut batch: Vec<(Vec<u8>, Value)> = Vec::with_capacity(self.chunk_size);
        {
            let primary = txn.open_table(PRIMARY_TABLE)?;
            let range = match cursor {
                Some(after) => primary.range::<&[u8]>(after.as_slice()..)?,
                None => primary.range::<&[u8]>(..)?,
            };
            let mut skipped_cursor_row = cursor.is_none();
            for entry in range {
                let (key, value) = entry?;
                let key_bytes = key.value().to_vec();
                if !skipped_cursor_row {
                    skipped_cursor_row = true;
                    continue;
                }
                let row: Value = crate::codec::decode(value.value());
                batch.push((key_bytes, row));
                if batch.len() >= self.chunk_size {
                    break;
                }
            }
        }

        if batch.is_empty() {
            txn.commit()?;
            return Ok(0);
        }

        let last_key = batch.last().unwrap().0.clone();
        let processed = batch.len();
        {
            let mut index_table = txn.open_multimap_table(sindex_table(table_name))?;
            for (primary_key, row) in &batch {
                let keys = key_fn.compute_keys(row);
                if !multi && keys.len() > 1 {
                    tracing::warn!(index_name, "single-valued index function produced multiple keys during post-construction, skipping row");
                    continue;
                }
                for index_key in keys {
                    let encoded = index_key.primary_key_bytes()?;
                    index_table.insert(encoded.as_slice(), primary_key.as_slice())?;
                }
            }
        }
        txn.commit()?;

        *cursor = Some(last_key);
        Ok(processed)
    }
}
