//! Background clear of a dropped secondary index's own tree
//! (`clear_sindex_traversal_cb_t` / `store_t::clear_sindex`,
//! btree_store.cc:613-797). Runs in bounded chunks off the home thread so a
//! large index doesn't block new traffic while it's being torn down.

use std::sync::Arc;

use redb::Database;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::sindex::SindexManager;
use crate::tables::sindex_table;

/// Deletes up to `chunk_size` entries from the index's multimap table per
/// pass, yielding between passes, until the table is empty, then drops the
/// table itself and removes the catalog entry. Mirrors the traversal
/// callback's bounded-chunk contract.
pub async fn clear_sindex(
    db: Arc<Database>,
    manager: Arc<SindexManager>,
    id: Uuid,
    table_name: String,
    chunk_size: usize,
) -> Result<()> {
    loop {
        let remaining = {
            let txn = db.begin_write()?;
            let removed = {
                let mut table = txn.open_multimap_table(sindex_table(&table_name))?;
                let keys: Vec<Vec<u8>> = table
                    .iter()?
                    .take(chunk_size)
                    .map(|entry| entry.map(|(k, _)| k.value().to_vec()))
                    .collect::<std::result::Result<_, _>>()?;
                let mut removed = 0usize;
                for key in &keys {
                    let values: Vec<Vec<u8>> = table
                        .get(key.as_slice())?
                        .map(|v| v.map(|v| v.value().to_vec()))
                        .collect::<std::result::Result<_, _>>()?;
                    for value in values {
                        table.remove(key.as_slice(), value.as_slice())?;
                        removed += 1;
                    }
                }
                removed
            };
            txn.commit()?;
            removed
        };

        if remaining == 0 {
            break;
        }
        tokio::task::yield_now().await;
    }

    {
        let txn = db.begin_write()?;
        txn.delete_multimap_table(sindex_table(&table_name))?;
        txn.commit()?;
    }

    manager.finish_drop(id).await?;
    info!(index_id = %id, "secondary index tree fully cleared");
    Ok(())
}

/// Spawns `clear_sindex` onto the drainer, logging rather than propagating a
/// failure: a clear that can't finish this run is safe to retry at the next
/// store open, same as the original's "clearer" surviving a crash mid-clear.
pub fn spawn_clear(
    tracker: &tokio_util::task::TaskTracker,
    db: Arc<Database>,
    manager: Arc<SindexManager>,
    id: Uuid,
    table_name: String,
    chunk_size: usize,
) {
    tracker.spawn(async move {
        if let Err(err) = clear_sindex(db, manager, id, table_name, chunk_size).await {
            warn!(index_id = %id, error = %err, "secondary index clear failed, will retry on next open");
        }
    });
}
