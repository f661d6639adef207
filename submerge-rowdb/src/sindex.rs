//! Secondary index catalog, grounded on `btree_store.cc`'s
//! `add_sindex`/`secondary_indexes_are_equivalent`/`set_sindexes`/
//! `mark_index_up_to_date`/`rename_sindex`/`drop_sindex`/
//! `mark_secondary_index_deleted` (lines 570-986).
//!
//! The catalog lives twice: durably in `SINDEX_CATALOG_TABLE`, and as an
//! in-memory map of `Arc<SindexRuntime>` the rest of the store acquires
//! against without going through redb on every read.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use redb::Database;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::progress::ProgressTable;
use crate::tables::{IndexKeyFn, SecondaryIndexRecord, SindexState, SINDEX_CATALOG_TABLE};

/// Runtime handle for one secondary index: the durable record plus the lock
/// that arbitrates backfill against post-construction for this index
/// specifically (`backfill_postcon_lock`).
pub struct SindexRuntime {
    pub record: SyncMutex<SecondaryIndexRecord>,
    pub backfill_postcon_lock: AsyncRwLock<()>,
}

impl SindexRuntime {
    fn new(record: SecondaryIndexRecord) -> Self {
        SindexRuntime { record: SyncMutex::new(record), backfill_postcon_lock: AsyncRwLock::new(()) }
    }

    pub fn name(&self) -> String {
        self.record.lock().name.clone()
    }

    pub fn state(&self) -> SindexState {
        self.record.lock().state
    }
}

pub struct SindexManager {
    db: Arc<Database>,
    by_id: AsyncRwLock<HashMap<Uuid, Arc<SindexRuntime>>>,
    pub progress: ProgressTable,
}

impl SindexManager {
    /// Loads the catalog out of `SINDEX_CATALOG_TABLE` at store open time.
    pub fn load(db: Arc<Database>) -> Result<Self> {
        let mut by_id = HashMap::new();
        let txn = db.begin_read()?;
        if let Ok(table) = txn.open_table(SINDEX_CATALOG_TABLE) {
            for entry in table.iter()? {
                let (_, value) = entry?;
                let record: SecondaryIndexRecord = crate::codec::decode(value.value());
                by_id.insert(record.id, Arc::new(SindexRuntime::new(record)));
            }
        }
        Ok(SindexManager { db, by_id: AsyncRwLock::new(by_id), progress: ProgressTable::default() })
    }

    fn persist(&self, record: &SecondaryIndexRecord) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SINDEX_CATALOG_TABLE)?;
            let bytes = rmp_serde::to_vec(record)?;
            table.insert(record.id.to_string().as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn erase_persisted(&self, id: Uuid) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SINDEX_CATALOG_TABLE)?;
            table.remove(id.to_string().as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub async fn list(&self) -> Vec<Arc<SindexRuntime>> {
        self.by_id.read().await.values().cloned().collect()
    }

    /// A snapshot of the catalog right after `load`, before anything else
    /// could contend for `by_id`. Used at store-open time to find
    /// indexes a prior run left mid-`Constructing`/`Deleting` so their work
    /// can be respawned; a plain `try_read` is safe here because nothing
    /// else holds the store yet.
    pub fn loaded_snapshot(&self) -> Vec<Arc<SindexRuntime>> {
        self.by_id.try_read().expect("uncontended immediately after load").values().cloned().collect()
    }

    pub async fn by_name(&self, name: &str) -> Option<Arc<SindexRuntime>> {
        self.by_id.read().await.values().find(|r| r.name() == name).cloned()
    }

    /// Two definitions are equivalent iff they'd compute the same keys for
    /// every row *and* agree on `multi` (`secondary_indexes_are_equivalent`,
    /// btree_store.cc:598-611). Callers use this to decide whether
    /// `add_sindex` is a genuine create or a no-op.
    pub fn is_equivalent(existing: &SecondaryIndexRecord, proposed: &IndexKeyFn, proposed_multi: bool) -> bool {
        existing.multi == proposed_multi && existing.key_fn.is_equivalent(proposed)
    }

    /// Creates a new index in `Constructing` state. Returns an error if the
    /// name is already taken by a non-equivalent, non-deleting index.
    pub async fn add_sindex(&self, name: &str, key_fn: IndexKeyFn, multi: bool) -> Result<Arc<SindexRuntime>> {
        let mut by_id = self.by_id.write().await;
        if let Some(existing) = by_id.values().find(|r| r.name() == name) {
            let rec = existing.record.lock().clone();
            if rec.state != SindexState::Deleting && Self::is_equivalent(&rec, &key_fn, multi) {
                return Ok(existing.clone());
            }
            return Err(StoreError::UserQueryError(format!("index `{name}` already exists")));
        }
        let record = SecondaryIndexRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            key_fn,
            state: SindexState::Constructing,
            multi,
        };
        self.persist(&record)?;
        let runtime = Arc::new(SindexRuntime::new(record));
        by_id.insert(runtime.record.lock().id, runtime.clone());
        info!(index_name = name, "secondary index created, construction pending");
        Ok(runtime)
    }

    /// Reconciles the catalog to exactly the given desired set of
    /// (name, key_fn, multi), adding what's missing and dropping what's not
    /// wanted and not equivalent (`set_sindexes`, btree_store.cc:~900-960).
    /// Returns the indexes created so callers can kick off post-construction.
    pub async fn set_sindexes(&self, desired: &[(String, IndexKeyFn, bool)]) -> Result<Vec<Arc<SindexRuntime>>> {
        let mut created = Vec::new();
        let existing_names: Vec<String> = {
            let by_id = self.by_id.read().await;
            by_id.values().map(|r| r.name()).collect()
        };

        for (name, key_fn, multi) in desired {
            let keep = {
                let by_id = self.by_id.read().await;
                by_id
                    .values()
                    .find(|r| &r.name() == name)
                    .map(|r| Self::is_equivalent(&r.record.lock(), key_fn, *multi))
                    .unwrap_or(false)
            };
            if !keep {
                created.push(self.add_sindex(name, key_fn.clone(), *multi).await?);
            }
        }

        let desired_names: Vec<&String> = desired.iter().map(|(n, _, _)| n).collect();
        for name in existing_names {
            if !desired_names.iter().any(|d| **d == name) {
                self.drop_sindex(&name).await?;
            }
        }
        Ok(created)
    }

    pub async fn mark_index_up_to_date(&self, name: &str) -> Result<()> {
        let runtime = self.by_name(name).await.ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        let record = {
            let mut record = runtime.record.lock();
            record.state = SindexState::Ready;
            record.clone()
        };
        self.persist(&record)?;
        info!(index_name = name, "secondary index ready");
        Ok(())
    }

    pub async fn rename_sindex(&self, old_name: &str, new_name: &str, overwrite: bool) -> Result<()> {
        let mut by_id = self.by_id.write().await;
        if !overwrite {
            if by_id.values().any(|r| r.name() == new_name) {
                return Err(StoreError::UserQueryError(format!("index `{new_name}` already exists")));
            }
        }
        let runtime = by_id
            .values()
            .find(|r| r.name() == old_name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(old_name.to_string()))?;
        if overwrite {
            if let Some(victim) = by_id.values().find(|r| r.name() == new_name && r.name() != old_name).cloned() {
                let id = victim.record.lock().id;
                by_id.remove(&id);
                self.erase_persisted(id)?;
            }
        }
        let record = {
            let mut record = runtime.record.lock();
            record.name = new_name.to_string();
            record.clone()
        };
        self.persist(&record)?;
        Ok(())
    }

    /// Two-phase drop: mark deleted immediately (so no new reads/writes see
    /// it), then the caller schedules the background clear
    /// (`mark_secondary_index_deleted`, btree_store.cc:~963-986).
    pub async fn drop_sindex(&self, name: &str) -> Result<Arc<SindexRuntime>> {
        let runtime = self.by_name(name).await.ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        let record = {
            let mut record = runtime.record.lock();
            record.state = SindexState::Deleting;
            record.clone()
        };
        self.persist(&record)?;
        warn!(index_name = name, "secondary index marked for deletion");
        Ok(runtime)
    }

    /// Removes an index from both the in-memory map and the catalog table
    /// once its background clear has finished dropping its own tree.
    pub async fn finish_drop(&self, id: Uuid) -> Result<()> {
        self.by_id.write().await.remove(&id);
        self.progress.remove(id);
        self.erase_persisted(id)
    }

    pub fn get_progress(&self, id: Uuid) -> Option<f64> {
        self.progress.fraction(id)
    }

    /// Acquires an index for reading: errors if construction isn't finished
    /// or it's being torn down (`acquire_sindex_for_read`, btree_store.cc
    /// ~988-1040).
    pub async fn acquire_for_read(&self, name: &str) -> Result<Arc<SindexRuntime>> {
        let runtime = self.by_name(name).await.ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        match runtime.state() {
            SindexState::Ready => Ok(runtime),
            SindexState::Constructing => Err(StoreError::sindex_in_construction(name)),
            SindexState::Deleting => Err(StoreError::sindex_being_deleted(name)),
        }
    }

    /// Acquires an index for writing (mod-report application): unlike reads,
    /// both `Constructing` and `Ready` indexes accept writes so post-
    /// construction catch-up and steady-state traffic converge on the same
    /// data (`acquire_sindex_for_write`, btree_store.cc ~1041-1080). Only a
    /// `Deleting` index refuses writes.
    pub async fn acquire_for_write(&self, name: &str) -> Result<Arc<SindexRuntime>> {
        let runtime = self.by_name(name).await.ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        match runtime.state() {
            SindexState::Ready | SindexState::Constructing => Ok(runtime),
            SindexState::Deleting => Err(StoreError::sindex_being_deleted(name)),
        }
    }

    /// Acquires every index currently in the catalog for writing, silently
    /// skipping ones being deleted, the way mod-report application fans out
    /// to every live index rather than one named index
    /// (`acquire_all_sindex_superblocks_for_write`, btree_store.cc ~1100).
    pub async fn acquire_all_for_write(&self) -> Vec<Arc<SindexRuntime>> {
        self.by_id
            .read()
            .await
            .values()
            .filter(|r| r.state() != SindexState::Deleting)
            .cloned()
            .collect()
    }
}
