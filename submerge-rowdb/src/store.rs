//! The store: ties superblock acquisition, metainfo, the primary tree, the
//! secondary index catalog and backfill together into one per-shard handle,
//! grounded on `store_t`'s public surface (btree_store.cc, the constructor
//! at lines 62-155 and the acquire_superblock_for_* family at 1315-1379).

use std::path::Path;
use std::sync::Arc;

use redb::Database;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::backfill::{self, BackfillChunk, BackfillThrottle};
use crate::codec;
use crate::config::StoreConfig;
use crate::datum::Value;
use crate::error::{Result, StoreError};
use crate::postcon::PostConstructionDriver;
use crate::region::Region;
use crate::reset_data;
use crate::sindex::{SindexManager, SindexRuntime};
use crate::sindex_clear;
use crate::sindex_update::{ModificationReport, SindexUpdatePipeline};
use crate::tables::{
    sindex_table_name, IndexKeyFn, Metainfo, SindexState, METAINFO_KEY, METAINFO_TABLE, PRIMARY_TABLE, STAT_TABLE,
    ZERO_METAINFO,
};
use crate::token::{Token, TokenSource, TurnGuard};

const ROW_COUNT_STAT: &str = "row_count";

pub struct Store {
    db: Arc<Database>,
    tokens: TokenSource,
    sindexes: Arc<SindexManager>,
    update_pipeline: Arc<SindexUpdatePipeline>,
    postcon: Arc<PostConstructionDriver>,
    config: StoreConfig,
    drainer: TaskTracker,
    interruptor: CancellationToken,
}

/// A FIFO-ordered handle on the store's superblock, held for the duration of
/// one read, write or backfill operation. Releasing it (drop) lets the next
/// queued operation proceed.
pub struct SuperblockGuard {
    _turn: TurnGuard,
}

impl Store {
    pub fn create(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let db = Database::create(path)?;
        Self::from_database(db, config)
    }

    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let db = Database::open(path)?;
        Self::from_database(db, config)
    }

    fn from_database(db: Database, config: StoreConfig) -> Result<Self> {
        let db = Arc::new(db);

        // Ensure every table exists so a fresh store has a well-formed
        // empty universe from the first transaction onward.
        {
            let txn = db.begin_write()?;
            txn.open_table(PRIMARY_TABLE)?;
            txn.open_table(crate::tables::SINDEX_CATALOG_TABLE)?;
            txn.open_table(STAT_TABLE)?;
            let mut metainfo_table = txn.open_table(METAINFO_TABLE)?;
            if metainfo_table.get(METAINFO_KEY)?.is_none() {
                let initial: Metainfo = Metainfo::single(ZERO_METAINFO.to_vec());
                let bytes = rmp_serde::to_vec(&initial)?;
                metainfo_table.insert(METAINFO_KEY, bytes.as_slice())?;
            }
            drop(metainfo_table);
            txn.commit()?;
        }

        let sindexes = Arc::new(SindexManager::load(db.clone())?);
        let update_pipeline = Arc::new(SindexUpdatePipeline::new(sindexes.clone()));
        let postcon = Arc::new(PostConstructionDriver::new(db.clone(), sindexes.clone(), config.sindex_chunk_size));
        let drainer = TaskTracker::new();

        // A prior run may have crashed mid-construction or mid-deletion of an
        // index; its state survives in the catalog but the task that was
        // driving it didn't. Resume both here before the store takes traffic.
        for runtime in sindexes.loaded_snapshot() {
            let (id, name, key_fn, multi, state) = {
                let record = runtime.record.lock();
                (record.id, record.name.clone(), record.key_fn.clone(), record.multi, record.state)
            };
            match state {
                SindexState::Constructing => {
                    let postcon = postcon.clone();
                    drainer.spawn(async move {
                        if let Err(err) = postcon.run(id, &name, &key_fn, multi).await {
                            tracing::warn!(index_name = %name, error = %err, "post-construction failed");
                        }
                    });
                }
                SindexState::Deleting => {
                    let table_name = sindex_table_name(id);
                    sindex_clear::spawn_clear(&drainer, db.clone(), sindexes.clone(), id, table_name, config.sindex_chunk_size);
                }
                SindexState::Ready => {}
            }
        }

        info!("store opened");
        Ok(Store {
            db,
            tokens: TokenSource::new(),
            sindexes,
            update_pipeline,
            postcon,
            config,
            drainer,
            interruptor: CancellationToken::new(),
        })
    }

    pub fn new_read_token(&self) -> Token {
        self.tokens.new_token()
    }

    pub fn new_write_token(&self) -> Token {
        self.tokens.new_token()
    }

    pub async fn acquire_superblock_for_read(&self, token: Token) -> Result<SuperblockGuard> {
        self.acquire(token).await
    }

    /// `expected_change_count` is a cache-reservation hint in the original
    /// (a dirty-page budget for the transaction about to open); `redb`
    /// doesn't take one, so it's accepted for interface fidelity and
    /// otherwise unused (Open Question O3).
    pub async fn acquire_superblock_for_write(&self, token: Token, _expected_change_count: u64) -> Result<SuperblockGuard> {
        self.acquire(token).await
    }

    pub async fn acquire_superblock_for_backfill(&self, token: Token) -> Result<SuperblockGuard> {
        self.acquire(token).await
    }

    async fn acquire(&self, token: Token) -> Result<SuperblockGuard> {
        if self.interruptor.is_cancelled() {
            return Err(StoreError::Interrupted);
        }
        let turn = self.tokens.wait_turn(token).await;
        Ok(SuperblockGuard { _turn: turn })
    }

    pub fn read(&self, _guard: &SuperblockGuard, key: &Value) -> Result<Option<Value>> {
        let key_bytes = key.primary_key_bytes()?;
        let txn = self.db.begin_read()?;
        let table = txn.open_table(PRIMARY_TABLE)?;
        match table.get(key_bytes.as_slice())? {
            Some(value) => Ok(Some(codec::decode(value.value()))),
            None => Ok(None),
        }
    }

    /// Writes (or deletes, when `new_value` is `None`) a row, then fans the
    /// change out to every live secondary index in commit order
    /// (`update_sindexes`).
    pub async fn write(&self, _guard: &SuperblockGuard, key: &Value, new_value: Option<Value>) -> Result<()> {
        let key_bytes = key.primary_key_bytes()?;
        let runtimes = self.update_pipeline.runtimes_for_write().await;

        let txn = self.db.begin_write()?;
        let old_value = {
            let mut table = txn.open_table(PRIMARY_TABLE)?;
            let old = table.get(key_bytes.as_slice())?.map(|v| codec::decode::<Value>(v.value()));
            match &new_value {
                Some(v) => {
                    let bytes = rmp_serde::to_vec(v)?;
                    table.insert(key_bytes.as_slice(), bytes.as_slice())?;
                }
                None => {
                    table.remove(key_bytes.as_slice())?;
                }
            }
            old
        };
        let delta: i64 = match (&old_value, &new_value) {
            (None, Some(_)) => 1,
            (Some(_), None) => -1,
            _ => 0,
        };
        if delta != 0 {
            let mut stats = txn.open_table(STAT_TABLE)?;
            let current = stats.get(ROW_COUNT_STAT)?.map(|v| v.value()).unwrap_or(0);
            let updated = (current as i64 + delta).max(0) as u64;
            stats.insert(ROW_COUNT_STAT, updated)?;
        }

        let report = ModificationReport { primary_key: key_bytes, old_value, new_value };
        self.update_pipeline.apply_in_txn(&txn, &runtimes, &report)?;

        txn.commit()?;
        Ok(())
    }

    /// Live row count, maintained incrementally in `STAT_TABLE` as writes
    /// land rather than recomputed by scanning the primary tree.
    pub fn row_count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(STAT_TABLE)?;
        Ok(table.get(ROW_COUNT_STAT)?.map(|v| v.value()).unwrap_or(0))
    }

    pub fn get_metainfo(&self) -> Result<Metainfo> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(METAINFO_TABLE)?;
        let bytes = table.get(METAINFO_KEY)?.ok_or_else(|| StoreError::NotFound("metainfo".to_string()))?;
        Ok(codec::decode(bytes.value()))
    }

    /// Replaces the portion of the metainfo covering `region` with `value`,
    /// the region-algebra half of `update_metainfo`.
    pub fn update_metainfo(&self, region: &Region, value: Vec<u8>) -> Result<()> {
        let mut metainfo = self.get_metainfo()?;
        metainfo.set(region, value);
        submerge_base::guarantee!(metainfo.is_universe_domain(), "metainfo lost universe coverage after set");
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(METAINFO_TABLE)?;
            let bytes = rmp_serde::to_vec(&metainfo)?;
            table.insert(METAINFO_KEY, bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub async fn reset_data(&self, region: Region) -> Result<u64> {
        reset_data::reset_data(
            self.db.clone(),
            self.sindexes.clone(),
            self.update_pipeline.clone(),
            &self.drainer,
            region,
            self.config.max_erased_per_pass,
            self.config.sindex_chunk_size,
        )
        .await
    }

    pub async fn add_sindex(&self, name: &str, key_fn: IndexKeyFn, multi: bool) -> Result<()> {
        let runtime = self.sindexes.add_sindex(name, key_fn.clone(), multi).await?;
        self.spawn_postcon(runtime, key_fn, multi);
        Ok(())
    }

    pub async fn set_sindexes(&self, desired: &[(String, IndexKeyFn, bool)]) -> Result<()> {
        let created = self.sindexes.set_sindexes(desired).await?;
        for runtime in created {
            let (key_fn, multi) = {
                let record = runtime.record.lock();
                (record.key_fn.clone(), record.multi)
            };
            self.spawn_postcon(runtime, key_fn, multi);
        }
        Ok(())
    }

    fn spawn_postcon(&self, runtime: Arc<SindexRuntime>, key_fn: IndexKeyFn, multi: bool) {
        let postcon = self.postcon.clone();
        let (id, name) = {
            let record = runtime.record.lock();
            (record.id, record.name.clone())
        };
        self.drainer.spawn(async move {
            if let Err(err) = postcon.run(id, &name, &key_fn, multi).await {
                tracing::warn!(index_name = %name, error = %err, "post-construction failed");
            }
        });
    }

    pub async fn rename_sindex(&self, old_name: &str, new_name: &str, overwrite: bool) -> Result<()> {
        self.sindexes.rename_sindex(old_name, new_name, overwrite).await
    }

    pub async fn drop_sindex(&self, name: &str) -> Result<()> {
        let runtime = self.sindexes.drop_sindex(name).await?;
        let id = runtime.record.lock().id;
        let table_name = sindex_table_name(id);
        sindex_clear::spawn_clear(
            &self.drainer,
            self.db.clone(),
            self.sindexes.clone(),
            id,
            table_name,
            self.config.sindex_chunk_size,
        );
        Ok(())
    }

    pub async fn sindex_list(&self) -> Vec<String> {
        self.sindexes.list().await.into_iter().map(|r| r.name()).collect()
    }

    pub async fn sindex_read(&self, name: &str, index_key: &Value) -> Result<Vec<Value>> {
        let runtime = self.sindexes.acquire_for_read(name).await?;
        let table_name = {
            let record = runtime.record.lock();
            sindex_table_name(record.id)
        };
        let index_key_bytes = index_key.primary_key_bytes()?;
        let txn = self.db.begin_read()?;
        let table = txn.open_multimap_table(crate::tables::sindex_table(&table_name))?;
        let primary_keys: Vec<Vec<u8>> = table
            .get(index_key_bytes.as_slice())?
            .map(|v| v.map(|v| v.value().to_vec()))
            .collect::<std::result::Result<_, _>>()?;

        let primary = txn.open_table(PRIMARY_TABLE)?;
        let mut rows = Vec::with_capacity(primary_keys.len());
        for key in primary_keys {
            if let Some(value) = primary.get(key.as_slice())? {
                rows.push(codec::decode(value.value()));
            }
        }
        Ok(rows)
    }

    pub async fn send_backfill<F>(&self, region: Region, throttle: &BackfillThrottle, on_chunk: F) -> Result<()>
    where
        F: FnMut(BackfillChunk) -> Result<()>,
    {
        backfill::send_backfill(
            self.db.clone(),
            self.sindexes.clone(),
            region,
            self.config.sindex_chunk_size,
            throttle,
            on_chunk,
        )
        .await
    }

    pub async fn receive_backfill(&self, chunk: BackfillChunk) -> Result<bool> {
        if let BackfillChunk::Sindexes(desired) = chunk {
            self.set_sindexes(&desired).await?;
            return Ok(false);
        }
        backfill::receive_backfill(self.db.clone(), self.update_pipeline.clone(), chunk).await
    }

    /// Signals every background task (clears, post-constructions) to stop
    /// taking new work and waits for in-flight ones to finish.
    pub async fn close(self) {
        self.interruptor.cancel();
        self.drainer.close();
        self.drainer.wait().await;
    }

    /// Fraction of post-construction complete for the named index, or
    /// `None` if no such index exists.
    pub async fn sindex_progress(&self, name: &str) -> Option<f64> {
        let runtime = self.sindexes.by_name(name).await?;
        let id = runtime.record.lock().id;
        self.sindexes.get_progress(id)
    }
}
