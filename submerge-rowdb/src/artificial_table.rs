//! Artificial table adapter, grounded in full on `artificial_table_t`
//! (artificial_table.cc). Lets a non-persistent,
//! application-defined backend (system tables, computed views) answer the
//! same batched replace/insert protocol as a real store, with the same
//! bounded parallelism and per-row error accounting.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::datum::{extract_primary_key, Value};
use crate::error::{Result, StoreError};

/// Backing implementation an artificial table adapts. `artificial_table.cc`
/// is handed a `cfeed_artificial_table_backend_t`; this is its reduced
/// surface once sync, changefeeds and sindexes are out of scope.
#[async_trait]
pub trait ArtificialTableBackend: Send + Sync {
    fn primary_key_name(&self) -> &str;
    async fn read_row(&self, primary_key: &Value) -> Result<Option<Value>>;
    async fn read_all_rows(&self) -> Result<Vec<Value>>;
    /// `new_value = None` deletes; `Some` upserts. Returns an error specific
    /// to this row, not the whole batch, so the caller can keep going.
    async fn write_row(&self, primary_key: &Value, new_value: Option<Value>) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictBehavior {
    Error,
    Replace,
    Update,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchStats {
    pub replaced: u64,
    pub inserted: u64,
    pub unchanged: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl BatchStats {
    fn merge(&mut self, other: BatchStats) {
        self.replaced += other.replaced;
        self.inserted += other.inserted;
        self.unchanged += other.unchanged;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Adapts a `ArtificialTableBackend` to the store's batched write protocol.
/// Every surface this adapter doesn't implement (sync, changefeeds, sindex
/// create/drop/rename, intersecting/nearest geo queries) fails fast, the
/// same way `artificial_table_t` stubs them out rather than implementing them.
pub struct ArtificialTable<B: ArtificialTableBackend> {
    backend: Arc<B>,
    max_parallel_ops: usize,
    interruptor: CancellationToken,
    /// Per-key locks serializing a row's read-decide-write across concurrent
    /// fan-out tasks, so two rows with the same primary key in one batch
    /// can't both read the same "missing" state before either writes.
    key_locks: Arc<AsyncMutex<HashMap<Vec<u8>, Arc<AsyncMutex<()>>>>>,
}

impl<B: ArtificialTableBackend> Clone for ArtificialTable<B> {
    fn clone(&self) -> Self {
        ArtificialTable {
            backend: self.backend.clone(),
            max_parallel_ops: self.max_parallel_ops,
            interruptor: self.interruptor.clone(),
            key_locks: self.key_locks.clone(),
        }
    }
}

impl<B: ArtificialTableBackend + 'static> ArtificialTable<B> {
    pub fn new(backend: Arc<B>, max_parallel_ops: usize, interruptor: CancellationToken) -> Self {
        ArtificialTable { backend, max_parallel_ops, interruptor, key_locks: Arc::new(AsyncMutex::new(HashMap::new())) }
    }

    async fn key_lock_for(&self, key_bytes: Vec<u8>) -> Arc<AsyncMutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks.entry(key_bytes).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    pub async fn read_row(&self, primary_key: &Value) -> Result<Option<Value>> {
        self.backend.read_row(primary_key).await
    }

    pub async fn read_all_rows(&self) -> Result<Vec<Value>> {
        self.backend.read_all_rows().await
    }

    /// One row of a batch: compares the existing row to the proposed one and
    /// applies `conflict_behavior` when both exist (`do_single_update`,
    /// artificial_table.cc).
    async fn do_single_update(
        &self,
        primary_key: Value,
        new_value: Option<Value>,
        conflict_behavior: ConflictBehavior,
    ) -> (BatchStats, Result<()>) {
        let mut stats = BatchStats::default();

        let key_bytes = match primary_key.primary_key_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                stats.errors.push(err.to_string());
                return (stats, Err(err));
            }
        };
        let key_lock = self.key_lock_for(key_bytes).await;
        let _key_guard = key_lock.lock().await;

        let existing = match self.backend.read_row(&primary_key).await {
            Ok(row) => row,
            Err(err) => {
                stats.errors.push(err.to_string());
                return (stats, Err(err));
            }
        };

        let resolved = match (&existing, &new_value) {
            (None, None) => {
                stats.skipped += 1;
                return (stats, Ok(()));
            }
            (None, Some(_)) => {
                stats.inserted += 1;
                new_value
            }
            (Some(_), None) => {
                stats.deleted += 1;
                new_value
            }
            (Some(old), Some(new)) => {
                if old == new {
                    stats.unchanged += 1;
                    return (stats, Ok(()));
                }
                match conflict_behavior {
                    ConflictBehavior::Error => {
                        let err = StoreError::UserQueryError(format!(
                            "duplicate primary key `{}`",
                            self.backend.primary_key_name()
                        ));
                        stats.errors.push(err.to_string());
                        return (stats, Err(err));
                    }
                    ConflictBehavior::Replace => {
                        stats.replaced += 1;
                        new_value
                    }
                    ConflictBehavior::Update => {
                        stats.replaced += 1;
                        Some(merge_update(old, new))
                    }
                }
            }
        };

        if let Some(value) = &resolved {
            debug_assert_eq!(
                extract_primary_key(value, self.backend.primary_key_name()).as_ref(),
                Some(&primary_key),
                "row resolved for a write must carry the primary key it's being written under"
            );
        }

        match self.backend.write_row(&primary_key, resolved).await {
            Ok(()) => (stats, Ok(())),
            Err(err) => {
                stats.errors.push(err.to_string());
                (stats, Err(err))
            }
        }
    }

    /// Applies a batch of row replacements with `MAX_PARALLEL_OPS`-bounded
    /// fan-out (`throttled_pmap` over `do_single_update`,
    /// artificial_table.cc). A per-row failure is recorded in `errors` and
    /// does not stop the rest of the batch.
    pub async fn write_batched_replace(
        &self,
        rows: Vec<Value>,
        conflict_behavior: ConflictBehavior,
    ) -> BatchStats {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel_ops.max(1)));
        let primary_key_name = self.backend.primary_key_name().to_string();

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            if self.interruptor.is_cancelled() {
                break;
            }
            let Some(primary_key) = extract_primary_key(&row, &primary_key_name) else {
                let mut stats = BatchStats::default();
                stats.errors.push(format!("row missing primary key `{primary_key_name}`"));
                tasks.push(tokio::spawn(async move { stats }));
                continue;
            };
            let semaphore = semaphore.clone();
            let this = self.clone();
            let interruptor = self.interruptor.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                // Swallow cancellation here rather than aborting the task: a
                // worker already mid-write finishes it, one not yet started
                // just skips its row. The caller finds out once below.
                if interruptor.is_cancelled() {
                    let mut stats = BatchStats::default();
                    stats.skipped += 1;
                    return stats;
                }
                let (stats, _) = this.do_single_update(primary_key, Some(row), conflict_behavior).await;
                stats
            }));
        }

        let mut total = BatchStats::default();
        for task in tasks {
            match task.await {
                Ok(stats) => total.merge(stats),
                Err(join_err) => total.errors.push(join_err.to_string()),
            }
        }

        if self.interruptor.is_cancelled() {
            total.errors.push("batch was interrupted before every row was processed".to_string());
        }

        total
    }

    /// Like `write_batched_replace`, but rows that already exist are always
    /// an error (`write_batched_insert`, conflict_behavior pinned to
    /// `Error` because insert never overwrites).
    pub async fn write_batched_insert(&self, rows: Vec<Value>) -> BatchStats {
        self.write_batched_replace(rows, ConflictBehavior::Error).await
    }

    pub async fn delete_row(&self, primary_key: &Value) -> Result<()> {
        self.backend.write_row(primary_key, None).await
    }

    // The following all fail fast: the adapter has no query-language,
    // changefeed or sindex machinery behind it, matching artificial_table_t's
    // own stubs for these.
    pub fn sindex_create(&self, _name: &str) -> Result<()> {
        Err(StoreError::UserQueryError("artificial tables do not support secondary indexes".to_string()))
    }

    pub fn sindex_drop(&self, _name: &str) -> Result<()> {
        Err(StoreError::UserQueryError("artificial tables do not support secondary indexes".to_string()))
    }

    pub fn sindex_rename(&self, _old_name: &str, _new_name: &str) -> Result<()> {
        Err(StoreError::UserQueryError("artificial tables do not support secondary indexes".to_string()))
    }

    pub fn changefeed_subscribe(&self) -> Result<()> {
        Err(StoreError::UserQueryError("artificial tables do not support changefeeds".to_string()))
    }

    pub fn sync(&self) -> Result<()> {
        Err(StoreError::UserQueryError("artificial tables have nothing to sync".to_string()))
    }

    pub fn get_nearest(&self, _center: &Value, _max_results: usize) -> Result<Vec<Value>> {
        Err(StoreError::UserQueryError("artificial tables do not support geo queries".to_string()))
    }

    pub fn get_intersecting(&self, _region: &Value) -> Result<Vec<Value>> {
        Err(StoreError::UserQueryError("artificial tables do not support geo queries".to_string()))
    }
}

/// Shallow field-wise merge used by `ConflictBehavior::Update`: fields
/// present in `new` override `old`; fields only in `old` are kept.
fn merge_update(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(old_fields), Value::Object(new_fields)) => {
            let mut merged = old_fields.clone();
            for (k, v) in new_fields {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        _ => new.clone(),
    }
}
