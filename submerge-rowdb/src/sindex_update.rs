//! Secondary index update pipeline, grounded on `update_sindexes`
//! (btree_store.cc:425-553).
//!
//! A mod report's index fan-out is applied through the same
//! `redb::WriteTransaction` as the primary-table write that produced it, so
//! the two commit atomically. `redb` only allows one write transaction open
//! at a time, which is also what keeps concurrent writers' index updates in
//! commit order without a separate queue discipline on top.

use std::sync::Arc;

use redb::WriteTransaction;

use crate::datum::Value;
use crate::error::Result;
use crate::sindex::{SindexManager, SindexRuntime};
use crate::tables::sindex_table_name;

#[derive(Clone, Debug)]
pub struct ModificationReport {
    pub primary_key: Vec<u8>,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

pub struct SindexUpdatePipeline {
    manager: Arc<SindexManager>,
}

impl SindexUpdatePipeline {
    pub fn new(manager: Arc<SindexManager>) -> Self {
        SindexUpdatePipeline { manager }
    }

    /// The live (non-deleting) indexes a write should fan out to, snapshotted
    /// before the write transaction that will carry both the primary change
    /// and this fan-out opens.
    pub async fn runtimes_for_write(&self) -> Vec<Arc<SindexRuntime>> {
        self.manager.acquire_all_for_write().await
    }

    /// Applies one mod report to every index in `runtimes`, inside `txn`.
    /// Caller commits `txn` once every report for the write has been applied.
    pub fn apply_in_txn(
        &self,
        txn: &WriteTransaction,
        runtimes: &[Arc<SindexRuntime>],
        report: &ModificationReport,
    ) -> Result<()> {
        for runtime in runtimes {
            let (name, key_fn, multi, table_name) = {
                let record = runtime.record.lock();
                (record.name.clone(), record.key_fn.clone(), record.multi, sindex_table_name(record.id))
            };

            let old_keys = report.old_value.as_ref().map(|v| key_fn.compute_keys(v)).unwrap_or_default();
            let new_keys = report.new_value.as_ref().map(|v| key_fn.compute_keys(v)).unwrap_or_default();

            if !multi && new_keys.len() > 1 {
                tracing::warn!(index_name = %name, "single-valued index function produced multiple keys, skipping row");
                continue;
            }

            let mut table = txn.open_multimap_table(crate::tables::sindex_table(&table_name))?;
            for old_key in &old_keys {
                let bytes = old_key.primary_key_bytes()?;
                table.remove(bytes.as_slice(), report.primary_key.as_slice())?;
            }
            for new_key in &new_keys {
                let bytes = new_key.primary_key_bytes()?;
                table.insert(bytes.as_slice(), report.primary_key.as_slice())?;
            }
        }
        Ok(())
    }
}
