//! An in-memory `ArtificialTableBackend`, the kind of trivial stand-in
//! `artificial_table.cc`'s test suite drives its adapter with. Useful on its
//! own for genuinely ephemeral system tables (job status, server info).

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::artificial_table::ArtificialTableBackend;
use crate::datum::{extract_primary_key, Value};
use crate::error::{Result, StoreError};

pub struct MemoryBackend {
    primary_key_name: String,
    rows: Mutex<BTreeMap<Vec<u8>, Value>>,
}

impl MemoryBackend {
    pub fn new(primary_key_name: impl Into<String>) -> Self {
        MemoryBackend { primary_key_name: primary_key_name.into(), rows: Mutex::new(BTreeMap::new()) }
    }
}

#[async_trait]
impl ArtificialTableBackend for MemoryBackend {
    fn primary_key_name(&self) -> &str {
        &self.primary_key_name
    }

    async fn read_row(&self, primary_key: &Value) -> Result<Option<Value>> {
        let key = primary_key.primary_key_bytes()?;
        Ok(self.rows.lock().get(&key).cloned())
    }

    async fn read_all_rows(&self) -> Result<Vec<Value>> {
        Ok(self.rows.lock().values().cloned().collect())
    }

    async fn write_row(&self, primary_key: &Value, new_value: Option<Value>) -> Result<()> {
        let key = primary_key.primary_key_bytes()?;
        match new_value {
            Some(row) => {
                if extract_primary_key(&row, &self.primary_key_name).as_ref() != Some(primary_key) {
                    return Err(StoreError::UserQueryError("row primary key does not match".to_string()));
                }
                self.rows.lock().insert(key, row);
            }
            None => {
                self.rows.lock().remove(&key);
            }
        }
        Ok(())
    }
}
