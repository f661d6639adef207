//! redb table layout for a single store. One `redb::Database` per shard
//! stands in for the serializer + cache + cache balancer the original
//! store_t is handed by its caller; a handful of named tables inside it
//! stand in for the superblock's block-id slots.

use redb::{MultimapTableDefinition, TableDefinition};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datum::Value;
use crate::region::RegionMap;

/// Primary rows, keyed by the msgpack-encoded primary key (`Value::primary_key_bytes`).
pub const PRIMARY_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("primary");

/// Secondary index catalog, keyed by the index's stable uuid (as its hyphenated
/// string form). Grounds `store_t::sindex_block_t` / the sindex block map.
pub const SINDEX_CATALOG_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sindex_catalog");

/// Single-row metainfo blob: the whole region_map is re-serialized and stored
/// under one fixed key every time it changes (Open Question O5 in DESIGN.md).
pub const METAINFO_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("metainfo");
pub const METAINFO_KEY: &str = "metainfo";

/// Free-standing counters (erase progress, stats) that don't belong in a row table.
pub const STAT_TABLE: TableDefinition<&str, u64> = TableDefinition::new("stats");

/// The metainfo value a region carries once nothing claims it: the seed
/// value for a fresh store, and what `reset_data` writes back over the
/// range it erases.
pub const ZERO_METAINFO: &[u8] = &[];

pub fn sindex_table_name(id: Uuid) -> String {
    format!("sindex_data_{id}")
}

/// A secondary index's own tree: index-key bytes -> set of primary keys
/// sharing that index key (a multimap, since index keys need not be unique).
pub fn sindex_table(name: &str) -> MultimapTableDefinition<'_, &[u8], &[u8]> {
    MultimapTableDefinition::new(name)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SindexState {
    /// Catching up via post-construction; not yet safe to answer reads from.
    Constructing,
    Ready,
    /// Marked for removal; background clear is dropping its tree chunk by chunk.
    Deleting,
}

/// What a secondary index is computed from. The query language that would
/// normally supply an arbitrary function is out of scope here, so indexes
/// are defined over a single top-level document field, the simplified
/// equivalent of a `getField` sindex function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKeyFn {
    Field(String),
}

impl IndexKeyFn {
    /// All index keys a row maps to under this function. Most functions are
    /// single-valued; absent fields contribute no index entry at all, as
    /// `compute_keys` does when the backing expression errors on a row.
    pub fn compute_keys(&self, row: &Value) -> Vec<Value> {
        match self {
            IndexKeyFn::Field(name) => row.get_field(name).cloned().into_iter().collect(),
        }
    }

    /// Whether two key functions would assign the same index keys to every
    /// row. This is the half of `secondary_indexes_are_equivalent`
    /// (btree_store.cc:598-611) that lives on the function itself; the other
    /// half, the `multi` flag, is compared by callers against the full
    /// `SecondaryIndexRecord` (`SindexManager::is_equivalent`), since it's
    /// not something a bare `IndexKeyFn` carries.
    pub fn is_equivalent(&self, other: &IndexKeyFn) -> bool {
        self == other
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecondaryIndexRecord {
    pub id: Uuid,
    pub name: String,
    pub key_fn: IndexKeyFn,
    pub state: SindexState,
    /// Multi indexes may assign more than one key per row; this governs
    /// whether `compute_keys` output is treated as a set of entries for the
    /// same row or an error on more than one key.
    pub multi: bool,
}

pub type Metainfo = RegionMap<Vec<u8>>;
