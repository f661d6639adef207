//! Per-shard document storage engine core: a B-tree-backed primary table,
//! secondary index lifecycle (construction, catch-up, teardown), backfill,
//! and an adapter for non-persistent "artificial" tables.

pub mod artificial_table;
pub mod backfill;
pub mod codec;
pub mod config;
pub mod datum;
pub mod error;
pub mod memory_backend;
pub mod postcon;
pub mod progress;
pub mod region;
pub mod reset_data;
pub mod sindex;
pub mod sindex_clear;
pub mod sindex_update;
pub mod store;
pub mod tables;
pub mod token;

pub use artificial_table::{ArtificialTable, ArtificialTableBackend, BatchStats, ConflictBehavior};
pub use config::StoreConfig;
pub use datum::Value;
pub use error::{Result, StoreError};
pub use region::{Region, RegionMap};
pub use store::{Store, SuperblockGuard};
pub use tables::IndexKeyFn;
