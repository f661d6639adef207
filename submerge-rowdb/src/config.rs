/// Tunables named throughout the component design. Kept as plain `Default`
/// fields rather than a file format: just a handful of named constants, no
/// external config surface.
#[derive(Clone, Copy, Debug)]
pub struct StoreConfig {
    /// Bound on keys erased per `reset_data` pass.
    pub max_erased_per_pass: u64,
    /// Chunk size for bounded traversals of a sindex's own tree (clear) or
    /// the primary tree (post-construction catch-up).
    pub sindex_chunk_size: usize,
    /// Bounded parallelism for batched replace/insert fan-out.
    pub max_parallel_ops: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig { max_erased_per_pass: 100, sindex_chunk_size: 32, max_parallel_ops: 10 }
    }
}
