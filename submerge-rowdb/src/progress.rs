//! Progress tracking for long-running background work (post-construction,
//! backfill), consumed by `send_backfill`'s `progress` parameter. Tracked
//! per secondary index id; not persisted, since it's only ever read by an
//! operator polling the current run, not reconstructed across a restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct ProgressTracker {
    done: AtomicU64,
    total: AtomicU64,
}

impl ProgressTracker {
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    pub fn add_done(&self, n: u64) {
        self.done.fetch_add(n, Ordering::SeqCst);
    }

    /// Fraction complete in `[0.0, 1.0]`. `1.0` when total is unknown (zero),
    /// matching "nothing left to report" rather than dividing by zero.
    pub fn fraction(&self) -> f64 {
        let total = self.total.load(Ordering::SeqCst);
        if total == 0 {
            return 1.0;
        }
        (self.done.load(Ordering::SeqCst) as f64 / total as f64).min(1.0)
    }
}

#[derive(Default)]
pub struct ProgressTable {
    trackers: Mutex<HashMap<Uuid, Arc<ProgressTracker>>>,
}

impl ProgressTable {
    pub fn tracker_for(&self, id: Uuid) -> Arc<ProgressTracker> {
        self.trackers.lock().entry(id).or_insert_with(|| Arc::new(ProgressTracker::default())).clone()
    }

    pub fn fraction(&self, id: Uuid) -> Option<f64> {
        self.trackers.lock().get(&id).map(|t| t.fraction())
    }

    pub fn remove(&self, id: Uuid) {
        self.trackers.lock().remove(&id);
    }
}
