use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use foundation::ids::PartitionId;
use parking_lot::Mutex;
use runtime::metrics::{Counter, SharedMetrics};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::partition::Partition;

type Slot = Arc<OnceCell<Arc<Partition>>>;

/// Process-lifetime partition cache.
///
/// Notes:
/// - Nothing is ever evicted; a cached id is never fetched again.
/// - Each id owns a slot that is filled at most once. Concurrent misses on the
///   same id share one in-flight fetch; a failed fetch leaves the slot empty.
/// - Slots live in a `BTreeMap` so listings come out in id order.
#[derive(Debug, Default)]
pub struct PartitionCache {
    slots: Mutex<BTreeMap<PartitionId, Slot>>,
    metrics: SharedMetrics,
}

impl PartitionCache {
    pub fn new(metrics: SharedMetrics) -> Self {
        Self {
            slots: Mutex::new(BTreeMap::new()),
            metrics,
        }
    }

    fn slot(&self, id: PartitionId) -> Slot {
        self.slots.lock().entry(id).or_default().clone()
    }

    pub fn get(&self, id: PartitionId) -> Option<Arc<Partition>> {
        self.slots.lock().get(&id).and_then(|slot| slot.get().cloned())
    }

    pub fn contains(&self, id: PartitionId) -> bool {
        self.get(id).is_some()
    }

    /// Stores `partition` unless `id` is already filled; returns whether it was stored.
    pub fn put(&self, id: PartitionId, partition: Arc<Partition>) -> bool {
        let stored = self.slot(id).set(partition).is_ok();
        if !stored {
            self.metrics.inc(Counter::CacheRejectedPuts);
            debug!(%id, "partition already cached, put ignored");
        }
        stored
    }

    /// Returns the cached partition, or runs `fetch` to fill the slot.
    ///
    /// Callers that miss while another fetch for the same id is in flight wait
    /// for it instead of starting their own.
    pub async fn get_or_fetch<F, Fut, E>(&self, id: PartitionId, fetch: F) -> Result<Arc<Partition>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Partition, E>>,
    {
        let slot = self.slot(id);
        if let Some(partition) = slot.get() {
            self.metrics.inc(Counter::CacheHits);
            return Ok(partition.clone());
        }

        let fetched = AtomicBool::new(false);
        let flag = &fetched;
        let partition = slot
            .get_or_try_init(move || async move {
                flag.store(true, Ordering::Relaxed);
                fetch().await.map(Arc::new)
            })
            .await?
            .clone();

        if fetched.load(Ordering::Relaxed) {
            self.metrics.inc(Counter::CacheMisses);
            debug!(%id, rows = partition.num_rows(), bytes = partition.size_bytes, "partition cached");
        } else {
            self.metrics.inc(Counter::CacheHits);
        }
        Ok(partition)
    }

    /// Number of filled slots.
    pub fn len(&self) -> usize {
        self.slots.lock().values().filter(|s| s.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cached_ids(&self) -> Vec<PartitionId> {
        self.slots
            .lock()
            .iter()
            .filter(|(_, s)| s.initialized())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn total_bytes(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter_map(|s| s.get())
            .map(|p| p.size_bytes)
            .sum()
    }
}
