//! Clearance cache
//!
//! Memoizes an item's own clearance per (item, layer). Lookups take the read
//! lock; a miss drops it, computes with no lock held and inserts under the
//! write lock unless another thread got there first. Bulk population
//! computes every block without touching the lock and merges once at the
//! end.

use crate::board::{BoardItem, ItemId, LayerId};
use log::{debug, info};
use rayon::prelude::*;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// Keys handed to one worker task during bulk population
pub const POPULATE_BLOCK_SIZE: usize = 256;

pub type CacheKey = (ItemId, LayerId);

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<CacheKey, i32>,
    /// Layers cached per item, so invalidation never scans other items
    by_item: HashMap<ItemId, Vec<LayerId>>,
}

impl CacheInner {
    /// Insert unless present; returns the value now in the cache
    fn insert_if_absent(&mut self, key: CacheKey, value: i32) -> (i32, bool) {
        match self.entries.entry(key) {
            Entry::Occupied(existing) => (*existing.get(), false),
            Entry::Vacant(slot) => {
                slot.insert(value);
                self.by_item.entry(key.0).or_default().push(key.1);
                (value, true)
            }
        }
    }

    fn remove_item(&mut self, item: ItemId) -> usize {
        let Some(layers) = self.by_item.remove(&item) else {
            return 0;
        };
        layers
            .into_iter()
            .filter(|layer| self.entries.remove(&(item, *layer)).is_some())
            .count()
    }
}

/// Result of a bulk population pass
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PopulateStats {
    /// (item, layer) keys that were missing before the pass
    pub requested: usize,
    pub computed: usize,
    pub inserted: usize,
    pub cancelled: bool,
}

/// Per-(item, layer) clearance memo shared by all resolver threads
#[derive(Debug, Default)]
pub struct ClearanceCache {
    inner: RwLock<CacheInner>,
}

impl ClearanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, item: ItemId, layer: LayerId) -> Option<i32> {
        self.read().entries.get(&(item, layer)).copied()
    }

    /// Cached value, or `compute()` inserted under the first-writer-wins rule
    ///
    /// `compute` runs with no lock held.
    pub fn get_or_compute<F>(&self, item: ItemId, layer: LayerId, compute: F) -> i32
    where
        F: FnOnce() -> i32,
    {
        if let Some(value) = self.get(item, layer) {
            return value;
        }

        let value = compute();

        let (stored, inserted) = self.write().insert_if_absent((item, layer), value);
        if !inserted {
            debug!("[Cache] {} on {} already computed by another thread", item, layer);
        }
        stored
    }

    /// Drop every entry of one item; returns how many were removed
    pub fn invalidate(&self, item: ItemId) -> usize {
        self.write().remove_item(item)
    }

    pub fn clear(&self) {
        let mut inner = self.write();
        inner.entries.clear();
        inner.by_item.clear();
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Layers currently cached for an item
    pub fn cached_layers(&self, item: ItemId) -> Vec<LayerId> {
        self.read().by_item.get(&item).cloned().unwrap_or_default()
    }

    /// Merge computed blocks under a single write lock
    pub fn merge(&self, blocks: Vec<HashMap<CacheKey, i32>>) -> usize {
        let mut inner = self.write();
        let mut inserted = 0;
        for block in blocks {
            for (key, value) in block {
                if inner.insert_if_absent(key, value).1 {
                    inserted += 1;
                }
            }
        }
        inserted
    }

    /// Compute clearances for every connected copper item on each of its
    /// copper layers, in parallel
    ///
    /// `cancel` is checked before each block starts; blocks already running
    /// finish and their results are still merged.
    pub fn pre_populate<F>(&self, items: &[BoardItem], compute: F, cancel: &AtomicBool) -> PopulateStats
    where
        F: Fn(&BoardItem, LayerId) -> i32 + Sync,
    {
        let start = Instant::now();

        let keys: Vec<(&BoardItem, LayerId)> = {
            let inner = self.read();
            items
                .iter()
                .filter(|item| item.is_connected() && !item.is_non_copper())
                .flat_map(|item| {
                    item.layers
                        .iter()
                        .filter(|layer| layer.is_copper())
                        .map(move |layer| (item, layer))
                })
                .filter(|(item, layer)| !inner.entries.contains_key(&(item.id, *layer)))
                .collect()
        };

        let blocks: Vec<Option<HashMap<CacheKey, i32>>> = keys
            .par_chunks(POPULATE_BLOCK_SIZE)
            .map(|block| {
                if cancel.load(Ordering::Relaxed) {
                    return None;
                }
                Some(
                    block
                        .iter()
                        .map(|(item, layer)| ((item.id, *layer), compute(*item, *layer)))
                        .collect(),
                )
            })
            .collect();

        let cancelled = blocks.iter().any(Option::is_none);
        let computed_blocks: Vec<HashMap<CacheKey, i32>> = blocks.into_iter().flatten().collect();
        let computed: usize = computed_blocks.iter().map(HashMap::len).sum();
        let inserted = self.merge(computed_blocks);

        info!(
            "[Cache] Pre-populated {} of {} clearances ({} new) from {} items in {:?}{}",
            computed,
            keys.len(),
            inserted,
            items.len(),
            start.elapsed(),
            if cancelled { " (cancelled)" } else { "" }
        );

        PopulateStats {
            requested: keys.len(),
            computed,
            inserted,
            cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{ItemKind, LayerSet};
    use std::sync::atomic::AtomicUsize;
    use test_log::test;

    fn track(id: u64) -> BoardItem {
        BoardItem::new(id, ItemKind::Track)
            .on_layers(LayerSet::single(LayerId::F_CU).with(LayerId::B_CU))
            .with_net("N", "Default")
    }

    #[test]
    fn test_get_or_compute_first_writer_wins() {
        let cache = ClearanceCache::new();
        assert_eq!(cache.get_or_compute(ItemId(1), LayerId::F_CU, || 100), 100);
        assert_eq!(cache.get_or_compute(ItemId(1), LayerId::F_CU, || 999), 100);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_only_touches_one_item() {
        let cache = ClearanceCache::new();
        cache.get_or_compute(ItemId(1), LayerId::F_CU, || 1);
        cache.get_or_compute(ItemId(1), LayerId::B_CU, || 2);
        cache.get_or_compute(ItemId(2), LayerId::F_CU, || 3);

        assert_eq!(cache.invalidate(ItemId(1)), 2);
        assert_eq!(cache.invalidate(ItemId(1)), 0);
        assert_eq!(cache.get(ItemId(2), LayerId::F_CU), Some(3));
        assert!(cache.cached_layers(ItemId(1)).is_empty());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_pre_populate_skips_unconnected_and_cached() {
        let cache = ClearanceCache::new();
        cache.get_or_compute(ItemId(1), LayerId::F_CU, || 7);

        let unconnected = BoardItem::new(3, ItemKind::Track).on_layer(LayerId::F_CU);
        let silk = BoardItem::new(4, ItemKind::Graphic).on_layer(LayerId::F_SILKS);
        let items = vec![track(1), track(2), unconnected, silk];

        let calls = AtomicUsize::new(0);
        let stats = cache.pre_populate(
            &items,
            |_, _| {
                calls.fetch_add(1, Ordering::Relaxed);
                50
            },
            &AtomicBool::new(false),
        );

        assert_eq!(stats.requested, 3);
        assert_eq!(stats.inserted, 3);
        assert!(!stats.cancelled);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
        assert_eq!(cache.get(ItemId(1), LayerId::F_CU), Some(7));
        assert_eq!(cache.get(ItemId(2), LayerId::B_CU), Some(50));
    }

    #[test]
    fn test_pre_populate_cancelled_before_start() {
        let cache = ClearanceCache::new();
        let items: Vec<BoardItem> = (0..10).map(track).collect();
        let stats = cache.pre_populate(&items, |_, _| 1, &AtomicBool::new(true));
        assert!(stats.cancelled);
        assert_eq!(stats.computed, 0);
        assert!(cache.is_empty());
    }
}
