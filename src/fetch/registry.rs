//! Pool registry: every live pool, ordered by priority
//!
//! Active and disabled pools are both kept, so a completion can still find the
//! pool of a task whose pool was disabled while the task was in flight.
//! Retired pools are removed.

use crate::fetch::pool::{FetchPool, PoolStatus};
use crate::fetch::task::PoolId;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct PoolRegistry {
    pools: BTreeMap<PoolId, FetchPool>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up an active pool
    pub fn find(&self, id: &PoolId) -> Option<&FetchPool> {
        self.pools.get(id).filter(|p| p.is_active())
    }

    pub fn find_mut(&mut self, id: &PoolId) -> Option<&mut FetchPool> {
        self.pools.get_mut(id).filter(|p| p.is_active())
    }

    /// Looks up a pool whether it is active or disabled
    pub fn find_extended(&self, id: &PoolId) -> Option<&FetchPool> {
        self.pools.get(id)
    }

    pub fn find_extended_mut(&mut self, id: &PoolId) -> Option<&mut FetchPool> {
        self.pools.get_mut(id)
    }

    /// Returns the active pool for `id`
    ///
    /// A disabled pool is re-enabled; a missing pool is created with `create`.
    pub fn find_or_create_active<F>(&mut self, id: &PoolId, create: F) -> &mut FetchPool
    where
        F: FnOnce() -> FetchPool,
    {
        let pool = self.pools.entry(id.clone()).or_insert_with(|| {
            tracing::debug!("New pool {}", id);
            create()
        });

        if pool.status() == PoolStatus::Disabled {
            tracing::info!("Re-enabling pool {}", id);
            pool.enable();
        }

        pool
    }

    pub fn enable(&mut self, id: &PoolId) -> bool {
        match self.pools.get_mut(id) {
            Some(pool) => {
                pool.enable();
                true
            }
            None => false,
        }
    }

    pub fn disable(&mut self, id: &PoolId) -> bool {
        match self.pools.get_mut(id) {
            Some(pool) => {
                pool.disable();
                true
            }
            None => false,
        }
    }

    /// Retires a pool and removes it from the registry
    ///
    /// Returns the removed pool so the caller can account for its tasks.
    pub fn retire(&mut self, id: &PoolId) -> Option<FetchPool> {
        let mut pool = self.pools.remove(id)?;
        pool.retire();
        Some(pool)
    }

    /// Id of the highest-priority active pool that has ready tasks
    pub fn peek_top_priority(&self) -> Option<&PoolId> {
        self.pools
            .values()
            .find(|p| p.is_active() && p.has_ready_tasks())
            .map(|p| p.id())
    }

    /// True if any pool at or above `priority` has tasks in flight
    pub fn has_pending_at_or_above(&self, priority: i32) -> bool {
        self.pools
            .values()
            .take_while(|p| p.priority() >= priority)
            .any(|p| p.has_pending_tasks())
    }

    /// Highest priority among pools that have tasks in flight
    pub fn max_pending_priority(&self) -> Option<i32> {
        self.pools
            .values()
            .find(|p| p.has_pending_tasks())
            .map(|p| p.priority())
    }

    /// Iterates all pools, highest priority first
    pub fn iter(&self) -> impl Iterator<Item = &FetchPool> {
        self.pools.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FetchPool> {
        self.pools.values_mut()
    }

    pub fn ids(&self) -> Vec<PoolId> {
        self.pools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn ready_total(&self) -> usize {
        self.pools.values().map(|p| p.ready_count()).sum()
    }

    pub fn pending_total(&self) -> usize {
        self.pools.values().map(|p| p.pending_count()).sum()
    }

    pub fn clear(&mut self) {
        self.pools.clear();
    }
}
