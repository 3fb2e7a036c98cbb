//! View buffer: fast shared per-episode counters
//!
//! Every content view bumps a counter here instead of writing to SQLite.
//! The reconciler periodically snapshots the counters, persists them and
//! removes the snapshotted keys.
//!
//! Increments that land on a key between its snapshot and its removal are
//! dropped. The counts feed a display metric only, so the undercount is
//! tolerated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::trace;

use crate::error::Result;

/// Shared counter store keyed by episode id
pub trait CounterStore: Send + Sync {
    /// Add one to the episode's pending count, returning the new value
    fn increment(&self, episode_id: i64) -> Result<u64>;

    /// Read every pending count without clearing anything
    fn snapshot(&self) -> Result<HashMap<i64, u64>>;

    /// Drop the given keys
    fn remove_keys(&self, episode_ids: &[i64]) -> Result<()>;
}

/// In-process counter store backed by a sharded map of atomics
#[derive(Default)]
pub struct ViewBuffer {
    counters: DashMap<i64, AtomicU64>,
}

impl ViewBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of episodes with pending views
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Pending count for one episode
    pub fn pending(&self, episode_id: i64) -> u64 {
        self.counters
            .get(&episode_id)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl CounterStore for ViewBuffer {
    fn increment(&self, episode_id: i64) -> Result<u64> {
        // Hot path: existing key only takes a shard read lock
        if let Some(counter) = self.counters.get(&episode_id) {
            return Ok(counter.fetch_add(1, Ordering::Relaxed) + 1);
        }

        let value = self
            .counters
            .entry(episode_id)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        trace!(episode_id, "New view buffer key");
        Ok(value)
    }

    fn snapshot(&self) -> Result<HashMap<i64, u64>> {
        Ok(self
            .counters
            .iter()
            .map(|entry| (*entry.key(), entry.value().load(Ordering::Acquire)))
            .filter(|(_, count)| *count > 0)
            .collect())
    }

    fn remove_keys(&self, episode_ids: &[i64]) -> Result<()> {
        for id in episode_ids {
            self.counters.remove(id);
        }
        Ok(())
    }
}
