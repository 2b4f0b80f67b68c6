//! Per-worker counters for monitoring and health checks.
//!
//! Each worker owns an `Arc<WorkerStats>` it bumps with relaxed atomics;
//! the [`StatsRegistry`] pairs those counters with a probe of the worker's
//! queue so a health endpoint can read every region at once.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use strata_types::RegionId;

use crate::queue::QueueProbe;

/// The two write-back pipelines of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pipeline {
    /// Object groups, parts, and inventories.
    Scene,
    /// Terrain patches.
    Terrain,
}

impl core::fmt::Display for Pipeline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Scene => f.write_str("scene"),
            Self::Terrain => f.write_str("terrain"),
        }
    }
}

/// Counters updated by one worker.
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    flushes: AtomicU64,
    failed_flushes: AtomicU64,
}

impl WorkerStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one dequeued change.
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one successful store statement.
    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one failed store statement.
    pub fn record_failed_flush(&self) {
        self.failed_flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Changes dequeued so far.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Successful store statements so far.
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Failed store statements so far.
    pub fn failed_flushes(&self) -> u64 {
        self.failed_flushes.load(Ordering::Relaxed)
    }
}

/// Point-in-time copy of one worker's statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    /// Region the worker persists.
    pub region: RegionId,
    /// Pipeline the worker runs.
    pub pipeline: Pipeline,
    /// Changes waiting in the queue.
    pub queue_depth: usize,
    /// Changes dequeued so far.
    pub processed: u64,
    /// Changes dropped because the queue was full.
    pub dropped: u64,
    /// Kills and snapshots among `dropped`; each one is state lost for good.
    pub dropped_terminal: u64,
    /// Successful store statements.
    pub flushes: u64,
    /// Failed store statements.
    pub failed_flushes: u64,
}

type Entry = (Arc<WorkerStats>, Arc<dyn QueueProbe>);

/// Shared registry of running workers, keyed by region and pipeline.
///
/// Cloning is cheap; every clone sees the same registrations.
#[derive(Clone, Default)]
pub struct StatsRegistry {
    workers: Arc<RwLock<BTreeMap<(RegionId, Pipeline), Entry>>>,
}

impl core::fmt::Debug for StatsRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("StatsRegistry")
            .field("workers", &workers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StatsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker, replacing any previous registration for the same
    /// region and pipeline.
    pub fn register(
        &self,
        region: RegionId,
        pipeline: Pipeline,
        stats: Arc<WorkerStats>,
        queue: Arc<dyn QueueProbe>,
    ) {
        self.workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((region, pipeline), (stats, queue));
    }

    /// Remove a worker's registration.
    pub fn unregister(&self, region: RegionId, pipeline: Pipeline) {
        self.workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(region, pipeline));
    }

    /// Statistics of every registered worker, ordered by region then
    /// pipeline.
    pub fn snapshot(&self) -> Vec<WorkerStatsSnapshot> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(&(region, pipeline), (stats, queue))| WorkerStatsSnapshot {
                region,
                pipeline,
                queue_depth: queue.depth(),
                processed: stats.processed(),
                dropped: queue.dropped(),
                dropped_terminal: queue.dropped_terminal(),
                flushes: stats.flushes(),
                failed_flushes: stats.failed_flushes(),
            })
            .collect()
    }

    /// Statistics of one worker, if registered.
    pub fn get(&self, region: RegionId, pipeline: Pipeline) -> Option<WorkerStatsSnapshot> {
        self.snapshot()
            .into_iter()
            .find(|s| s.region == region && s.pipeline == pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ChangeQueue;

    #[test]
    fn snapshot_combines_counters_and_queue() {
        let registry = StatsRegistry::new();
        let region = RegionId::new();
        let stats = Arc::new(WorkerStats::new());
        let queue = Arc::new(ChangeQueue::<u8>::new(2));

        registry.register(region, Pipeline::Scene, Arc::clone(&stats), Arc::clone(&queue) as _);
        for i in 0..3_u8 {
            queue.enqueue(i);
        }
        stats.record_processed();
        stats.record_flush();
        stats.record_failed_flush();

        let snapshot = registry.get(region, Pipeline::Scene);
        assert_eq!(
            snapshot,
            Some(WorkerStatsSnapshot {
                region,
                pipeline: Pipeline::Scene,
                queue_depth: 2,
                processed: 1,
                dropped: 1,
                dropped_terminal: 0,
                flushes: 1,
                failed_flushes: 1,
            })
        );
        assert!(registry.get(region, Pipeline::Terrain).is_none());
    }

    #[test]
    fn unregister_removes_the_worker() {
        let registry = StatsRegistry::new();
        let region = RegionId::new();
        let queue: Arc<ChangeQueue<u8>> = Arc::new(ChangeQueue::new(4));
        registry.register(region, Pipeline::Terrain, Arc::new(WorkerStats::new()), queue);

        let clone = registry.clone();
        assert_eq!(clone.snapshot().len(), 1);
        registry.unregister(region, Pipeline::Terrain);
        assert!(clone.snapshot().is_empty());
    }

    #[test]
    fn pipelines_display_lowercase() {
        assert_eq!(Pipeline::Scene.to_string(), "scene");
        assert_eq!(Pipeline::Terrain.to_string(), "terrain");
    }
}
