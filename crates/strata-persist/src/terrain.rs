//! Terrain write-back and terrain load.
//!
//! [`TerrainWriter`] is the terrain counterpart of the scene worker with a
//! single table and a single serial map. A [`TerrainChange::Snapshot`]
//! flushes pending patches and then copies the region's live terrain into
//! its default terrain with one statement.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use strata_db::{PatchRow, TerrainBackend};
use strata_types::{PatchIndex, RegionId, TerrainChange, TerrainPatch};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::batch::flush_due;
use crate::config::WorkerConfig;
use crate::loader::LoadError;
use crate::queue::{ChangeQueue, Wake, next_change};
use crate::stats::WorkerStats;

/// Background writer of one region's terrain patches.
pub struct TerrainWriter {
    region: RegionId,
    queue: Arc<ChangeQueue<TerrainChange>>,
    store: Arc<dyn TerrainBackend>,
    serials: BTreeMap<PatchIndex, u64>,
    pending: BTreeMap<PatchIndex, TerrainPatch>,
    threshold: usize,
    stats: Arc<WorkerStats>,
    poll_interval: Duration,
}

impl core::fmt::Debug for TerrainWriter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TerrainWriter")
            .field("region", &self.region)
            .field("tracked_patches", &self.serials.len())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl TerrainWriter {
    /// Create a writer for `region` reading from `queue`.
    pub fn new(
        region: RegionId,
        queue: Arc<ChangeQueue<TerrainChange>>,
        store: Arc<dyn TerrainBackend>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            region,
            queue,
            store,
            serials: BTreeMap::new(),
            pending: BTreeMap::new(),
            threshold: config.batch_threshold,
            stats: Arc::new(WorkerStats::new()),
            poll_interval: config.poll_interval,
        }
    }

    /// Treat `patches` as already persisted.
    pub fn seed<'a>(&mut self, patches: impl IntoIterator<Item = &'a TerrainPatch>) {
        for patch in patches {
            self.serials.insert(patch.index, patch.serial);
        }
    }

    /// Counters of this writer.
    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Run until stop is signalled, then drain the queue and flush.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!(region = %self.region, "Terrain writer started");

        loop {
            match next_change(&self.queue, self.poll_interval, &mut stop).await {
                Wake::Change(change) => self.handle(change).await,
                Wake::Idle => {}
                Wake::Stop => break,
            }
        }

        while let Some(change) = self.queue.try_dequeue() {
            self.handle(change).await;
        }
        self.flush_patches().await;

        info!(
            region = %self.region,
            processed = self.stats.processed(),
            failed_flushes = self.stats.failed_flushes(),
            "Terrain writer stopped"
        );
    }

    /// Apply one change and flush if due.
    pub async fn handle(&mut self, change: TerrainChange) {
        self.stats.record_processed();
        match change {
            TerrainChange::Patch(patch) => {
                self.stage(patch);
                if flush_due(self.pending.len(), self.queue.is_empty(), self.threshold) {
                    self.flush_patches().await;
                }
            }
            TerrainChange::Snapshot => {
                self.flush_patches().await;
                self.snapshot().await;
            }
        }
    }

    fn stage(&mut self, patch: TerrainPatch) {
        if patch.region_id != self.region {
            warn!(
                region = %self.region,
                patch_region = %patch.region_id,
                index = %patch.index,
                "Ignoring patch for another region"
            );
            return;
        }
        if self.serials.get(&patch.index) == Some(&patch.serial) {
            return;
        }
        self.serials.insert(patch.index, patch.serial);
        self.pending.insert(patch.index, patch);
    }

    async fn flush_patches(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let patches: Vec<TerrainPatch> = std::mem::take(&mut self.pending).into_values().collect();
        match self.store.upsert_patches(&patches).await {
            Ok(()) => {
                self.stats.record_flush();
                debug!(region = %self.region, rows = patches.len(), "Flushed terrain patches");
            }
            Err(e) => {
                self.stats.record_failed_flush();
                error!(
                    region = %self.region,
                    rows = patches.len(),
                    error = %e,
                    "Terrain flush failed, batch discarded"
                );
                for patch in &patches {
                    self.serials.remove(&patch.index);
                }
            }
        }
    }

    async fn snapshot(&self) {
        match self.store.snapshot_default(self.region).await {
            Ok(copied) => {
                self.stats.record_flush();
                info!(region = %self.region, copied, "Default terrain replaced by live terrain");
            }
            Err(e) => {
                self.stats.record_failed_flush();
                error!(region = %self.region, error = %e, "Default terrain snapshot failed");
            }
        }
    }
}

/// Read a region's live terrain, ordered by patch index.
///
/// Malformed rows are skipped with a warning.
pub async fn load_terrain(
    store: &dyn TerrainBackend,
    region: RegionId,
) -> Result<Vec<TerrainPatch>, LoadError> {
    let rows = store.load_patches(region).await?;
    Ok(parse_patches(region, "live", rows))
}

/// Read a region's default terrain, ordered by patch index.
///
/// Malformed rows are skipped with a warning.
pub async fn load_default_terrain(
    store: &dyn TerrainBackend,
    region: RegionId,
) -> Result<Vec<TerrainPatch>, LoadError> {
    let rows = store.load_default_patches(region).await?;
    Ok(parse_patches(region, "default", rows))
}

fn parse_patches(region: RegionId, table: &'static str, rows: Vec<PatchRow>) -> Vec<TerrainPatch> {
    let mut patches: Vec<TerrainPatch> = rows
        .into_iter()
        .filter_map(|row| {
            let index = row.patch_index;
            match row.into_patch() {
                Ok(patch) => Some(patch),
                Err(e) => {
                    warn!(region = %region, table, index, error = %e, "Skipping malformed terrain row");
                    None
                }
            }
        })
        .collect();
    patches.sort_by_key(|patch| patch.index);
    patches
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use strata_db::{MemoryStore, StatementKind};

    use super::*;

    fn patch(region: RegionId, index: u32, serial: u64) -> TerrainPatch {
        TerrainPatch {
            region_id: region,
            index: PatchIndex(index),
            serial,
            payload: vec![u8::try_from(index).unwrap_or(u8::MAX); 8],
        }
    }

    fn writer(region: RegionId, store: &Arc<MemoryStore>) -> TerrainWriter {
        let store: Arc<dyn TerrainBackend> = Arc::clone(store) as _;
        TerrainWriter::new(
            region,
            Arc::new(ChangeQueue::new(16)),
            store,
            &WorkerConfig::default(),
        )
    }

    #[tokio::test]
    async fn unchanged_serial_is_not_rewritten() {
        let region = RegionId::new();
        let store = Arc::new(MemoryStore::new());
        let mut writer = writer(region, &store);

        writer.handle(TerrainChange::Patch(patch(region, 0, 1))).await;
        writer.handle(TerrainChange::Patch(patch(region, 0, 1))).await;
        writer.handle(TerrainChange::Patch(patch(region, 0, 2))).await;

        assert_eq!(store.statement_count(StatementKind::UpsertPatches), 2);
        assert_eq!(store.patch_rows().len(), 1);
        assert_eq!(store.patch_rows()[0].serial, 2);
    }

    #[tokio::test]
    async fn seeded_patches_are_not_rewritten() {
        let region = RegionId::new();
        let store = Arc::new(MemoryStore::new());
        let mut writer = writer(region, &store);
        let loaded = patch(region, 4, 9);
        writer.seed([&loaded]);

        writer.handle(TerrainChange::Patch(loaded)).await;

        assert!(store.statements().is_empty());
    }

    #[tokio::test]
    async fn failed_flush_is_retried_on_the_same_serial() {
        let region = RegionId::new();
        let store = Arc::new(MemoryStore::new());
        let mut writer = writer(region, &store);

        store.set_unavailable(true);
        writer.handle(TerrainChange::Patch(patch(region, 1, 3))).await;
        store.set_unavailable(false);
        writer.handle(TerrainChange::Patch(patch(region, 1, 3))).await;

        assert_eq!(store.patch_rows().len(), 1);
        assert_eq!(writer.stats().failed_flushes(), 1);
        assert_eq!(writer.stats().flushes(), 1);
    }

    #[tokio::test]
    async fn load_skips_malformed_rows() {
        let region = RegionId::new();
        let store = MemoryStore::new();
        store.insert_patch_row(PatchRow::from_patch(&patch(region, 2, 1)).unwrap());
        store.insert_patch_row(PatchRow::from_patch(&patch(region, 0, 1)).unwrap());
        store.insert_patch_row(PatchRow {
            region_id: region.into_inner(),
            patch_index: -1,
            serial: 1,
            payload: Vec::new(),
        });

        let patches = load_terrain(&store, region).await.unwrap();

        let indexes: Vec<u32> = patches.iter().map(|p| p.index.0).collect();
        assert_eq!(indexes, vec![0, 2]);
        assert!(load_default_terrain(&store, region).await.unwrap().is_empty());
    }
}
