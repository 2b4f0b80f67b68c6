//! The scene write-back worker.
//!
//! One [`SceneWorker`] runs per region. It is the sole consumer of the
//! region's part change queue and the sole owner of its [`DirtyTracker`]
//! and [`SceneBatch`], so none of that state is locked.
//!
//! Every processed change is classified, staged, and followed by a flush
//! check. A flush runs deletes first (items, parts, groups) and then
//! upserts (groups, parts, items). A failed statement is logged and its
//! rows are discarded; the tracker forgets them so the next change to the
//! same entity writes it again.

use std::sync::Arc;
use std::time::Duration;

use strata_db::SceneBackend;
use strata_types::{ObjectGroup, PartChange, RegionId};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::batch::{FlushPlan, SceneBatch};
use crate::config::WorkerConfig;
use crate::queue::{ChangeQueue, Wake, next_change};
use crate::stats::WorkerStats;
use crate::tracker::{Classification, DirtyTracker};

/// Background writer of one region's object groups, parts, and
/// inventories.
pub struct SceneWorker {
    region: RegionId,
    queue: Arc<ChangeQueue<PartChange>>,
    store: Arc<dyn SceneBackend>,
    tracker: DirtyTracker,
    batch: SceneBatch,
    stats: Arc<WorkerStats>,
    poll_interval: Duration,
}

impl core::fmt::Debug for SceneWorker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SceneWorker")
            .field("region", &self.region)
            .field("tracked_parts", &self.tracker.len())
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl SceneWorker {
    /// Create a worker for `region` reading from `queue`.
    pub fn new(
        region: RegionId,
        queue: Arc<ChangeQueue<PartChange>>,
        store: Arc<dyn SceneBackend>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            region,
            queue,
            store,
            tracker: DirtyTracker::new(),
            batch: SceneBatch::new(config.batch_threshold),
            stats: Arc::new(WorkerStats::new()),
            poll_interval: config.poll_interval,
        }
    }

    /// Treat `groups` as already persisted.
    pub fn seed<'a>(&mut self, groups: impl IntoIterator<Item = &'a ObjectGroup>) {
        for group in groups {
            self.tracker.seed(group);
        }
        debug!(
            region = %self.region,
            parts = self.tracker.len(),
            "Scene tracker seeded"
        );
    }

    /// Counters of this worker.
    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Run until stop is signalled, then drain the queue and flush.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!(region = %self.region, "Scene worker started");

        loop {
            match next_change(&self.queue, self.poll_interval, &mut stop).await {
                Wake::Change(change) => {
                    self.process(change);
                    self.flush_due().await;
                }
                Wake::Idle => {}
                Wake::Stop => break,
            }
        }

        let mut drained: u64 = 0;
        while let Some(change) = self.queue.try_dequeue() {
            self.process(change);
            self.flush_due().await;
            drained = drained.saturating_add(1);
        }
        self.flush(FlushPlan {
            deletes: true,
            groups: true,
            parts: true,
            items: true,
        })
        .await;

        info!(
            region = %self.region,
            drained,
            processed = self.stats.processed(),
            failed_flushes = self.stats.failed_flushes(),
            "Scene worker stopped"
        );
    }

    /// Classify one change and stage the resulting writes.
    pub fn process(&mut self, change: PartChange) {
        self.stats.record_processed();

        if change.group.region_id != self.region {
            debug!(
                region = %self.region,
                part = %change.part_id(),
                "Ignoring change for another region"
            );
            return;
        }

        match self.tracker.classify(&change) {
            Classification::Ignore => {}
            Classification::DeletePart(part) => self.batch.delete_part(part),
            Classification::DeleteGroup { group, parts } => {
                self.batch.delete_group(group, &parts);
            }
            Classification::Write(write) => {
                let PartChange {
                    group, mut part, ..
                } = change;
                let inventory = std::mem::take(&mut part.inventory);
                if let Some(rewrite) = write.inventory {
                    self.batch.delete_items(part.id, rewrite.removed);
                    self.batch.stage_items(inventory.items.into_values());
                }
                if write.part {
                    if part.is_root() {
                        self.batch.stage_group(group);
                    }
                    self.batch.stage_part(part);
                }
            }
        }
    }

    /// Flush whatever the batch rules say is due.
    pub async fn flush_due(&mut self) {
        let plan = self.batch.plan(self.queue.is_empty());
        if !plan.is_empty() {
            self.flush(plan).await;
        }
    }

    async fn flush(&mut self, plan: FlushPlan) {
        if plan.deletes {
            self.flush_deletes().await;
        }
        if plan.groups {
            let groups = self.batch.take_groups();
            if !groups.is_empty() {
                match self.store.upsert_groups(&groups).await {
                    Ok(()) => self.flushed("groups", groups.len()),
                    Err(e) => {
                        self.failed("groups", groups.len(), &e);
                        for header in &groups {
                            self.tracker.forget_part(header.root_part_id);
                        }
                    }
                }
            }
        }
        if plan.parts {
            let parts = self.batch.take_parts();
            if !parts.is_empty() {
                match self.store.upsert_parts(self.region, &parts).await {
                    Ok(()) => self.flushed("parts", parts.len()),
                    Err(e) => {
                        self.failed("parts", parts.len(), &e);
                        for part in &parts {
                            self.tracker.forget_part(part.id);
                        }
                    }
                }
            }
        }
        if plan.items {
            let items = self.batch.take_items();
            if !items.is_empty() {
                match self.store.upsert_items(self.region, &items).await {
                    Ok(()) => self.flushed("items", items.len()),
                    Err(e) => {
                        self.failed("items", items.len(), &e);
                        for item in &items {
                            self.tracker.forget_inventory(item.part_id);
                        }
                    }
                }
            }
        }
    }

    /// Deleted rows are settled in the tracker. Failed ones stay owed, so
    /// the next delivery for an affected part issues them again.
    async fn flush_deletes(&mut self) {
        let deletes = self.batch.take_deletes();
        if !deletes.items.is_empty() {
            match self.store.delete_items(&deletes.item_ids()).await {
                Ok(()) => self.flushed("item deletes", deletes.items.len()),
                Err(e) => {
                    self.failed("item deletes", deletes.items.len(), &e);
                    for &(item, part) in &deletes.items {
                        self.tracker.restore_removed(part, item);
                    }
                }
            }
        }
        if !deletes.parts.is_empty() {
            match self.store.delete_parts(&deletes.parts).await {
                Ok(()) => {
                    self.flushed("part deletes", deletes.parts.len());
                    self.tracker.settle_parts(&deletes.parts);
                }
                Err(e) => self.failed("part deletes", deletes.parts.len(), &e),
            }
        }
        if !deletes.groups.is_empty() {
            match self.store.delete_groups(&deletes.groups).await {
                Ok(()) => {
                    self.flushed("group deletes", deletes.groups.len());
                    self.tracker.settle_groups(&deletes.groups);
                }
                Err(e) => self.failed("group deletes", deletes.groups.len(), &e),
            }
        }
    }

    fn flushed(&self, table: &'static str, rows: usize) {
        self.stats.record_flush();
        debug!(region = %self.region, table, rows, "Flushed scene batch");
    }

    fn failed(&self, table: &'static str, rows: usize, err: &strata_db::DbError) {
        self.stats.record_failed_flush();
        error!(
            region = %self.region,
            table,
            rows,
            error = %err,
            "Scene flush failed, batch discarded"
        );
    }
}
