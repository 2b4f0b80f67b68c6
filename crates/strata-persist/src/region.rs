//! Per-region persistence handle.
//!
//! [`RegionPersistence`] owns the two change queues of a region and the
//! tasks of its scene worker and terrain writer. The simulation loop feeds
//! it through [`RegionPersistence::enqueue_part`] and
//! [`RegionPersistence::enqueue_terrain`], neither of which blocks.

use std::collections::BTreeMap;
use std::sync::Arc;

use strata_db::{SceneBackend, TerrainBackend};
use strata_types::{GroupId, ObjectGroup, PartChange, RegionId, TerrainChange, TerrainPatch};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::WorkerConfig;
use crate::loader::{GraphLoader, LoadError, RegionLoad};
use crate::queue::ChangeQueue;
use crate::stats::{Pipeline, StatsRegistry};
use crate::terrain::{TerrainWriter, load_terrain};
use crate::worker::SceneWorker;

/// A worker task ended abnormally.
#[derive(Debug, thiserror::Error)]
#[error("{pipeline} worker of region {region} did not shut down cleanly: {source}")]
pub struct ShutdownError {
    /// Region of the failed worker.
    pub region: RegionId,
    /// Pipeline of the failed worker.
    pub pipeline: Pipeline,
    /// Why the task ended.
    pub source: tokio::task::JoinError,
}

/// The stores a region writes to.
#[derive(Clone)]
pub struct RegionStores {
    /// Object group, part, and inventory tables.
    pub scene: Arc<dyn SceneBackend>,
    /// Live and default terrain tables.
    pub terrain: Arc<dyn TerrainBackend>,
}

impl core::fmt::Debug for RegionStores {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegionStores").finish_non_exhaustive()
    }
}

impl RegionStores {
    /// Use one value for both stores.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: SceneBackend + TerrainBackend + 'static,
    {
        Self {
            scene: Arc::clone(&store) as Arc<dyn SceneBackend>,
            terrain: store,
        }
    }
}

/// The running persistence of one region.
#[derive(Debug)]
pub struct RegionPersistence {
    region: RegionId,
    scene_queue: Arc<ChangeQueue<PartChange>>,
    terrain_queue: Arc<ChangeQueue<TerrainChange>>,
    stop: watch::Sender<bool>,
    scene_task: JoinHandle<()>,
    terrain_task: JoinHandle<()>,
    registry: StatsRegistry,
}

impl RegionPersistence {
    /// Spawn both workers of `region` with empty trackers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        region: RegionId,
        stores: RegionStores,
        config: &WorkerConfig,
        registry: &StatsRegistry,
    ) -> Self {
        Self::spawn(region, stores, config, registry, None, &[])
    }

    /// Spawn both workers of `region` with trackers seeded from previously
    /// loaded state, so re-announced unchanged objects are not rewritten.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_seeded(
        region: RegionId,
        stores: RegionStores,
        config: &WorkerConfig,
        registry: &StatsRegistry,
        groups: &BTreeMap<GroupId, ObjectGroup>,
        patches: &[TerrainPatch],
    ) -> Self {
        Self::spawn(region, stores, config, registry, Some(groups), patches)
    }

    /// Load `region` from the store, then spawn its workers seeded with
    /// what was loaded.
    ///
    /// Returns the handle, the reconstructed groups, and the live terrain.
    pub async fn load_and_start(
        region: RegionId,
        stores: RegionStores,
        config: &WorkerConfig,
        registry: &StatsRegistry,
    ) -> Result<(Self, RegionLoad, Vec<TerrainPatch>), LoadError> {
        let load = GraphLoader::new(stores.scene.as_ref(), config.orphan_chunk_size)
            .load(region)
            .await?;
        let patches = load_terrain(stores.terrain.as_ref(), region).await?;
        let handle = Self::start_seeded(region, stores, config, registry, &load.groups, &patches);
        Ok((handle, load, patches))
    }

    fn spawn(
        region: RegionId,
        stores: RegionStores,
        config: &WorkerConfig,
        registry: &StatsRegistry,
        groups: Option<&BTreeMap<GroupId, ObjectGroup>>,
        patches: &[TerrainPatch],
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);

        let scene_queue = Arc::new(ChangeQueue::new(config.queue_capacity));
        let mut scene = SceneWorker::new(region, Arc::clone(&scene_queue), stores.scene, config);
        if let Some(groups) = groups {
            scene.seed(groups.values());
        }
        registry.register(
            region,
            Pipeline::Scene,
            scene.stats(),
            Arc::clone(&scene_queue) as _,
        );

        let terrain_queue = Arc::new(ChangeQueue::new(config.queue_capacity));
        let mut terrain =
            TerrainWriter::new(region, Arc::clone(&terrain_queue), stores.terrain, config);
        terrain.seed(patches);
        registry.register(
            region,
            Pipeline::Terrain,
            terrain.stats(),
            Arc::clone(&terrain_queue) as _,
        );

        let scene_task = tokio::spawn(scene.run(stop_rx.clone()));
        let terrain_task = tokio::spawn(terrain.run(stop_rx));

        info!(region = %region, "Region persistence started");

        Self {
            region,
            scene_queue,
            terrain_queue,
            stop,
            scene_task,
            terrain_task,
            registry: registry.clone(),
        }
    }

    /// Region this handle persists.
    pub const fn region(&self) -> RegionId {
        self.region
    }

    /// Queue a part change without blocking.
    pub fn enqueue_part(&self, change: PartChange) {
        self.scene_queue.enqueue(change);
    }

    /// Queue a terrain change without blocking.
    pub fn enqueue_terrain(&self, change: TerrainChange) {
        self.terrain_queue.enqueue(change);
    }

    /// Signal both workers to stop and wait until they have drained their
    /// queues and flushed.
    pub async fn shutdown(self) -> Result<(), ShutdownError> {
        // Both receivers live as long as their tasks, so a send error only
        // means the tasks already ended; the joins below report why.
        let _ = self.stop.send(true);

        let scene = self.scene_task.await;
        let terrain = self.terrain_task.await;

        self.registry.unregister(self.region, Pipeline::Scene);
        self.registry.unregister(self.region, Pipeline::Terrain);

        scene.map_err(|source| ShutdownError {
            region: self.region,
            pipeline: Pipeline::Scene,
            source,
        })?;
        terrain.map_err(|source| ShutdownError {
            region: self.region,
            pipeline: Pipeline::Terrain,
            source,
        })?;

        info!(region = %self.region, "Region persistence stopped");
        Ok(())
    }
}
