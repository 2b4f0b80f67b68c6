//! Asynchronous write-back and reconstruction of region state.
//!
//! The simulation loop pushes full-state change notifications for object
//! parts and terrain patches into per-region queues. One scene worker and
//! one terrain writer per region consume them, skip redundant deliveries by
//! comparing change serials, batch the remaining writes, and flush them to
//! the relational store without ever blocking the simulation. On startup
//! the [`loader::GraphLoader`] rebuilds a region's object graph from the
//! store and deletes orphaned rows.
//!
//! # Modules
//!
//! - [`config`] -- YAML configuration and runtime worker tuning.
//! - [`queue`] -- Bounded drop-oldest change queue.
//! - [`tracker`] -- Serial-based dirty tracking for parts and inventories.
//! - [`batch`] -- Pending scene writes and the flush rules.
//! - [`worker`] -- The scene write-back worker.
//! - [`terrain`] -- The terrain writer and terrain load.
//! - [`loader`] -- Region reconstruction and orphan repair.
//! - [`stats`] -- Per-worker counters and the shared registry.
//! - [`region`] -- The per-region handle that runs both workers.

pub mod batch;
pub mod config;
pub mod loader;
pub mod queue;
pub mod region;
pub mod stats;
pub mod terrain;
pub mod tracker;
pub mod worker;

pub use config::{ConfigError, StrataConfig, WorkerConfig};
pub use loader::{GraphLoader, LoadError, RegionLoad, RepairSummary};
pub use queue::ChangeQueue;
pub use region::{RegionPersistence, RegionStores, ShutdownError};
pub use stats::{Pipeline, StatsRegistry, WorkerStatsSnapshot};
pub use terrain::{TerrainWriter, load_default_terrain, load_terrain};
pub use worker::SceneWorker;
